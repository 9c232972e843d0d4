use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "1.0";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralKind {
    Systick,
    Gpio,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: PeripheralKind,
    /// Checkpoint name; the peripheral is not checkpointed when absent.
    #[serde(default)]
    pub checkpoint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SnapshotPolicy {
    /// Directory holding `snapshot_<name>.bin` files.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub load_on_startup: bool,
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            load_on_startup: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SystemManifest {
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub peripherals: Vec<PeripheralConfig>,
    #[serde(default)]
    pub snapshot: SnapshotPolicy,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Unsupported schema_version '{0}'. Supported versions: '1.0'")]
    UnsupportedVersion(String),
    #[error("Peripheral id cannot be empty")]
    EmptyId,
    #[error("Duplicate peripheral id '{0}'")]
    DuplicateId(String),
    #[error("Invalid checkpoint name '{0}'")]
    InvalidCheckpointName(String),
    #[error("Duplicate checkpoint name '{0}'")]
    DuplicateCheckpointName(String),
}

impl SystemManifest {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let f = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open system manifest at {:?}", path.as_ref()))?;
        let manifest: Self =
            serde_yaml::from_reader(f).context("Failed to parse System Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let manifest: Self =
            serde_yaml::from_str(yaml).context("Failed to parse System Manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ManifestError::UnsupportedVersion(
                self.schema_version.clone(),
            ));
        }

        let mut ids = HashSet::new();
        let mut checkpoints = HashSet::new();
        for p in &self.peripherals {
            if p.id.trim().is_empty() {
                return Err(ManifestError::EmptyId);
            }
            if !ids.insert(p.id.as_str()) {
                return Err(ManifestError::DuplicateId(p.id.clone()));
            }
            if let Some(name) = &p.checkpoint {
                if !is_valid_checkpoint_name(name) {
                    return Err(ManifestError::InvalidCheckpointName(name.clone()));
                }
                if !checkpoints.insert(name.as_str()) {
                    return Err(ManifestError::DuplicateCheckpointName(name.clone()));
                }
            }
        }

        Ok(())
    }
}

/// Checkpoint names become part of a file name, so they must be a single
/// non-empty path component.
pub fn is_valid_checkpoint_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_manifest() {
        let yaml = r#"
schema_version: "1.0"
name: "demo-board"
peripherals:
  - id: systick
    type: systick
    checkpoint: systick0
  - id: gpioa
    type: gpio
snapshot:
  directory: "snapshots"
  load_on_startup: true
"#;
        let manifest = SystemManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.name, "demo-board");
        assert_eq!(manifest.peripherals.len(), 2);
        assert_eq!(manifest.peripherals[0].r#type, PeripheralKind::Systick);
        assert_eq!(manifest.peripherals[0].checkpoint.as_deref(), Some("systick0"));
        assert!(manifest.peripherals[1].checkpoint.is_none());
        assert_eq!(manifest.snapshot.directory, PathBuf::from("snapshots"));
        assert!(manifest.snapshot.load_on_startup);
    }

    #[test]
    fn test_snapshot_policy_defaults() {
        let yaml = r#"
schema_version: "1.0"
name: "bare"
"#;
        let manifest = SystemManifest::from_yaml(yaml).unwrap();
        assert_eq!(manifest.snapshot.directory, PathBuf::from("."));
        assert!(!manifest.snapshot.load_on_startup);
        assert!(manifest.peripherals.is_empty());
    }

    #[test]
    fn test_invalid_version() {
        let yaml = r#"
schema_version: "2.0"
name: "demo"
"#;
        let err = SystemManifest::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("Unsupported schema_version"));
    }

    #[test]
    fn test_duplicate_checkpoint_name() {
        let yaml = r#"
schema_version: "1.0"
name: "demo"
peripherals:
  - id: gpioa
    type: gpio
    checkpoint: port
  - id: gpiob
    type: gpio
    checkpoint: port
"#;
        let manifest: SystemManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicateCheckpointName("port".to_string()))
        );
    }

    #[test]
    fn test_duplicate_peripheral_id() {
        let yaml = r#"
schema_version: "1.0"
name: "demo"
peripherals:
  - id: gpioa
    type: gpio
  - id: gpioa
    type: systick
"#;
        let manifest: SystemManifest = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            manifest.validate(),
            Err(ManifestError::DuplicateId("gpioa".to_string()))
        );
    }

    #[test]
    fn test_unknown_peripheral_type() {
        let yaml = r#"
schema_version: "1.0"
name: "demo"
peripherals:
  - id: uart1
    type: uart
"#;
        assert!(SystemManifest::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_checkpoint_name_rules() {
        assert!(is_valid_checkpoint_name("systick0"));
        assert!(!is_valid_checkpoint_name(""));
        assert!(!is_valid_checkpoint_name(".."));
        assert!(!is_valid_checkpoint_name("a/b"));
    }
}
