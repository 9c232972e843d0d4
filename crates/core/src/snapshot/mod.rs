//! System-wide checkpoint/restore.
//!
//! A [`Snapshotter`] keeps an ordered registry of [`Snapshotable`]
//! participants and drives their record/restore hooks while the simulation
//! is quiescent. Each participant persists to its own
//! `snapshot_<name>.bin` file in the snapshot directory.

pub mod channel;
mod error;
pub mod participant;

pub use error::{SnapshotError, SnapshotResult};
pub use participant::{HookStatus, ParticipantHandle, Snapshotable, StartupRestore};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::quiescence::Quiescence;
use participant::Entry;

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    pub directory: PathBuf,
    pub load_on_startup: bool,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("."),
            load_on_startup: false,
        }
    }
}

impl From<&vpkit_config::SnapshotPolicy> for SnapshotSettings {
    fn from(policy: &vpkit_config::SnapshotPolicy) -> Self {
        Self {
            directory: policy.directory.clone(),
            load_on_startup: policy.load_on_startup,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Take,
    Load,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    NotCustomized,
    Failed(String),
    /// The component went away without unregistering.
    Dropped,
}

impl From<SnapshotResult<HookStatus>> for Outcome {
    fn from(result: SnapshotResult<HookStatus>) -> Self {
        match result {
            Ok(HookStatus::Completed) => Outcome::Completed,
            Ok(HookStatus::NotCustomized) => Outcome::NotCustomized,
            Err(SnapshotError::ParticipantDropped(_)) => Outcome::Dropped,
            Err(e) => Outcome::Failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantOutcome {
    pub name: String,
    pub outcome: Outcome,
}

/// Per-participant results of one system-wide take or load, in
/// registration order.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotReport {
    pub operation: Operation,
    /// Whether this call suspended (and later resumed) the simulation.
    pub suspended_here: bool,
    pub outcomes: Vec<ParticipantOutcome>,
}

impl SnapshotReport {
    /// True when no participant failed or disappeared.
    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ParticipantOutcome> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.outcome, Outcome::Failed(_) | Outcome::Dropped))
    }

    pub fn outcome_of(&self, name: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.outcome)
    }
}

/// Resumes the simulation on drop if this operation was the one to suspend it.
struct QuiescenceGuard<'a> {
    quiescence: &'a dyn Quiescence,
    suspended_here: bool,
}

impl<'a> QuiescenceGuard<'a> {
    fn enter(quiescence: &'a dyn Quiescence) -> Self {
        let suspended_here = quiescence.suspend_if_running();
        Self {
            quiescence,
            suspended_here,
        }
    }
}

impl Drop for QuiescenceGuard<'_> {
    fn drop(&mut self) {
        if self.suspended_here {
            self.quiescence.resume();
        }
    }
}

/// Registry and orchestrator for system-wide checkpoint/restore.
pub struct Snapshotter {
    quiescence: Arc<dyn Quiescence>,
    directory: PathBuf,
    load_on_startup: AtomicBool,
    registry: Mutex<Vec<Arc<Entry>>>,
    next_id: AtomicU64,
    // Serializes system-wide take/load.
    op_lock: Mutex<()>,
}

impl Snapshotter {
    pub fn new(quiescence: Arc<dyn Quiescence>) -> Arc<Self> {
        Self::with_settings(quiescence, SnapshotSettings::default())
    }

    pub fn with_settings(quiescence: Arc<dyn Quiescence>, settings: SnapshotSettings) -> Arc<Self> {
        Arc::new(Self {
            quiescence,
            directory: settings.directory,
            load_on_startup: AtomicBool::new(settings.load_on_startup),
            registry: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            op_lock: Mutex::new(()),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn set_load_on_startup(&self, set: bool) {
        self.load_on_startup.store(set, Ordering::SeqCst);
    }

    pub fn is_load_on_startup(&self) -> bool {
        self.load_on_startup.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Names of registered participants, in registration order.
    pub fn participant_names(&self) -> Vec<String> {
        self.registry.lock().iter().map(|e| e.name.clone()).collect()
    }

    /// Register `component` under `name` and enable checkpointing for it.
    ///
    /// Names must be unique, since each one maps to a single file.
    pub fn enable_checkpointing<C>(
        self: &Arc<Self>,
        name: &str,
        component: &Arc<Mutex<C>>,
    ) -> SnapshotResult<ParticipantHandle>
    where
        C: Snapshotable + 'static,
    {
        if !vpkit_config::is_valid_checkpoint_name(name) {
            return Err(SnapshotError::InvalidName(name.to_string()));
        }

        let shared: Arc<Mutex<dyn Snapshotable>> = component.clone();
        let mut registry = self.registry.lock();
        if registry.iter().any(|e| e.name == name) {
            return Err(SnapshotError::DuplicateName(name.to_string()));
        }

        let entry = Arc::new(Entry {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            name: name.to_string(),
            path: self.directory.join(channel::file_name_for(name)),
            enabled: AtomicBool::new(true),
            component: Arc::downgrade(&shared),
        });
        registry.push(entry.clone());
        info!("Checkpointing enabled for '{}' ({:?})", name, entry.path);

        Ok(ParticipantHandle {
            entry,
            coordinator: Arc::downgrade(self),
        })
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.registry.lock().retain(|e| e.id != id);
    }

    pub(crate) fn take_entry(&self, entry: &Entry) -> SnapshotResult<HookStatus> {
        info!("Taking snapshot {:?}", entry.path);
        let result = entry
            .component()
            .and_then(|c| channel::record(&entry.path, |sink| c.lock().on_record(sink)));
        if let Err(e) = &result {
            error!("Failed to store state of '{}': {}", entry.name, e);
        }
        result
    }

    pub(crate) fn load_entry(&self, entry: &Entry) -> SnapshotResult<HookStatus> {
        info!("Loading snapshot {:?}", entry.path);
        let result = entry
            .component()
            .and_then(|c| channel::restore(&entry.path, |source| c.lock().on_restore(source)));
        if let Err(e) = &result {
            error!("Failed to restore state of '{}': {}", entry.name, e);
        }
        result
    }

    /// Record every participant, in registration order, with the simulation
    /// suspended. A failing participant does not stop the others.
    pub fn take_system_snapshot(&self) -> SnapshotReport {
        self.run_system(Operation::Take)
    }

    /// Restore every participant, in registration order, with the simulation
    /// suspended. A failing participant does not stop the others.
    pub fn load_system_snapshot(&self) -> SnapshotReport {
        self.run_system(Operation::Load)
    }

    fn run_system(&self, operation: Operation) -> SnapshotReport {
        let _op = self.op_lock.lock();
        match operation {
            Operation::Take => info!("Taking system snapshot!"),
            Operation::Load => info!("Loading system snapshot!"),
        }

        let guard = QuiescenceGuard::enter(self.quiescence.as_ref());
        let entries: Vec<Arc<Entry>> = self.registry.lock().clone();

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in &entries {
            let result = match operation {
                Operation::Take => self.take_entry(entry),
                Operation::Load => self.load_entry(entry),
            };
            outcomes.push(ParticipantOutcome {
                name: entry.name.clone(),
                outcome: Outcome::from(result),
            });
        }

        let dropped: Vec<u64> = entries
            .iter()
            .filter(|e| e.component.strong_count() == 0)
            .map(|e| e.id)
            .collect();
        if !dropped.is_empty() {
            warn!("Pruning {} dropped participant(s)", dropped.len());
            self.registry.lock().retain(|e| !dropped.contains(&e.id));
        }

        let report = SnapshotReport {
            operation,
            suspended_here: guard.suspended_here,
            outcomes,
        };
        let failed = report.failures().count();
        match operation {
            Operation::Take => info!("Finished taking system snapshot! ({} failed)", failed),
            Operation::Load => info!("Finished loading system snapshot! ({} failed)", failed),
        }
        report
    }
}

impl Drop for Snapshotter {
    fn drop(&mut self) {
        let remaining = self.registry.get_mut().len();
        if remaining > 0 {
            warn!(
                "Snapshot coordinator dropped with {} participant(s) still registered",
                remaining
            );
        }
    }
}

impl std::fmt::Debug for Snapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshotter")
            .field("directory", &self.directory)
            .field("load_on_startup", &self.is_load_on_startup())
            .field("participants", &self.participant_names())
            .finish()
    }
}
