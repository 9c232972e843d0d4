use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use super::error::{SnapshotError, SnapshotResult};
use super::Snapshotter;

/// Result of a hook that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    Completed,
    /// The component does not override this hook; nothing was done.
    NotCustomized,
}

/// A component whose mutable state can be checkpointed.
///
/// The byte format is entirely up to the implementor; the coordinator never
/// looks inside. A restore hook should decode fully before applying anything,
/// so that a failed restore leaves live state untouched. When no snapshot file
/// exists, `on_restore` is handed an empty source; a customized hook must
/// fail on it rather than report success.
pub trait Snapshotable: Send {
    fn on_record(&mut self, _sink: &mut dyn Write) -> SnapshotResult<HookStatus> {
        Ok(HookStatus::NotCustomized)
    }

    fn on_restore(&mut self, _source: &mut dyn Read) -> SnapshotResult<HookStatus> {
        Ok(HookStatus::NotCustomized)
    }
}

impl<T: Snapshotable + ?Sized> Snapshotable for Box<T> {
    fn on_record(&mut self, sink: &mut dyn Write) -> SnapshotResult<HookStatus> {
        (**self).on_record(sink)
    }

    fn on_restore(&mut self, source: &mut dyn Read) -> SnapshotResult<HookStatus> {
        (**self).on_restore(source)
    }
}

/// Registry record for one participant. The component itself is not owned.
pub(crate) struct Entry {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) enabled: AtomicBool,
    pub(crate) component: Weak<Mutex<dyn Snapshotable>>,
}

impl Entry {
    pub(crate) fn component(&self) -> SnapshotResult<Arc<Mutex<dyn Snapshotable>>> {
        self.component
            .upgrade()
            .ok_or_else(|| SnapshotError::ParticipantDropped(self.name.clone()))
    }
}

/// Outcome of [`ParticipantHandle::load_snapshot_on_startup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupRestore {
    /// The coordinator's load-on-startup policy is off.
    PolicyDisabled,
    /// This participant has checkpointing disabled.
    ParticipantDisabled,
    Restored(HookStatus),
}

/// Registration of one component with a [`Snapshotter`].
///
/// Dropping the handle removes the participant from the registry.
pub struct ParticipantHandle {
    pub(crate) entry: Arc<Entry>,
    pub(crate) coordinator: Weak<Snapshotter>,
}

impl ParticipantHandle {
    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn path(&self) -> &Path {
        &self.entry.path
    }

    pub fn is_enabled(&self) -> bool {
        self.entry.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.entry.enabled.store(enabled, Ordering::SeqCst);
    }

    fn coordinator(&self) -> SnapshotResult<Arc<Snapshotter>> {
        self.coordinator
            .upgrade()
            .ok_or(SnapshotError::CoordinatorGone)
    }

    pub fn take_snapshot(&self) -> SnapshotResult<HookStatus> {
        self.coordinator()?.take_entry(&self.entry)
    }

    pub fn load_snapshot(&self) -> SnapshotResult<HookStatus> {
        self.coordinator()?.load_entry(&self.entry)
    }

    pub fn load_snapshot_on_startup(&self) -> SnapshotResult<StartupRestore> {
        let coordinator = self.coordinator()?;
        if !coordinator.is_load_on_startup() {
            return Ok(StartupRestore::PolicyDisabled);
        }
        if !self.is_enabled() {
            return Ok(StartupRestore::ParticipantDisabled);
        }
        coordinator
            .load_entry(&self.entry)
            .map(StartupRestore::Restored)
    }
}

impl Drop for ParticipantHandle {
    fn drop(&mut self) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.unregister(self.entry.id);
        }
    }
}

impl std::fmt::Debug for ParticipantHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticipantHandle")
            .field("name", &self.entry.name)
            .field("path", &self.entry.path)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
