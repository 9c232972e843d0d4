use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};
use vpkit_config::SystemManifest;

use crate::peripherals;
use crate::quiescence::Suspender;
use crate::snapshot::{ParticipantHandle, SnapshotResult, Snapshotter, StartupRestore};
use crate::{Peripheral, SimResult, SimulationError};

pub type SharedPeripheral = Arc<Mutex<Box<dyn Peripheral>>>;

#[derive(Debug)]
pub struct BoardEntry {
    pub id: String,
    pub checkpoint_name: Option<String>,
    pub dev: SharedPeripheral,
    checkpoint: Option<ParticipantHandle>,
}

impl BoardEntry {
    pub fn checkpoint(&self) -> Option<&ParticipantHandle> {
        self.checkpoint.as_ref()
    }
}

/// A set of named peripherals advanced in lock-step by the simulation thread.
#[derive(Debug)]
pub struct Board {
    pub name: String,
    pub peripherals: Vec<BoardEntry>,
    suspender: Arc<Suspender>,
    steps: u64,
}

impl Board {
    pub fn new(name: impl Into<String>, suspender: Arc<Suspender>) -> Self {
        Self {
            name: name.into(),
            peripherals: Vec::new(),
            suspender,
            steps: 0,
        }
    }

    pub fn from_manifest(manifest: &SystemManifest, suspender: Arc<Suspender>) -> Self {
        let mut board = Self::new(manifest.name.clone(), suspender);
        for p in &manifest.peripherals {
            debug!("Adding peripheral '{}' ({:?})", p.id, p.r#type);
            board.add(p.id.clone(), p.checkpoint.clone(), peripherals::build(p.r#type));
        }
        board
    }

    pub fn add(
        &mut self,
        id: impl Into<String>,
        checkpoint_name: Option<String>,
        dev: Box<dyn Peripheral>,
    ) -> SharedPeripheral {
        let dev = Arc::new(Mutex::new(dev));
        self.peripherals.push(BoardEntry {
            id: id.into(),
            checkpoint_name,
            dev: dev.clone(),
            checkpoint: None,
        });
        dev
    }

    pub fn peripheral(&self, id: &str) -> SimResult<&SharedPeripheral> {
        self.peripherals
            .iter()
            .find(|p| p.id == id)
            .map(|p| &p.dev)
            .ok_or_else(|| SimulationError::UnknownPeripheral(id.to_string()))
    }

    pub fn read_u8(&self, id: &str, offset: u64) -> SimResult<u8> {
        self.peripheral(id)?.lock().read(offset)
    }

    pub fn write_u8(&self, id: &str, offset: u64, value: u8) -> SimResult<()> {
        self.peripheral(id)?.lock().write(offset, value)
    }

    pub fn write_u32(&self, id: &str, offset: u64, value: u32) -> SimResult<()> {
        let dev = self.peripheral(id)?;
        let mut dev = dev.lock();
        for i in 0..4 {
            dev.write(offset + i, (value >> (i * 8)) as u8)?;
        }
        Ok(())
    }

    /// Register every peripheral that has a checkpoint name, in board order.
    pub fn attach_checkpoints(&mut self, snapshotter: &Arc<Snapshotter>) -> SnapshotResult<()> {
        for entry in &mut self.peripherals {
            if let Some(name) = &entry.checkpoint_name {
                entry.checkpoint = Some(snapshotter.enable_checkpointing(name, &entry.dev)?);
            }
        }
        Ok(())
    }

    /// Apply the load-on-startup policy to every checkpointed peripheral.
    pub fn restore_on_startup(&self) -> Vec<(String, SnapshotResult<StartupRestore>)> {
        self.peripherals
            .iter()
            .filter_map(|p| {
                p.checkpoint
                    .as_ref()
                    .map(|h| (h.name().to_string(), h.load_snapshot_on_startup()))
            })
            .collect()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Advance all peripherals by one cycle once the simulation is not
    /// suspended. Returns the ids that raised an interrupt, or `None` after
    /// quit was requested.
    pub fn step(&mut self) -> Option<Vec<String>> {
        if !self.suspender.wait_while_suspended() {
            info!("Board '{}' stopping after {} steps", self.name, self.steps);
            return None;
        }

        let mut raised = Vec::new();
        for p in &self.peripherals {
            if p.dev.lock().tick() {
                debug!("Interrupt from '{}'", p.id);
                raised.push(p.id.clone());
            }
        }
        self.steps += 1;
        Some(raised)
    }
}
