pub mod board;
pub mod peripherals;
pub mod quiescence;
pub mod snapshot;


#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Unknown peripheral '{0}'")]
    UnknownPeripheral(String),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait representing a memory-mapped peripheral
pub trait Peripheral: snapshot::Snapshotable + std::fmt::Debug {
    fn read(&self, offset: u64) -> SimResult<u8>;
    fn write(&mut self, offset: u64, value: u8) -> SimResult<()>;
    /// Advance one simulated cycle; returns true when an interrupt is raised.
    fn tick(&mut self) -> bool {
        false
    }
}
