use std::io::{Read, Write};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::{lane, merge_lane, read_lane};
use crate::snapshot::{HookStatus, SnapshotError, SnapshotResult, Snapshotable};
use crate::SimResult;

bitflags! {
    /// SysTick Control and Status Register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Csr: u32 {
        const ENABLE = 1 << 0;
        const TICKINT = 1 << 1;
        const CLKSOURCE = 1 << 2;
        const COUNTFLAG = 1 << 16;
    }
}

const RELOAD_MASK: u32 = 0x00FF_FFFF;

/// Mocked SysTick Timer peripheral
/// Standard address: 0xE000_E010
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Systick {
    csr: Csr,
    rvr: u32,
    cvr: u32,
    calib: u32,
}

impl Default for Systick {
    fn default() -> Self {
        Self::new()
    }
}

impl Systick {
    pub fn new() -> Self {
        Self {
            csr: Csr::empty(),
            rvr: 0,
            cvr: 0,
            calib: 0x4000_0000, // No reference clock, no skew
        }
    }

    pub fn current_value(&self) -> u32 {
        self.cvr
    }

    pub fn csr(&self) -> Csr {
        self.csr
    }

    fn read_reg(&self, offset: u64) -> u32 {
        match offset {
            0x00 => self.csr.bits(),
            0x04 => self.rvr,
            0x08 => self.cvr,
            0x0C => self.calib,
            _ => 0,
        }
    }

    fn write_reg(&mut self, offset: u64, value: u32) {
        match offset {
            0x00 => {
                let writable = Csr::ENABLE | Csr::TICKINT | Csr::CLKSOURCE;
                self.csr = (self.csr & Csr::COUNTFLAG) | (Csr::from_bits_truncate(value) & writable);
            }
            0x04 => self.rvr = value & RELOAD_MASK,
            0x08 => {
                // Any write clears the counter and COUNTFLAG
                self.cvr = 0;
                self.csr.remove(Csr::COUNTFLAG);
            }
            _ => {}
        }
    }
}

impl crate::Peripheral for Systick {
    fn read(&self, offset: u64) -> SimResult<u8> {
        let (reg, shift) = lane(offset);
        Ok(read_lane(self.read_reg(reg), shift))
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        let (reg, shift) = lane(offset);
        // CVR clears on any write, so merging into its old value is harmless
        let merged = merge_lane(self.read_reg(reg), shift, value);
        self.write_reg(reg, merged);
        Ok(())
    }

    /// Advance the timer by one tick
    fn tick(&mut self) -> bool {
        if !self.csr.contains(Csr::ENABLE) {
            return false;
        }

        if self.cvr == 0 {
            self.cvr = self.rvr;
            self.csr.insert(Csr::COUNTFLAG);
            self.csr.contains(Csr::TICKINT)
        } else {
            self.cvr -= 1;
            false
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SystickState {
    csr: u32,
    rvr: u32,
    cvr: u32,
    calib: u32,
}

impl Snapshotable for Systick {
    fn on_record(&mut self, sink: &mut dyn Write) -> SnapshotResult<HookStatus> {
        let state = SystickState {
            csr: self.csr.bits(),
            rvr: self.rvr,
            cvr: self.cvr,
            calib: self.calib,
        };
        serde_json::to_writer(sink, &state)?;
        Ok(HookStatus::Completed)
    }

    fn on_restore(&mut self, source: &mut dyn Read) -> SnapshotResult<HookStatus> {
        let state: SystickState = serde_json::from_reader(source)?;
        if state.rvr & !RELOAD_MASK != 0 || state.cvr & !RELOAD_MASK != 0 {
            return Err(SnapshotError::hook("systick", "counter value exceeds 24 bits"));
        }
        self.csr = Csr::from_bits_truncate(state.csr);
        self.rvr = state.rvr;
        self.cvr = state.cvr;
        self.calib = state.calib;
        Ok(HookStatus::Completed)
    }
}
