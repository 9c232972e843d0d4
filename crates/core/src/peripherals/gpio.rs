use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use super::{lane, merge_lane, read_lane};
use crate::snapshot::{HookStatus, SnapshotResult, Snapshotable};
use crate::SimResult;

const DIR: u64 = 0x00;
const OUT: u64 = 0x04;
const PINS: u64 = 0x08;
const SET: u64 = 0x0C;
const CLR: u64 = 0x10;
const TOGGLE: u64 = 0x14;
const IRQ_EN: u64 = 0x18;
const IRQ_PENDING: u64 = 0x1C;

/// 16-pin general purpose I/O port.
///
/// | Offset | Register      | Access                                  |
/// |--------|---------------|-----------------------------------------|
/// | 0x00   | `DIR`         | rw, 1 = output                          |
/// | 0x04   | `OUT`         | rw output latch                         |
/// | 0x08   | `PINS`        | ro pin levels                           |
/// | 0x0C   | `SET`         | wo, 1 sets the `OUT` bit                |
/// | 0x10   | `CLR`         | wo, 1 clears the `OUT` bit              |
/// | 0x14   | `TOGGLE`      | wo, 1 flips the `OUT` bit               |
/// | 0x18   | `IRQ_EN`      | rw, rising-edge interrupt enable        |
/// | 0x1C   | `IRQ_PENDING` | rw, write 1 to acknowledge              |
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpioPort {
    dir: u16,
    out: u16,
    input: u16,
    irq_en: u16,
    irq_pending: u16,
}

impl GpioPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output latch, whether or not the pins are configured as outputs.
    pub fn output(&self) -> u16 {
        self.out
    }

    /// Levels seen on the pins: the latch for outputs, the external drive
    /// for inputs.
    pub fn pins(&self) -> u16 {
        (self.out & self.dir) | (self.input & !self.dir)
    }

    /// Drive the external side of the input pins.
    pub fn set_input(&mut self, levels: u16) {
        self.update(|port| port.input = levels);
    }

    pub fn irq_pending(&self) -> u16 {
        self.irq_pending
    }

    // Applies a mutation and latches rising edges on enabled pins.
    fn update(&mut self, f: impl FnOnce(&mut Self)) {
        let before = self.pins();
        f(self);
        let rising = self.pins() & !before;
        self.irq_pending |= rising & self.irq_en;
    }

    fn read_reg(&self, reg: u64) -> u32 {
        let value = match reg {
            DIR => self.dir,
            OUT => self.out,
            PINS => self.pins(),
            IRQ_EN => self.irq_en,
            IRQ_PENDING => self.irq_pending,
            _ => 0,
        };
        value as u32
    }

    fn write_reg(&mut self, reg: u64, value: u32) {
        let bits = value as u16;
        match reg {
            DIR => self.update(|port| port.dir = bits),
            OUT => self.update(|port| port.out = bits),
            SET => self.update(|port| port.out |= bits),
            CLR => self.update(|port| port.out &= !bits),
            TOGGLE => self.update(|port| port.out ^= bits),
            IRQ_EN => self.irq_en = bits,
            IRQ_PENDING => self.irq_pending &= !bits,
            _ => {}
        }
    }
}

impl crate::Peripheral for GpioPort {
    fn read(&self, offset: u64) -> SimResult<u8> {
        let (reg, shift) = lane(offset);
        Ok(read_lane(self.read_reg(reg), shift))
    }

    fn write(&mut self, offset: u64, value: u8) -> SimResult<()> {
        let (reg, shift) = lane(offset);
        // Action registers only see the lane being written
        let current = match reg {
            SET | CLR | TOGGLE | IRQ_PENDING => 0,
            _ => self.read_reg(reg),
        };
        self.write_reg(reg, merge_lane(current, shift, value));
        Ok(())
    }

    fn tick(&mut self) -> bool {
        self.irq_pending & self.irq_en != 0
    }
}

impl Snapshotable for GpioPort {
    fn on_record(&mut self, sink: &mut dyn Write) -> SnapshotResult<HookStatus> {
        serde_json::to_writer(sink, self)?;
        Ok(HookStatus::Completed)
    }

    fn on_restore(&mut self, source: &mut dyn Read) -> SnapshotResult<HookStatus> {
        *self = serde_json::from_reader(source)?;
        Ok(HookStatus::Completed)
    }
}
