pub mod gpio;
pub mod systick;

use crate::Peripheral;
use vpkit_config::PeripheralKind;

/// Instantiate a peripheral model from its manifest kind.
pub fn build(kind: PeripheralKind) -> Box<dyn Peripheral> {
    match kind {
        PeripheralKind::Systick => Box::new(systick::Systick::new()),
        PeripheralKind::Gpio => Box::new(gpio::GpioPort::new()),
    }
}

/// Word-aligned register offset and bit shift of the addressed byte lane.
pub(crate) fn lane(offset: u64) -> (u64, u32) {
    (offset & !3, (offset % 4) as u32 * 8)
}

pub(crate) fn read_lane(reg: u32, shift: u32) -> u8 {
    (reg >> shift) as u8
}

/// Replace one byte lane of `reg`.
pub(crate) fn merge_lane(reg: u32, shift: u32, value: u8) -> u32 {
    (reg & !(0xFF << shift)) | ((value as u32) << shift)
}
