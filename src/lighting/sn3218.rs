//! SN3218 18-channel constant-current LED driver register protocol.

use crate::bus::BusDevice;
use crate::error::{Result, SwiftbotError};

pub const REG_SHUTDOWN: u8 = 0x00;
pub const REG_PWM_START: u8 = 0x01;
pub const REG_ENABLE_START: u8 = 0x13;
pub const REG_UPDATE: u8 = 0x16;
pub const REG_RESET: u8 = 0x17;

/// Number of PWM outputs on one chip
pub const CHIP_CHANNELS: usize = 18;

/// Largest valid output enable mask
pub const ENABLE_MASK_ALL: u32 = 0x3FFFF;

/// Thin register-level driver; holds no state of its own
#[derive(Debug, Clone, Copy)]
pub struct Sn3218 {
    address: u16,
}

impl Sn3218 {
    pub fn new(address: u16) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Reset every register to its power-on value
    pub fn reset(&self, device: &mut dyn BusDevice) -> Result<()> {
        device.i2c_write(self.address, &[REG_RESET, 0xFF])
    }

    /// Leave (or enter) software shutdown
    pub fn set_active(&self, device: &mut dyn BusDevice, active: bool) -> Result<()> {
        device.i2c_write(self.address, &[REG_SHUTDOWN, u8::from(active)])
    }

    /// Enable outputs from an 18-bit mask, bit 0 being the first channel.
    /// The mask must already be validated against [`ENABLE_MASK_ALL`].
    pub fn set_enable_mask(&self, device: &mut dyn BusDevice, mask: u32) -> Result<()> {
        device.i2c_write(
            self.address,
            &[
                REG_ENABLE_START,
                (mask & 0x3F) as u8,
                ((mask >> 6) & 0x3F) as u8,
                ((mask >> 12) & 0x3F) as u8,
            ],
        )?;
        self.latch(device)
    }

    /// Write PWM values starting at the first channel, then latch them in
    /// one update so no partial frame is ever shown.
    ///
    /// At most [`CHIP_CHANNELS`] values fit; the register pointer would
    /// otherwise run on into the enable, update and reset registers.
    pub fn write_pwm(&self, device: &mut dyn BusDevice, values: &[u8]) -> Result<()> {
        if values.len() > CHIP_CHANNELS {
            return Err(SwiftbotError::invalid_argument(format!(
                "{} PWM values exceed the {} SN3218 outputs",
                values.len(),
                CHIP_CHANNELS
            )));
        }
        let mut frame = Vec::with_capacity(values.len() + 1);
        frame.push(REG_PWM_START);
        frame.extend_from_slice(values);
        device.i2c_write(self.address, &frame)?;
        self.latch(device)
    }

    fn latch(&self, device: &mut dyn BusDevice) -> Result<()> {
        device.i2c_write(self.address, &[REG_UPDATE, 0xFF])
    }
}
