mod gateway;
#[cfg(all(feature = "rpi", target_os = "linux"))]
mod rpi;
mod simulated;

pub use gateway::BusGateway;
#[cfg(all(feature = "rpi", target_os = "linux"))]
pub use rpi::RppalBus;
pub use simulated::{I2cWrite, SimulatedBus};

use crate::error::Result;

/// Logic level of a GPIO line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high {
            Level::High
        } else {
            Level::Low
        }
    }
}

/// Input bias applied when a line is configured as an input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Floating,
    Down,
}

/// Raw access to the robot's shared low-level bus: GPIO lines, software PWM
/// and the I2C peripheral. Implementations only ever see one caller at a
/// time; [`BusGateway`] owns the device and serializes every transaction.
///
/// Every failure is reported as `SwiftbotError::DeviceUnavailable`.
pub trait BusDevice: Send {
    /// Human-readable backend name used in logs and errors
    fn name(&self) -> &str;

    fn configure_output(&mut self, pin: u8) -> Result<()>;

    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()>;

    fn write_pin(&mut self, pin: u8, level: Level) -> Result<()>;

    fn read_pin(&mut self, pin: u8) -> Result<Level>;

    /// Drive `pin` with a PWM signal; `duty_cycle` is in `[0.0, 1.0]`
    fn set_pwm(&mut self, pin: u8, frequency_hz: f64, duty_cycle: f64) -> Result<()>;

    fn i2c_write(&mut self, address: u16, bytes: &[u8]) -> Result<()>;
}
