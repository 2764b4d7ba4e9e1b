use super::{BusDevice, Level, Pull};
use crate::error::{Result, SwiftbotError};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::i2c::I2c;
use std::collections::HashMap;
use tracing::{debug, info};

/// Raspberry Pi bus backend on top of `rppal`
pub struct RppalBus {
    gpio: Gpio,
    outputs: HashMap<u8, OutputPin>,
    inputs: HashMap<u8, InputPin>,
    i2c: Option<I2c>,
    i2c_address: Option<u16>,
}

impl RppalBus {
    pub fn open() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| unavailable("gpio", e))?;
        info!("Opened Raspberry Pi GPIO peripheral");

        Ok(Self {
            gpio,
            outputs: HashMap::new(),
            inputs: HashMap::new(),
            i2c: None,
            i2c_address: None,
        })
    }

    fn output(&mut self, pin: u8) -> Result<&mut OutputPin> {
        self.outputs.get_mut(&pin).ok_or_else(|| {
            SwiftbotError::device_unavailable(
                format!("gpio{}", pin),
                "line is not configured as an output",
            )
        })
    }

    fn i2c(&mut self, address: u16) -> Result<&mut I2c> {
        if self.i2c.is_none() {
            let i2c = I2c::new().map_err(|e| unavailable("i2c", e))?;
            info!("Opened I2C bus {}", i2c.bus());
            self.i2c = Some(i2c);
            self.i2c_address = None;
        }

        let i2c = self
            .i2c
            .as_mut()
            .ok_or_else(|| SwiftbotError::device_unavailable("i2c", "bus not open"))?;

        if self.i2c_address != Some(address) {
            i2c.set_slave_address(address)
                .map_err(|e| unavailable("i2c", e))?;
            self.i2c_address = Some(address);
        }
        Ok(i2c)
    }
}

impl BusDevice for RppalBus {
    fn name(&self) -> &str {
        "rppal"
    }

    fn configure_output(&mut self, pin: u8) -> Result<()> {
        let mut line = self
            .gpio
            .get(pin)
            .map_err(|e| unavailable(&format!("gpio{}", pin), e))?
            .into_output();
        line.set_low();
        self.inputs.remove(&pin);
        self.outputs.insert(pin, line);
        debug!("GPIO {} configured as output", pin);
        Ok(())
    }

    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()> {
        let line = self
            .gpio
            .get(pin)
            .map_err(|e| unavailable(&format!("gpio{}", pin), e))?;
        let line = match pull {
            Pull::Floating => line.into_input(),
            Pull::Down => line.into_input_pulldown(),
        };
        self.outputs.remove(&pin);
        self.inputs.insert(pin, line);
        debug!("GPIO {} configured as input ({:?})", pin, pull);
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> Result<()> {
        let line = self.output(pin)?;
        // a plain level write replaces any running software PWM
        line.clear_pwm()
            .map_err(|e| unavailable(&format!("gpio{}", pin), e))?;
        match level {
            Level::High => line.set_high(),
            Level::Low => line.set_low(),
        }
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> Result<Level> {
        let line = self.inputs.get(&pin).ok_or_else(|| {
            SwiftbotError::device_unavailable(
                format!("gpio{}", pin),
                "line is not configured as an input",
            )
        })?;
        Ok(Level::from(line.is_high()))
    }

    fn set_pwm(&mut self, pin: u8, frequency_hz: f64, duty_cycle: f64) -> Result<()> {
        self.output(pin)?
            .set_pwm_frequency(frequency_hz, duty_cycle)
            .map_err(|e| unavailable(&format!("gpio{}", pin), e))
    }

    fn i2c_write(&mut self, address: u16, bytes: &[u8]) -> Result<()> {
        let written = self
            .i2c(address)?
            .write(bytes)
            .map_err(|e| unavailable("i2c", e))?;

        if written != bytes.len() {
            return Err(SwiftbotError::device_unavailable(
                "i2c",
                format!("short write: {} of {} bytes", written, bytes.len()),
            ));
        }
        Ok(())
    }
}

fn unavailable<E: std::fmt::Display>(device: &str, error: E) -> SwiftbotError {
    SwiftbotError::device_unavailable(device, error.to_string())
}
