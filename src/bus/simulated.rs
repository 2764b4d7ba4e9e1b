use super::{BusDevice, Level, Pull};
use crate::error::{Result, SwiftbotError};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Delay between the end of the trigger pulse and the rising echo edge
const ECHO_LATENCY: Duration = Duration::from_micros(100);

/// One recorded I2C transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cWrite {
    pub address: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PinMode {
    Output,
    Input(Pull),
}

#[derive(Default)]
struct SimState {
    modes: HashMap<u8, PinMode>,
    outputs: HashMap<u8, Level>,
    inputs: HashMap<u8, Level>,
    pwm: HashMap<u8, (f64, f64)>,
    i2c_writes: Vec<I2cWrite>,
    unplugged: bool,
    faulty_pins: HashSet<u8>,
    ultrasonic: Option<(u8, u8)>,
    echo_pulse: Option<Duration>,
    trigger_released_at: Option<Instant>,
}

/// In-memory bus used for tests and dry runs.
///
/// Clones share the same state, so a test keeps one handle to script inputs
/// and inspect writes while the gateway owns another.
#[derive(Clone, Default)]
pub struct SimulatedBus {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the level an input line reports
    pub fn set_input(&self, pin: u8, level: Level) {
        self.state.lock().inputs.insert(pin, level);
    }

    /// Make every subsequent operation fail with `DeviceUnavailable`
    pub fn set_unplugged(&self, unplugged: bool) {
        self.state.lock().unplugged = unplugged;
    }

    /// Make writes to a single line fail while the rest of the bus works
    pub fn set_pin_fault(&self, pin: u8, faulty: bool) {
        let mut state = self.state.lock();
        if faulty {
            state.faulty_pins.insert(pin);
        } else {
            state.faulty_pins.remove(&pin);
        }
    }

    /// Wire an ultrasonic sensor between `trigger` and `echo`
    pub fn attach_ultrasonic(&self, trigger: u8, echo: u8) {
        self.state.lock().ultrasonic = Some((trigger, echo));
    }

    /// Width of the echo pulse answering each trigger; `None` means no echo
    pub fn set_echo_pulse(&self, pulse: Option<Duration>) {
        self.state.lock().echo_pulse = pulse;
    }

    pub fn output_level(&self, pin: u8) -> Option<Level> {
        self.state.lock().outputs.get(&pin).copied()
    }

    /// Last PWM (frequency, duty cycle) written to `pin`
    pub fn pwm(&self, pin: u8) -> Option<(f64, f64)> {
        self.state.lock().pwm.get(&pin).copied()
    }

    pub fn is_output(&self, pin: u8) -> bool {
        matches!(self.state.lock().modes.get(&pin), Some(PinMode::Output))
    }

    pub fn is_input(&self, pin: u8) -> bool {
        matches!(self.state.lock().modes.get(&pin), Some(PinMode::Input(_)))
    }

    pub fn i2c_writes(&self) -> Vec<I2cWrite> {
        self.state.lock().i2c_writes.clone()
    }

    pub fn clear_i2c_writes(&self) {
        self.state.lock().i2c_writes.clear();
    }

    fn check_plugged(state: &SimState) -> Result<()> {
        if state.unplugged {
            return Err(SwiftbotError::device_unavailable(
                "simulated-bus",
                "device not present",
            ));
        }
        Ok(())
    }

    fn check_writable(state: &SimState, pin: u8) -> Result<()> {
        Self::check_plugged(state)?;
        if state.faulty_pins.contains(&pin) {
            return Err(SwiftbotError::device_unavailable(
                format!("simulated-bus pin {}", pin),
                "write failed",
            ));
        }
        Ok(())
    }

    fn echo_level(state: &SimState, now: Instant) -> Level {
        match (state.echo_pulse, state.trigger_released_at) {
            (Some(pulse), Some(released)) => {
                let elapsed = now.saturating_duration_since(released);
                Level::from(elapsed >= ECHO_LATENCY && elapsed < ECHO_LATENCY + pulse)
            }
            _ => Level::Low,
        }
    }
}

impl BusDevice for SimulatedBus {
    fn name(&self) -> &str {
        "simulated-bus"
    }

    fn configure_output(&mut self, pin: u8) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_plugged(&state)?;
        state.modes.insert(pin, PinMode::Output);
        state.outputs.insert(pin, Level::Low);
        Ok(())
    }

    fn configure_input(&mut self, pin: u8, pull: Pull) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_plugged(&state)?;
        state.modes.insert(pin, PinMode::Input(pull));
        Ok(())
    }

    fn write_pin(&mut self, pin: u8, level: Level) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, pin)?;

        let previous = state.outputs.insert(pin, level);
        state.pwm.remove(&pin);

        if let Some((trigger, _)) = state.ultrasonic {
            if pin == trigger && previous == Some(Level::High) && level == Level::Low {
                state.trigger_released_at = Some(Instant::now());
            }
        }
        Ok(())
    }

    fn read_pin(&mut self, pin: u8) -> Result<Level> {
        let state = self.state.lock();
        Self::check_plugged(&state)?;

        if let Some((_, echo)) = state.ultrasonic {
            if pin == echo {
                return Ok(Self::echo_level(&state, Instant::now()));
            }
        }
        Ok(state.inputs.get(&pin).copied().unwrap_or(Level::Low))
    }

    fn set_pwm(&mut self, pin: u8, frequency_hz: f64, duty_cycle: f64) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_writable(&state, pin)?;
        state.pwm.insert(pin, (frequency_hz, duty_cycle));
        Ok(())
    }

    fn i2c_write(&mut self, address: u16, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        Self::check_plugged(&state)?;
        debug!("Simulated I2C write to {:#04x}: {:02x?}", address, bytes);
        state.i2c_writes.push(I2cWrite {
            address,
            bytes: bytes.to_vec(),
        });
        Ok(())
    }
}
