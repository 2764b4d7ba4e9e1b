use crate::bus::{BusDevice, BusGateway, Level};
use crate::config::{MotorConfig, PinConfig};
use crate::error::{Result, SwiftbotError};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Last speeds written to the motor driver, each in `[-1.0, 1.0]`
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MotorState {
    pub left_speed: f64,
    pub right_speed: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    Left,
    Right,
}

/// Differential drive on a dual H-bridge. Each motor is driven by a P/N PWM
/// pair; the left motor is mounted mirrored, so its polarity is inverted.
pub struct MotionController {
    bus: Arc<BusGateway>,
    enable_pin: u8,
    left_pins: (u8, u8),
    right_pins: (u8, u8),
    pwm_frequency_hz: f64,
    state: Mutex<MotorState>,
}

impl MotionController {
    pub fn new(bus: Arc<BusGateway>, pins: &PinConfig, config: &MotorConfig) -> Self {
        Self {
            bus,
            enable_pin: pins.motor_enable,
            left_pins: pins.motor_left,
            right_pins: pins.motor_right,
            pwm_frequency_hz: config.pwm_frequency_hz,
            state: Mutex::new(MotorState::default()),
        }
    }

    /// Configure the driver lines and leave the motors disabled
    pub(crate) fn initialize(&self) -> Result<()> {
        self.bus.with_lock(|device| {
            device.configure_output(self.enable_pin)?;
            for pin in self.drive_pins() {
                device.configure_output(pin)?;
            }
            self.release(device)
        })?;

        info!(
            "Motion controller ready (enable={}, left={:?}, right={:?}, {}Hz)",
            self.enable_pin, self.left_pins, self.right_pins, self.pwm_frequency_hz
        );
        Ok(())
    }

    /// Set both motor speeds; values are clamped to `[-1.0, 1.0]`
    pub fn set_motor_speeds(&self, left: f64, right: f64) -> Result<()> {
        let target = MotorState {
            left_speed: clamp_speed(left, -1.0, 1.0),
            right_speed: clamp_speed(right, -1.0, 1.0),
        };
        debug!(
            "Setting motor speeds left={:.3} right={:.3}",
            target.left_speed, target.right_speed
        );

        self.bus.with_lock(|device| {
            let applied = device
                .write_pin(self.enable_pin, Level::High)
                .and_then(|_| self.drive(device, Motor::Left, target.left_speed))
                .and_then(|_| self.drive(device, Motor::Right, target.right_speed));
            match applied {
                Ok(()) => {
                    *self.state.lock() = target;
                    Ok(())
                }
                Err(e) => Err(self.abort(device, e)),
            }
        })
    }

    pub fn forward(&self, speed: f64) -> Result<()> {
        let speed = clamp_speed(speed, 0.0, 1.0);
        self.set_motor_speeds(speed, speed)
    }

    pub fn backward(&self, speed: f64) -> Result<()> {
        let speed = clamp_speed(speed, 0.0, 1.0);
        self.set_motor_speeds(-speed, -speed)
    }

    /// Spin in place counter-clockwise: left wheel back, right wheel forward
    pub fn turn_left(&self, speed: f64) -> Result<()> {
        let speed = clamp_speed(speed, 0.0, 1.0);
        self.set_motor_speeds(-speed, speed)
    }

    /// Spin in place clockwise: left wheel forward, right wheel back
    pub fn turn_right(&self, speed: f64) -> Result<()> {
        let speed = clamp_speed(speed, 0.0, 1.0);
        self.set_motor_speeds(speed, -speed)
    }

    pub fn stop(&self) -> Result<()> {
        self.set_motor_speeds(0.0, 0.0)
    }

    /// Drive a single motor with an explicit direction, leaving the other one untouched
    pub fn set_motor_direction(&self, motor: Motor, forward: bool, magnitude: f64) -> Result<()> {
        let magnitude = clamp_speed(magnitude.abs(), 0.0, 1.0);
        let speed = if forward { magnitude } else { -magnitude };

        self.bus.with_lock(|device| {
            let applied = device
                .write_pin(self.enable_pin, Level::High)
                .and_then(|_| self.drive(device, motor, speed));
            if let Err(e) = applied {
                return Err(self.abort(device, e));
            }

            let mut state = self.state.lock();
            match motor {
                Motor::Left => state.left_speed = speed,
                Motor::Right => state.right_speed = speed,
            }
            Ok(())
        })
    }

    /// Pull the enable line low and zero every PWM output
    pub fn disable_motors(&self) -> Result<()> {
        self.bus.with_lock(|device| self.release(device))?;
        info!("Motors disabled");
        Ok(())
    }

    pub fn motor_state(&self) -> MotorState {
        *self.state.lock()
    }

    /// Disable the bridge and zero every output. Each line is attempted even
    /// if an earlier one fails; the first failure is returned.
    fn release(&self, device: &mut dyn BusDevice) -> Result<()> {
        let mut first_error = device.write_pin(self.enable_pin, Level::Low).err();
        for pin in self.drive_pins() {
            if let Err(e) = device.set_pwm(pin, self.pwm_frequency_hz, 0.0) {
                first_error.get_or_insert(e);
            }
        }
        *self.state.lock() = MotorState::default();

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// A drive command failed half way; stop instead of leaving one wheel turning
    fn abort(&self, device: &mut dyn BusDevice, cause: SwiftbotError) -> SwiftbotError {
        warn!("Motor command failed, stopping motors: {}", cause);
        if let Err(e) = self.release(device) {
            warn!("Could not fully stop motors: {}", e);
        }
        cause
    }

    fn drive(&self, device: &mut dyn BusDevice, motor: Motor, speed: f64) -> Result<()> {
        let (p, n) = match motor {
            Motor::Left => self.left_pins,
            Motor::Right => self.right_pins,
        };
        let duty = speed.abs();
        let forward = speed > 0.0;

        let (active, idle) = match (motor, forward) {
            (Motor::Left, true) | (Motor::Right, false) => (n, p),
            (Motor::Left, false) | (Motor::Right, true) => (p, n),
        };

        device.set_pwm(idle, self.pwm_frequency_hz, 0.0)?;
        device.set_pwm(active, self.pwm_frequency_hz, duty)
    }

    fn drive_pins(&self) -> [u8; 4] {
        [
            self.left_pins.0,
            self.left_pins.1,
            self.right_pins.0,
            self.right_pins.1,
        ]
    }
}

fn clamp_speed(value: f64, min: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;
    use crate::config::SwiftbotConfig;

    fn create_test_controller() -> (MotionController, SimulatedBus) {
        let sim = SimulatedBus::new();
        let config = SwiftbotConfig::default();
        let bus = Arc::new(BusGateway::new(Box::new(sim.clone())));
        let motion = MotionController::new(bus, &config.pins, &config.motors);
        motion.initialize().unwrap();
        (motion, sim)
    }

    fn state(left: f64, right: f64) -> MotorState {
        MotorState {
            left_speed: left,
            right_speed: right,
        }
    }

    #[test]
    fn test_initialize_leaves_motors_disabled() {
        let (motion, sim) = create_test_controller();
        assert_eq!(sim.output_level(26), Some(Level::Low));
        assert_eq!(sim.pwm(8), Some((100.0, 0.0)));
        assert_eq!(motion.motor_state(), MotorState::default());
    }

    #[test]
    fn test_speeds_are_clamped() {
        let (motion, _sim) = create_test_controller();

        motion.set_motor_speeds(3.5, -7.0).unwrap();
        assert_eq!(motion.motor_state(), state(1.0, -1.0));

        motion.set_motor_speeds(f64::NAN, 0.25).unwrap();
        assert_eq!(motion.motor_state(), state(0.0, 0.25));
    }

    #[test]
    fn test_drive_scenario() {
        let (motion, _sim) = create_test_controller();

        motion.forward(0.5).unwrap();
        assert_eq!(motion.motor_state(), state(0.5, 0.5));

        motion.turn_left(0.5).unwrap();
        assert_eq!(motion.motor_state(), state(-0.5, 0.5));

        motion.turn_right(0.5).unwrap();
        assert_eq!(motion.motor_state(), state(0.5, -0.5));

        motion.backward(0.25).unwrap();
        assert_eq!(motion.motor_state(), state(-0.25, -0.25));

        motion.stop().unwrap();
        assert_eq!(motion.motor_state(), state(0.0, 0.0));
    }

    #[test]
    fn test_convenience_commands_clamp_magnitude() {
        let (motion, _sim) = create_test_controller();

        motion.forward(-0.7).unwrap();
        assert_eq!(motion.motor_state(), state(0.0, 0.0));

        motion.turn_right(2.0).unwrap();
        assert_eq!(motion.motor_state(), state(1.0, -1.0));
    }

    #[test]
    fn test_pwm_polarity() {
        let (motion, sim) = create_test_controller();
        let config = SwiftbotConfig::default();
        let (left_p, left_n) = config.pins.motor_left;
        let (right_p, right_n) = config.pins.motor_right;

        motion.forward(0.5).unwrap();
        assert_eq!(sim.output_level(config.pins.motor_enable), Some(Level::High));
        // left motor is mirrored: forward drives its N input
        assert_eq!(sim.pwm(left_n), Some((100.0, 0.5)));
        assert_eq!(sim.pwm(left_p), Some((100.0, 0.0)));
        assert_eq!(sim.pwm(right_p), Some((100.0, 0.5)));
        assert_eq!(sim.pwm(right_n), Some((100.0, 0.0)));

        motion.backward(0.3).unwrap();
        assert_eq!(sim.pwm(left_p), Some((100.0, 0.3)));
        assert_eq!(sim.pwm(right_n), Some((100.0, 0.3)));
    }

    #[test]
    fn test_set_motor_direction_only_touches_one_motor() {
        let (motion, _sim) = create_test_controller();

        motion.forward(0.4).unwrap();
        motion.set_motor_direction(Motor::Right, false, 0.9).unwrap();
        assert_eq!(motion.motor_state(), state(0.4, -0.9));
    }

    #[test]
    fn test_disable_motors() {
        let (motion, sim) = create_test_controller();

        motion.forward(1.0).unwrap();
        motion.disable_motors().unwrap();

        assert_eq!(sim.output_level(26), Some(Level::Low));
        assert_eq!(sim.pwm(11), Some((100.0, 0.0)));
        assert_eq!(motion.motor_state(), MotorState::default());
    }

    #[test]
    fn test_unplugged_bus_reports_device_unavailable() {
        let (motion, sim) = create_test_controller();
        motion.forward(0.5).unwrap();

        sim.set_unplugged(true);
        let err = motion.set_motor_speeds(0.1, 0.1).unwrap_err();
        assert!(err.is_device_unavailable());
        // state reflects the last successful write only
        assert_eq!(motion.motor_state(), state(0.5, 0.5));
    }

    #[test]
    fn test_failed_command_stops_both_motors() {
        let (motion, sim) = create_test_controller();
        let pins = SwiftbotConfig::default().pins;

        motion.forward(0.5).unwrap();
        sim.set_pin_fault(pins.motor_right.1, true);

        assert!(motion.set_motor_speeds(0.8, 0.8).is_err());
        assert_eq!(motion.motor_state(), MotorState::default());
        assert_eq!(sim.output_level(pins.motor_enable), Some(Level::Low));
        assert_eq!(sim.pwm(pins.motor_left.0), Some((100.0, 0.0)));
        assert_eq!(sim.pwm(pins.motor_left.1), Some((100.0, 0.0)));

        sim.set_pin_fault(pins.motor_right.1, false);
        motion.forward(0.3).unwrap();
        assert_eq!(motion.motor_state(), state(0.3, 0.3));
    }
}