use crate::bus::{BusDevice, BusGateway, Level, Pull};
use crate::config::{PinConfig, SensorConfig};
use crate::error::Result;
use crate::events::{ButtonId, NUM_BUTTONS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

/// Returned by [`SensorHub::read_distance`] when no echo came back in time
pub const DISTANCE_UNKNOWN: f64 = -1.0;

/// Speed of sound in cm/ns
const SPEED_OF_SOUND_CM_NS: f64 = 343.0 * 100.0 / 1e9;

const TRIGGER_SETTLE: Duration = Duration::from_micros(2);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);

/// Ultrasonic ranging and raw button line reads
pub struct SensorHub {
    bus: Arc<BusGateway>,
    trigger_pin: u8,
    echo_pin: u8,
    button_pins: [u8; NUM_BUTTONS],
    echo_timeout: Duration,
    samples: u32,
    echo_offset: Duration,
}

impl SensorHub {
    pub fn new(bus: Arc<BusGateway>, pins: &PinConfig, config: &SensorConfig) -> Self {
        Self {
            bus,
            trigger_pin: pins.ultrasonic_trigger,
            echo_pin: pins.ultrasonic_echo,
            button_pins: pins.buttons,
            echo_timeout: config.echo_timeout(),
            samples: config.samples.max(1),
            echo_offset: config.echo_offset(),
        }
    }

    pub(crate) fn initialize(&self) -> Result<()> {
        self.bus.with_lock(|device| {
            device.configure_output(self.trigger_pin)?;
            device.write_pin(self.trigger_pin, Level::Low)?;
            device.configure_input(self.echo_pin, Pull::Floating)?;
            for pin in self.button_pins {
                device.configure_input(pin, Pull::Down)?;
            }
            Ok(())
        })?;

        info!(
            "Sensor hub ready (trigger={}, echo={}, buttons={:?})",
            self.trigger_pin, self.echo_pin, self.button_pins
        );
        Ok(())
    }

    /// Distance to the nearest obstacle in centimeters.
    ///
    /// Averages the configured number of echo measurements. Returns
    /// [`DISTANCE_UNKNOWN`] when every measurement timed out; that is a normal
    /// reading, not an error.
    pub fn read_distance(&self) -> Result<f64> {
        let (total, count) = self.bus.with_lock(|device| {
            let mut total = Duration::ZERO;
            let mut count = 0u32;

            for _ in 0..self.samples {
                if let Some(pulse) = self.measure_echo(device)? {
                    total += pulse.saturating_sub(self.echo_offset);
                    count += 1;
                }
            }
            Ok((total, count))
        })?;

        if count == 0 {
            debug!(
                "Ultrasonic ranging timed out after {} samples ({:?} each)",
                self.samples, self.echo_timeout
            );
            return Ok(DISTANCE_UNKNOWN);
        }

        let average_ns = total.as_nanos() as f64 / count as f64;
        let distance = average_ns * SPEED_OF_SOUND_CM_NS / 2.0;
        trace!(
            "Ultrasonic distance {:.1}cm from {}/{} samples",
            distance,
            count,
            self.samples
        );
        Ok(distance)
    }

    /// Instantaneous electrical state of one button line
    pub fn read_button_raw(&self, button: ButtonId) -> Result<bool> {
        let pin = self.button_pins[button.index()];
        self.bus.with_lock(|device| Ok(device.read_pin(pin)?.is_high()))
    }

    /// All four button lines, sampled in one bus transaction
    pub fn read_buttons_raw(&self) -> Result<[bool; NUM_BUTTONS]> {
        self.bus.with_lock(|device| {
            let mut levels = [false; NUM_BUTTONS];
            for (level, pin) in levels.iter_mut().zip(self.button_pins) {
                *level = device.read_pin(pin)?.is_high();
            }
            Ok(levels)
        })
    }

    /// One trigger/echo cycle; `None` when either echo edge times out
    fn measure_echo(&self, device: &mut dyn BusDevice) -> Result<Option<Duration>> {
        device.write_pin(self.trigger_pin, Level::Low)?;
        spin_for(TRIGGER_SETTLE);
        device.write_pin(self.trigger_pin, Level::High)?;
        spin_for(TRIGGER_PULSE);
        device.write_pin(self.trigger_pin, Level::Low)?;

        let wait_start = Instant::now();
        while !device.read_pin(self.echo_pin)?.is_high() {
            if wait_start.elapsed() > self.echo_timeout {
                return Ok(None);
            }
        }

        let echo_start = Instant::now();
        while device.read_pin(self.echo_pin)?.is_high() {
            if echo_start.elapsed() > self.echo_timeout {
                return Ok(None);
            }
        }

        Ok(Some(echo_start.elapsed()))
    }
}

fn spin_for(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SimulatedBus;
    use crate::config::SwiftbotConfig;

    fn create_test_hub(offset_ns: u64) -> (SensorHub, SimulatedBus) {
        let sim = SimulatedBus::new();
        let mut config = SwiftbotConfig::default();
        config.sensors.echo_offset_ns = offset_ns;
        config.sensors.echo_timeout_ms = 20;
        sim.attach_ultrasonic(config.pins.ultrasonic_trigger, config.pins.ultrasonic_echo);

        let bus = Arc::new(BusGateway::new(Box::new(sim.clone())));
        let hub = SensorHub::new(bus, &config.pins, &config.sensors);
        hub.initialize().unwrap();
        (hub, sim)
    }

    /// Echo pulse width for an obstacle `cm` away
    fn pulse_for(cm: f64) -> Duration {
        Duration::from_nanos((cm * 2.0 / SPEED_OF_SOUND_CM_NS) as u64)
    }

    #[test]
    fn test_distance_from_echo() {
        let (hub, sim) = create_test_hub(0);
        sim.set_echo_pulse(Some(pulse_for(50.0)));

        let distance = hub.read_distance().unwrap();
        assert!(
            (45.0..80.0).contains(&distance),
            "unexpected distance {}",
            distance
        );
    }

    #[test]
    fn test_distance_offset_is_subtracted() {
        let offset = pulse_for(10.0);
        let (hub, sim) = create_test_hub(offset.as_nanos() as u64);
        sim.set_echo_pulse(Some(pulse_for(60.0)));

        let distance = hub.read_distance().unwrap();
        assert!(
            (45.0..80.0).contains(&distance),
            "unexpected distance {}",
            distance
        );
    }

    #[test]
    fn test_distance_timeout_returns_sentinel() {
        let (hub, sim) = create_test_hub(0);
        sim.set_echo_pulse(None);

        let started = Instant::now();
        let distance = hub.read_distance().unwrap();
        assert_eq!(distance, DISTANCE_UNKNOWN);
        // three samples, each bounded by the 20ms echo timeout
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_distance_is_never_below_sentinel() {
        // offset larger than the pulse itself
        let (hub, sim) = create_test_hub(pulse_for(100.0).as_nanos() as u64);
        sim.set_echo_pulse(Some(pulse_for(5.0)));

        let distance = hub.read_distance().unwrap();
        assert!(distance >= 0.0);
    }

    #[test]
    fn test_read_buttons_raw() {
        let (hub, sim) = create_test_hub(0);
        let config = SwiftbotConfig::default();

        sim.set_input(config.pins.buttons[ButtonId::X.index()], Level::High);

        assert!(hub.read_button_raw(ButtonId::X).unwrap());
        assert!(!hub.read_button_raw(ButtonId::A).unwrap());
        assert_eq!(hub.read_buttons_raw().unwrap(), [false, false, true, false]);
    }

    #[test]
    fn test_initialize_configures_lines() {
        let (_hub, sim) = create_test_hub(0);
        let config = SwiftbotConfig::default();

        assert!(sim.is_output(config.pins.ultrasonic_trigger));
        assert!(sim.is_input(config.pins.ultrasonic_echo));
        for pin in config.pins.buttons {
            assert!(sim.is_input(pin));
        }
    }

    #[test]
    fn test_unplugged_bus_is_an_error_not_a_sentinel() {
        let (hub, sim) = create_test_hub(0);
        sim.set_unplugged(true);

        assert!(hub.read_distance().unwrap_err().is_device_unavailable());
        assert!(hub.read_buttons_raw().unwrap_err().is_device_unavailable());
    }
}
