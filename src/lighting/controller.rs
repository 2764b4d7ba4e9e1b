use super::sn3218::{Sn3218, CHIP_CHANNELS, ENABLE_MASK_ALL};
use crate::bus::{BusDevice, BusGateway};
use crate::config::{LightingConfig, PinConfig};
use crate::error::{Result, SwiftbotError};
use crate::events::{ButtonId, NUM_BUTTONS};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

pub const NUM_BUTTON_LEDS: usize = NUM_BUTTONS;
pub const NUM_UNDERLIGHTS: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

    /// Build a color from unchecked integer components, clamping each to `[0, 255]`
    pub fn clamped(r: i32, g: i32, b: i32) -> Self {
        Self {
            r: r.clamp(0, 255) as u8,
            g: g.clamp(0, 255) as u8,
            b: b.clamp(0, 255) as u8,
        }
    }
}

/// What the lights are currently showing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedState {
    /// Button LED brightness in `[0.0, 1.0]`, A/B/X/Y order
    pub button_leds: [f64; NUM_BUTTON_LEDS],
    pub underlight: [Rgb; NUM_UNDERLIGHTS],
}

impl Default for LedState {
    fn default() -> Self {
        Self {
            button_leds: [0.0; NUM_BUTTON_LEDS],
            underlight: [Rgb::OFF; NUM_UNDERLIGHTS],
        }
    }
}

/// Button LEDs (GPIO PWM) and the underlight strip (SN3218 over I2C).
///
/// The stored state only changes after the hardware write succeeded, and
/// every underlight update replaces the whole frame at once.
pub struct LightingController {
    bus: Arc<BusGateway>,
    led_pins: [u8; NUM_BUTTON_LEDS],
    led_frequency_hz: f64,
    driver: Sn3218,
    state: Mutex<LedState>,
}

impl LightingController {
    pub fn new(bus: Arc<BusGateway>, pins: &PinConfig, config: &LightingConfig) -> Self {
        Self {
            bus,
            led_pins: pins.button_leds,
            led_frequency_hz: config.button_led_pwm_frequency_hz,
            driver: Sn3218::new(config.sn3218_address),
            state: Mutex::new(LedState::default()),
        }
    }

    pub(crate) fn initialize(&self) -> Result<()> {
        self.bus.with_lock(|device| {
            for pin in self.led_pins {
                device.configure_output(pin)?;
                device.set_pwm(pin, self.led_frequency_hz, 0.0)?;
            }

            self.driver.reset(device)?;
            self.driver.set_active(device, true)?;
            self.driver.set_enable_mask(device, ENABLE_MASK_ALL)?;
            self.write_underlight(device, &[Rgb::OFF; NUM_UNDERLIGHTS])?;

            *self.state.lock() = LedState::default();
            Ok(())
        })?;

        info!(
            "Lighting controller ready (button LEDs {:?} @ {}Hz, SN3218 @ {:#04x})",
            self.led_pins,
            self.led_frequency_hz,
            self.driver.address()
        );
        Ok(())
    }

    /// Set a button LED's brightness; `brightness` is clamped to `[0.0, 1.0]`
    pub fn set_button_led(&self, led_id: i32, brightness: f64) -> Result<()> {
        let led = ButtonId::try_from(led_id).map_err(|_| {
            SwiftbotError::invalid_argument(format!(
                "unknown button LED id {} (expected 0..={})",
                led_id,
                NUM_BUTTON_LEDS - 1
            ))
        })?;
        let brightness = if brightness.is_nan() {
            0.0
        } else {
            brightness.clamp(0.0, 1.0)
        };
        debug!("Setting button LED {} to {:.3}", led, brightness);

        let pin = self.led_pins[led.index()];
        self.bus.with_lock(|device| {
            device.set_pwm(pin, self.led_frequency_hz, brightness)?;
            self.state.lock().button_leds[led.index()] = brightness;
            Ok(())
        })
    }

    /// Set one underlight position; color components are clamped to `[0, 255]`
    pub fn set_underlight(&self, channel_id: i32, r: i32, g: i32, b: i32) -> Result<()> {
        let channel = usize::try_from(channel_id)
            .ok()
            .filter(|&channel| channel < NUM_UNDERLIGHTS)
            .ok_or_else(|| {
                SwiftbotError::invalid_argument(format!(
                    "unknown underlight channel {} (expected 0..={})",
                    channel_id,
                    NUM_UNDERLIGHTS - 1
                ))
            })?;
        let color = Rgb::clamped(r, g, b);
        debug!("Setting underlight {} to {:?}", channel, color);

        self.bus.with_lock(|device| {
            let mut frame = self.state.lock().underlight;
            frame[channel] = color;
            self.commit_underlight(device, frame)
        })
    }

    /// Show one color on every underlight position in a single update
    pub fn fill_underlighting(&self, r: i32, g: i32, b: i32) -> Result<()> {
        let color = Rgb::clamped(r, g, b);
        debug!("Filling underlight with {:?}", color);

        self.bus.with_lock(|device| self.commit_underlight(device, [color; NUM_UNDERLIGHTS]))
    }

    pub fn clear_underlighting(&self) -> Result<()> {
        self.fill_underlighting(0, 0, 0)
    }

    /// Enable SN3218 outputs from an 18-bit mask (bit 0 = first output)
    pub fn set_underlight_enabled(&self, mask: u32) -> Result<()> {
        if mask > ENABLE_MASK_ALL {
            return Err(SwiftbotError::invalid_argument(format!(
                "enable mask {:#x} is wider than 18 bits",
                mask
            )));
        }
        self.bus.with_lock(|device| self.driver.set_enable_mask(device, mask))
    }

    /// Turn everything off and put the SN3218 into shutdown
    pub(crate) fn shutdown(&self) -> Result<()> {
        self.bus.with_lock(|device| {
            for pin in self.led_pins {
                device.set_pwm(pin, self.led_frequency_hz, 0.0)?;
            }
            self.commit_underlight(device, [Rgb::OFF; NUM_UNDERLIGHTS])?;
            self.driver.set_active(device, false)?;
            self.state.lock().button_leds = [0.0; NUM_BUTTON_LEDS];
            Ok(())
        })?;

        info!("Lighting switched off");
        Ok(())
    }

    pub fn led_state(&self) -> LedState {
        self.state.lock().clone()
    }

    pub fn button_led(&self, led: ButtonId) -> f64 {
        self.state.lock().button_leds[led.index()]
    }

    pub fn underlight(&self, channel: usize) -> Option<Rgb> {
        self.state.lock().underlight.get(channel).copied()
    }

    fn commit_underlight(
        &self,
        device: &mut dyn BusDevice,
        frame: [Rgb; NUM_UNDERLIGHTS],
    ) -> Result<()> {
        self.write_underlight(device, &frame)?;
        self.state.lock().underlight = frame;
        Ok(())
    }

    /// Only the positions backed by chip outputs reach the SN3218; the rest
    /// live in `LedState` alone
    fn write_underlight(&self, device: &mut dyn BusDevice, frame: &[Rgb]) -> Result<()> {
        let values: Vec<u8> = frame
            .iter()
            .flat_map(|color| [color.r, color.g, color.b])
            .take(CHIP_CHANNELS)
            .collect();
        self.driver.write_pwm(device, &values)
    }
}
