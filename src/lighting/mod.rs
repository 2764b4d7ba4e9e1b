mod controller;
mod sn3218;

pub use controller::{LedState, LightingController, Rgb, NUM_BUTTON_LEDS, NUM_UNDERLIGHTS};
pub use sn3218::{Sn3218, CHIP_CHANNELS, ENABLE_MASK_ALL};
