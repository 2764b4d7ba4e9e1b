pub mod bus;
pub mod buttons;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod lighting;
pub mod motion;
pub mod robot;
pub mod sensors;
pub mod session;

#[cfg(feature = "streaming")]
pub mod streaming;

pub use bus::{BusDevice, BusGateway, Level, Pull, SimulatedBus};
pub use buttons::{ButtonEventMonitor, ButtonState};
pub use camera::{CameraService, CameraStats, Frame, FrameSource, FrameSourceFactory, StreamState};
pub use config::SwiftbotConfig;
pub use error::{CameraError, Result, StreamError, SwiftbotError};
pub use events::{
    ButtonEvent, ButtonId, ButtonListener, ChannelListener, BUTTON_A, BUTTON_B, BUTTON_X,
    BUTTON_Y, NUM_BUTTONS,
};
pub use lighting::{LedState, LightingController, Rgb};
pub use motion::{Motor, MotionController, MotorState};
pub use robot::SwiftBot;
pub use sensors::{SensorHub, DISTANCE_UNKNOWN};
pub use session::HardwareSession;
