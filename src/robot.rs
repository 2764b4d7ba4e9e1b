use crate::camera::StreamState;
use crate::config::SwiftbotConfig;
use crate::error::Result;
use crate::events::{ButtonEvent, ButtonId, ButtonListener, ChannelListener};
use crossbeam::channel::Receiver;
use crate::motion::MotorState;
use crate::session::HardwareSession;
use std::sync::Arc;

/// The robot's command surface.
///
/// Identifiers arrive as plain integers, the way a binding layer passes
/// them, and are validated here; out-of-range ids fail with
/// `InvalidArgument`. Every call is synchronous except button events, which
/// arrive on the monitor thread.
pub struct SwiftBot {
    session: HardwareSession,
}

impl SwiftBot {
    pub fn open(config: SwiftbotConfig) -> Result<Self> {
        Ok(Self::from_session(HardwareSession::open(config)?))
    }

    pub fn from_session(session: HardwareSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &HardwareSession {
        &self.session
    }

    /// Release the hardware; the robot is unusable afterwards
    pub fn close(&self) -> Result<()> {
        self.session.close()
    }

    pub fn stop(&self) -> Result<()> {
        self.session.motion().stop()
    }

    pub fn forward(&self, speed: f64) -> Result<()> {
        self.session.motion().forward(speed)
    }

    pub fn backward(&self, speed: f64) -> Result<()> {
        self.session.motion().backward(speed)
    }

    pub fn turn_left(&self, speed: f64) -> Result<()> {
        self.session.motion().turn_left(speed)
    }

    pub fn turn_right(&self, speed: f64) -> Result<()> {
        self.session.motion().turn_right(speed)
    }

    pub fn set_motor_speeds(&self, left: f64, right: f64) -> Result<()> {
        self.session.motion().set_motor_speeds(left, right)
    }

    pub fn motor_state(&self) -> MotorState {
        self.session.motion().motor_state()
    }

    /// Distance in centimeters, or `-1.0` when nothing echoed back in time
    pub fn read_distance(&self) -> Result<f64> {
        self.session.sensors().read_distance()
    }

    /// Instantaneous (not debounced) state of a button line
    pub fn is_button_pressed(&self, button_id: i32) -> Result<bool> {
        let button = ButtonId::try_from(button_id)?;
        self.session.sensors().read_button_raw(button)
    }

    pub fn set_button_led(&self, led_id: i32, brightness: f64) -> Result<()> {
        self.session.lighting().set_button_led(led_id, brightness)
    }

    pub fn set_underlight(&self, channel_id: i32, r: i32, g: i32, b: i32) -> Result<()> {
        self.session.lighting().set_underlight(channel_id, r, g, b)
    }

    pub fn fill_underlighting(&self, r: i32, g: i32, b: i32) -> Result<()> {
        self.session.lighting().fill_underlighting(r, g, b)
    }

    pub fn clear_underlighting(&self) -> Result<()> {
        self.session.lighting().clear_underlighting()
    }

    /// One JPEG-encoded image; empty when the camera produced no frame in time
    pub fn capture_image(&self) -> Result<Vec<u8>> {
        self.session.camera().capture_image()
    }

    pub fn start_streaming(&self) -> Result<()> {
        self.session.camera().start_streaming()
    }

    pub fn stop_streaming(&self) -> Result<()> {
        self.session.camera().stop_streaming()
    }

    pub fn stream_state(&self) -> StreamState {
        self.session.camera().stream_state()
    }

    pub fn stream_url(&self) -> Option<String> {
        self.session.camera().stream_url()
    }

    pub fn register_button_listener(&self, listener: Arc<dyn ButtonListener>) -> Result<()> {
        self.session.buttons().register_listener(listener)
    }

    /// Register a channel-backed listener sized from the button config and
    /// hand back its receiving end
    pub fn subscribe_button_events(&self) -> Result<Receiver<ButtonEvent>> {
        let (listener, events) = ChannelListener::from_config(&self.session.config().buttons);
        self.register_button_listener(Arc::new(listener))?;
        Ok(events)
    }

    pub fn unregister_button_listener(&self) {
        self.session.buttons().unregister_listener()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Level, SimulatedBus};
    use crate::camera::TestPatternFactory;
    use crate::config::{BusBackend, CameraBackend};
    use crate::error::SwiftbotError;
    use crate::lighting::{Rgb, NUM_UNDERLIGHTS};
    use std::time::Duration;

    fn create_test_config() -> SwiftbotConfig {
        let mut config = SwiftbotConfig::default();
        config.system.backend = BusBackend::Simulated;
        config.camera.backend = CameraBackend::TestPattern;
        config.camera.resolution = (64, 48);
        config.sensors.echo_timeout_ms = 10;
        config.stream.ip = "127.0.0.1".to_string();
        config.stream.port = 0;
        config
    }

    fn create_test_robot() -> (SwiftBot, SimulatedBus) {
        let config = create_test_config();
        let sim = SimulatedBus::new();
        sim.attach_ultrasonic(config.pins.ultrasonic_trigger, config.pins.ultrasonic_echo);
        let factory = Arc::new(TestPatternFactory::new(&config.camera));

        let session = HardwareSession::open_with(config, Box::new(sim.clone()), factory).unwrap();
        (SwiftBot::from_session(session), sim)
    }

    #[test]
    fn test_motion_scenario() {
        let (robot, _sim) = create_test_robot();

        robot.forward(0.5).unwrap();
        assert_eq!(
            robot.motor_state(),
            MotorState {
                left_speed: 0.5,
                right_speed: 0.5
            }
        );

        robot.turn_left(0.5).unwrap();
        assert_eq!(
            robot.motor_state(),
            MotorState {
                left_speed: -0.5,
                right_speed: 0.5
            }
        );

        robot.stop().unwrap();
        assert_eq!(robot.motor_state(), MotorState::default());
    }

    #[test]
    fn test_out_of_range_speeds_are_clamped() {
        let (robot, _sim) = create_test_robot();

        robot.set_motor_speeds(3.0, -7.5).unwrap();
        assert_eq!(
            robot.motor_state(),
            MotorState {
                left_speed: 1.0,
                right_speed: -1.0
            }
        );
    }

    #[test]
    fn test_distance_without_echo_is_unknown() {
        let (robot, _sim) = create_test_robot();
        assert_eq!(robot.read_distance().unwrap(), -1.0);
    }

    #[test]
    fn test_is_button_pressed_validates_id() {
        let (robot, sim) = create_test_robot();
        let pins = SwiftbotConfig::default().pins;

        sim.set_input(pins.buttons[3], Level::High);
        assert!(robot.is_button_pressed(3).unwrap());
        assert!(!robot.is_button_pressed(0).unwrap());
        assert!(matches!(
            robot.is_button_pressed(4),
            Err(SwiftbotError::InvalidArgument { .. })
        ));
        assert!(matches!(
            robot.is_button_pressed(-1),
            Err(SwiftbotError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_fill_underlighting_scenario() {
        let (robot, _sim) = create_test_robot();

        robot.fill_underlighting(255, 0, 0).unwrap();
        let lighting = robot.session().lighting();
        for channel in 0..NUM_UNDERLIGHTS {
            assert_eq!(lighting.underlight(channel), Some(Rgb { r: 255, g: 0, b: 0 }));
        }
    }

    #[test]
    fn test_button_listener_through_robot() {
        let (robot, sim) = create_test_robot();
        let pins = SwiftbotConfig::default().pins;
        let (listener, events) = ChannelListener::bounded(8);

        robot.register_button_listener(Arc::new(listener)).unwrap();
        sim.set_input(pins.buttons[0], Level::High);

        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            event,
            ButtonEvent::Pressed {
                button: ButtonId::A,
                ..
            }
        ));
        robot.unregister_button_listener();
    }

    #[cfg(feature = "streaming")]
    #[test]
    fn test_streaming_scenario() {
        let (robot, _sim) = create_test_robot();

        robot.start_streaming().unwrap();
        robot.start_streaming().unwrap();
        assert_eq!(robot.stream_state(), StreamState::Running);
        assert!(robot.stream_url().is_some());

        let image = robot.capture_image().unwrap();
        assert!(!image.is_empty());

        robot.stop_streaming().unwrap();
        robot.stop_streaming().unwrap();
        assert_eq!(robot.stream_state(), StreamState::Stopped);
    }

    #[test]
    fn test_close_makes_hardware_unavailable() {
        let (robot, sim) = create_test_robot();
        let pins = SwiftbotConfig::default().pins;
        robot.forward(0.8).unwrap();
        robot.fill_underlighting(10, 10, 10).unwrap();

        robot.close().unwrap();
        assert!(robot.session().is_closed());

        // motors left disabled and lights off
        assert_eq!(sim.output_level(pins.motor_enable), Some(Level::Low));
        assert_eq!(robot.motor_state(), MotorState::default());
        assert!(robot
            .session()
            .lighting()
            .led_state()
            .underlight
            .iter()
            .all(|&color| color == Rgb::OFF));

        assert!(robot.forward(0.5).unwrap_err().is_device_unavailable());
        assert!(robot.read_distance().unwrap_err().is_device_unavailable());

        // closing twice is harmless
        robot.close().unwrap();
    }

    #[test]
    fn test_subscribe_button_events() {
        let (robot, sim) = create_test_robot();
        let pins = SwiftbotConfig::default().pins;

        let events = robot.subscribe_button_events().unwrap();
        assert_eq!(
            events.capacity(),
            Some(robot.session().config().buttons.event_channel_capacity)
        );

        sim.set_input(pins.buttons[2], Level::High);
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.button(), ButtonId::X);
        assert!(event.is_press());
        robot.unregister_button_listener();
    }

    #[test]
    fn test_button_listener_rejected_after_close() {
        let (robot, _sim) = create_test_robot();
        robot.close().unwrap();

        let (listener, _events) = ChannelListener::bounded(8);
        let err = robot
            .register_button_listener(Arc::new(listener))
            .unwrap_err();
        assert!(err.is_device_unavailable());
        assert!(!robot.session().buttons().is_running());
    }

    #[test]
    fn test_open_fails_on_unplugged_bus() {
        let config = create_test_config();
        let sim = SimulatedBus::new();
        sim.set_unplugged(true);
        let factory = Arc::new(TestPatternFactory::new(&config.camera));

        let err = HardwareSession::open_with(config, Box::new(sim), factory)
            .err()
            .unwrap();
        assert!(err.is_device_unavailable());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = create_test_config();
        config.buttons.poll_interval_ms = 0;

        assert!(matches!(
            SwiftBot::open(config),
            Err(SwiftbotError::Config(_))
        ));
    }

    #[test]
    fn test_simulated_sessions_are_independent() {
        let first = SwiftBot::open(create_test_config()).unwrap();
        let second = SwiftBot::open(create_test_config()).unwrap();

        first.forward(0.3).unwrap();
        assert_eq!(second.motor_state(), MotorState::default());

        first.close().unwrap();
        second.forward(0.3).unwrap();
    }

    #[cfg(not(all(feature = "rpi", target_os = "linux")))]
    #[test]
    fn test_rpi_backend_requires_feature() {
        let mut config = create_test_config();
        config.system.backend = BusBackend::Rpi;

        let err = SwiftBot::open(config.clone()).err().unwrap();
        assert!(err.is_device_unavailable());
        // the failed open released the hardware claim
        let err = SwiftBot::open(config).err().unwrap();
        assert!(err.is_device_unavailable());
    }
}
