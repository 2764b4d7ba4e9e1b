use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SwiftbotConfig {
    pub pins: PinConfig,
    pub motors: MotorConfig,
    pub sensors: SensorConfig,
    pub buttons: ButtonConfig,
    pub lighting: LightingConfig,
    pub camera: CameraConfig,
    pub stream: StreamConfig,
    pub system: SystemConfig,
}

/// BCM GPIO assignments for the SwiftBot board
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PinConfig {
    /// Button input lines in A, B, X, Y order
    #[serde(default = "default_button_pins")]
    pub buttons: [u8; 4],

    /// Button LED outputs in A, B, X, Y order
    #[serde(default = "default_button_led_pins")]
    pub button_leds: [u8; 4],

    /// Motor driver enable line
    #[serde(default = "default_motor_enable_pin")]
    pub motor_enable: u8,

    /// Left motor (P, N) PWM pair
    #[serde(default = "default_motor_left_pins")]
    pub motor_left: (u8, u8),

    /// Right motor (P, N) PWM pair
    #[serde(default = "default_motor_right_pins")]
    pub motor_right: (u8, u8),

    /// HC-SR04 trigger output
    #[serde(default = "default_ultrasonic_trigger_pin")]
    pub ultrasonic_trigger: u8,

    /// HC-SR04 echo input
    #[serde(default = "default_ultrasonic_echo_pin")]
    pub ultrasonic_echo: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotorConfig {
    /// PWM frequency of the motor driver inputs
    #[serde(default = "default_motor_pwm_frequency")]
    pub pwm_frequency_hz: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SensorConfig {
    /// Upper bound for each echo wait
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,

    /// Echo measurements averaged per ranging cycle
    #[serde(default = "default_ranging_samples")]
    pub samples: u32,

    /// Fixed sensor latency subtracted from every echo pulse
    #[serde(default = "default_echo_offset_ns")]
    pub echo_offset_ns: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ButtonConfig {
    /// Sampling interval of the button monitor
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Minimum stable time before a raw level is accepted
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Capacity of channel-backed listeners
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LightingConfig {
    /// PWM frequency of the button LEDs
    #[serde(default = "default_button_led_pwm_frequency")]
    pub button_led_pwm_frequency_hz: f64,

    /// I2C address of the SN3218 underlight driver
    #[serde(default = "default_sn3218_address")]
    pub sn3218_address: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Frame source backend
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// JPEG quality used when encoding raw frames (1-100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Upper bound for a single frame grab
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// IP address to bind to
    #[serde(default = "default_stream_ip")]
    pub ip: String,

    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_stream_port")]
    pub port: u16,

    /// HTTP path of the MJPEG stream
    #[serde(default = "default_stream_path")]
    pub path: String,

    /// How long startStreaming waits for the endpoint to accept connections
    #[serde(default = "default_stream_startup_timeout_ms")]
    pub startup_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Hardware bus backend
    #[serde(default = "default_bus_backend")]
    pub backend: BusBackend,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    Simulated,
    Rpi,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CameraBackend {
    TestPattern,
    V4l2,
}

impl SwiftbotConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("swiftbot.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let defaults = Self::default();

        let settings = Config::builder()
            .set_default("pins.buttons", pin_list(&defaults.pins.buttons))?
            .set_default("pins.button_leds", pin_list(&defaults.pins.button_leds))?
            .set_default("pins.motor_enable", defaults.pins.motor_enable as i64)?
            .set_default(
                "pins.motor_left",
                pin_list(&[defaults.pins.motor_left.0, defaults.pins.motor_left.1]),
            )?
            .set_default(
                "pins.motor_right",
                pin_list(&[defaults.pins.motor_right.0, defaults.pins.motor_right.1]),
            )?
            .set_default(
                "pins.ultrasonic_trigger",
                defaults.pins.ultrasonic_trigger as i64,
            )?
            .set_default("pins.ultrasonic_echo", defaults.pins.ultrasonic_echo as i64)?
            .set_default("motors.pwm_frequency_hz", default_motor_pwm_frequency())?
            .set_default("sensors.echo_timeout_ms", default_echo_timeout_ms() as i64)?
            .set_default("sensors.samples", default_ranging_samples() as i64)?
            .set_default("sensors.echo_offset_ns", default_echo_offset_ns() as i64)?
            .set_default("buttons.poll_interval_ms", default_poll_interval_ms() as i64)?
            .set_default("buttons.debounce_ms", default_debounce_ms() as i64)?
            .set_default(
                "buttons.event_channel_capacity",
                default_event_channel_capacity() as i64,
            )?
            .set_default(
                "lighting.button_led_pwm_frequency_hz",
                default_button_led_pwm_frequency(),
            )?
            .set_default("lighting.sn3218_address", default_sn3218_address() as i64)?
            .set_default("camera.backend", backend_name(&default_camera_backend()))?
            .set_default("camera.index", default_camera_index() as i64)?
            .set_default(
                "camera.resolution",
                vec![
                    default_camera_resolution().0 as i64,
                    default_camera_resolution().1 as i64,
                ],
            )?
            .set_default("camera.fps", default_camera_fps() as i64)?
            .set_default("camera.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("camera.frame_timeout_ms", default_frame_timeout_ms() as i64)?
            .set_default("stream.ip", default_stream_ip())?
            .set_default("stream.port", default_stream_port() as i64)?
            .set_default("stream.path", default_stream_path())?
            .set_default(
                "stream.startup_timeout_ms",
                default_stream_startup_timeout_ms() as i64,
            )?
            .set_default("system.backend", backend_name(&default_bus_backend()))?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Add environment variables with SWIFTBOT_ prefix
            .add_source(
                Environment::with_prefix("SWIFTBOT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: SwiftbotConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Render as a TOML document that `load_from_file` reads back
    pub fn to_toml(&self) -> crate::error::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buttons.poll_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Button poll interval must be greater than 0".to_string(),
            ));
        }

        if self.buttons.debounce_ms < self.buttons.poll_interval_ms {
            return Err(ConfigError::Message(format!(
                "Debounce window ({}ms) must not be shorter than the poll interval ({}ms)",
                self.buttons.debounce_ms, self.buttons.poll_interval_ms
            )));
        }

        if self.buttons.event_channel_capacity < 2 {
            return Err(ConfigError::Message(
                "Button event channel capacity must hold at least one press/release pair"
                    .to_string(),
            ));
        }

        if self.sensors.echo_timeout_ms == 0 || self.sensors.samples == 0 {
            return Err(ConfigError::Message(
                "Sensor echo timeout and sample count must be greater than 0".to_string(),
            ));
        }

        if self.motors.pwm_frequency_hz <= 0.0 || self.lighting.button_led_pwm_frequency_hz <= 0.0
        {
            return Err(ConfigError::Message(
                "PWM frequencies must be greater than 0".to_string(),
            ));
        }

        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(ConfigError::Message(
                "Camera JPEG quality must be between 1 and 100".to_string(),
            ));
        }

        if self.camera.frame_timeout_ms == 0 || self.stream.startup_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera frame timeout and stream startup timeout must be greater than 0"
                    .to_string(),
            ));
        }

        if !self.stream.path.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "Stream path must start with '/': {}",
                self.stream.path
            )));
        }

        let pins = self.pins.all();
        let unique: HashSet<u8> = pins.iter().copied().collect();
        if unique.len() != pins.len() {
            return Err(ConfigError::Message(
                "GPIO pins must not be assigned twice".to_string(),
            ));
        }

        Ok(())
    }
}

impl PinConfig {
    /// Every GPIO line the board uses
    pub fn all(&self) -> Vec<u8> {
        let mut pins = Vec::with_capacity(15);
        pins.extend_from_slice(&self.buttons);
        pins.extend_from_slice(&self.button_leds);
        pins.push(self.motor_enable);
        pins.extend_from_slice(&[self.motor_left.0, self.motor_left.1]);
        pins.extend_from_slice(&[self.motor_right.0, self.motor_right.1]);
        pins.push(self.ultrasonic_trigger);
        pins.push(self.ultrasonic_echo);
        pins
    }
}

impl ButtonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl SensorConfig {
    pub fn echo_timeout(&self) -> Duration {
        Duration::from_millis(self.echo_timeout_ms)
    }

    pub fn echo_offset(&self) -> Duration {
        Duration::from_nanos(self.echo_offset_ns)
    }
}

impl CameraConfig {
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000u64 / self.fps.max(1) as u64)
    }
}

impl StreamConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

impl Default for SwiftbotConfig {
    fn default() -> Self {
        Self {
            pins: PinConfig {
                buttons: default_button_pins(),
                button_leds: default_button_led_pins(),
                motor_enable: default_motor_enable_pin(),
                motor_left: default_motor_left_pins(),
                motor_right: default_motor_right_pins(),
                ultrasonic_trigger: default_ultrasonic_trigger_pin(),
                ultrasonic_echo: default_ultrasonic_echo_pin(),
            },
            motors: MotorConfig {
                pwm_frequency_hz: default_motor_pwm_frequency(),
            },
            sensors: SensorConfig {
                echo_timeout_ms: default_echo_timeout_ms(),
                samples: default_ranging_samples(),
                echo_offset_ns: default_echo_offset_ns(),
            },
            buttons: ButtonConfig {
                poll_interval_ms: default_poll_interval_ms(),
                debounce_ms: default_debounce_ms(),
                event_channel_capacity: default_event_channel_capacity(),
            },
            lighting: LightingConfig {
                button_led_pwm_frequency_hz: default_button_led_pwm_frequency(),
                sn3218_address: default_sn3218_address(),
            },
            camera: CameraConfig {
                backend: default_camera_backend(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                jpeg_quality: default_jpeg_quality(),
                frame_timeout_ms: default_frame_timeout_ms(),
            },
            stream: StreamConfig {
                ip: default_stream_ip(),
                port: default_stream_port(),
                path: default_stream_path(),
                startup_timeout_ms: default_stream_startup_timeout_ms(),
            },
            system: SystemConfig {
                backend: default_bus_backend(),
            },
        }
    }
}

fn pin_list(pins: &[u8]) -> Vec<i64> {
    pins.iter().map(|&pin| pin as i64).collect()
}

fn backend_name<T: Serialize>(backend: &T) -> String {
    serde_json::to_value(backend)
        .ok()
        .and_then(|value| value.as_str().map(str::to_string))
        .unwrap_or_default()
}

// Default value functions
fn default_button_pins() -> [u8; 4] {
    [5, 6, 16, 24]
}
fn default_button_led_pins() -> [u8; 4] {
    [23, 22, 17, 27]
}
fn default_motor_enable_pin() -> u8 {
    26
}
fn default_motor_left_pins() -> (u8, u8) {
    (8, 11)
}
fn default_motor_right_pins() -> (u8, u8) {
    (10, 9)
}
fn default_ultrasonic_trigger_pin() -> u8 {
    13
}
fn default_ultrasonic_echo_pin() -> u8 {
    25
}

fn default_motor_pwm_frequency() -> f64 {
    100.0
}

fn default_echo_timeout_ms() -> u64 {
    50
}
fn default_ranging_samples() -> u32 {
    3
}
fn default_echo_offset_ns() -> u64 {
    190_000
}

fn default_poll_interval_ms() -> u64 {
    10
}
fn default_debounce_ms() -> u64 {
    30
}
fn default_event_channel_capacity() -> usize {
    64
}

fn default_button_led_pwm_frequency() -> f64 {
    2000.0
}
fn default_sn3218_address() -> u16 {
    0x54
}

fn default_camera_backend() -> CameraBackend {
    if cfg!(feature = "camera") {
        CameraBackend::V4l2
    } else {
        CameraBackend::TestPattern
    }
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    30
}
fn default_jpeg_quality() -> u8 {
    85
}
fn default_frame_timeout_ms() -> u64 {
    1000
}

fn default_stream_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_stream_port() -> u16 {
    8554
}
fn default_stream_path() -> String {
    "/stream".to_string()
}
fn default_stream_startup_timeout_ms() -> u64 {
    5000
}

fn default_bus_backend() -> BusBackend {
    if cfg!(feature = "rpi") {
        BusBackend::Rpi
    } else {
        BusBackend::Simulated
    }
}
