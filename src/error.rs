use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwiftbotError {
    #[error("Device unavailable: {device}: {details}")]
    DeviceUnavailable { device: String, details: String },

    #[error("Invalid argument: {details}")]
    InvalidArgument { details: String },

    #[error("Invalid state: cannot {operation} while {state}")]
    InvalidState { operation: String, state: String },

    #[error("Timeout: {operation} did not complete within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(CameraError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl SwiftbotError {
    pub fn device_unavailable<D: Into<String>, S: Into<String>>(device: D, details: S) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            details: details.into(),
        }
    }

    pub fn invalid_argument<S: Into<String>>(details: S) -> Self {
        Self::InvalidArgument {
            details: details.into(),
        }
    }

    pub fn invalid_state<O: Into<String>, S: Into<String>>(operation: O, state: S) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// True for errors that mean the hardware itself is missing or inaccessible
    pub fn is_device_unavailable(&self) -> bool {
        matches!(self, SwiftbotError::DeviceUnavailable { .. })
    }
}

/// Camera device errors
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera device {device}: {details}")]
    DeviceOpen { device: String, details: String },

    #[error("Frame grab failed: {details}")]
    Grab { details: String },

    #[error("Frame encoding failed: {details}")]
    Encode { details: String },

    #[error("Camera configuration error: {details}")]
    Configuration { details: String },
}

impl From<CameraError> for SwiftbotError {
    fn from(error: CameraError) -> Self {
        match error {
            CameraError::DeviceOpen { device, details } => {
                SwiftbotError::DeviceUnavailable { device, details }
            }
            other => SwiftbotError::Camera(other),
        }
    }
}

/// Stream server errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to bind stream server to {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Stream server startup failed: {details}")]
    StartupFailed { details: String },

    #[error("Stream server did not become ready within {0:?}")]
    StartupTimeout(Duration),
}

pub type Result<T> = std::result::Result<T, SwiftbotError>;
