use super::encode::encode_jpeg;
use super::source::FrameSourceFactory;
use super::stats::{CameraCounters, CameraStats};
use crate::config::{CameraConfig, StreamConfig};
use crate::error::{Result, SwiftbotError};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[cfg(feature = "streaming")]
use crate::streaming::{StreamHandle, StreamServer};

/// Lifecycle of the video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Stopped => "stopped",
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Stopping => "stopping",
        };
        write!(f, "{}", name)
    }
}

/// Single-shot capture plus the streaming lifecycle, over one camera device.
///
/// The device is opened per capture while the stream is stopped and is owned
/// by the stream while it runs; captures taken then reuse the stream's most
/// recent frame. Lifecycle transitions and captures are serialized by the
/// `transition` lock, while `state` is only held long enough to read or
/// write it.
pub struct CameraService {
    config: CameraConfig,
    stream_config: StreamConfig,
    factory: Arc<dyn FrameSourceFactory>,
    state: Mutex<StreamState>,
    transition: Mutex<()>,
    #[cfg(feature = "streaming")]
    stream: Mutex<Option<StreamHandle>>,
    counters: Arc<CameraCounters>,
}

impl CameraService {
    pub fn new(
        config: &CameraConfig,
        stream_config: &StreamConfig,
        factory: Arc<dyn FrameSourceFactory>,
    ) -> Self {
        info!(
            "Camera service using {} ({}x{} @ {}fps)",
            factory.name(),
            config.resolution.0,
            config.resolution.1,
            config.fps
        );

        Self {
            config: config.clone(),
            stream_config: stream_config.clone(),
            factory,
            state: Mutex::new(StreamState::Stopped),
            transition: Mutex::new(()),
            #[cfg(feature = "streaming")]
            stream: Mutex::new(None),
            counters: Arc::new(CameraCounters::default()),
        }
    }

    /// Grab one frame and return it JPEG-encoded.
    ///
    /// Returns an empty buffer when the camera produced no usable frame within
    /// the frame timeout. Fails with `DeviceUnavailable` when the device
    /// cannot be opened.
    pub fn capture_image(&self) -> Result<Vec<u8>> {
        let _transition = self.transition.lock();
        let state = *self.state.lock();

        let jpeg = match state {
            #[cfg(feature = "streaming")]
            StreamState::Running => self.capture_from_stream(),
            _ => self.capture_from_device()?,
        };

        self.counters.record_capture(jpeg.is_empty());
        if jpeg.is_empty() {
            warn!(
                "No frame from {} within {:?}",
                self.factory.name(),
                self.config.frame_timeout()
            );
        } else {
            debug!("Captured image ({} bytes)", jpeg.len());
        }
        Ok(jpeg)
    }

    fn capture_from_device(&self) -> Result<Vec<u8>> {
        let mut source = self.factory.open()?;
        let frame = match source.grab(self.config.frame_timeout()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Frame grab failed: {}", e);
                None
            }
        };
        drop(source);

        match frame {
            Some(frame) => Ok(encode_jpeg(frame, self.config.jpeg_quality)?),
            None => Ok(Vec::new()),
        }
    }

    #[cfg(feature = "streaming")]
    fn capture_from_stream(&self) -> Vec<u8> {
        self.stream
            .lock()
            .as_ref()
            .and_then(|stream| stream.latest_frame(self.config.frame_timeout()))
            .map(|frame| frame.to_vec())
            .unwrap_or_default()
    }

    /// Start the stream endpoint; a no-op when it is already running.
    ///
    /// Fails with `InvalidState` while a stop is in progress and with
    /// `DeviceUnavailable` when the camera cannot be opened. On failure the
    /// state is back at `Stopped`.
    pub fn start_streaming(&self) -> Result<()> {
        match *self.state.lock() {
            StreamState::Running => {
                debug!("Stream already running");
                return Ok(());
            }
            StreamState::Stopping => {
                return Err(SwiftbotError::invalid_state(
                    "start_streaming",
                    StreamState::Stopping.to_string(),
                ));
            }
            StreamState::Starting | StreamState::Stopped => {}
        }

        // a concurrent start finishes before this one looks at the state again
        let _transition = self.transition.lock();
        if *self.state.lock() != StreamState::Stopped {
            debug!("Stream already running");
            return Ok(());
        }

        self.set_state(StreamState::Starting);
        match self.launch() {
            Ok(()) => {
                self.set_state(StreamState::Running);
                self.counters.record_stream_start();
                info!("Streaming at {}", self.stream_url().unwrap_or_default());
                Ok(())
            }
            Err(e) => {
                self.set_state(StreamState::Stopped);
                error!("Failed to start streaming: {}", e);
                Err(e)
            }
        }
    }

    #[cfg(feature = "streaming")]
    fn launch(&self) -> Result<()> {
        let source = self.factory.open()?;
        let server = StreamServer::new(&self.stream_config, &self.config);
        let handle = server.start(source, Arc::clone(&self.counters))?;
        *self.stream.lock() = Some(handle);
        Ok(())
    }

    #[cfg(not(feature = "streaming"))]
    fn launch(&self) -> Result<()> {
        Err(SwiftbotError::device_unavailable(
            format!("{}:{}", self.stream_config.ip, self.stream_config.port),
            "built without the streaming feature",
        ))
    }

    /// Stop the stream, close every client and release the camera.
    ///
    /// Blocks until the stream has fully stopped; a no-op when already
    /// stopped.
    pub fn stop_streaming(&self) -> Result<()> {
        if *self.state.lock() == StreamState::Stopped {
            debug!("Stream already stopped");
            return Ok(());
        }

        let _transition = self.transition.lock();
        if *self.state.lock() == StreamState::Stopped {
            return Ok(());
        }

        self.set_state(StreamState::Stopping);
        #[cfg(feature = "streaming")]
        {
            let handle = self.stream.lock().take();
            if let Some(handle) = handle {
                handle.stop();
            }
        }
        self.set_state(StreamState::Stopped);
        self.counters.record_stream_stop();
        info!("Streaming stopped");
        Ok(())
    }

    pub fn stream_state(&self) -> StreamState {
        *self.state.lock()
    }

    /// Where clients can reach the stream; `None` unless it is running
    pub fn stream_url(&self) -> Option<String> {
        #[cfg(feature = "streaming")]
        {
            self.stream.lock().as_ref().map(|stream| stream.url())
        }
        #[cfg(not(feature = "streaming"))]
        {
            None
        }
    }

    pub fn stats(&self) -> CameraStats {
        self.counters.snapshot()
    }

    fn set_state(&self, next: StreamState) {
        let mut state = self.state.lock();
        debug!("Stream state {} -> {}", *state, next);
        *state = next;
    }
}

impl Drop for CameraService {
    fn drop(&mut self) {
        if let Err(e) = self.stop_streaming() {
            warn!("Failed to stop streaming on drop: {}", e);
        }
    }
}
