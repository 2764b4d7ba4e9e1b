use crate::config::{CameraBackend, CameraConfig};
use crate::error::CameraError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One captured image, either raw or already compressed by the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Rgb24 {
        width: u32,
        height: u32,
        data: Vec<u8>,
    },
    Jpeg(Vec<u8>),
}

/// An open camera device. Dropping it releases the device.
pub trait FrameSource: Send {
    /// Wait up to `timeout` for the next frame; `Ok(None)` when none arrived
    fn grab(&mut self, timeout: Duration) -> Result<Option<Frame>, CameraError>;
}

/// Opens the camera device on demand
pub trait FrameSourceFactory: Send + Sync {
    fn name(&self) -> &str;

    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError>;
}

/// Pick the frame source configured in `camera.backend`
pub fn factory_for(config: &CameraConfig) -> Arc<dyn FrameSourceFactory> {
    match config.backend {
        CameraBackend::TestPattern => Arc::new(TestPatternFactory::new(config)),
        CameraBackend::V4l2 => Arc::new(super::v4l2::V4l2Factory::new(config)),
    }
}

/// Behaviour of [`TestPatternFactory`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPatternMode {
    /// Deliver frames at the configured rate
    Frames,
    /// Open fine, but never produce a frame
    NoFrames,
    /// Fail to open as if no camera were attached
    FailOpen,
}

/// Synthetic camera producing a moving RGB gradient.
///
/// Clones share their mode and open-device count, so a test can keep one
/// handle while the camera service owns another.
#[derive(Clone)]
pub struct TestPatternFactory {
    width: u32,
    height: u32,
    frame_interval: Duration,
    mode: Arc<Mutex<TestPatternMode>>,
    open_sources: Arc<AtomicUsize>,
}

impl TestPatternFactory {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            width: config.resolution.0,
            height: config.resolution.1,
            frame_interval: config.frame_interval(),
            mode: Arc::new(Mutex::new(TestPatternMode::Frames)),
            open_sources: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_mode(self, mode: TestPatternMode) -> Self {
        self.set_mode(mode);
        self
    }

    pub fn set_mode(&self, mode: TestPatternMode) {
        *self.mode.lock() = mode;
    }

    /// Number of sources currently open
    pub fn open_sources(&self) -> usize {
        self.open_sources.load(Ordering::SeqCst)
    }
}

impl FrameSourceFactory for TestPatternFactory {
    fn name(&self) -> &str {
        "test-pattern"
    }

    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let mode = *self.mode.lock();
        if mode == TestPatternMode::FailOpen {
            return Err(CameraError::DeviceOpen {
                device: self.name().to_string(),
                details: "no camera attached".to_string(),
            });
        }

        self.open_sources.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Opened test pattern source {}x{} ({:?})",
            self.width, self.height, mode
        );

        Ok(Box::new(TestPatternSource {
            width: self.width,
            height: self.height,
            frame_interval: self.frame_interval,
            deliver: mode == TestPatternMode::Frames,
            sequence: 0,
            last_frame: None,
            open_sources: Arc::clone(&self.open_sources),
        }))
    }
}

pub struct TestPatternSource {
    width: u32,
    height: u32,
    frame_interval: Duration,
    deliver: bool,
    sequence: u64,
    last_frame: Option<Instant>,
    open_sources: Arc<AtomicUsize>,
}

impl TestPatternSource {
    fn render(&self) -> Vec<u8> {
        let shift = (self.sequence % 256) as u32;
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.push(((x * 255 / self.width.max(1) + shift) % 256) as u8);
                data.push((y * 255 / self.height.max(1)) as u8);
                data.push((shift * 8 % 256) as u8);
            }
        }
        data
    }
}

impl FrameSource for TestPatternSource {
    fn grab(&mut self, timeout: Duration) -> Result<Option<Frame>, CameraError> {
        if !self.deliver {
            thread::sleep(timeout);
            return Ok(None);
        }

        if let Some(last) = self.last_frame {
            let due = last + self.frame_interval;
            let now = Instant::now();
            if due > now + timeout {
                thread::sleep(timeout);
                return Ok(None);
            }
            thread::sleep(due.saturating_duration_since(now));
        }

        self.last_frame = Some(Instant::now());
        self.sequence += 1;
        trace!("Test pattern frame {}", self.sequence);

        Ok(Some(Frame::Rgb24 {
            width: self.width,
            height: self.height,
            data: self.render(),
        }))
    }
}

impl Drop for TestPatternSource {
    fn drop(&mut self) {
        self.open_sources.fetch_sub(1, Ordering::SeqCst);
    }
}
