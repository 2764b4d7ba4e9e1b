use super::source::{FrameSource, FrameSourceFactory};
use crate::config::CameraConfig;
use crate::error::CameraError;

#[cfg(all(feature = "camera", target_os = "linux"))]
use super::source::Frame;
#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer::prelude::*;
#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer::Pipeline;
#[cfg(all(feature = "camera", target_os = "linux"))]
use gstreamer_app::AppSink;
#[cfg(all(feature = "camera", target_os = "linux"))]
use std::time::Duration;
#[cfg(all(feature = "camera", target_os = "linux"))]
use tracing::{info, trace, warn};

/// V4L2 camera through a GStreamer `v4l2src ! image/jpeg ! appsink` pipeline
pub struct V4l2Factory {
    device: String,
    #[cfg_attr(not(all(feature = "camera", target_os = "linux")), allow(dead_code))]
    config: CameraConfig,
}

impl V4l2Factory {
    pub fn new(config: &CameraConfig) -> Self {
        Self {
            device: format!("/dev/video{}", config.index),
            config: config.clone(),
        }
    }

    #[cfg(all(feature = "camera", target_os = "linux"))]
    fn pipeline_description(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=2 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=2 drop=true emit-signals=false",
            self.device, width, height, self.config.fps
        )
    }
}

impl FrameSourceFactory for V4l2Factory {
    fn name(&self) -> &str {
        &self.device
    }

    #[cfg(all(feature = "camera", target_os = "linux"))]
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        let open_error = |details: String| CameraError::DeviceOpen {
            device: self.device.clone(),
            details,
        };

        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let description = self.pipeline_description();
        info!("Creating GStreamer pipeline: {}", description);

        let pipeline = gstreamer::parse::launch(&description)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let sink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        info!("Camera {} opened", self.device);
        Ok(Box::new(V4l2Source {
            device: self.device.clone(),
            pipeline,
            sink,
        }))
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
        Err(CameraError::DeviceOpen {
            device: self.device.clone(),
            details: "built without the camera feature".to_string(),
        })
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
struct V4l2Source {
    device: String,
    pipeline: Pipeline,
    sink: AppSink,
}

#[cfg(all(feature = "camera", target_os = "linux"))]
impl FrameSource for V4l2Source {
    fn grab(&mut self, timeout: Duration) -> Result<Option<Frame>, CameraError> {
        let timeout = gstreamer::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let sample = match self.sink.try_pull_sample(timeout) {
            Some(sample) => sample,
            None => {
                if self.sink.is_eos() {
                    return Err(CameraError::Grab {
                        details: format!("{} reached end of stream", self.device),
                    });
                }
                return Ok(None);
            }
        };

        let buffer = sample.buffer().ok_or_else(|| CameraError::Grab {
            details: "No buffer in sample".to_string(),
        })?;
        let map = buffer.map_readable().map_err(|e| CameraError::Grab {
            details: format!("Failed to map buffer: {}", e),
        })?;

        trace!("Captured MJPEG frame from {} ({} bytes)", self.device, map.len());
        Ok(Some(Frame::Jpeg(map.as_slice().to_vec())))
    }
}

#[cfg(all(feature = "camera", target_os = "linux"))]
impl Drop for V4l2Source {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop camera pipeline for {}: {}", self.device, e);
        } else {
            info!("Camera {} released", self.device);
        }
    }
}
