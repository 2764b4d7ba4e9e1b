mod encode;
mod service;
mod source;
mod stats;
mod v4l2;

pub use encode::encode_jpeg;
pub use service::{CameraService, StreamState};
pub use source::{
    factory_for, Frame, FrameSource, FrameSourceFactory, TestPatternFactory, TestPatternMode,
    TestPatternSource,
};
pub use stats::{CameraCounters, CameraStats};
pub use v4l2::V4l2Factory;
