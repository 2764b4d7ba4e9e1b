use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Camera and stream counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CameraStats {
    pub captures: u64,
    /// Captures that returned no image because no frame arrived in time
    pub empty_captures: u64,
    pub stream_starts: u64,
    pub stream_stops: u64,
    /// Frames written to stream clients
    pub frames_streamed: u64,
}

/// Live counters shared with the stream server thread
#[derive(Debug, Default)]
pub struct CameraCounters {
    captures: AtomicU64,
    empty_captures: AtomicU64,
    stream_starts: AtomicU64,
    stream_stops: AtomicU64,
    frames_streamed: AtomicU64,
}

impl CameraCounters {
    pub fn record_capture(&self, empty: bool) {
        self.captures.fetch_add(1, Ordering::Relaxed);
        if empty {
            self.empty_captures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_stream_start(&self) {
        self.stream_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_stop(&self) {
        self.stream_stops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_streamed_frame(&self) {
        self.frames_streamed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CameraStats {
        CameraStats {
            captures: self.captures.load(Ordering::Relaxed),
            empty_captures: self.empty_captures.load(Ordering::Relaxed),
            stream_starts: self.stream_starts.load(Ordering::Relaxed),
            stream_stops: self.stream_stops.load(Ordering::Relaxed),
            frames_streamed: self.frames_streamed.load(Ordering::Relaxed),
        }
    }
}
