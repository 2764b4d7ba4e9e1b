use serde::Serialize;
use std::time::{Duration, Instant};

/// Confirmed transition of a debounced button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Edge {
    Pressed,
    Released,
}

/// Per-button debounce state.
///
/// `raw` follows every sample; `debounced` only follows `raw` once it has
/// stayed at the same level for the whole debounce window. A level that
/// flips back before the window elapses is discarded.
#[derive(Debug, Clone, Copy)]
pub struct ButtonState {
    pub raw: bool,
    pub debounced: bool,
    pub last_change: Instant,
}

impl ButtonState {
    pub fn new(now: Instant) -> Self {
        Self {
            raw: false,
            debounced: false,
            last_change: now,
        }
    }

    /// Feed one sample; returns the edge if this sample confirms a transition
    pub fn update(&mut self, raw: bool, now: Instant, window: Duration) -> Option<Edge> {
        if raw != self.raw {
            self.raw = raw;
            self.last_change = now;
        }

        if self.raw == self.debounced {
            return None;
        }

        if now.saturating_duration_since(self.last_change) < window {
            return None;
        }

        self.debounced = self.raw;
        Some(if self.debounced {
            Edge::Pressed
        } else {
            Edge::Released
        })
    }

    pub fn is_pressed(&self) -> bool {
        self.debounced
    }
}
