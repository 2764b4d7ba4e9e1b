mod debounce;
mod monitor;
#[cfg(test)]
mod tests;

pub use debounce::{ButtonState, Edge};
pub use monitor::ButtonEventMonitor;
