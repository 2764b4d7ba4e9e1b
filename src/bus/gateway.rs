use super::BusDevice;
use crate::error::{Result, SwiftbotError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, trace};

/// Exclusive owner of the hardware bus.
///
/// All hardware traffic goes through [`BusGateway::with_lock`]; callers queue
/// on the lock and run one at a time. Once the gateway has been marked
/// unavailable (device missing, or the owning session closed) every
/// operation fails with `DeviceUnavailable`.
pub struct BusGateway {
    name: String,
    device: Mutex<Option<Box<dyn BusDevice>>>,
    operations: AtomicU64,
}

impl BusGateway {
    pub fn new(device: Box<dyn BusDevice>) -> Self {
        let name = device.name().to_string();
        info!("Bus gateway attached to {}", name);

        Self {
            name,
            device: Mutex::new(Some(device)),
            operations: AtomicU64::new(0),
        }
    }

    /// Run `operation` with exclusive access to the bus
    pub fn with_lock<T, F>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut dyn BusDevice) -> Result<T>,
    {
        let mut guard = self.device.lock();
        let device = guard
            .as_mut()
            .ok_or_else(|| SwiftbotError::device_unavailable(&self.name, "bus is closed"))?;

        let count = self.operations.fetch_add(1, Ordering::Relaxed) + 1;
        trace!("Bus transaction {} on {}", count, self.name);

        operation(device.as_mut())
    }

    /// Detach the device; subsequent operations fail with `DeviceUnavailable`
    pub fn mark_unavailable(&self) -> Option<Box<dyn BusDevice>> {
        let device = self.device.lock().take();
        if device.is_some() {
            info!("Bus gateway {} detached", self.name);
        }
        device
    }

    pub fn is_available(&self) -> bool {
        self.device.lock().is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of transactions started since the gateway was created
    pub fn operation_count(&self) -> u64 {
        self.operations.load(Ordering::Relaxed)
    }
}
