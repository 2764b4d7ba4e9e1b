use super::debounce::{ButtonState, Edge};
use crate::config::ButtonConfig;
use crate::error::Result;
use crate::events::{ButtonEvent, ButtonId, ButtonListener, NUM_BUTTONS};
use crate::sensors::SensorHub;
use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, error, info, warn};

const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// State shared between the public handle and the polling thread
struct Shared {
    listener: RwLock<Option<Arc<dyn ButtonListener>>>,
    states: Mutex<[ButtonState; NUM_BUTTONS]>,
    /// Set when the listener unregisters itself from inside a callback
    stop_requested: AtomicBool,
    monitor_thread: Mutex<Option<ThreadId>>,
}

impl Shared {
    fn is_monitor_thread(&self) -> bool {
        *self.monitor_thread.lock() == Some(thread::current().id())
    }
}

struct MonitorWorker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Polls the four button lines, debounces them and delivers press/release
/// events to the registered listener.
///
/// Polling runs on a dedicated thread that only exists while a listener is
/// registered. The bus lock is released before any callback runs.
pub struct ButtonEventMonitor {
    sensors: Arc<SensorHub>,
    poll_interval: Duration,
    debounce_window: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<MonitorWorker>>,
}

impl ButtonEventMonitor {
    pub fn new(sensors: Arc<SensorHub>, config: &ButtonConfig) -> Self {
        let now = Instant::now();
        Self {
            sensors,
            poll_interval: config.poll_interval(),
            debounce_window: config.debounce_window(),
            shared: Arc::new(Shared {
                listener: RwLock::new(None),
                states: Mutex::new([ButtonState::new(now); NUM_BUTTONS]),
                stop_requested: AtomicBool::new(false),
                monitor_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Install `listener`, replacing any previous one, and start polling if
    /// the monitor is not already running.
    ///
    /// Fails without installing anything when the button lines cannot be
    /// read, e.g. after the session was closed.
    pub fn register_listener(&self, listener: Arc<dyn ButtonListener>) -> Result<()> {
        if self.shared.is_monitor_thread() {
            *self.shared.listener.write() = Some(listener);
            // re-registered from a callback; the loop is already running
            self.shared.stop_requested.store(false, Ordering::SeqCst);
            return Ok(());
        }

        self.sensors.read_buttons_raw()?;
        *self.shared.listener.write() = Some(listener);

        let mut worker = self.worker.lock();
        if let Some(existing) = worker.as_ref() {
            let winding_down = self.shared.stop_requested.load(Ordering::SeqCst);
            if !existing.handle.is_finished() && !winding_down {
                debug!("Button listener replaced");
                return Ok(());
            }
        }
        if let Some(stale) = worker.take() {
            let _ = stale.stop_tx.send(());
            let _ = stale.handle.join();
        }

        *worker = Some(self.spawn_worker()?);
        info!(
            "Button monitor started (poll every {:?}, debounce {:?})",
            self.poll_interval, self.debounce_window
        );
        Ok(())
    }

    /// Stop polling and drop the listener.
    ///
    /// When called from outside the monitor thread this blocks until the
    /// thread has exited, so no callback runs after it returns. Called from
    /// inside a callback it only requests the stop.
    pub fn unregister_listener(&self) {
        if self.shared.is_monitor_thread() {
            *self.shared.listener.write() = None;
            self.shared.stop_requested.store(true, Ordering::SeqCst);
            debug!("Button listener unregistered from callback");
            return;
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            if worker.handle.join().is_err() {
                error!("Button monitor thread panicked");
            }
            info!("Button monitor stopped");
        }
        *self.shared.listener.write() = None;
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .as_ref()
            .map(|worker| !worker.handle.is_finished())
            .unwrap_or(false)
    }

    pub fn has_listener(&self) -> bool {
        self.shared.listener.read().is_some()
    }

    /// Snapshot of one button's debounce state
    pub fn button_state(&self, button: ButtonId) -> ButtonState {
        self.shared.states.lock()[button.index()]
    }

    fn spawn_worker(&self) -> Result<MonitorWorker> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);
        let sensors = Arc::clone(&self.sensors);
        let shared = Arc::clone(&self.shared);
        let poll_interval = self.poll_interval;
        let debounce_window = self.debounce_window;

        shared.stop_requested.store(false, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("swiftbot-buttons".to_string())
            .spawn(move || {
                *shared.monitor_thread.lock() = Some(thread::current().id());

                let mut consecutive_errors = 0u32;
                loop {
                    if shared.stop_requested.load(Ordering::SeqCst) {
                        break;
                    }

                    let started = Instant::now();
                    let wait = match sensors.read_buttons_raw() {
                        Ok(levels) => {
                            if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                                info!("Button lines readable again");
                            }
                            consecutive_errors = 0;
                            let edges = sample_all(&shared, levels, started, debounce_window);
                            deliver(&shared, &edges);
                            poll_interval.saturating_sub(started.elapsed())
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            if consecutive_errors < MAX_CONSECUTIVE_ERRORS {
                                warn!(
                                    "Error reading button lines (attempt {}): {}",
                                    consecutive_errors, e
                                );
                                poll_interval
                            } else {
                                if consecutive_errors == MAX_CONSECUTIVE_ERRORS {
                                    error!(
                                        "Too many consecutive errors reading button lines, backing off: {}",
                                        e
                                    );
                                }
                                ERROR_BACKOFF
                            }
                        }
                    };

                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                *shared.monitor_thread.lock() = None;
                debug!("Button monitor loop exited");
            })?;

        Ok(MonitorWorker { stop_tx, handle })
    }
}

impl Drop for ButtonEventMonitor {
    fn drop(&mut self) {
        self.unregister_listener();
    }
}

/// Run every button through its debouncer; the state lock is released on return
fn sample_all(
    shared: &Shared,
    levels: [bool; NUM_BUTTONS],
    now: Instant,
    window: Duration,
) -> Vec<(ButtonId, Edge)> {
    let mut states = shared.states.lock();
    ButtonId::ALL
        .iter()
        .zip(levels)
        .filter_map(|(&button, raw)| {
            states[button.index()]
                .update(raw, now, window)
                .map(|edge| (button, edge))
        })
        .collect()
}

fn deliver(shared: &Shared, edges: &[(ButtonId, Edge)]) {
    for &(button, edge) in edges {
        // re-read per event: a callback may have unregistered or replaced the listener
        let listener = match shared.listener.read().clone() {
            Some(listener) => listener,
            None => return,
        };

        let timestamp = SystemTime::now();
        let event = match edge {
            Edge::Pressed => ButtonEvent::Pressed { button, timestamp },
            Edge::Released => ButtonEvent::Released { button, timestamp },
        };
        debug!("Button {} {}", button, event.event_type());

        if panic::catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
            error!("Button listener panicked handling {:?}", event);
        }
    }
}
