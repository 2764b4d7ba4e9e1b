use super::*;
use crate::bus::{BusGateway, Level, SimulatedBus};
use crate::config::SwiftbotConfig;
use crate::events::{ButtonEvent, ButtonId, ButtonListener, ChannelListener};
use crate::sensors::SensorHub;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_millis(100);

fn create_test_monitor() -> (Arc<ButtonEventMonitor>, Arc<SensorHub>, SimulatedBus) {
    let sim = SimulatedBus::new();
    let mut config = SwiftbotConfig::default();
    config.buttons.poll_interval_ms = 5;
    config.buttons.debounce_ms = WINDOW.as_millis() as u64;

    let bus = Arc::new(BusGateway::new(Box::new(sim.clone())));
    let sensors = Arc::new(SensorHub::new(bus, &config.pins, &config.sensors));
    sensors.initialize().unwrap();
    let monitor = Arc::new(ButtonEventMonitor::new(
        Arc::clone(&sensors),
        &config.buttons,
    ));
    (monitor, sensors, sim)
}

fn button_pin(button: ButtonId) -> u8 {
    SwiftbotConfig::default().pins.buttons[button.index()]
}

#[derive(Default)]
struct RecordingListener {
    events: Mutex<Vec<(ButtonId, bool)>>,
}

impl ButtonListener for RecordingListener {
    fn on_button_pressed(&self, button: ButtonId) {
        self.events.lock().push((button, true));
    }

    fn on_button_released(&self, button: ButtonId) {
        self.events.lock().push((button, false));
    }
}

#[test]
fn test_debounce_ignores_short_glitch() {
    let start = Instant::now();
    let mut state = ButtonState::new(start);

    assert_eq!(state.update(true, start, WINDOW), None);
    assert_eq!(
        state.update(false, start + Duration::from_millis(20), WINDOW),
        None
    );
    assert_eq!(
        state.update(false, start + Duration::from_millis(500), WINDOW),
        None
    );
    assert!(!state.is_pressed());
}

#[test]
fn test_debounce_confirms_stable_level_once() {
    let start = Instant::now();
    let mut state = ButtonState::new(start);

    assert_eq!(state.update(true, start, WINDOW), None);
    assert_eq!(
        state.update(true, start + Duration::from_millis(50), WINDOW),
        None
    );
    assert_eq!(
        state.update(true, start + WINDOW, WINDOW),
        Some(Edge::Pressed)
    );
    assert_eq!(
        state.update(true, start + Duration::from_millis(300), WINDOW),
        None
    );
    assert!(state.is_pressed());

    let release = start + Duration::from_millis(400);
    assert_eq!(state.update(false, release, WINDOW), None);
    assert_eq!(
        state.update(false, release + WINDOW, WINDOW),
        Some(Edge::Released)
    );
}

#[test]
fn test_debounce_restarts_window_on_bounce() {
    let start = Instant::now();
    let mut state = ButtonState::new(start);

    state.update(true, start, WINDOW);
    state.update(false, start + Duration::from_millis(60), WINDOW);
    let settled = start + Duration::from_millis(90);
    state.update(true, settled, WINDOW);

    // 100ms after the first edge, but only 60ms after the last one
    assert_eq!(
        state.update(true, start + Duration::from_millis(150), WINDOW),
        None
    );
    assert_eq!(
        state.update(true, settled + WINDOW, WINDOW),
        Some(Edge::Pressed)
    );
}

#[test]
fn test_stable_press_delivers_one_press_and_one_release() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let (listener, events) = ChannelListener::bounded(16);
    monitor.register_listener(Arc::new(listener)).unwrap();
    assert!(monitor.is_running());

    sim.set_input(button_pin(ButtonId::B), Level::High);
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(
        event,
        ButtonEvent::Pressed {
            button: ButtonId::B,
            ..
        }
    ));
    assert!(monitor.button_state(ButtonId::B).is_pressed());

    sim.set_input(button_pin(ButtonId::B), Level::Low);
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(matches!(
        event,
        ButtonEvent::Released {
            button: ButtonId::B,
            ..
        }
    ));

    thread::sleep(WINDOW * 2);
    assert!(events.try_recv().is_err());
    monitor.unregister_listener();
}

#[test]
fn test_bounce_shorter_than_window_is_silent() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let listener = Arc::new(RecordingListener::default());
    monitor.register_listener(listener.clone()).unwrap();

    let pin = button_pin(ButtonId::A);
    for i in 0..20 {
        sim.set_input(pin, Level::from(i % 2 == 0));
        thread::sleep(Duration::from_millis(5));
    }
    sim.set_input(pin, Level::Low);
    thread::sleep(WINDOW * 2);

    monitor.unregister_listener();
    assert!(listener.events.lock().is_empty());
}

#[test]
fn test_no_callbacks_after_unregister() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let listener = Arc::new(RecordingListener::default());
    monitor.register_listener(listener.clone()).unwrap();

    monitor.unregister_listener();
    assert!(!monitor.is_running());
    assert!(!monitor.has_listener());

    sim.set_input(button_pin(ButtonId::Y), Level::High);
    thread::sleep(WINDOW * 3);
    assert!(listener.events.lock().is_empty());

    // unregistering twice is harmless
    monitor.unregister_listener();
}

#[test]
fn test_register_replaces_listener() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let first = Arc::new(RecordingListener::default());
    let second = Arc::new(RecordingListener::default());

    monitor.register_listener(first.clone()).unwrap();
    monitor.register_listener(second.clone()).unwrap();
    assert!(monitor.is_running());

    sim.set_input(button_pin(ButtonId::X), Level::High);
    thread::sleep(WINDOW * 3);
    monitor.unregister_listener();

    assert!(first.events.lock().is_empty());
    assert_eq!(*second.events.lock(), vec![(ButtonId::X, true)]);
}

struct BusUsingListener {
    sensors: Arc<SensorHub>,
    reads: AtomicUsize,
}

impl ButtonListener for BusUsingListener {
    fn on_button_pressed(&self, _button: ButtonId) {
        // issues a bus transaction from the monitor thread
        if self.sensors.read_buttons_raw().is_ok() {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_button_released(&self, _button: ButtonId) {}
}

#[test]
fn test_callback_can_use_the_bus() {
    let (monitor, sensors, sim) = create_test_monitor();
    let listener = Arc::new(BusUsingListener {
        sensors,
        reads: AtomicUsize::new(0),
    });
    monitor.register_listener(listener.clone()).unwrap();

    sim.set_input(button_pin(ButtonId::A), Level::High);
    let deadline = Instant::now() + Duration::from_secs(2);
    while listener.reads.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    monitor.unregister_listener();
    assert_eq!(listener.reads.load(Ordering::SeqCst), 1);
}

struct SelfRemovingListener {
    monitor: Mutex<Option<Arc<ButtonEventMonitor>>>,
    presses: AtomicUsize,
}

impl ButtonListener for SelfRemovingListener {
    fn on_button_pressed(&self, _button: ButtonId) {
        self.presses.fetch_add(1, Ordering::SeqCst);
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.unregister_listener();
        }
    }

    fn on_button_released(&self, _button: ButtonId) {}
}

#[test]
fn test_unregister_from_inside_callback() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let listener = Arc::new(SelfRemovingListener {
        monitor: Mutex::new(Some(Arc::clone(&monitor))),
        presses: AtomicUsize::new(0),
    });
    monitor.register_listener(listener.clone()).unwrap();

    // both pressed in the same sample: only the first event is delivered
    sim.set_input(button_pin(ButtonId::A), Level::High);
    sim.set_input(button_pin(ButtonId::B), Level::High);

    let deadline = Instant::now() + Duration::from_secs(2);
    while monitor.is_running() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }

    assert!(!monitor.is_running());
    assert!(!monitor.has_listener());
    assert_eq!(listener.presses.load(Ordering::SeqCst), 1);

    // monitor can be restarted afterwards
    let (channel_listener, events) = ChannelListener::bounded(4);
    monitor.register_listener(Arc::new(channel_listener)).unwrap();
    sim.set_input(button_pin(ButtonId::A), Level::Low);
    let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
    assert!(!event.is_press());
    monitor.unregister_listener();
}

#[test]
fn test_bus_errors_do_not_stop_the_monitor() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let (listener, events) = ChannelListener::bounded(4);
    monitor.register_listener(Arc::new(listener)).unwrap();

    sim.set_unplugged(true);
    thread::sleep(Duration::from_millis(30));
    assert!(monitor.is_running());

    sim.set_unplugged(false);
    sim.set_input(button_pin(ButtonId::Y), Level::High);
    let event = events.recv_timeout(Duration::from_secs(3)).unwrap();
    assert_eq!(event.button(), ButtonId::Y);
    monitor.unregister_listener();
}

#[test]
fn test_register_fails_when_bus_is_gone() {
    let (monitor, _sensors, sim) = create_test_monitor();
    let (listener, _events) = ChannelListener::bounded(4);

    sim.set_unplugged(true);
    let err = monitor.register_listener(Arc::new(listener)).unwrap_err();
    assert!(err.is_device_unavailable());
    assert!(!monitor.is_running());
    assert!(!monitor.has_listener());
}
