use crate::config::ButtonConfig;
use crate::error::{Result, SwiftbotError};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;
use tracing::{debug, warn};

pub const BUTTON_A: u8 = 0;
pub const BUTTON_B: u8 = 1;
pub const BUTTON_X: u8 = 2;
pub const BUTTON_Y: u8 = 3;
pub const NUM_BUTTONS: usize = 4;

/// One of the four momentary buttons on the top of the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonId {
    A,
    B,
    X,
    Y,
}

impl ButtonId {
    pub const ALL: [ButtonId; NUM_BUTTONS] = [ButtonId::A, ButtonId::B, ButtonId::X, ButtonId::Y];

    /// Index used on the command surface and for pin tables
    pub fn index(self) -> usize {
        match self {
            ButtonId::A => BUTTON_A as usize,
            ButtonId::B => BUTTON_B as usize,
            ButtonId::X => BUTTON_X as usize,
            ButtonId::Y => BUTTON_Y as usize,
        }
    }
}

impl TryFrom<i32> for ButtonId {
    type Error = SwiftbotError;

    fn try_from(id: i32) -> Result<Self> {
        match id {
            0 => Ok(ButtonId::A),
            1 => Ok(ButtonId::B),
            2 => Ok(ButtonId::X),
            3 => Ok(ButtonId::Y),
            other => Err(SwiftbotError::invalid_argument(format!(
                "unknown button id {} (expected 0..={})",
                other,
                NUM_BUTTONS - 1
            ))),
        }
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ButtonId::A => "A",
            ButtonId::B => "B",
            ButtonId::X => "X",
            ButtonId::Y => "Y",
        };
        write!(f, "{}", name)
    }
}

/// Confirmed (debounced) button transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonEvent {
    Pressed {
        button: ButtonId,
        timestamp: SystemTime,
    },
    Released {
        button: ButtonId,
        timestamp: SystemTime,
    },
}

impl ButtonEvent {
    pub fn button(&self) -> ButtonId {
        match self {
            ButtonEvent::Pressed { button, .. } | ButtonEvent::Released { button, .. } => *button,
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            ButtonEvent::Pressed { timestamp, .. } | ButtonEvent::Released { timestamp, .. } => {
                *timestamp
            }
        }
    }

    pub fn is_press(&self) -> bool {
        matches!(self, ButtonEvent::Pressed { .. })
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            ButtonEvent::Pressed { .. } => "button_pressed",
            ButtonEvent::Released { .. } => "button_released",
        }
    }
}

/// Receiver of button events, invoked from the monitor thread.
///
/// Callbacks run without the bus lock held, so they may issue robot commands.
/// They should return quickly: the next sample is taken only after they do.
pub trait ButtonListener: Send + Sync {
    fn on_button_pressed(&self, button: ButtonId);

    fn on_button_released(&self, button: ButtonId);

    /// Full event entry point; the default splits into the two callbacks
    fn on_event(&self, event: ButtonEvent) {
        match event {
            ButtonEvent::Pressed { button, .. } => self.on_button_pressed(button),
            ButtonEvent::Released { button, .. } => self.on_button_released(button),
        }
    }
}

/// What a channel consumer has been told about one button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Idle,
    /// Press sent; a slot is held for its release
    Pressed,
    /// Press dropped; the matching release is dropped too
    Dropped,
}

/// Listener that forwards events into a bounded channel.
///
/// When the consumer falls behind, events are dropped rather than stalling
/// the monitor loop. Drops happen in whole press/release pairs: a press is
/// only queued when its release is sure to fit as well, so the consumer
/// always sees each button alternate between pressed and released.
pub struct ChannelListener {
    sender: Sender<ButtonEvent>,
    capacity: usize,
    deliveries: Mutex<[Delivery; NUM_BUTTONS]>,
}

impl ChannelListener {
    /// Channel holding up to `capacity` events; at least two, so one full
    /// press/release pair always fits
    pub fn bounded(capacity: usize) -> (Self, Receiver<ButtonEvent>) {
        let capacity = capacity.max(2);
        let (sender, receiver) = channel::bounded(capacity);
        let listener = Self {
            sender,
            capacity,
            deliveries: Mutex::new([Delivery::Idle; NUM_BUTTONS]),
        };
        (listener, receiver)
    }

    /// Channel sized from `buttons.event_channel_capacity`
    pub fn from_config(config: &ButtonConfig) -> (Self, Receiver<ButtonEvent>) {
        Self::bounded(config.event_channel_capacity)
    }

    fn forward(&self, event: ButtonEvent) {
        let mut deliveries = self.deliveries.lock();
        let slot = event.button().index();

        match (event.is_press(), deliveries[slot]) {
            (false, Delivery::Dropped) => {
                deliveries[slot] = Delivery::Idle;
                debug!("Dropping release of button {} to match its press", event.button());
            }
            (false, _) => {
                deliveries[slot] = Delivery::Idle;
                self.send(event);
            }
            (true, _) => {
                let owed = deliveries
                    .iter()
                    .filter(|&&delivery| delivery == Delivery::Pressed)
                    .count();
                if self.sender.len() + owed + 2 <= self.capacity && self.send(event) {
                    deliveries[slot] = Delivery::Pressed;
                } else {
                    warn!(
                        "Button event channel full, dropping press and release of button {}",
                        event.button()
                    );
                    deliveries[slot] = Delivery::Dropped;
                }
            }
        }
    }

    fn send(&self, event: ButtonEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Button event channel full, dropping {} for button {}",
                    event.event_type(),
                    event.button()
                );
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

impl ButtonListener for ChannelListener {
    fn on_button_pressed(&self, button: ButtonId) {
        self.forward(ButtonEvent::Pressed {
            button,
            timestamp: SystemTime::now(),
        });
    }

    fn on_button_released(&self, button: ButtonId) {
        self.forward(ButtonEvent::Released {
            button,
            timestamp: SystemTime::now(),
        });
    }

    fn on_event(&self, event: ButtonEvent) {
        self.forward(event);
    }
}
