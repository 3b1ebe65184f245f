//! GPIO bank with per-pin state-change listeners.
//!
//! Each pin holds its current level and a list of listeners. A listener is invoked
//! synchronously, in registration order, every time the pin's level changes; writes
//! that leave the level unchanged do not notify. Listeners run on whatever context is
//! executing the device, so they must be cheap and must not block.

use std::fmt;

/// Electrical state of a GPIO pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PinLevel {
    /// Driven low.
    Low,
    /// Driven high.
    High,
    /// Floating input (reset state).
    #[default]
    Input,
    /// Input with pull-up enabled.
    InputPullUp,
    /// Input with pull-down enabled.
    InputPullDown,
}

impl PinLevel {
    /// Returns `true` only for an actively driven high level.
    pub const fn is_high(self) -> bool {
        matches!(self, Self::High)
    }
}

/// Handle returned by [`GpioBank::add_listener`], used to remove the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Callback invoked with the new level on every transition of one pin.
pub type PinListener = Box<dyn FnMut(PinLevel) + Send>;

struct Pin {
    level: PinLevel,
    listeners: Vec<(ListenerId, PinListener)>,
}

/// The device's GPIO pins.
pub struct GpioBank {
    pins: Vec<Pin>,
    next_id: u64,
}

impl GpioBank {
    /// Creates `count` pins, all in the floating-input reset state.
    pub fn new(count: usize) -> Self {
        let pins = (0..count)
            .map(|_| Pin {
                level: PinLevel::default(),
                listeners: Vec::new(),
            })
            .collect();
        Self { pins, next_id: 0 }
    }

    /// Returns the number of pins.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    /// Returns `true` if the bank has no pins.
    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Returns the current level of `pin`, or `None` if out of range.
    pub fn level(&self, pin: usize) -> Option<PinLevel> {
        self.pins.get(pin).map(|p| p.level)
    }

    /// Drives `pin` to `level`, notifying listeners if the level changed.
    ///
    /// Returns `true` if a transition occurred. Out-of-range pins are ignored.
    pub fn set_level(&mut self, pin: usize, level: PinLevel) -> bool {
        let Some(p) = self.pins.get_mut(pin) else {
            return false;
        };
        if p.level == level {
            return false;
        }
        p.level = level;
        for (_, listener) in &mut p.listeners {
            listener(level);
        }
        true
    }

    /// Subscribes `listener` to transitions of `pin`.
    ///
    /// Returns `None` if the pin does not exist.
    pub fn add_listener(&mut self, pin: usize, listener: PinListener) -> Option<ListenerId> {
        let p = self.pins.get_mut(pin)?;
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        p.listeners.push((id, listener));
        Some(id)
    }

    /// Removes a listener; returns `false` if it was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        for p in &mut self.pins {
            if let Some(pos) = p.listeners.iter().position(|(lid, _)| *lid == id) {
                drop(p.listeners.remove(pos));
                return true;
            }
        }
        false
    }

    /// Total number of listeners across all pins.
    pub fn listener_count(&self) -> usize {
        self.pins.iter().map(|p| p.listeners.len()).sum()
    }
}

impl fmt::Debug for GpioBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpioBank")
            .field("levels", &self.pins.iter().map(|p| p.level).collect::<Vec<_>>())
            .field("listeners", &self.listener_count())
            .finish()
    }
}
