//! Pin observer registry.
//!
//! Binds device GPIO pins to indicators. Each binding installs a GPIO listener that
//! does nothing but push a `PinEvent` into a single-consumer channel; the owner drains
//! the channel with [`PinBindings::pump`], which is the only place indicators are
//! driven from. The execution cycle therefore never calls into indicator code, and
//! per-pin transition order is preserved by the channel's FIFO order.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver};

use tracing::debug;

use crate::common::ConfigError;
use crate::soc::gpio::{ListenerId, PinLevel};
use crate::soc::traits::Device;

/// A settable boolean visual state, labelled with the pin it mirrors.
pub trait Indicator {
    /// Returns the pin label attribute, if the indicator carries one.
    fn label(&self) -> Option<String>;
    /// Lights (`true`) or darkens (`false`) the indicator.
    fn set_value(&self, on: bool);
    /// Returns the current state.
    fn value(&self) -> bool;
}

/// In-memory LED indicator.
#[derive(Debug, Default)]
pub struct Led {
    label: Option<String>,
    value: Cell<bool>,
    changes: Cell<u64>,
}

impl Led {
    /// Creates a dark LED labelled with `label`.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Number of times the value actually changed.
    pub fn changes(&self) -> u64 {
        self.changes.get()
    }
}

impl Indicator for Led {
    fn label(&self) -> Option<String> {
        self.label.clone()
    }

    fn set_value(&self, on: bool) {
        if self.value.replace(on) != on {
            self.changes.set(self.changes.get() + 1);
        }
    }

    fn value(&self) -> bool {
        self.value.get()
    }
}

/// An indicator paired with the pin label text to bind it to.
#[derive(Clone)]
pub struct PinSpec {
    /// The indicator to drive.
    pub indicator: Rc<dyn Indicator>,
    /// Pin label text; `None` when the indicator has no label.
    pub label: Option<String>,
}

impl PinSpec {
    /// Pairs `indicator` with an explicit label.
    pub fn new(indicator: Rc<dyn Indicator>, label: impl Into<String>) -> Self {
        Self {
            indicator,
            label: Some(label.into()),
        }
    }

    /// Uses the indicator's own label attribute.
    pub fn from_indicator(indicator: Rc<dyn Indicator>) -> Self {
        let label = indicator.label();
        Self { indicator, label }
    }
}

impl fmt::Debug for PinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinSpec")
            .field("label", &self.label)
            .field("value", &self.indicator.value())
            .finish()
    }
}

/// A pin transition observed on the execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinEvent {
    /// Index of the binding that observed it.
    pub binding: usize,
    /// Pin number.
    pub pin: usize,
    /// New level.
    pub level: PinLevel,
}

/// One live pin-to-indicator association.
pub struct PinBinding {
    pin: usize,
    listener: ListenerId,
    indicator: Rc<dyn Indicator>,
}

impl PinBinding {
    /// Pin number this binding observes.
    pub const fn pin(&self) -> usize {
        self.pin
    }

    /// GPIO listener handle.
    pub const fn listener(&self) -> ListenerId {
        self.listener
    }
}

impl fmt::Debug for PinBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinBinding")
            .field("pin", &self.pin)
            .field("listener", &self.listener)
            .finish_non_exhaustive()
    }
}

/// The set of bindings created by one [`bind`] call.
pub struct PinBindings {
    bindings: Vec<PinBinding>,
    events: Receiver<PinEvent>,
    delivered: u64,
}

impl PinBindings {
    /// Bindings in the order they were requested.
    pub fn bindings(&self) -> &[PinBinding] {
        &self.bindings
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Total events delivered to indicators so far.
    pub const fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Delivers all queued transitions to their indicators, in arrival order.
    ///
    /// Returns the number of events delivered.
    pub fn pump(&mut self) -> usize {
        let mut count = 0;
        while let Ok(event) = self.events.try_recv() {
            if let Some(binding) = self.bindings.get(event.binding) {
                binding.indicator.set_value(event.level.is_high());
                count += 1;
            }
        }
        self.delivered += count as u64;
        count
    }

    /// Removes every listener from `device` and discards undelivered events.
    ///
    /// No indicator is touched after this returns. Returns the number of listeners removed.
    pub fn unbind(self, device: &mut dyn Device) -> usize {
        let removed = remove_listeners(device, &self.bindings);
        debug!(removed, "pin bindings released");
        removed
    }
}

impl fmt::Debug for PinBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinBindings")
            .field("bindings", &self.bindings)
            .field("delivered", &self.delivered)
            .finish_non_exhaustive()
    }
}

/// Parses a pin label into a pin index valid for a device with `pin_count` pins.
///
/// # Errors
///
/// `ConfigError::InvalidPinLabel` if the label is absent or not a non-negative decimal
/// integer; `ConfigError::PinOutOfRange` if it names a pin the device does not have.
pub fn parse_pin_label(label: Option<&str>, pin_count: usize) -> Result<usize, ConfigError> {
    let text = label.unwrap_or_default();
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::InvalidPinLabel {
            label: text.to_owned(),
        });
    }
    let pin = trimmed
        .parse::<usize>()
        .map_err(|_| ConfigError::PinOutOfRange {
            pin: usize::MAX,
            pin_count,
        })?;
    if pin >= pin_count {
        return Err(ConfigError::PinOutOfRange { pin, pin_count });
    }
    Ok(pin)
}

/// Subscribes one listener per spec on `device`.
///
/// Either every spec is bound or none is: on the first invalid label the listeners
/// already added by this call are removed before the error is returned.
///
/// # Errors
///
/// The `ConfigError` of the first spec whose label does not name a device pin.
pub fn bind(device: &mut dyn Device, specs: &[PinSpec]) -> Result<PinBindings, ConfigError> {
    let (tx, rx) = mpsc::channel();
    let pin_count = device.pin_count();
    let mut bindings: Vec<PinBinding> = Vec::with_capacity(specs.len());

    for (index, spec) in specs.iter().enumerate() {
        let pin = match parse_pin_label(spec.label.as_deref(), pin_count) {
            Ok(pin) => pin,
            Err(err) => {
                let _ = remove_listeners(device, &bindings);
                return Err(err);
            }
        };

        let tx = tx.clone();
        let listener = device.gpio().add_listener(
            pin,
            Box::new(move |level| {
                // The receiver is gone once the bindings are dropped; late events are moot.
                let _ = tx.send(PinEvent {
                    binding: index,
                    pin,
                    level,
                });
            }),
        );
        let Some(listener) = listener else {
            let _ = remove_listeners(device, &bindings);
            return Err(ConfigError::PinOutOfRange { pin, pin_count });
        };

        bindings.push(PinBinding {
            pin,
            listener,
            indicator: Rc::clone(&spec.indicator),
        });
    }

    debug!(count = bindings.len(), "pin bindings installed");
    Ok(PinBindings {
        bindings,
        events: rx,
        delivered: 0,
    })
}

fn remove_listeners(device: &mut dyn Device, bindings: &[PinBinding]) -> usize {
    let gpio = device.gpio();
    bindings
        .iter()
        .filter(|b| gpio.remove_listener(b.listener))
        .count()
}
