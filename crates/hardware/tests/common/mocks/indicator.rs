use std::cell::{Cell, RefCell};
use std::rc::Rc;

use blinksim_core::sim::Indicator;

/// Indicator that keeps the full history of `set_value` calls.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    label: Option<String>,
    value: Cell<bool>,
    history: RefCell<Vec<bool>>,
}

impl RecordingIndicator {
    /// A labelled indicator, already wrapped for sharing with a controller.
    pub fn labelled(label: &str) -> Rc<Self> {
        Rc::new(Self {
            label: Some(label.to_owned()),
            ..Self::default()
        })
    }

    /// An indicator without a label attribute.
    pub fn unlabelled() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Starts lit, as if left on by an earlier run.
    pub fn lit(self: Rc<Self>) -> Rc<Self> {
        self.value.set(true);
        self
    }

    pub fn history(&self) -> Vec<bool> {
        self.history.borrow().clone()
    }

    pub fn clear_history(&self) {
        self.history.borrow_mut().clear();
    }
}

impl Indicator for RecordingIndicator {
    fn label(&self) -> Option<String> {
        self.label.clone()
    }

    fn set_value(&self, on: bool) {
        self.value.set(on);
        self.history.borrow_mut().push(on);
    }

    fn value(&self) -> bool {
        self.value.get()
    }
}
