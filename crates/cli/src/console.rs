//! Terminal renditions of indicators and the control panel.

use std::cell::Cell;

use blinksim_core::sim::{ControlPanel, Indicator, Panel};
use tracing::info;

/// An LED that reports each change on standard output.
#[derive(Debug)]
pub struct ConsoleLed {
    label: String,
    value: Cell<bool>,
    toggles: Cell<u64>,
}

impl ConsoleLed {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: Cell::new(false),
            toggles: Cell::new(0),
        }
    }

    pub fn label_text(&self) -> &str {
        &self.label
    }

    /// Changes observed while a program was running (resets excluded).
    pub fn toggles(&self) -> u64 {
        self.toggles.get()
    }
}

impl Indicator for ConsoleLed {
    fn label(&self) -> Option<String> {
        Some(self.label.clone())
    }

    fn set_value(&self, on: bool) {
        if self.value.replace(on) == on {
            return;
        }
        self.toggles.set(self.toggles.get() + 1);
        let lamp = if on { "●" } else { "○" };
        println!("pin {:>2} {lamp}", self.label);
        info!(pin = %self.label, on, "indicator changed");
    }

    fn value(&self) -> bool {
        self.value.get()
    }
}

/// Control panel that echoes status, output and alerts to the terminal.
#[derive(Debug, Default)]
pub struct ConsolePanel {
    state: Panel,
}

impl ConsolePanel {
    pub const fn state(&self) -> &Panel {
        &self.state
    }
}

impl ControlPanel for ConsolePanel {
    fn set_run_enabled(&mut self, enabled: bool) {
        self.state.set_run_enabled(enabled);
    }

    fn set_stop_enabled(&mut self, enabled: bool) {
        self.state.set_stop_enabled(enabled);
    }

    fn set_status(&mut self, text: &str) {
        if !text.is_empty() {
            eprintln!("{text}");
        }
        self.state.set_status(text);
    }

    fn set_output(&mut self, text: &str) {
        if !text.is_empty() {
            println!("{text}");
        }
        self.state.set_output(text);
    }

    fn append_output(&mut self, text: &str) {
        println!("{}", text.trim_start_matches('\n'));
        self.state.append_output(text);
    }

    fn alert(&mut self, message: &str) {
        eprintln!("error: {message}");
        self.state.alert(message);
    }
}
