//! WebAssembly bindings for the firmware harness.
//!
//! Browsers have no threads to spare, so the harness always runs cooperatively here:
//! the page calls [`WebHarness::poll`] from `requestAnimationFrame` or a timer, and
//! each call advances the device by one slice and repaints the indicators.
//!
//! Compilation is the page's business (usually a `fetch` to the compile service).
//! The page calls [`WebHarness::begin_run`], awaits the response, then hands it to
//! [`WebHarness::finish_run`] (or [`WebHarness::fail_run`] if the request failed)
//! together with the ticket `begin_run` returned. Stop requests made while waiting
//! make the ticket stale.

use std::rc::Rc;

use blinksim_core::common::CompileError;
use blinksim_core::config::{Config, ExecutionMode};
use blinksim_core::sim::{CompileOutput, ControlPanel, Indicator, RunController, RunOutcome, RunTicket};
use blinksim_core::soc::{ToyMcu, toy};
use js_sys::{Function, Reflect};
use serde::Serialize;
use wasm_bindgen::prelude::*;

/// Indicator backed by a JS object: reads its `pin` property, writes its `value` property.
#[derive(Debug)]
struct JsIndicator {
    element: JsValue,
}

impl Indicator for JsIndicator {
    fn label(&self) -> Option<String> {
        let pin = Reflect::get(&self.element, &JsValue::from_str("pin")).ok()?;
        pin.as_string()
            .or_else(|| pin.as_f64().map(|n| format!("{n}")))
    }

    fn set_value(&self, on: bool) {
        if Reflect::set(&self.element, &JsValue::from_str("value"), &JsValue::from_bool(on)).is_err() {
            web_sys::console::warn_1(&JsValue::from_str("indicator rejected its value"));
        }
    }

    fn value(&self) -> bool {
        Reflect::get(&self.element, &JsValue::from_str("value"))
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Control panel backed by a JS object with optional callback methods:
/// `setRunEnabled`, `setStopEnabled`, `setStatus`, `setOutput`, `appendOutput`, `alert`.
#[derive(Debug)]
struct JsPanel {
    target: JsValue,
}

impl JsPanel {
    fn call(&self, method: &str, arg: &JsValue) {
        let Ok(callback) = Reflect::get(&self.target, &JsValue::from_str(method)) else {
            return;
        };
        let Some(callback) = callback.dyn_ref::<Function>() else {
            return;
        };
        if let Err(err) = callback.call1(&self.target, arg) {
            web_sys::console::error_2(&JsValue::from_str(method), &err);
        }
    }
}

impl ControlPanel for JsPanel {
    fn set_run_enabled(&mut self, enabled: bool) {
        self.call("setRunEnabled", &JsValue::from_bool(enabled));
    }

    fn set_stop_enabled(&mut self, enabled: bool) {
        self.call("setStopEnabled", &JsValue::from_bool(enabled));
    }

    fn set_status(&mut self, text: &str) {
        self.call("setStatus", &JsValue::from_str(text));
    }

    fn set_output(&mut self, text: &str) {
        self.call("setOutput", &JsValue::from_str(text));
    }

    fn append_output(&mut self, text: &str) {
        self.call("appendOutput", &JsValue::from_str(text));
    }

    fn alert(&mut self, message: &str) {
        self.call("alert", &JsValue::from_str(message));
    }
}

/// Result of a run request as seen from JavaScript.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
enum RunReport {
    Started { session: u64 },
    CompileFailed,
    Failed { message: String },
    Stale,
}

impl From<RunOutcome> for RunReport {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Started(id) => Self::Started { session: id.get() },
            RunOutcome::CompileFailed => Self::CompileFailed,
            RunOutcome::Failed(message) => Self::Failed { message },
            RunOutcome::Stale => Self::Stale,
        }
    }
}

fn to_js(report: &RunReport) -> String {
    serde_json::to_string(report).unwrap_or_else(|_| String::from(r#"{"kind":"failed"}"#))
}

/// A run controller wired to page elements.
#[wasm_bindgen]
#[derive(Debug)]
pub struct WebHarness {
    controller: RunController<JsPanel>,
}

#[wasm_bindgen]
impl WebHarness {
    /// Creates a harness driving `panel`, optionally configured from JSON.
    ///
    /// # Errors
    ///
    /// Rejects configuration text that does not parse.
    #[wasm_bindgen(constructor)]
    pub fn new(panel: JsValue, config_json: Option<String>) -> Result<Self, JsError> {
        let mut config = match config_json {
            Some(text) => Config::from_json(&text).map_err(|e| JsError::new(&e.to_string()))?,
            None => Config::default(),
        };
        config.session.execution = ExecutionMode::Cooperative;
        let rom = toy::boot_rom(config.device.flash_base);
        let factory = ToyMcu::factory(&config.device);
        let controller =
            RunController::new(config, factory, JsPanel { target: panel }).with_bootrom(rom);
        Ok(Self { controller })
    }

    /// Registers an indicator element; its `pin` property names the pin.
    #[wasm_bindgen(js_name = addIndicator)]
    pub fn add_indicator(&mut self, element: JsValue) {
        self.controller
            .add_indicator(Rc::new(JsIndicator { element }));
    }

    /// Starts a run; returns the ticket to pass to `finishRun` or `failRun`.
    #[wasm_bindgen(js_name = beginRun)]
    pub fn begin_run(&mut self) -> u64 {
        self.controller.begin_run().generation()
    }

    /// Completes a run with the compile service's JSON response
    /// (`{ hex?, stdout?, stderr? }`). Returns a JSON run report.
    #[wasm_bindgen(js_name = finishRun)]
    pub fn finish_run(&mut self, ticket: u64, response_json: &str) -> String {
        let response = serde_json::from_str::<CompileOutput>(response_json).map_err(CompileError::from);
        let outcome = self
            .controller
            .finish_run(RunTicket::from_generation(ticket), response);
        to_js(&RunReport::from(outcome))
    }

    /// Completes a run whose compile request never got an answer.
    #[wasm_bindgen(js_name = failRun)]
    pub fn fail_run(&mut self, ticket: u64, message: &str) -> String {
        let outcome = self.controller.finish_run(
            RunTicket::from_generation(ticket),
            Err(CompileError::Transport(message.to_owned())),
        );
        to_js(&RunReport::from(outcome))
    }

    /// Stops the running program, if any.
    #[wasm_bindgen(js_name = stopRun)]
    pub fn stop_run(&mut self) {
        self.controller.stop_run();
    }

    /// Advances the device by one slice and repaints indicators.
    ///
    /// Returns the number of indicator updates applied.
    pub fn poll(&mut self) -> usize {
        self.controller.poll().delivered
    }

    /// Whether a program is running.
    #[wasm_bindgen(getter, js_name = isRunning)]
    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }
}
