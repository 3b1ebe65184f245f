//! Run controller: the user-facing lifecycle around device sessions.
//!
//! The controller performs:
//! 1. **Compile:** Resets indicators, locks the run trigger and asks the compiler
//!    service for an image. This is the only point where a run waits.
//! 2. **Launch:** On success, stops the previous session and builds, loads, binds and
//!    starts a new one. Any failure tears the half-built session down.
//! 3. **Stop:** Tears the current session down and restores the triggers.
//! 4. **Drive:** `poll` delivers pin events and retires sessions whose program ended.
//!
//! Compilation is split into [`RunController::begin_run`] and
//! [`RunController::finish_run`] so callers with a genuinely asynchronous compiler
//! (a browser `fetch`) can keep servicing `stop_run` and `poll` while waiting. Every
//! `begin_run` and `stop_run` bumps a generation counter; a response carrying an older
//! generation is discarded.

use std::rc::Rc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::common::{CompileError, SessionError};
use crate::config::Config;
use crate::sim::registry::{Indicator, PinSpec};
use crate::sim::session::{DeviceSession, ExecutionEnd, PollReport, SessionId, SessionState};
use crate::soc::traits::DeviceFactory;

/// Status text shown while the compiler is working.
pub const STATUS_COMPILING: &str = "Compiling...";
/// Appended to the diagnostic output once the program starts.
pub const RUNNING_NOTE: &str = "\nProgram running...";

/// Raw response of the compiler service.
///
/// A missing `hex` means compilation failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CompileOutput {
    /// Intel HEX image text.
    #[serde(default)]
    pub hex: Option<String>,
    /// Compiler standard output.
    #[serde(default)]
    pub stdout: Option<String>,
    /// Compiler standard error.
    #[serde(default)]
    pub stderr: Option<String>,
}

impl CompileOutput {
    /// Text to show the user: standard error if non-empty, otherwise standard output.
    pub fn diagnostics(&self) -> &str {
        match self.stderr.as_deref() {
            Some(err) if !err.is_empty() => err,
            _ => self.stdout.as_deref().unwrap_or_default(),
        }
    }
}

/// Outcome of one compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileResult {
    /// An image was produced.
    Success {
        /// Intel HEX image text.
        image: String,
        /// Compiler messages, if any.
        diagnostics: Option<String>,
    },
    /// No image; the diagnostics say why.
    Failure {
        /// Compiler messages.
        diagnostics: String,
    },
}

impl From<CompileOutput> for CompileResult {
    fn from(output: CompileOutput) -> Self {
        let diagnostics = output.diagnostics().to_owned();
        match output.hex {
            Some(image) => Self::Success {
                image,
                diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
            },
            None => Self::Failure { diagnostics },
        }
    }
}

/// The external compiler service.
pub trait Compiler {
    /// Compiles `source` into an image.
    ///
    /// # Errors
    ///
    /// `CompileError` when no response could be obtained. A response without an
    /// image is `Ok`.
    fn compile(&mut self, source: &str) -> Result<CompileOutput, CompileError>;
}

/// The user-facing controls the controller drives.
pub trait ControlPanel {
    /// Enables or disables the run trigger.
    fn set_run_enabled(&mut self, enabled: bool);
    /// Enables or disables the stop trigger.
    fn set_stop_enabled(&mut self, enabled: bool);
    /// Replaces the status line.
    fn set_status(&mut self, text: &str);
    /// Replaces the diagnostic output text.
    fn set_output(&mut self, text: &str);
    /// Appends to the diagnostic output text.
    fn append_output(&mut self, text: &str);
    /// Shows a blocking alert.
    fn alert(&mut self, message: &str);
}

/// In-memory control panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panel {
    /// Run trigger enabled.
    pub run_enabled: bool,
    /// Stop trigger enabled.
    pub stop_enabled: bool,
    /// Status line.
    pub status: String,
    /// Diagnostic output.
    pub output: String,
    /// Alerts raised, oldest first.
    pub alerts: Vec<String>,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            run_enabled: true,
            stop_enabled: false,
            status: String::new(),
            output: String::new(),
            alerts: Vec::new(),
        }
    }
}

impl ControlPanel for Panel {
    fn set_run_enabled(&mut self, enabled: bool) {
        self.run_enabled = enabled;
    }

    fn set_stop_enabled(&mut self, enabled: bool) {
        self.stop_enabled = enabled;
    }

    fn set_status(&mut self, text: &str) {
        text.clone_into(&mut self.status);
    }

    fn set_output(&mut self, text: &str) {
        text.clone_into(&mut self.output);
    }

    fn append_output(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn alert(&mut self, message: &str) {
        self.alerts.push(message.to_owned());
    }
}

/// Proof that a compile was requested; hand it back to [`RunController::finish_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunTicket {
    generation: u64,
}

impl RunTicket {
    /// Rebuilds a ticket from [`RunTicket::generation`], for callers that pass it
    /// through a foreign boundary.
    pub const fn from_generation(generation: u64) -> Self {
        Self { generation }
    }

    /// Generation stamped on this ticket.
    pub const fn generation(self) -> u64 {
        self.generation
    }
}

/// What a run request ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new session is running.
    Started(SessionId),
    /// The compiler produced no image; nothing changed.
    CompileFailed,
    /// The compiler could not be reached or the session could not be built.
    Failed(String),
    /// The response belonged to a superseded request and was ignored.
    Stale,
}

/// Orchestrates compile, launch and stop for one set of indicators.
pub struct RunController<P: ControlPanel> {
    config: Config,
    factory: Box<dyn DeviceFactory>,
    bootrom: Vec<u8>,
    panel: P,
    indicators: Vec<PinSpec>,
    session: Option<DeviceSession>,
    generation: u64,
}

impl<P: ControlPanel> RunController<P> {
    /// Creates an idle controller. The stop trigger starts disabled.
    pub fn new(config: Config, factory: impl DeviceFactory + 'static, mut panel: P) -> Self {
        panel.set_run_enabled(true);
        panel.set_stop_enabled(false);
        Self {
            config,
            factory: Box::new(factory),
            bootrom: Vec::new(),
            panel,
            indicators: Vec::new(),
            session: None,
            generation: 0,
        }
    }

    /// Sets the boot ROM image installed into every new device.
    #[must_use]
    pub fn with_bootrom(mut self, image: Vec<u8>) -> Self {
        self.bootrom = image;
        self
    }

    /// Registers an indicator, bound by its own label on every run.
    pub fn add_indicator(&mut self, indicator: Rc<dyn Indicator>) {
        self.indicators.push(PinSpec::from_indicator(indicator));
    }

    /// Registers an indicator with an explicit pin label.
    pub fn add_pin_spec(&mut self, spec: PinSpec) {
        self.indicators.push(spec);
    }

    /// Registered indicators.
    pub fn indicators(&self) -> &[PinSpec] {
        &self.indicators
    }

    /// Configuration used for new sessions.
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The control panel.
    pub const fn panel(&self) -> &P {
        &self.panel
    }

    /// The control panel, mutably.
    pub fn panel_mut(&mut self) -> &mut P {
        &mut self.panel
    }

    /// The current session, if any.
    pub const fn session(&self) -> Option<&DeviceSession> {
        self.session.as_ref()
    }

    /// The current session, mutably.
    pub fn session_mut(&mut self) -> Option<&mut DeviceSession> {
        self.session.as_mut()
    }

    /// Returns `true` while a session is running.
    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state() == SessionState::Running)
    }

    /// Compiles with `compiler` and launches the result.
    pub fn run(&mut self, source: &str, compiler: &mut dyn Compiler) -> RunOutcome {
        let ticket = self.begin_run();
        let response = compiler.compile(source);
        self.finish_run(ticket, response)
    }

    /// Prepares for a compile: darkens all indicators, disables the run trigger and
    /// shows the compiling status.
    pub fn begin_run(&mut self) -> RunTicket {
        for spec in &self.indicators {
            spec.indicator.set_value(false);
        }
        self.panel.set_run_enabled(false);
        self.panel.set_status(STATUS_COMPILING);
        self.generation += 1;
        debug!(generation = self.generation, "compile requested");
        RunTicket {
            generation: self.generation,
        }
    }

    /// Acts on the compiler's response to the request identified by `ticket`.
    ///
    /// A compile failure leaves any running session untouched. A stale ticket is
    /// ignored without touching the panel.
    pub fn finish_run(
        &mut self,
        ticket: RunTicket,
        response: Result<CompileOutput, CompileError>,
    ) -> RunOutcome {
        if ticket.generation != self.generation {
            debug!(
                ticket = ticket.generation,
                current = self.generation,
                "discarding stale compile response"
            );
            return RunOutcome::Stale;
        }

        let outcome = match response {
            Err(err) => {
                warn!(%err, "compile request failed");
                self.panel.set_run_enabled(true);
                self.panel.alert(&format!("Failed: {err}"));
                RunOutcome::Failed(err.to_string())
            }
            Ok(output) => {
                self.panel.set_output(output.diagnostics());
                match CompileResult::from(output) {
                    CompileResult::Failure { .. } => {
                        info!("compilation failed");
                        self.panel.set_run_enabled(true);
                        RunOutcome::CompileFailed
                    }
                    CompileResult::Success { image, .. } => match self.launch(&image) {
                        Ok(id) => {
                            self.panel.append_output(RUNNING_NOTE);
                            self.panel.set_stop_enabled(true);
                            RunOutcome::Started(id)
                        }
                        Err(err) => {
                            warn!(%err, "session could not be started");
                            self.panel.append_output(&format!("\n{err}"));
                            self.panel.set_stop_enabled(false);
                            self.panel.set_run_enabled(true);
                            self.panel.alert(&format!("Failed: {err}"));
                            RunOutcome::Failed(err.to_string())
                        }
                    },
                }
            }
        };
        self.panel.set_status("");
        outcome
    }

    /// Replaces the current session with a new one running `image`.
    fn launch(&mut self, image: &str) -> Result<SessionId, SessionError> {
        if let Some(mut previous) = self.session.take() {
            previous.stop();
        }

        let mut session = DeviceSession::create(self.factory.as_ref(), &self.config, &self.bootrom);
        match start_session(&mut session, image, &self.indicators) {
            Ok(()) => {
                let id = session.id();
                self.session = Some(session);
                Ok(id)
            }
            Err(err) => {
                session.stop();
                Err(err)
            }
        }
    }

    /// Stops the current session, if any, and restores the triggers.
    ///
    /// Also invalidates any compile in flight. Safe to call when nothing ever ran.
    pub fn stop_run(&mut self) {
        self.panel.set_stop_enabled(false);
        self.panel.set_run_enabled(true);
        self.panel.set_status("");
        self.generation += 1;
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
    }

    /// Drives the current session and retires it if its program ended.
    pub fn poll(&mut self) -> PollReport {
        let Some(session) = self.session.as_mut() else {
            return PollReport::default();
        };
        let report = session.poll();
        if let Some(end) = &report.ended {
            match end {
                ExecutionEnd::Halted => {
                    info!(session = %session.id(), "program halted");
                    self.panel.append_output("\nProgram halted.");
                }
                ExecutionEnd::Faulted(err) => {
                    warn!(session = %session.id(), %err, "device faulted");
                    self.panel.append_output(&format!("\nDevice fault: {err}"));
                    self.panel.alert(&format!("Failed: {err}"));
                }
            }
            session.stop();
            self.session = None;
            self.panel.set_stop_enabled(false);
            self.panel.set_run_enabled(true);
        }
        report
    }
}

impl<P: ControlPanel + std::fmt::Debug> std::fmt::Debug for RunController<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunController")
            .field("panel", &self.panel)
            .field("indicators", &self.indicators)
            .field("session", &self.session)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

fn start_session(
    session: &mut DeviceSession,
    image: &str,
    indicators: &[PinSpec],
) -> Result<(), SessionError> {
    let _ = session.load(image)?;
    let _ = session.attach_observers(indicators)?;
    session.start()
}
