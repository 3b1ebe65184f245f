//! Device session: one emulated device for the lifetime of one run.
//!
//! A session walks a fixed state machine:
//!
//! ```text
//! Idle --load--> Loaded --attach_observers--> Loaded --start--> Running --stop--> Stopped
//!   \______________________________stop______________________________________/
//! ```
//!
//! `Stopped` is terminal: a new run always constructs a new session. The session owns
//! the device exclusively. In threaded mode the device moves onto a dedicated thread
//! while running and comes back when that thread is joined; in cooperative mode it is
//! ticked in slices from [`DeviceSession::poll`].

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::common::{DeviceError, SessionError, StateError};
use crate::config::{Config, ExecutionMode, LoaderConfig, SessionConfig};
use crate::sim::loader::{self, LoadSummary, MemoryImage};
use crate::sim::registry::{self, PinBindings, PinSpec};
use crate::soc::traits::{Device, DeviceFactory};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Ticks between stop-flag checks when running unthrottled.
const UNTHROTTLED_BATCH: u64 = 4096;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Device allocated, flash empty.
    Idle,
    /// Firmware written; observers may be attached.
    Loaded,
    /// Execution context started.
    Running,
    /// Torn down; terminal.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Loaded => "Loaded",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
        };
        f.write_str(name)
    }
}

/// Process-unique session identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why execution ended without a `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEnd {
    /// The program halted.
    Halted,
    /// The device faulted.
    Faulted(DeviceError),
}

/// What one [`DeviceSession::poll`] did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PollReport {
    /// Pin events delivered to indicators.
    pub delivered: usize,
    /// Set once execution has ended on its own.
    pub ended: Option<ExecutionEnd>,
}

/// What the execution thread hands back when it exits.
struct RunnerExit {
    device: Box<dyn Device>,
    result: Result<(), DeviceError>,
}

enum Execution {
    Cooperative {
        slice_ticks: u32,
    },
    Threaded {
        stop: Arc<AtomicBool>,
        handle: JoinHandle<RunnerExit>,
    },
}

/// One emulated device and its observers.
pub struct DeviceSession {
    id: SessionId,
    state: SessionState,
    entry: u32,
    loader: LoaderConfig,
    settings: SessionConfig,
    device: Option<Box<dyn Device>>,
    bindings: Option<PinBindings>,
    execution: Option<Execution>,
    ended: Option<ExecutionEnd>,
}

impl DeviceSession {
    /// Allocates a fresh device, installs `bootrom` and restricts device diagnostics
    /// to the configured level (errors only by default).
    ///
    /// # Arguments
    ///
    /// * `factory` - Source of the device instance; called exactly once.
    /// * `config` - Loader and session settings.
    /// * `bootrom` - Boot program image; an empty slice leaves the device's ROM empty.
    pub fn create(factory: &dyn DeviceFactory, config: &Config, bootrom: &[u8]) -> Self {
        let mut device = factory.create();
        if !bootrom.is_empty() {
            device.load_bootrom(bootrom);
        }
        device.set_log_level(config.session.device_log_level);
        let id = SessionId::next();
        let entry = device.flash_base();
        info!(session = %id, device = device.name(), "session created");
        Self {
            id,
            state: SessionState::Idle,
            entry,
            loader: config.loader.clone(),
            settings: config.session.clone(),
            device: Some(device),
            bindings: None,
            execution: None,
            ended: None,
        }
    }

    /// Session identity.
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Current state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Address the program counter is set to on start (the flash load base).
    pub const fn entry(&self) -> u32 {
        self.entry
    }

    /// Number of live pin bindings.
    pub fn binding_count(&self) -> usize {
        self.bindings.as_ref().map_or(0, PinBindings::len)
    }

    /// Why execution ended on its own, if it has.
    pub const fn ended(&self) -> Option<&ExecutionEnd> {
        self.ended.as_ref()
    }

    /// The device, when it is not on the execution thread and not yet released.
    pub fn device_mut(&mut self) -> Option<&mut (dyn Device + 'static)> {
        self.device.as_deref_mut()
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        StateError::InvalidTransition {
            from: self.state,
            operation,
        }
        .into()
    }

    fn held_device(&mut self, operation: &'static str) -> Result<&mut (dyn Device + 'static), SessionError> {
        let from = self.state;
        self.device
            .as_deref_mut()
            .ok_or(SessionError::State(StateError::InvalidTransition {
                from,
                operation,
            }))
    }

    /// Writes a hex image into device flash: `Idle -> Loaded`.
    ///
    /// On failure the session stays `Idle`. With the default streaming loader, bytes
    /// from lines before the failing one remain in flash.
    ///
    /// # Errors
    ///
    /// `SessionError::Load` for a bad image, `SessionError::State` outside `Idle`.
    pub fn load(&mut self, image: &str) -> Result<LoadSummary, SessionError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("load"));
        }
        let loader = self.loader.clone();
        let device = self.held_device("load")?;
        let summary = if loader.atomic {
            MemoryImage::parse(image, loader.verify_checksums)?
                .write_to(device.flash(), loader.base_offset)
        } else {
            loader::load_hex(
                image,
                device.flash(),
                loader.base_offset,
                loader.verify_checksums,
            )?
        };
        self.state = SessionState::Loaded;
        info!(session = %self.id, bytes = summary.bytes, "firmware loaded");
        Ok(summary)
    }

    /// Binds indicators to device pins; replaces any earlier binding set.
    ///
    /// # Errors
    ///
    /// `SessionError::Config` for a bad pin label (nothing stays bound),
    /// `SessionError::State` outside `Loaded`.
    pub fn attach_observers(&mut self, specs: &[PinSpec]) -> Result<usize, SessionError> {
        if self.state != SessionState::Loaded {
            return Err(self.invalid("attach observers to"));
        }
        let previous = self.bindings.take();
        let device = self.held_device("attach observers to")?;
        if let Some(previous) = previous {
            let _ = previous.unbind(device);
        }
        let bindings = registry::bind(device, specs)?;
        let count = bindings.len();
        self.bindings = Some(bindings);
        Ok(count)
    }

    /// Sets the PC to the load base and starts execution: `Loaded -> Running`.
    ///
    /// # Errors
    ///
    /// `StateError::AlreadyRunning` if running, `StateError::InvalidTransition` from any
    /// state other than `Loaded`, `DeviceError::SpawnFailed` if the execution thread
    /// could not be created (the session is then `Stopped`).
    pub fn start(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Loaded => {}
            SessionState::Running => return Err(StateError::AlreadyRunning.into()),
            _ => return Err(self.invalid("start")),
        }
        let entry = self.entry;
        self.held_device("start")?.set_pc(entry);

        match self.settings.execution {
            ExecutionMode::Cooperative => {
                self.execution = Some(Execution::Cooperative {
                    slice_ticks: self.settings.slice_ticks.max(1),
                });
            }
            ExecutionMode::Threaded => {
                let Some(device) = self.device.take() else {
                    return Err(self.invalid("start"));
                };
                let stop = Arc::new(AtomicBool::new(false));
                let flag = Arc::clone(&stop);
                let clock_hz = self.settings.clock_hz;
                let spawned = thread::Builder::new()
                    .name(format!("blinksim-session-{}", self.id.get()))
                    .spawn(move || run_threaded(device, &flag, clock_hz));
                match spawned {
                    Ok(handle) => self.execution = Some(Execution::Threaded { stop, handle }),
                    Err(err) => {
                        // The device went down with the closure.
                        self.bindings = None;
                        self.state = SessionState::Stopped;
                        return Err(DeviceError::SpawnFailed(err.to_string()).into());
                    }
                }
            }
        }

        self.state = SessionState::Running;
        info!(session = %self.id, "execution started at {entry:#010x}");
        Ok(())
    }

    /// Advances cooperative execution by one slice, collects a finished execution
    /// thread, and delivers queued pin events to indicators.
    pub fn poll(&mut self) -> PollReport {
        if self.state != SessionState::Running {
            return PollReport::default();
        }

        match self.execution.take() {
            Some(Execution::Cooperative { slice_ticks }) => {
                if self.ended.is_none() {
                    if let Some(device) = self.device.as_deref_mut() {
                        self.ended = run_slice(device, slice_ticks);
                    }
                }
                self.execution = Some(Execution::Cooperative { slice_ticks });
            }
            Some(Execution::Threaded { stop, handle }) => {
                if handle.is_finished() {
                    self.collect(handle);
                } else {
                    self.execution = Some(Execution::Threaded { stop, handle });
                }
            }
            None => {}
        }

        let delivered = self.bindings.as_mut().map_or(0, PinBindings::pump);
        PollReport {
            delivered,
            ended: self.ended.clone(),
        }
    }

    /// Joins the execution thread and takes the device back.
    fn collect(&mut self, handle: JoinHandle<RunnerExit>) {
        match handle.join() {
            Ok(exit) => {
                let halted = exit.device.is_halted();
                self.device = Some(exit.device);
                match exit.result {
                    Err(err) => self.ended = Some(ExecutionEnd::Faulted(err)),
                    Ok(()) if halted => self.ended = Some(ExecutionEnd::Halted),
                    Ok(()) => {}
                }
            }
            Err(_) => {
                warn!(session = %self.id, "execution thread panicked");
                self.ended = Some(ExecutionEnd::Faulted(DeviceError::ExecutionPanicked));
            }
        }
    }

    /// Halts execution, unbinds every observer and releases the device.
    ///
    /// Callable from any state; calling it on a `Stopped` session does nothing. No
    /// indicator is written after this returns.
    pub fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }

        if let Some(Execution::Threaded { stop, handle }) = self.execution.take() {
            stop.store(true, Ordering::Release);
            handle.thread().unpark();
            self.collect(handle);
        }

        if let Some(bindings) = self.bindings.take() {
            match self.device.as_deref_mut() {
                Some(device) => {
                    let _ = bindings.unbind(device);
                }
                // The device died with its thread; its listeners went with it.
                None => drop(bindings),
            }
        }

        let previous = self.state;
        self.device = None;
        self.state = SessionState::Stopped;
        info!(session = %self.id, from = %previous, "session stopped");
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("entry", &format_args!("{:#010x}", self.entry))
            .field("bindings", &self.binding_count())
            .field("ended", &self.ended)
            .finish_non_exhaustive()
    }
}

/// Ticks `device` up to `ticks` times; stops early on a fault or a halt.
fn run_slice(device: &mut dyn Device, ticks: u32) -> Option<ExecutionEnd> {
    for _ in 0..ticks {
        if let Err(err) = device.tick() {
            return Some(ExecutionEnd::Faulted(err));
        }
        if device.is_halted() {
            return Some(ExecutionEnd::Halted);
        }
    }
    None
}

/// Body of the execution thread: ticks until stopped, halted or faulted, pacing
/// itself to `clock_hz` ticks per second (unthrottled when zero).
fn run_threaded(mut device: Box<dyn Device>, stop: &AtomicBool, clock_hz: u64) -> RunnerExit {
    let (batch, period) = if clock_hz == 0 {
        (UNTHROTTLED_BATCH, None)
    } else {
        let batch = (clock_hz / 1000).max(1);
        let nanos = batch.saturating_mul(1_000_000_000) / clock_hz;
        (batch, Some(Duration::from_nanos(nanos)))
    };
    debug!(batch, "execution thread running");

    let mut deadline = Instant::now();
    while !stop.load(Ordering::Acquire) {
        for _ in 0..batch {
            if let Err(err) = device.tick() {
                return RunnerExit {
                    device,
                    result: Err(err),
                };
            }
            if device.is_halted() {
                return RunnerExit {
                    device,
                    result: Ok(()),
                };
            }
        }
        if let Some(period) = period {
            deadline += period;
            let now = Instant::now();
            if deadline > now {
                pause_until(deadline, stop);
            } else {
                deadline = now;
            }
        }
    }
    RunnerExit {
        device,
        result: Ok(()),
    }
}

/// Parks until `deadline`; returns early once `stop` is set and the thread is unparked.
fn pause_until(deadline: Instant, stop: &AtomicBool) {
    loop {
        if stop.load(Ordering::Acquire) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        thread::park_timeout(deadline - now);
    }
}
