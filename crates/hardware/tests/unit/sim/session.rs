//! # Session Tests
//!
//! State machine transitions, observer attachment, cooperative and threaded
//! execution, and teardown guarantees.

use std::time::{Duration, Instant};

use crate::common::builder::hex::HexBuilder;
use crate::common::harness::{cooperative_config, init_tracing};
use crate::common::mocks::device::{TallyHandle, Step, blink_script, scripted_factory};
use crate::common::mocks::indicator::RecordingIndicator;
use blinksim_core::common::{ConfigError, DeviceError, LoadError, SessionError, StateError};
use blinksim_core::config::{Config, ExecutionMode};
use blinksim_core::sim::Indicator;
use blinksim_core::sim::registry::PinSpec;
use blinksim_core::sim::{DeviceSession, ExecutionEnd, PollReport, SessionState};
use blinksim_core::soc::{LogLevel, PinLevel};
use pretty_assertions::assert_eq;

const FLASH_BASE: u32 = 0x1000_0000;

fn image() -> String {
    HexBuilder::new().bytes_at(FLASH_BASE, &[0xA0, 0xA1]).build()
}

fn session(config: &Config, script: Vec<Step>, looping: bool) -> (DeviceSession, TallyHandle) {
    init_tracing();
    let (factory, tally) = scripted_factory(config.device.pin_count, script, looping);
    (DeviceSession::create(&factory, config, &[]), tally)
}

fn cooperative(script: Vec<Step>) -> (DeviceSession, TallyHandle) {
    session(&cooperative_config(4), script, true)
}

fn threaded_config() -> Config {
    let mut config = Config::default();
    config.session.execution = ExecutionMode::Threaded;
    config.session.clock_hz = 100_000;
    config
}

fn invalid(from: SessionState, operation: &'static str) -> SessionError {
    SessionError::State(StateError::InvalidTransition { from, operation })
}

/// Polls until `done` holds or two seconds pass.
fn poll_until(session: &mut DeviceSession, mut done: impl FnMut(&DeviceSession) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !done(session) {
        assert!(Instant::now() < deadline, "timed out waiting on {session:?}");
        let _ = session.poll();
        std::thread::sleep(Duration::from_millis(1));
    }
}

// ─── Creation ───────────────────────────────────────────────────────────────

#[test]
fn new_session_is_idle_with_errors_only_logging() {
    let (session, tally) = cooperative(Vec::new());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.entry(), FLASH_BASE);
    assert_eq!(session.binding_count(), 0);
    let tally = tally.get();
    assert_eq!(tally.created, 1);
    assert_eq!(tally.log_level, Some(LogLevel::Error));
    assert_eq!(tally.bootrom, None);
}

#[test]
fn bootrom_is_installed_when_given() {
    let config = cooperative_config(1);
    let (factory, tally) = scripted_factory(4, Vec::new(), false);
    let _session = DeviceSession::create(&factory, &config, &[0x05, 0, 0, 0, 0x10]);
    assert_eq!(tally.get().bootrom, Some(vec![0x05, 0, 0, 0, 0x10]));
}

#[test]
fn session_ids_are_unique() {
    let (a, _) = cooperative(Vec::new());
    let (b, _) = cooperative(Vec::new());
    assert_ne!(a.id(), b.id());
    assert_eq!(format!("{}", a.id()), format!("#{}", a.id().get()));
}

// ─── Load ───────────────────────────────────────────────────────────────────

#[test]
fn load_writes_flash_and_moves_to_loaded() {
    let (mut session, _) = cooperative(Vec::new());
    let summary = session.load(&image()).unwrap();
    assert_eq!(summary.bytes, 2);
    assert_eq!(session.state(), SessionState::Loaded);
    let flash = session.device_mut().unwrap().flash();
    assert_eq!(flash.read_u8(FLASH_BASE), Some(0xA0));
    assert_eq!(flash.read_u8(FLASH_BASE + 1), Some(0xA1));
}

#[test]
fn failed_load_stays_idle() {
    let (mut session, _) = cooperative(Vec::new());
    let err = session.load(":zz\n").unwrap_err();
    assert!(matches!(err, SessionError::Load(LoadError::Malformed { line: 1, .. })));
    assert_eq!(session.state(), SessionState::Idle);
    let _ = session.load(&image()).unwrap();
}

#[test]
fn atomic_load_leaves_flash_untouched_on_error() {
    let mut config = cooperative_config(1);
    config.loader.atomic = true;
    let (mut session, _) = session(&config, Vec::new(), false);
    let text = format!("{}:03000100AABBCC00\n", HexBuilder::new().bytes_at(FLASH_BASE, &[1]).build_open());
    assert!(session.load(&text).is_err());
    let flash = session.device_mut().unwrap().flash();
    assert_eq!(flash.read_u8(FLASH_BASE), None);
}

#[test]
fn streaming_load_keeps_earlier_lines_on_error() {
    let (mut session, _) = cooperative(Vec::new());
    let text = format!("{}:03000100AABBCC00\n", HexBuilder::new().bytes_at(FLASH_BASE, &[1]).build_open());
    assert!(session.load(&text).is_err());
    let flash = session.device_mut().unwrap().flash();
    assert_eq!(flash.read_u8(FLASH_BASE), Some(1));
}

#[test]
fn second_load_is_rejected() {
    let (mut session, _) = cooperative(Vec::new());
    let _ = session.load(&image()).unwrap();
    assert_eq!(
        session.load(&image()).unwrap_err(),
        invalid(SessionState::Loaded, "load")
    );
}

// ─── Observers ──────────────────────────────────────────────────────────────

#[test]
fn observers_require_a_loaded_image() {
    let (mut session, _) = cooperative(Vec::new());
    let led = RecordingIndicator::labelled("1");
    assert_eq!(
        session.attach_observers(&[PinSpec::from_indicator(led)]).unwrap_err(),
        invalid(SessionState::Idle, "attach observers to")
    );
}

#[test]
fn attaching_again_replaces_previous_bindings() {
    let (mut session, _) = cooperative(Vec::new());
    let _ = session.load(&image()).unwrap();
    let a = RecordingIndicator::labelled("1");
    let b = RecordingIndicator::labelled("2");
    assert_eq!(
        session
            .attach_observers(&[PinSpec::from_indicator(a.clone()), PinSpec::from_indicator(b)])
            .unwrap(),
        2
    );
    assert_eq!(session.attach_observers(&[PinSpec::from_indicator(a)]).unwrap(), 1);
    assert_eq!(session.binding_count(), 1);
    assert_eq!(session.device_mut().unwrap().gpio().listener_count(), 1);
}

#[test]
fn bad_label_binds_nothing_and_stays_loaded() {
    let (mut session, _) = cooperative(Vec::new());
    let _ = session.load(&image()).unwrap();
    let good = RecordingIndicator::labelled("1");
    let bad = RecordingIndicator::unlabelled();
    let err = session
        .attach_observers(&[PinSpec::from_indicator(good), PinSpec::from_indicator(bad)])
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::Config(ConfigError::InvalidPinLabel {
            label: String::new()
        })
    );
    assert_eq!(session.state(), SessionState::Loaded);
    assert_eq!(session.binding_count(), 0);
    assert_eq!(session.device_mut().unwrap().gpio().listener_count(), 0);
}

// ─── Start ──────────────────────────────────────────────────────────────────

#[test]
fn start_requires_a_loaded_image() {
    let (mut session, _) = cooperative(Vec::new());
    assert_eq!(session.start().unwrap_err(), invalid(SessionState::Idle, "start"));
}

#[test]
fn start_twice_is_already_running() {
    let (mut session, _) = cooperative(Vec::new());
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    assert_eq!(
        session.start().unwrap_err(),
        SessionError::State(StateError::AlreadyRunning)
    );
}

#[test]
fn execution_begins_at_the_flash_base() {
    let (mut session, tally) = cooperative(vec![Step::Idle]);
    let _ = session.load(&image()).unwrap();
    session.device_mut().unwrap().set_pc(0xDEAD);
    session.start().unwrap();
    let _ = session.poll();
    assert_eq!(tally.get().pc_at_first_tick, Some(FLASH_BASE));
}

#[test]
fn nothing_executes_before_start() {
    let (mut session, tally) = cooperative(vec![Step::Idle]);
    let _ = session.load(&image()).unwrap();
    assert_eq!(session.poll(), PollReport::default());
    assert_eq!(tally.get().ticks, 0);
}

// ─── Cooperative execution ──────────────────────────────────────────────────

#[test]
fn cooperative_poll_runs_one_slice_and_delivers() {
    let (mut session, tally) = cooperative(blink_script(2));
    let led = RecordingIndicator::labelled("2");
    let _ = session.load(&image()).unwrap();
    let _ = session.attach_observers(&[PinSpec::from_indicator(led.clone())]).unwrap();
    session.start().unwrap();

    let report = session.poll();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.ended, None);
    assert_eq!(led.history(), vec![true, false]);
    assert_eq!(tally.get().ticks, 4);
}

#[test]
fn halt_is_reported_and_execution_ends() {
    let (mut session, tally) = session(
        &cooperative_config(10),
        vec![Step::Drive(0, PinLevel::High), Step::Halt],
        false,
    );
    let led = RecordingIndicator::labelled("0");
    let _ = session.load(&image()).unwrap();
    let _ = session.attach_observers(&[PinSpec::from_indicator(led.clone())]).unwrap();
    session.start().unwrap();

    let report = session.poll();
    assert_eq!(report.ended, Some(ExecutionEnd::Halted));
    assert!(led.value());
    assert_eq!(tally.get().ticks, 2);

    let _ = session.poll();
    assert_eq!(tally.get().ticks, 2);
    assert_eq!(session.ended(), Some(&ExecutionEnd::Halted));
}

#[test]
fn fault_is_reported() {
    let (mut session, _) = cooperative(vec![Step::Idle, Step::Fault]);
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    let report = session.poll();
    assert_eq!(
        report.ended,
        Some(ExecutionEnd::Faulted(DeviceError::IllegalInstruction {
            pc: FLASH_BASE + 1,
            opcode: 0xEE
        }))
    );
}

// ─── Stop ───────────────────────────────────────────────────────────────────

#[test]
fn stop_releases_the_device_exactly_once() {
    let (mut session, tally) = cooperative(blink_script(1));
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    session.stop();
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert!(session.device_mut().is_none());
    drop(session);
    let tally = tally.get();
    assert_eq!((tally.created, tally.dropped), (1, 1));
}

#[test]
fn stop_from_idle_is_allowed_and_terminal() {
    let (mut session, _) = cooperative(Vec::new());
    session.stop();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(
        session.load(&image()).unwrap_err(),
        invalid(SessionState::Stopped, "load")
    );
    assert_eq!(session.start().unwrap_err(), invalid(SessionState::Stopped, "start"));
}

#[test]
fn no_indicator_update_after_stop() {
    let (mut session, _) = cooperative(blink_script(3));
    let led = RecordingIndicator::labelled("3");
    let _ = session.load(&image()).unwrap();
    let _ = session.attach_observers(&[PinSpec::from_indicator(led.clone())]).unwrap();
    session.start().unwrap();
    let _ = session.poll();
    let seen = led.history().len();

    session.stop();
    assert_eq!(session.poll(), PollReport::default());
    assert_eq!(led.history().len(), seen);
}

#[test]
fn dropping_a_session_stops_it() {
    let (mut session, tally) = cooperative(Vec::new());
    let _ = session.load(&image()).unwrap();
    drop(session);
    assert_eq!(tally.get().dropped, 1);
}

// ─── Threaded execution ─────────────────────────────────────────────────────

#[test]
fn threaded_session_drives_indicators_until_stopped() {
    let (mut session, tally) = session(&threaded_config(), blink_script(4), true);
    let led = RecordingIndicator::labelled("4");
    let _ = session.load(&image()).unwrap();
    let _ = session.attach_observers(&[PinSpec::from_indicator(led.clone())]).unwrap();
    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert!(session.device_mut().is_none());

    poll_until(&mut session, |_| led.history().len() >= 4);
    session.stop();
    let seen = led.history();
    assert_eq!(&seen[..2], &[true, false]);

    std::thread::sleep(Duration::from_millis(5));
    assert_eq!(session.poll(), PollReport::default());
    assert_eq!(led.history(), seen);
    let tally = tally.get();
    assert_eq!(tally.pc_at_first_tick, Some(FLASH_BASE));
    assert_eq!((tally.created, tally.dropped), (1, 1));
}

#[test]
fn threaded_halt_is_collected_by_poll() {
    let (mut session, _) = session(
        &threaded_config(),
        vec![Step::Drive(1, PinLevel::High), Step::Halt],
        false,
    );
    let led = RecordingIndicator::labelled("1");
    let _ = session.load(&image()).unwrap();
    let _ = session.attach_observers(&[PinSpec::from_indicator(led.clone())]).unwrap();
    session.start().unwrap();

    poll_until(&mut session, |s| s.ended().is_some());
    assert_eq!(session.ended(), Some(&ExecutionEnd::Halted));
    assert!(led.value());
    assert!(session.device_mut().is_some());
}

#[test]
fn paced_thread_stops_promptly() {
    let mut config = threaded_config();
    config.session.clock_hz = 1_000;
    let (mut session, tally) = session(&config, blink_script(0), true);
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(20));

    let began = Instant::now();
    session.stop();
    assert!(began.elapsed() < Duration::from_millis(500));
    assert!(tally.get().ticks > 0);
}

#[test]
fn slow_clock_does_not_delay_stop() {
    let mut config = threaded_config();
    config.session.clock_hz = 1;
    let (mut session, tally) = session(&config, blink_script(0), true);
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let began = Instant::now();
    session.stop();
    assert!(began.elapsed() < Duration::from_millis(250));
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(tally.get().dropped, 1);
}

#[test]
fn dropping_a_running_session_joins_its_thread() {
    let (mut session, tally) = session(&threaded_config(), blink_script(0), true);
    let _ = session.load(&image()).unwrap();
    session.start().unwrap();
    drop(session);
    assert_eq!(tally.get().dropped, 1);
}
