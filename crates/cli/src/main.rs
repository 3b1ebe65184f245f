//! Firmware harness command line.
//!
//! This binary runs firmware on the reference device and prints pin activity. It
//! performs:
//! 1. **Run:** Compile a source file with an external command (or take a prebuilt hex
//!    image), launch it, mirror the chosen pins and stop after a duration.
//! 2. **Check:** Validate a hex image and summarise what it would load.

mod compiler;
mod console;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, Instant};

use blinksim_core::config::{Config, ExecutionMode};
use blinksim_core::sim::{Compiler, MemoryImage, RunController, RunOutcome};
use blinksim_core::soc::{ToyMcu, toy};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::compiler::{CommandCompiler, HexFileCompiler, ResponseFormat};
use crate::console::{ConsoleLed, ConsolePanel};

/// Interval between polls of the running session.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Parser, Debug)]
#[command(
    name = "blinksim",
    author,
    version,
    about = "Run microcontroller firmware on an emulated device",
    long_about = "Run microcontroller firmware on an emulated device and watch its GPIO pins.\n\nExamples:\n  blinksim run --hex demos/blink.hex --pins 2,3,4\n  blinksim run --source blink.ino --compiler \"./build.sh\" --pins 13\n  blinksim check demos/blink.hex"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compile (or load) firmware and run it.
    Run(RunArgs),

    /// Validate a hex image and print what it contains.
    Check {
        /// Intel HEX file to validate.
        file: PathBuf,

        /// Accept records whose checksum does not verify.
        #[arg(long)]
        no_verify: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Prebuilt Intel HEX image; skips compilation.
    #[arg(long, conflicts_with_all = ["source", "compiler"])]
    hex: Option<PathBuf>,

    /// Source file handed to the compiler command on standard input.
    #[arg(long, requires = "compiler")]
    source: Option<PathBuf>,

    /// Compiler command line; prints the image on standard output.
    #[arg(long, requires = "source")]
    compiler: Option<String>,

    /// The compiler prints a JSON object with `hex`, `stdout` and `stderr`.
    #[arg(long, requires = "compiler")]
    json_response: bool,

    /// Give up on the compiler after this many milliseconds.
    #[arg(long, default_value_t = 60_000)]
    compile_timeout_ms: u64,

    /// Pins to mirror, comma separated.
    #[arg(long, value_delimiter = ',', default_value = "2,3,4")]
    pins: Vec<String>,

    /// JSON configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many milliseconds; 0 runs until the program ends.
    #[arg(long, default_value_t = 5_000)]
    duration_ms: u64,

    /// Tick the device from the polling loop instead of a dedicated thread.
    #[arg(long)]
    cooperative: bool,

    /// Device clock in ticks per second; 0 runs unthrottled.
    #[arg(long)]
    clock_hz: Option<u64>,

    /// Validate the whole image before writing any of it.
    #[arg(long)]
    atomic: bool,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Check { file, no_verify } => cmd_check(&file, !no_verify),
    }
}

/// Builds the effective configuration: file (or defaults), then flag overrides.
fn load_config(args: &RunArgs) -> Result<Config, String> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path).map_err(|e| e.to_string())?,
        None => Config::default(),
    };
    if args.cooperative {
        config.session.execution = ExecutionMode::Cooperative;
    }
    if let Some(clock_hz) = args.clock_hz {
        config.session.clock_hz = clock_hz;
    }
    if args.atomic {
        config.loader.atomic = true;
    }
    Ok(config)
}

fn boot_image(config: &Config) -> Result<Vec<u8>, String> {
    match &config.device.bootrom {
        Some(path) => std::fs::read(path).map_err(|e| format!("{}: {e}", path.display())),
        None => Ok(toy::boot_rom(config.device.flash_base)),
    }
}

fn make_compiler(args: &RunArgs) -> Result<(Box<dyn Compiler>, String), String> {
    if let Some(hex) = &args.hex {
        return Ok((Box::new(HexFileCompiler::new(hex.clone())), String::new()));
    }
    let (Some(source), Some(command)) = (&args.source, &args.compiler) else {
        return Err("pass --hex FILE, or --source FILE with --compiler CMD".into());
    };
    let text = std::fs::read_to_string(source).map_err(|e| format!("{}: {e}", source.display()))?;
    let format = if args.json_response {
        ResponseFormat::Json
    } else {
        ResponseFormat::Raw
    };
    let timeout = Duration::from_millis(args.compile_timeout_ms);
    let compiler = CommandCompiler::parse(command, format, timeout).map_err(|e| e.to_string())?;
    Ok((Box::new(compiler), text))
}

fn cmd_run(args: RunArgs) -> ExitCode {
    let prepared = load_config(&args).and_then(|config| {
        let rom = boot_image(&config)?;
        let compiler = make_compiler(&args)?;
        Ok((config, rom, compiler))
    });
    let (config, rom, (mut compiler, source)) = match prepared {
        Ok(prepared) => prepared,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::FAILURE;
        }
    };

    info!(
        pins = config.device.pin_count,
        mode = ?config.session.execution,
        "flash window at {:#010x}",
        config.device.flash_base
    );

    let factory = ToyMcu::factory(&config.device);
    let mut controller =
        RunController::new(config, factory, ConsolePanel::default()).with_bootrom(rom);
    let leds: Vec<Rc<ConsoleLed>> = args
        .pins
        .iter()
        .map(|pin| Rc::new(ConsoleLed::new(pin.trim())))
        .collect();
    for led in &leds {
        controller.add_indicator(led.clone());
    }

    match controller.run(&source, compiler.as_mut()) {
        RunOutcome::Started(id) => debug!(session = %id, "running"),
        RunOutcome::CompileFailed | RunOutcome::Failed(_) | RunOutcome::Stale => {
            return ExitCode::FAILURE;
        }
    }

    let limit = (args.duration_ms > 0).then(|| Duration::from_millis(args.duration_ms));
    let began = Instant::now();
    while controller.is_running() {
        if limit.is_some_and(|limit| began.elapsed() >= limit) {
            controller.stop_run();
            break;
        }
        let _ = controller.poll();
        thread::sleep(POLL_INTERVAL);
    }

    for led in &leds {
        println!("pin {:>2}: {} changes", led.label_text(), led.toggles());
    }
    if controller.panel().state().alerts.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn cmd_check(path: &Path, verify: bool) -> ExitCode {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            eprintln!("error: {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };
    let image = match MemoryImage::parse(&text, verify) {
        Ok(image) => image,
        Err(err) => {
            eprintln!("error: {}: {err}", path.display());
            return ExitCode::FAILURE;
        }
    };

    println!("{}: {} bytes in {} data records", path.display(), image.len(), image.chunks().len());
    let span = image
        .bytes()
        .map(|(addr, _)| addr)
        .fold(None, |span: Option<(u32, u32)>, addr| match span {
            Some((lo, hi)) => Some((lo.min(addr), hi.max(addr))),
            None => Some((addr, addr)),
        });
    if let Some((lo, hi)) = span {
        println!("  span  {lo:#010x}..={hi:#010x}");
    }
    if let Some(entry) = image.start_address() {
        println!("  entry {entry:#010x}");
    }
    ExitCode::SUCCESS
}
