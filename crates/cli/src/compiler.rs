//! Compiler adapters for the command line.
//!
//! `HexFileCompiler` skips compilation and serves a prebuilt image; `CommandCompiler`
//! pipes the source through an external toolchain command.

use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use blinksim_core::common::CompileError;
use blinksim_core::sim::{CompileOutput, Compiler};
use tracing::{debug, warn};

/// Serves the contents of an existing hex file as the compile result.
#[derive(Debug, Clone)]
pub struct HexFileCompiler {
    path: PathBuf,
}

impl HexFileCompiler {
    pub const fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Compiler for HexFileCompiler {
    fn compile(&mut self, _source: &str) -> Result<CompileOutput, CompileError> {
        let hex = std::fs::read_to_string(&self.path)?;
        Ok(CompileOutput {
            hex: Some(hex),
            stdout: Some(format!("Using prebuilt image {}", self.path.display())),
            stderr: None,
        })
    }
}

/// How the toolchain command reports its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    /// Exit status decides; standard output is the image on success.
    Raw,
    /// Standard output is a JSON object with `hex`, `stdout` and `stderr`.
    Json,
}

/// Runs a toolchain command with the source on standard input.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: String,
    args: Vec<String>,
    format: ResponseFormat,
    timeout: Duration,
}

impl CommandCompiler {
    /// Splits `command` on whitespace into a program and its arguments.
    ///
    /// # Errors
    ///
    /// `CompileError::Transport` if the command line is empty.
    pub fn parse(command: &str, format: ResponseFormat, timeout: Duration) -> Result<Self, CompileError> {
        let mut words = command.split_whitespace().map(str::to_owned);
        let program = words
            .next()
            .ok_or_else(|| CompileError::Transport("empty compiler command".into()))?;
        Ok(Self {
            program,
            args: words.collect(),
            format,
            timeout,
        })
    }
}

impl Compiler for CommandCompiler {
    fn compile(&mut self, source: &str) -> Result<CompileOutput, CompileError> {
        debug!(program = %self.program, args = ?self.args, "invoking compiler");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);
        let stdin = child.stdin.take().map(|pipe| feed(pipe, source.to_owned()));

        let began = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if began.elapsed() >= self.timeout {
                warn!(program = %self.program, "compiler timed out; killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(CompileError::Transport(format!(
                    "timed out after {} ms",
                    self.timeout.as_millis()
                )));
            }
            thread::sleep(Duration::from_millis(10));
        };

        if let Some(writer) = stdin {
            match writer.join() {
                Ok(Err(err)) if err.kind() != ErrorKind::BrokenPipe => return Err(err.into()),
                Ok(_) => {}
                Err(_) => return Err(CompileError::Transport("pipe writer panicked".into())),
            }
        }
        let stdout = collect(stdout)?;
        let stderr = collect(stderr)?;
        debug!(%status, stdout = stdout.len(), stderr = stderr.len(), "compiler exited");

        match self.format {
            ResponseFormat::Json => Ok(serde_json::from_str(&stdout)?),
            ResponseFormat::Raw if status.success() => Ok(CompileOutput {
                hex: Some(stdout),
                stdout: None,
                stderr: Some(stderr),
            }),
            ResponseFormat::Raw => Ok(CompileOutput {
                hex: None,
                stdout: Some(stdout),
                stderr: Some(stderr),
            }),
        }
    }
}

type Drain = thread::JoinHandle<std::io::Result<String>>;

/// Reads a pipe to the end on its own thread so a chatty child cannot block on it.
fn drain(mut pipe: impl Read + Send + 'static) -> Drain {
    thread::spawn(move || {
        let mut text = String::new();
        let _ = pipe.read_to_string(&mut text)?;
        Ok(text)
    })
}

/// Writes the source on its own thread; the pipe closes when it is done.
fn feed(
    mut pipe: impl Write + Send + 'static,
    source: String,
) -> thread::JoinHandle<std::io::Result<()>> {
    thread::spawn(move || pipe.write_all(source.as_bytes()))
}

fn collect(handle: Option<Drain>) -> Result<String, CompileError> {
    match handle {
        Some(handle) => handle
            .join()
            .map_err(|_| CompileError::Transport("pipe reader panicked".into()))?
            .map_err(CompileError::from),
        None => Ok(String::new()),
    }
}
