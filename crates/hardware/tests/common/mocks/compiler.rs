use std::collections::VecDeque;

use blinksim_core::common::CompileError;
use blinksim_core::sim::{CompileOutput, Compiler};
use mockall::mock;

mock! {
    pub Compiler {}

    impl Compiler for Compiler {
        fn compile(&mut self, source: &str) -> Result<CompileOutput, CompileError>;
    }
}

/// Compiler that answers from a queue of canned responses and records sources.
#[derive(Debug, Default)]
pub struct CannedCompiler {
    responses: VecDeque<Result<CompileOutput, CompileError>>,
    pub sources: Vec<String>,
}

impl CannedCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful compile producing `hex`.
    pub fn image(mut self, hex: impl Into<String>) -> Self {
        self.responses.push_back(Ok(success(hex)));
        self
    }

    /// Queues an arbitrary response.
    pub fn respond(mut self, response: Result<CompileOutput, CompileError>) -> Self {
        self.responses.push_back(response);
        self
    }
}

impl Compiler for CannedCompiler {
    fn compile(&mut self, source: &str) -> Result<CompileOutput, CompileError> {
        self.sources.push(source.to_owned());
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(CompileError::Transport("no canned response".into())))
    }
}

/// Response carrying an image and no diagnostics.
pub fn success(hex: impl Into<String>) -> CompileOutput {
    CompileOutput {
        hex: Some(hex.into()),
        stdout: None,
        stderr: None,
    }
}

/// Response without an image.
pub fn failure(stderr: &str) -> CompileOutput {
    CompileOutput {
        hex: None,
        stdout: Some(String::new()),
        stderr: Some(stderr.to_owned()),
    }
}
