//! Command runner abstraction.
//!
//! `CommandRunner` is the seam nodes and the provisioner use to execute
//! pipelines. `ProcessRunner` spawns real OS processes. `ScriptedRunner`
//! records calls and answers them from a closure, for tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::command::process::{PipelineOutput, RunOptions};
use crate::command::spec::CommandSpec;
use crate::errors::Result;

/// Executes command pipelines
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion and report every stage, never failing on exit codes
    async fn run(&self, spec: &CommandSpec, options: &RunOptions) -> Result<PipelineOutput>;

    /// Run and fail with `CommandFailed` if any stage exited non-zero
    async fn run_strict(&self, spec: &CommandSpec, options: &RunOptions) -> Result<PipelineOutput> {
        self.run(spec, options).await?.into_result()
    }
}

/// Production runner backed by OS processes
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec, options: &RunOptions) -> Result<PipelineOutput> {
        spec.run(options).await
    }
}

type Script = dyn Fn(&CommandSpec) -> Result<PipelineOutput> + Send + Sync;

/// Test double that records commands and answers them from a script
pub struct ScriptedRunner {
    script: Box<Script>,
    commands: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    /// Every command succeeds with empty output
    pub fn new() -> Self {
        Self::with_script(|spec| Ok(Self::succeed(spec)))
    }

    pub fn with_script<F>(script: F) -> Self
    where
        F: Fn(&CommandSpec) -> Result<PipelineOutput> + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Successful output with one empty entry per stage
    pub fn succeed(spec: &CommandSpec) -> PipelineOutput {
        Self::exit_with(spec, 0)
    }

    /// Successful output where the last stage printed `stdout`
    pub fn print(spec: &CommandSpec, stdout: impl Into<String>) -> PipelineOutput {
        let stages = spec.len();
        let mut printed = vec![String::new(); stages];
        if let Some(last) = printed.last_mut() {
            *last = stdout.into();
        }
        PipelineOutput::from_parts(spec.render(), printed, vec![String::new(); stages], vec![0; stages])
    }

    /// Output where every stage exited with `code`
    pub fn exit_with(spec: &CommandSpec, code: i32) -> PipelineOutput {
        let stages = spec.len();
        PipelineOutput::from_parts(
            spec.render(),
            vec![String::new(); stages],
            vec![String::new(); stages],
            vec![code; stages],
        )
    }

    pub fn executed_commands(&self) -> Vec<CommandSpec> {
        self.commands
            .lock()
            .map(|commands| commands.clone())
            .unwrap_or_default()
    }

    /// Rendered commands whose rendering contains `needle`
    pub fn executed_matching(&self, needle: &str) -> Vec<String> {
        self.executed_commands()
            .iter()
            .map(CommandSpec::render)
            .filter(|rendered| rendered.contains(needle))
            .collect()
    }
}

impl Default for ScriptedRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, _options: &RunOptions) -> Result<PipelineOutput> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(spec.clone());
        }
        (self.script)(spec)
    }
}
