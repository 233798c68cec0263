//! Command pipelines, their local execution and their remote wrapping

pub mod process;
pub mod remote;
pub mod runner;
pub mod spec;

pub use process::{PipelineOutput, ProcessHandle, RunOptions, StdinMode};
pub use remote::RemoteEndpoint;
pub use runner::{CommandRunner, ProcessRunner, ScriptedRunner};
pub use spec::CommandSpec;
