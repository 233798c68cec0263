//! Launching and draining OS process pipelines

use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::command::spec::CommandSpec;
use crate::errors::{ClusterError, CommandFailure, Result};

/// Grace period for collecting buffered output after a stage was killed
const KILLED_DRAIN_GRACE: Duration = Duration::from_millis(50);

/// Per-stage timeout applied when a pipeline overran its overall deadline
const OVERRUN_STAGE_TIMEOUT: Duration = Duration::from_millis(100);

/// Where the first stage reads its input from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StdinMode {
    /// Share the caller's standard input
    #[default]
    Inherit,
    /// Read from an empty stream
    Null,
}

/// Options for running a pipeline to completion
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overall deadline for all stages to exit
    pub timeout: Option<Duration>,

    /// Polling interval while waiting for the stages
    pub interval: Duration,

    /// Deadline per stage while draining
    pub stage_timeout: Option<Duration>,

    /// Input of the first stage
    pub stdin: StdinMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            interval: Duration::from_millis(20),
            stage_timeout: None,
            stdin: StdinMode::Inherit,
        }
    }
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Default::default()
        }
    }

    pub fn detached_stdin(mut self) -> Self {
        self.stdin = StdinMode::Null;
        self
    }
}

/// Drained result of a pipeline, in stage order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    report: CommandFailure,
    timed_out: bool,
}

impl PipelineOutput {
    pub fn command(&self) -> &str {
        &self.report.command
    }

    pub fn stdout(&self) -> &[String] {
        &self.report.stdout
    }

    pub fn stderr(&self) -> &[String] {
        &self.report.stderr
    }

    pub fn status(&self) -> &[i32] {
        &self.report.status
    }

    /// Whether any stage had to be killed
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether every stage exited with code zero
    pub fn success(&self) -> bool {
        self.report.status.iter().all(|code| *code == 0)
    }

    /// The aggregated failure, built once when the pipeline was drained
    pub fn failure(&self) -> &CommandFailure {
        &self.report
    }

    /// Strict mode: fail if any stage exited with a non-zero code
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(ClusterError::CommandFailed(Box::new(self.report)))
        }
    }

    /// Build an output from parts; used by runners that do not spawn processes
    pub fn from_parts(
        command: impl Into<String>,
        stdout: Vec<String>,
        stderr: Vec<String>,
        status: Vec<i32>,
    ) -> Self {
        Self {
            report: CommandFailure {
                command: command.into(),
                stdout,
                stderr,
                status,
            },
            timed_out: false,
        }
    }
}

type Buffer = Arc<Mutex<Vec<u8>>>;

struct Capture {
    buffer: Buffer,
    reader: JoinHandle<()>,
}

impl Capture {
    fn spawn<R>(mut stream: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer: Buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = buffer.clone();
        let reader = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(read) => match sink.lock() {
                        Ok(mut guard) => guard.extend_from_slice(&chunk[..read]),
                        Err(_) => break,
                    },
                }
            }
        });
        Self { buffer, reader }
    }

    /// Collect the captured bytes, giving the reader at most `grace` to reach EOF
    async fn collect(mut self, grace: Option<Duration>) -> String {
        let finished = match grace {
            Some(grace) => tokio::time::timeout(grace, &mut self.reader).await.is_ok(),
            None => (&mut self.reader).await.is_ok(),
        };
        if !finished {
            self.reader.abort();
        }
        let bytes = self
            .buffer
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

struct Stage {
    child: Child,
    status: Option<ExitStatus>,
    stdout: Option<Capture>,
    stderr: Option<Capture>,
}

/// A launched pipeline.
///
/// Owns the child processes of every stage. Output of the last stage and
/// the error stream of every stage are captured in the background, so no
/// stage blocks on a full pipe while another stage is being drained.
pub struct ProcessHandle {
    command: String,
    stages: Vec<Stage>,
    output: Option<PipelineOutput>,
}

impl ProcessHandle {
    /// Spawn every stage of `spec`, wiring stage `i` stdout into stage `i + 1` stdin
    pub fn launch(spec: &CommandSpec, stdin: StdinMode) -> Result<Self> {
        let command = spec.render();
        debug!("Launching: {}", command);

        let count = spec.len();
        let mut stages: Vec<Stage> = Vec::with_capacity(count);
        let mut upstream: Option<Stdio> = None;

        for (index, args) in spec.stages().iter().enumerate() {
            let (program, rest) = args
                .split_first()
                .ok_or_else(|| ClusterError::invariant("empty pipeline stage"))?;

            let input = match upstream.take() {
                Some(stdio) => stdio,
                None => match stdin {
                    StdinMode::Inherit => Stdio::inherit(),
                    StdinMode::Null => Stdio::null(),
                },
            };

            let mut child = Command::new(program)
                .args(rest)
                .stdin(input)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()?;

            let stderr = child.stderr.take().map(Capture::spawn);
            let stdout = if index + 1 < count {
                let pipe = child
                    .stdout
                    .take()
                    .ok_or_else(|| ClusterError::Internal("stage stdout was not piped".into()))?;
                upstream = Some(pipe.try_into()?);
                None
            } else {
                child.stdout.take().map(Capture::spawn)
            };

            stages.push(Stage {
                child,
                status: None,
                stdout,
                stderr,
            });
        }

        Ok(Self {
            command,
            stages,
            output: None,
        })
    }

    /// Rendered command line
    pub fn command(&self) -> &str {
        &self.command
    }

    /// True once every stage has exited
    pub fn is_finished(&mut self) -> Result<bool> {
        let mut finished = true;
        for stage in self.stages.iter_mut() {
            if stage.status.is_none() {
                stage.status = stage.child.try_wait()?;
            }
            finished &= stage.status.is_some();
        }
        Ok(finished)
    }

    /// Poll until every stage has exited or `timeout` elapsed. Returns whether it finished.
    pub async fn wait(&mut self, timeout: Option<Duration>, interval: Duration) -> Result<bool> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if self.is_finished()? {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Drain all stages, last stage first, and cache the result.
    ///
    /// A stage that does not exit within `stage_timeout` is killed and
    /// whatever it produced so far is kept. Draining again returns the
    /// cached result.
    pub async fn communicate(&mut self, stage_timeout: Option<Duration>) -> Result<&PipelineOutput> {
        if self.output.is_none() {
            let output = self.drain(stage_timeout).await?;
            self.output = Some(output);
        }
        self.output
            .as_ref()
            .ok_or_else(|| ClusterError::Internal("pipeline output missing after drain".into()))
    }

    /// Drain and fail on any non-zero stage
    pub async fn strict(&mut self, stage_timeout: Option<Duration>) -> Result<(Vec<String>, Vec<String>)> {
        let output = self.communicate(stage_timeout).await?.clone().into_result()?;
        Ok((output.stdout().to_vec(), output.stderr().to_vec()))
    }

    /// Drain and report outputs, codes and the failure without raising
    pub async fn diagnostic(&mut self, stage_timeout: Option<Duration>) -> Result<PipelineOutput> {
        Ok(self.communicate(stage_timeout).await?.clone())
    }

    async fn drain(&mut self, stage_timeout: Option<Duration>) -> Result<PipelineOutput> {
        let count = self.stages.len();
        let mut stdout = vec![String::new(); count];
        let mut stderr = vec![String::new(); count];
        let mut status = vec![0; count];
        let mut timed_out = false;

        for index in (0..count).rev() {
            let stage = &mut self.stages[index];
            let mut killed = false;

            let exit = match stage.status {
                Some(exit) => exit,
                None => match stage_timeout {
                    None => stage.child.wait().await?,
                    Some(limit) => match tokio::time::timeout(limit, stage.child.wait()).await {
                        Ok(exit) => exit?,
                        Err(_) => {
                            warn!("Stage {} of `{}` timed out, killing it", index, self.command);
                            killed = true;
                            if let Err(e) = stage.child.start_kill() {
                                debug!("Kill of stage {} failed: {}", index, e);
                            }
                            stage.child.wait().await?
                        }
                    },
                },
            };
            stage.status = Some(exit);
            timed_out |= killed;

            let grace = if killed {
                Some(KILLED_DRAIN_GRACE)
            } else {
                stage_timeout
            };
            if let Some(capture) = stage.stdout.take() {
                stdout[index] = capture.collect(grace).await;
            }
            if let Some(capture) = stage.stderr.take() {
                stderr[index] = capture.collect(grace).await;
            }
            status[index] = exit_code(exit);
        }

        Ok(PipelineOutput {
            report: CommandFailure {
                command: self.command.clone(),
                stdout,
                stderr,
                status,
            },
            timed_out,
        })
    }
}

impl CommandSpec {
    /// Launch this pipeline
    pub fn launch(&self, stdin: StdinMode) -> Result<ProcessHandle> {
        ProcessHandle::launch(self, stdin)
    }

    /// Launch, wait for the overall deadline and drain.
    ///
    /// With a deadline, draining is bounded too: an exited stage whose
    /// pipes are held open by a background descendant only gets the time
    /// left before the deadline, or the overrun stage timeout if that is longer.
    pub async fn run(&self, options: &RunOptions) -> Result<PipelineOutput> {
        let started = Instant::now();
        let mut handle = self.launch(options.stdin)?;
        let mut stage_timeout = options.stage_timeout;
        if let Some(timeout) = options.timeout {
            let finished = handle.wait(options.timeout, options.interval).await?;
            let remaining = if finished {
                timeout.saturating_sub(started.elapsed())
            } else {
                Duration::ZERO
            };
            let bound = remaining.max(OVERRUN_STAGE_TIMEOUT);
            stage_timeout = Some(stage_timeout.map_or(bound, |limit| limit.min(bound)));
        }
        handle.diagnostic(stage_timeout).await
    }
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| status.signal().map(|signal| -signal).unwrap_or(-1))
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
