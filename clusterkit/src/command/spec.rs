//! Pipeline command descriptions

use std::borrow::Cow;
use std::fmt;
use std::ops::BitOr;

use crate::errors::{ClusterError, Result};

/// An immutable pipeline of OS-level invocations.
///
/// Each stage is an argument vector; the standard output of stage `i` is
/// connected to the standard input of stage `i + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandSpec {
    stages: Vec<Vec<String>>,
}

impl CommandSpec {
    /// Single-stage pipeline from one argument vector
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_stages(vec![args.into_iter().map(Into::into).collect()])
    }

    /// Pipeline from explicit stages
    pub fn from_stages(stages: Vec<Vec<String>>) -> Result<Self> {
        if stages.is_empty() {
            return Err(ClusterError::invariant("a command needs at least one stage"));
        }
        if let Some(index) = stages.iter().position(|stage| stage.is_empty()) {
            return Err(ClusterError::invariant(format!(
                "stage {index} of the command has no arguments"
            )));
        }
        Ok(Self { stages })
    }

    /// Single stage whose first argument is a program name pushed by the caller
    pub(super) fn single_stage(args: Vec<String>) -> Self {
        debug_assert!(!args.is_empty());
        Self { stages: vec![args] }
    }

    /// Parse a shell-style line such as `printf a | tr a b`.
    ///
    /// Pipes inside quotes or escaped with a backslash do not split stages.
    pub fn from_shell(line: &str) -> Result<Self> {
        let stages = split_unquoted_pipes(line)?
            .into_iter()
            .map(|segment| {
                shlex::split(segment).ok_or_else(|| {
                    ClusterError::invariant(format!("unbalanced quoting in command: {line}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_stages(stages)
    }

    /// Concatenate the stages of two pipelines
    pub fn pipe(&self, other: &CommandSpec) -> CommandSpec {
        let mut stages = self.stages.clone();
        stages.extend(other.stages.iter().cloned());
        CommandSpec { stages }
    }

    pub fn stages(&self) -> &[Vec<String>] {
        &self.stages
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Shell-quoted rendering, stages joined by ` | `
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, stage) in self.stages.iter().enumerate() {
            if index > 0 {
                f.write_str(" | ")?;
            }
            let quoted = stage
                .iter()
                .map(|arg| shlex::try_quote(arg).unwrap_or(Cow::Borrowed(arg.as_str())))
                .collect::<Vec<_>>();
            f.write_str(&quoted.join(" "))?;
        }
        Ok(())
    }
}

impl BitOr for CommandSpec {
    type Output = CommandSpec;

    fn bitor(mut self, rhs: CommandSpec) -> CommandSpec {
        self.stages.extend(rhs.stages);
        self
    }
}

impl BitOr<&CommandSpec> for &CommandSpec {
    type Output = CommandSpec;

    fn bitor(self, rhs: &CommandSpec) -> CommandSpec {
        self.pipe(rhs)
    }
}

fn split_unquoted_pipes(line: &str) -> Result<Vec<&str>> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut single = false;
    let mut double = false;
    let mut escaped = false;

    for (offset, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if !single => escaped = true,
            '\'' if !double => single = !single,
            '"' if !single => double = !double,
            '|' if !single && !double => {
                segments.push(&line[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    if single || double {
        return Err(ClusterError::invariant(format!(
            "unbalanced quoting in command: {line}"
        )));
    }
    segments.push(&line[start..]);
    Ok(segments)
}
