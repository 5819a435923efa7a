//! Runner module - Process execution layer
//!
//! This module provides a unified interface for running external tools:
//! - `CommandSpec`: what to run (program, argument vector, stdin, timeout)
//! - `RunOutcome`: what happened (status plus captured streams)
//! - `ProcessRunner`: direct child-process execution with timeouts
//!
//! The runner module does NOT:
//! - Interpret outcomes into user-facing verdicts
//! - Know about C, compilers or temp files
//! - Sanitize output

pub mod process;

#[cfg(test)]
pub mod fake;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exit code reported when there is no real one (timeout, spawn failure)
pub const NO_EXIT_CODE: i32 = -1;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name (resolved on `PATH`)
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Text written to the program's stdin
    pub stdin: Option<String>,
    /// Wall-clock limit; the runner default applies when `None`
    pub timeout: Option<Duration>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
    /// Name presented to the program as `argv[0]`
    pub arg0: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            timeout: None,
            work_dir: None,
            arg0: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_stdin(mut self, stdin: Option<&str>) -> Self {
        self.stdin = stdin.map(|s| s.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_arg0(mut self, arg0: impl Into<String>) -> Self {
        self.arg0 = Some(arg0.into());
        self
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.clone());
        v
    }
}

/// Execution status (raw, no verdict interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock limit exceeded, the process was killed
    TimedOut,
    /// The program could not be started
    SpawnFailed,
}

/// Outcome of running a program
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Stdout content
    pub stdout: String,
    /// Stderr content (the spawn error for `SpawnFailed`)
    pub stderr: String,
    /// Whether either stream hit the output cap
    pub truncated: bool,
}

impl RunOutcome {
    pub fn spawn_failed(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::SpawnFailed,
            stdout: String::new(),
            stderr: message.into(),
            truncated: false,
        }
    }

    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Exited(0))
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.status, RunStatus::TimedOut)
    }

    /// Get exit code from status. Signals map to `128 + signal` like a shell.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            RunStatus::Exited(code) => code,
            RunStatus::Signaled(sig) => 128 + sig,
            RunStatus::TimedOut | RunStatus::SpawnFailed => NO_EXIT_CODE,
        }
    }
}

/// Runner trait for executing external tools
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command to completion, timeout or spawn failure.
    ///
    /// Timeouts and spawn failures are reported through `RunStatus`; an `Err`
    /// means something unexpected went wrong around the process.
    async fn run(&self, spec: &CommandSpec) -> Result<RunOutcome>;
}

// Re-exports
pub use process::ProcessRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_sentinels() {
        let timed_out = RunOutcome {
            status: RunStatus::TimedOut,
            stdout: "partial".into(),
            stderr: String::new(),
            truncated: false,
        };
        assert!(timed_out.timed_out());
        assert_eq!(timed_out.exit_code(), NO_EXIT_CODE);

        let spawn = RunOutcome::spawn_failed("No such file or directory");
        assert_eq!(spawn.exit_code(), NO_EXIT_CODE);
        assert!(!spawn.is_success());

        let segv = RunOutcome {
            status: RunStatus::Signaled(11),
            stdout: String::new(),
            stderr: String::new(),
            truncated: false,
        };
        assert_eq!(segv.exit_code(), 139);
    }

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("gcc")
            .with_args(["-fsyntax-only", "main.c"])
            .with_arg("-Wall")
            .with_stdin(Some("42"));

        assert_eq!(spec.to_vec(), vec!["gcc", "-fsyntax-only", "main.c", "-Wall"]);
        assert_eq!(spec.stdin.as_deref(), Some("42"));
        assert!(spec.timeout.is_none());
    }
}
