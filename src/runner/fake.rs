//! Scripted runner for pipeline tests

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use super::{CommandSpec, RunOutcome, RunStatus, Runner};

type Handler = Box<dyn Fn(&CommandSpec) -> Result<RunOutcome> + Send + Sync>;

/// Answers every command with a closure and records what was asked
pub struct FakeRunner {
    handler: Handler,
    calls: Mutex<Vec<CommandSpec>>,
}

impl FakeRunner {
    pub fn new(handler: impl Fn(&CommandSpec) -> Result<RunOutcome> + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command exits 0 with `stdout`
    pub fn succeeding(stdout: impl Into<String>) -> Self {
        let stdout = stdout.into();
        Self::new(move |_| Ok(exited(0, stdout.as_str(), "")))
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Runner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<RunOutcome> {
        self.calls.lock().unwrap().push(spec.clone());
        // Let concurrent callers interleave
        tokio::task::yield_now().await;
        (self.handler)(spec)
    }
}

pub fn exited(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> RunOutcome {
    RunOutcome {
        status: RunStatus::Exited(code),
        stdout: stdout.into(),
        stderr: stderr.into(),
        truncated: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_succeeding_accepts_owned_output() {
        let runner = FakeRunner::succeeding(format!("{} {}\n", 4, 4));

        let outcome = runner.run(&CommandSpec::new("gcc")).await.unwrap();

        assert_eq!(outcome.stdout, "4 4\n");
        assert_eq!(runner.call_count(), 1);
        assert_eq!(exited(1, String::from("a"), "b").stderr, "b");
    }
}
