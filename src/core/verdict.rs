use serde::{Deserialize, Serialize};
use std::fmt;

use crate::formatter::FormatterKind;
use crate::memcheck::MemcheckSummary;
use crate::playground::TypeInfo;
use crate::runner::{RunOutcome, RunStatus};
use crate::sanitize::Sanitizer;

/// Outcome taxonomy returned to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    InvalidInput,
    TooLong,
    SyntaxError,
    CompileError,
    Timeout,
    RuntimeError,
    MemoryError,
    NotAvailable,
    SystemError,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::InvalidInput => "invalid_input",
            OutcomeKind::TooLong => "too_long",
            OutcomeKind::SyntaxError => "syntax_error",
            OutcomeKind::CompileError => "compile_error",
            OutcomeKind::Timeout => "timeout",
            OutcomeKind::RuntimeError => "runtime_error",
            OutcomeKind::MemoryError => "memory_error",
            OutcomeKind::NotAvailable => "not_available",
            OutcomeKind::SystemError => "system_error",
        };
        write!(f, "{}", s)
    }
}

/// Result of one sandbox operation, the only thing handed back to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub success: bool,
    pub output: String,
    pub kind: OutcomeKind,
    /// Full line count of preprocessor output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_lines: Option<usize>,
    /// Optimization level actually used for assembly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimization_level: Option<String>,
    /// Which formatter produced the output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatter: Option<FormatterKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memcheck: Option<MemcheckSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub type_info: Option<TypeInfo>,
}

impl ExecutionOutcome {
    pub fn new(kind: OutcomeKind, output: impl Into<String>) -> Self {
        Self {
            success: kind == OutcomeKind::Success,
            output: output.into(),
            kind,
            total_lines: None,
            optimization_level: None,
            formatter: None,
            memcheck: None,
            type_info: None,
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new(OutcomeKind::Success, output)
    }

    pub fn failure(kind: OutcomeKind, output: impl Into<String>) -> Self {
        let mut outcome = Self::new(kind, output);
        outcome.success = false;
        outcome
    }

    pub fn system_error(message: impl fmt::Display) -> Self {
        Self::failure(
            OutcomeKind::SystemError,
            format!("⚠️ Internal error: {}", message),
        )
    }

    pub fn with_total_lines(mut self, total_lines: usize) -> Self {
        self.total_lines = Some(total_lines);
        self
    }

    pub fn with_optimization_level(mut self, level: impl Into<String>) -> Self {
        self.optimization_level = Some(level.into());
        self
    }

    pub fn with_formatter(mut self, formatter: FormatterKind) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn with_memcheck(mut self, summary: MemcheckSummary) -> Self {
        self.memcheck = Some(summary);
        self
    }

    pub fn with_type_info(mut self, info: TypeInfo) -> Self {
        self.type_info = Some(info);
        self
    }
}

/// Shown instead of an empty successful result
pub const NO_OUTPUT: &str = "(no output)";

/// Shown instead of partial output when a program is killed
pub const TIMEOUT_MESSAGE: &str = "⏱️ Time limit exceeded: the program did not finish in time.\n\
\n\
Possible causes:\n\
- An infinite loop\n\
- The program is waiting for input (scanf, getchar, fgets) that was not provided; enter it in the input box\n\
- Unbounded recursion";

/// Runtime sanitizer reports that turn a crash into a memory error
const MEMORY_SANITIZER_SIGNATURES: [&str; 2] = ["AddressSanitizer", "LeakSanitizer"];

pub fn has_memory_sanitizer_report(stderr: &str) -> bool {
    MEMORY_SANITIZER_SIGNATURES
        .iter()
        .any(|signature| stderr.contains(signature))
}

/// Classify the run of a compiled user program.
///
/// The timed-out flag wins over whatever exit code a killed process reported.
pub fn classify_run(outcome: &RunOutcome, sanitizer: &Sanitizer) -> ExecutionOutcome {
    if outcome.timed_out() {
        return ExecutionOutcome::failure(OutcomeKind::Timeout, TIMEOUT_MESSAGE);
    }

    if outcome.status == RunStatus::SpawnFailed {
        return ExecutionOutcome::system_error(sanitizer.clean(&outcome.stderr));
    }

    // Program output, so user-written paths stay as they are
    let stderr = sanitizer.clean_listing(&outcome.stderr);

    if outcome.is_success() && stderr.is_empty() {
        let mut output = if outcome.stdout.is_empty() {
            NO_OUTPUT.to_string()
        } else {
            outcome.stdout.clone()
        };
        if outcome.truncated {
            output.push_str("\n[output truncated]");
        }
        return ExecutionOutcome::success(output);
    }

    let kind = if has_memory_sanitizer_report(&stderr) {
        OutcomeKind::MemoryError
    } else {
        OutcomeKind::RuntimeError
    };

    let mut output = String::new();
    if !outcome.stdout.is_empty() {
        output.push_str(&outcome.stdout);
        if !output.ends_with('\n') {
            output.push('\n');
        }
    }
    if !stderr.is_empty() {
        output.push_str(&stderr);
        if !output.ends_with('\n') {
            output.push('\n');
        }
    }
    if outcome.truncated {
        output.push_str("[output truncated]\n");
    }
    output.push_str(&describe_status(&outcome.status));

    ExecutionOutcome::failure(kind, output)
}

fn describe_status(status: &RunStatus) -> String {
    match status {
        RunStatus::Exited(code) => format!("❌ Program exited with code {}", code),
        RunStatus::Signaled(sig) => format!("❌ Program terminated by signal {}", signal_name(*sig)),
        RunStatus::TimedOut => "⏱️ Program timed out".to_string(),
        RunStatus::SpawnFailed => "⚠️ Program could not be started".to_string(),
    }
}

#[cfg(unix)]
fn signal_name(sig: i32) -> String {
    match nix::sys::signal::Signal::try_from(sig) {
        Ok(signal) => format!("{} ({})", sig, signal.as_str()),
        Err(_) => sig.to_string(),
    }
}

#[cfg(not(unix))]
fn signal_name(sig: i32) -> String {
    sig.to_string()
}
