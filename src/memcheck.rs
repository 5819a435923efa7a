//! Memory checking with valgrind
//!
//! The program is built with debug info and no sanitizer, run under
//! memcheck, and the textual report is reduced to a handful of counters.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::compiler::{compile_program, BuildProfile};
use crate::config::SandboxConfig;
use crate::core::source::BINARY_NAME;
use crate::core::{ExecutionOutcome, OutcomeKind, SourceUnit};
use crate::probe::Platform;
use crate::runner::{CommandSpec, RunStatus, Runner};
use crate::sanitize::Sanitizer;

/// Counters extracted from a valgrind report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemcheckSummary {
    pub definitely_lost_bytes: u64,
    pub possibly_lost_bytes: u64,
    pub error_count: u64,
    pub invalid_reads: usize,
    pub invalid_writes: usize,
    pub uninitialised_values: usize,
}

impl MemcheckSummary {
    /// Possibly-lost blocks alone do not fail a check
    pub fn is_clean(&self) -> bool {
        self.error_count == 0 && self.definitely_lost_bytes == 0
    }
}

struct ReportPatterns {
    definitely_lost: Regex,
    possibly_lost: Regex,
    error_summary: Regex,
}

fn patterns() -> &'static ReportPatterns {
    static PATTERNS: OnceLock<ReportPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ReportPatterns {
        definitely_lost: Regex::new(r"definitely lost: ([\d,]+) bytes").unwrap(),
        possibly_lost: Regex::new(r"possibly lost: ([\d,]+) bytes").unwrap(),
        error_summary: Regex::new(r"ERROR SUMMARY: ([\d,]+) errors?").unwrap(),
    })
}

fn capture_count(re: &Regex, report: &str) -> u64 {
    re.captures(report)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().replace(',', "").parse().ok())
        .unwrap_or(0)
}

pub fn parse_report(report: &str) -> MemcheckSummary {
    let p = patterns();
    MemcheckSummary {
        definitely_lost_bytes: capture_count(&p.definitely_lost, report),
        possibly_lost_bytes: capture_count(&p.possibly_lost, report),
        error_count: capture_count(&p.error_summary, report),
        invalid_reads: report.matches("Invalid read").count(),
        invalid_writes: report.matches("Invalid write").count(),
        uninitialised_values: report.matches("uninitialised value").count(),
    }
}

/// Human-readable verdict shown above the raw report
pub fn summarize(summary: &MemcheckSummary) -> String {
    let mut lines = Vec::new();

    if summary.is_clean() {
        lines.push("✅ No memory errors or leaks detected".to_string());
    } else {
        lines.push("❌ Memory problems detected".to_string());
    }

    lines.push(format!("- Errors: {}", summary.error_count));
    lines.push(format!(
        "- Definitely lost: {} bytes",
        summary.definitely_lost_bytes
    ));
    if summary.possibly_lost_bytes > 0 {
        lines.push(format!(
            "- Possibly lost: {} bytes",
            summary.possibly_lost_bytes
        ));
    }
    if summary.invalid_reads > 0 {
        lines.push(format!("- Invalid reads: {}", summary.invalid_reads));
    }
    if summary.invalid_writes > 0 {
        lines.push(format!("- Invalid writes: {}", summary.invalid_writes));
    }
    if summary.uninitialised_values > 0 {
        lines.push(format!(
            "- Uses of uninitialised values: {}",
            summary.uninitialised_values
        ));
    }

    lines.join("\n")
}

/// Outcome when valgrind cannot be used on this host
pub fn unavailable_outcome(platform: Platform, program: &str) -> ExecutionOutcome {
    let message = match platform {
        Platform::Windows => "❌ Memory checking is not supported on Windows: valgrind does not run there.\n\
             Use \"Run\" instead; it detects memory errors with AddressSanitizer when the compiler supports it."
            .to_string(),
        Platform::Unix => format!(
            "❌ {} is not installed on this server. Install valgrind to enable memory checking.",
            program
        ),
    };
    ExecutionOutcome::failure(OutcomeKind::NotAvailable, message)
}

/// Build for memcheck and run the program under valgrind
pub async fn check_memory(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    stdin: Option<&str>,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let compiled = compile_program(runner, config, unit, BuildProfile::Memcheck, sanitizer).await?;
    if !compiled.is_success() {
        return Ok(compiled.failure_outcome(OutcomeKind::CompileError, config));
    }

    let spec = CommandSpec::new(&config.memcheck.program)
        .with_args([
            "--leak-check=full",
            "--show-leak-kinds=all",
            "--track-origins=yes",
        ])
        .with_arg(format!("--error-exitcode={}", config.memcheck.error_exitcode))
        .with_arg(format!("./{}", BINARY_NAME))
        .with_stdin(stdin)
        .with_timeout(config.memcheck.timeout)
        .with_work_dir(unit.dir());

    let outcome = runner
        .run(&spec)
        .await
        .context("Failed to run valgrind")?;

    match outcome.status {
        RunStatus::TimedOut => {
            return Ok(ExecutionOutcome::failure(
                OutcomeKind::Timeout,
                format!(
                    "⏱️ Memory check timed out after {} seconds.\n\
                     Programs run much slower under valgrind; check for infinite loops or missing input.",
                    config.memcheck.timeout.as_secs()
                ),
            ));
        }
        RunStatus::SpawnFailed => {
            return Ok(unavailable_outcome(Platform::Unix, &config.memcheck.program));
        }
        RunStatus::Exited(_) | RunStatus::Signaled(_) => {}
    }

    let report = sanitizer.clean(&outcome.stderr);
    let summary = parse_report(&report);
    debug!("valgrind exited with {}: {:?}", outcome.exit_code(), summary);

    let mut output = summarize(&summary);
    if !outcome.stdout.is_empty() {
        output.push_str("\n\n📤 Program output:\n");
        output.push_str(&outcome.stdout);
    }
    output.push_str("\n\n📋 Valgrind report:\n");
    output.push_str(&report);

    let kind = if summary.is_clean() {
        OutcomeKind::Success
    } else {
        OutcomeKind::MemoryError
    };
    info!(
        "Memory check of {}: {} (errors={}, definitely lost={}B)",
        unit.file_name(),
        kind,
        summary.error_count,
        summary.definitely_lost_bytes
    );

    Ok(ExecutionOutcome::new(kind, output).with_memcheck(summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::{exited, FakeRunner};

    const LEAKY_REPORT: &str = "==4242== Memcheck, a memory error detector\n\
==4242== Invalid write of size 4\n\
==4242==    at 0x109171: main (main.c:6)\n\
==4242== Invalid read of size 4\n\
==4242==    at 0x109181: main (main.c:7)\n\
==4242== Conditional jump or move depends on uninitialised value(s)\n\
==4242== HEAP SUMMARY:\n\
==4242==     in use at exit: 1,024 bytes in 2 blocks\n\
==4242== LEAK SUMMARY:\n\
==4242==    definitely lost: 1,000 bytes in 1 blocks\n\
==4242==    indirectly lost: 0 bytes in 0 blocks\n\
==4242==      possibly lost: 24 bytes in 1 blocks\n\
==4242== ERROR SUMMARY: 4 errors from 4 contexts (suppressed: 0 from 0)\n";

    const POSSIBLY_ONLY_REPORT: &str = "==7== LEAK SUMMARY:\n\
==7==    definitely lost: 0 bytes in 0 blocks\n\
==7==      possibly lost: 304 bytes in 1 blocks\n\
==7== ERROR SUMMARY: 0 errors from 0 contexts (suppressed: 0 from 0)\n";

    #[test]
    fn test_parse_leaky_report() {
        let summary = parse_report(LEAKY_REPORT);

        assert_eq!(summary.definitely_lost_bytes, 1000);
        assert_eq!(summary.possibly_lost_bytes, 24);
        assert_eq!(summary.error_count, 4);
        assert_eq!(summary.invalid_reads, 1);
        assert_eq!(summary.invalid_writes, 1);
        assert_eq!(summary.uninitialised_values, 1);
        assert!(!summary.is_clean());

        let text = summarize(&summary);
        assert!(text.starts_with("❌"));
        assert!(text.contains("Definitely lost: 1000 bytes"));
    }

    #[test]
    fn test_possibly_lost_alone_is_clean() {
        let summary = parse_report(POSSIBLY_ONLY_REPORT);

        assert_eq!(summary.possibly_lost_bytes, 304);
        assert!(summary.is_clean());
        assert!(summarize(&summary).starts_with("✅"));
    }

    #[test]
    fn test_clean_program_without_leak_summary() {
        let report = "==9== All heap blocks were freed -- no leaks are possible\n\
==9== ERROR SUMMARY: 0 errors from 0 contexts (suppressed: 0 from 0)\n";
        assert_eq!(parse_report(report), MemcheckSummary::default());
    }

    #[test]
    fn test_windows_message() {
        let outcome = unavailable_outcome(Platform::Windows, "valgrind");

        assert_eq!(outcome.kind, OutcomeKind::NotAvailable);
        assert!(!outcome.success);
        assert!(outcome.output.contains("AddressSanitizer"));
    }

    #[tokio::test]
    async fn test_check_memory_reports_leak() {
        let dir = tempfile::tempdir().unwrap();
        let config = SandboxConfig::embedded().unwrap().with_work_dir(dir.path());
        let unit = SourceUnit::create(dir.path(), "int main(void) { return 0; }\n").unwrap();
        let runner = FakeRunner::new(|spec| {
            if spec.program == "valgrind" {
                Ok(exited(99, "hello\n", LEAKY_REPORT))
            } else {
                Ok(exited(0, "", ""))
            }
        });

        let outcome = check_memory(&runner, &config, &unit, None, &unit.sanitizer())
            .await
            .unwrap();

        assert_eq!(outcome.kind, OutcomeKind::MemoryError);
        assert!(!outcome.success);
        assert_eq!(outcome.memcheck.as_ref().unwrap().error_count, 4);
        assert!(outcome.output.contains("📤 Program output:\nhello\n"));
        assert!(outcome.output.contains("Invalid write of size 4"));

        let valgrind = &runner.calls()[1];
        assert!(valgrind.args.contains(&"--error-exitcode=99".to_string()));
        assert_eq!(valgrind.args.last().map(String::as_str), Some("./program"));
    }
}
