//! Compiler module - Source code compilation
//!
//! This module drives the C compiler for every pipeline:
//! - Syntax checking
//! - Building an executable (for Run, memory checking and type probes)
//! - Assembly listings at a chosen optimization level
//! - Preprocessor output
//!
//! Diagnostics are sanitized here; callers only ever see `main.c`.

pub mod assembly;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::core::{ExecutionOutcome, OutcomeKind, SourceUnit};
use crate::runner::{CommandSpec, RunOutcome, RunStatus, Runner};
use crate::sanitize::Sanitizer;

pub use assembly::{filter_assembly, OptLevel};

/// Flags used when building for valgrind
const MEMCHECK_FLAGS: [&str; 2] = ["-g", "-O0"];

/// How an executable should be instrumented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    /// Regular run, optionally with AddressSanitizer/UBSan
    Run { sanitize: bool },
    /// Debug info and no optimization or sanitizer, for valgrind
    Memcheck,
}

/// Result of a compiler invocation
#[derive(Debug)]
pub struct CompileResult {
    pub status: CompileStatus,
    /// Sanitized compiler stderr
    pub diagnostics: String,
    /// Raw compiler stdout (assembly, preprocessed source)
    pub stdout: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Success,
    Failed,
    TimedOut,
    /// The compiler could not be started at all
    Unavailable,
}

impl CompileResult {
    pub fn is_success(&self) -> bool {
        self.status == CompileStatus::Success
    }

    /// Outcome for a failed compilation, reported as `kind`
    pub fn failure_outcome(&self, kind: OutcomeKind, config: &SandboxConfig) -> ExecutionOutcome {
        match self.status {
            CompileStatus::TimedOut => ExecutionOutcome::failure(
                kind,
                format!(
                    "⏱️ Compilation timed out after {} seconds",
                    config.compile_timeout().as_secs()
                ),
            ),
            CompileStatus::Unavailable => ExecutionOutcome::failure(
                OutcomeKind::NotAvailable,
                format!(
                    "❌ The C compiler ({}) is not available on this server.\n{}",
                    config.compiler.program, self.diagnostics
                ),
            ),
            CompileStatus::Success | CompileStatus::Failed => {
                let message = if self.diagnostics.trim().is_empty() {
                    "❌ Compilation failed".to_string()
                } else {
                    self.diagnostics.clone()
                };
                ExecutionOutcome::failure(kind, message)
            }
        }
    }
}

fn into_compile_result(outcome: RunOutcome, sanitizer: &Sanitizer) -> CompileResult {
    let status = match outcome.status {
        RunStatus::Exited(0) => CompileStatus::Success,
        RunStatus::TimedOut => CompileStatus::TimedOut,
        RunStatus::SpawnFailed => CompileStatus::Unavailable,
        RunStatus::Exited(_) | RunStatus::Signaled(_) => CompileStatus::Failed,
    };

    CompileResult {
        status,
        diagnostics: sanitizer.clean(&outcome.stderr),
        stdout: outcome.stdout,
    }
}

fn compiler_command(config: &SandboxConfig, unit: &SourceUnit) -> CommandSpec {
    CommandSpec::new(&config.compiler.program)
        .with_timeout(config.compile_timeout())
        .with_work_dir(unit.dir())
}

async fn invoke(
    runner: &dyn Runner,
    spec: &CommandSpec,
    sanitizer: &Sanitizer,
) -> Result<CompileResult> {
    debug!("Compiler command: {:?}", spec.to_vec());
    let outcome = runner
        .run(spec)
        .await
        .context("Failed to run C compiler")?;
    Ok(into_compile_result(outcome, sanitizer))
}

/// Append sanitized warnings to a success headline
fn with_warnings(headline: &str, diagnostics: &str) -> String {
    let warnings = diagnostics.trim_end();
    if warnings.is_empty() {
        headline.to_string()
    } else {
        format!("{}\n\n⚠️ Warnings:\n{}", headline, warnings)
    }
}

/// `gcc -fsyntax-only -Wall -Wextra`
pub async fn check_syntax(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let spec = compiler_command(config, unit)
        .with_args(config.compiler.syntax_flags.iter().cloned())
        .with_arg(unit.source_path().to_string_lossy());

    let result = invoke(runner, &spec, sanitizer).await?;

    if result.is_success() {
        return Ok(ExecutionOutcome::success(with_warnings(
            "✅ No syntax errors found",
            &result.diagnostics,
        )));
    }
    Ok(result.failure_outcome(OutcomeKind::SyntaxError, config))
}

/// Build `unit` into its binary path
pub async fn compile_program(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    profile: BuildProfile,
    sanitizer: &Sanitizer,
) -> Result<CompileResult> {
    let mut spec = compiler_command(config, unit);

    match profile {
        BuildProfile::Run { sanitize } => {
            spec = spec.with_args(config.compiler.run_flags.iter().cloned());
            if sanitize {
                spec = spec.with_args(config.compiler.sanitizer_flags.iter().cloned());
            }
        }
        BuildProfile::Memcheck => {
            spec = spec.with_args(MEMCHECK_FLAGS);
        }
    }

    let spec = spec
        .with_arg("-o")
        .with_arg(unit.binary_path().to_string_lossy())
        .with_arg(unit.source_path().to_string_lossy())
        .with_args(config.compiler.link_flags.iter().cloned());

    let result = invoke(runner, &spec, sanitizer).await?;
    info!(
        "Compiled {} ({:?}): {:?}",
        unit.file_name(),
        profile,
        result.status
    );
    Ok(result)
}

/// Standalone compile job
pub async fn compile(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    profile: BuildProfile,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let result = compile_program(runner, config, unit, profile, sanitizer).await?;

    if result.is_success() {
        return Ok(ExecutionOutcome::success(with_warnings(
            "✅ Compilation successful",
            &result.diagnostics,
        )));
    }
    Ok(result.failure_outcome(OutcomeKind::CompileError, config))
}

/// Assembly listing at `level`, filtered for readability
pub async fn emit_assembly(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    level: OptLevel,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let spec = compiler_command(config, unit)
        .with_args(["-S", level.flag().as_str(), "-fno-asynchronous-unwind-tables"])
        .with_args(["-o", "-"])
        .with_arg(unit.source_path().to_string_lossy());

    let result = invoke(runner, &spec, sanitizer).await?;

    if !result.is_success() {
        return Ok(result
            .failure_outcome(OutcomeKind::CompileError, config)
            .with_optimization_level(level.as_str()));
    }

    let listing = filter_assembly(&sanitizer.clean_listing(&result.stdout));
    Ok(ExecutionOutcome::success(listing).with_optimization_level(level.as_str()))
}

/// Keep the last `tail` lines of preprocessor output.
///
/// Returns the text and the full line count.
pub fn tail_preprocessed(text: &str, tail: usize) -> (String, usize) {
    let lines: Vec<&str> = text.lines().collect();
    let total = lines.len();

    if total <= tail {
        return (text.to_string(), total);
    }

    let kept = &lines[total - tail..];
    let mut out = format!(
        "// Showing the last {} of {} lines. The {} lines before them are\n\
         // standard library headers expanded by #include.\n\n",
        tail,
        total,
        total - tail
    );
    out.push_str(&kept.join("\n"));
    out.push('\n');
    (out, total)
}

/// `gcc -E -P`, tail-capped
pub async fn preprocess(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let spec = compiler_command(config, unit)
        .with_args(["-E", "-P"])
        .with_arg(unit.source_path().to_string_lossy());

    let result = invoke(runner, &spec, sanitizer).await?;

    if !result.is_success() {
        return Ok(result.failure_outcome(OutcomeKind::CompileError, config));
    }

    // __FILE__ expands to the real path
    let expanded = sanitizer.clean_listing(&result.stdout);
    let (text, total) = tail_preprocessed(&expanded, config.preprocess_tail_lines);
    Ok(ExecutionOutcome::success(text).with_total_lines(total))
}
