//! Playground execution - compile and run user programs
//!
//! The compiled binary runs directly under the run timeout with the caller's
//! stdin, and is shown `./main` as its own name.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::compiler::{compile_program, BuildProfile, CompileStatus};
use crate::config::SandboxConfig;
use crate::core::verdict::classify_run;
use crate::core::{ExecutionOutcome, OutcomeKind, SourceUnit};
use crate::runner::{CommandSpec, RunOutcome, Runner};
use crate::sanitize::Sanitizer;

/// Name the user program sees as `argv[0]`
pub const PROGRAM_ARG0: &str = "./main";

/// Run the already-built binary of `unit`
pub async fn execute_binary(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    stdin: Option<&str>,
) -> Result<RunOutcome> {
    let spec = CommandSpec::new(unit.binary_path().to_string_lossy())
        .with_arg0(PROGRAM_ARG0)
        .with_stdin(stdin)
        .with_timeout(config.run_timeout)
        .with_work_dir(unit.dir());

    runner
        .run(&spec)
        .await
        .context("Failed to run compiled program")
}

/// Compile and run, classifying the result
pub async fn run(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    stdin: Option<&str>,
    sanitize: bool,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let compiled =
        compile_program(runner, config, unit, BuildProfile::Run { sanitize }, sanitizer).await?;
    if !compiled.is_success() {
        return Ok(compiled.failure_outcome(OutcomeKind::CompileError, config));
    }

    let outcome = execute_binary(runner, config, unit, stdin).await?;
    debug!(
        "Program {} finished: {:?}, truncated={}",
        unit.file_name(),
        outcome.status,
        outcome.truncated
    );

    Ok(classify_run(&outcome, sanitizer))
}

/// Size and alignment of a C type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    pub type_name: String,
    pub size: u64,
    pub align: u64,
}

/// Headers available to type probes
const TYPE_PROBE_HEADERS: &[&str] = &[
    "stdio.h", "stddef.h", "stdint.h", "stdbool.h", "stdlib.h", "wchar.h", "time.h",
];

/// Program printing `sizeof` and `_Alignof` of `type_name`.
///
/// `type_name` must already be validated.
pub fn type_probe_source(type_name: &str) -> String {
    let mut source = String::new();
    for header in TYPE_PROBE_HEADERS {
        source.push_str(&format!("#include <{}>\n", header));
    }
    source.push_str(&format!(
        "\nint main(void) {{\n    printf(\"%zu %zu\\n\", sizeof({t}), _Alignof({t}));\n    return 0;\n}}\n",
        t = type_name
    ));
    source
}

fn parse_probe_output(stdout: &str) -> Option<(u64, u64)> {
    let mut parts = stdout.split_whitespace();
    let size = parts.next()?.parse().ok()?;
    let align = parts.next()?.parse().ok()?;
    Some((size, align))
}

/// First line of a diagnostic that names an error
fn first_error_line(diagnostics: &str) -> Option<&str> {
    diagnostics
        .lines()
        .find(|line| line.contains("error"))
        .or_else(|| diagnostics.lines().find(|line| !line.trim().is_empty()))
}

/// Compile and run the probe in `unit` (built from `type_probe_source`)
pub async fn type_info(
    runner: &dyn Runner,
    config: &SandboxConfig,
    unit: &SourceUnit,
    type_name: &str,
    sanitizer: &Sanitizer,
) -> Result<ExecutionOutcome> {
    let compiled = compile_program(
        runner,
        config,
        unit,
        BuildProfile::Run { sanitize: false },
        sanitizer,
    )
    .await?;

    if !compiled.is_success() {
        if compiled.status != CompileStatus::Failed {
            return Ok(compiled.failure_outcome(OutcomeKind::CompileError, config));
        }
        let detail = first_error_line(&compiled.diagnostics).unwrap_or("unknown type");
        return Ok(ExecutionOutcome::failure(
            OutcomeKind::InvalidInput,
            format!("❌ Unknown type '{}': {}", type_name, detail.trim()),
        ));
    }

    let outcome = execute_binary(runner, config, unit, None).await?;
    if !outcome.is_success() {
        return Ok(classify_run(&outcome, sanitizer));
    }

    let (size, align) = parse_probe_output(&outcome.stdout)
        .with_context(|| format!("Unexpected type probe output: {:?}", outcome.stdout))?;
    info!("sizeof({}) = {}, align = {}", type_name, size, align);

    let output = format!(
        "sizeof({t}) = {size} byte{s}\n_Alignof({t}) = {align}",
        t = type_name,
        size = size,
        s = if size == 1 { "" } else { "s" },
        align = align
    );

    Ok(ExecutionOutcome::success(output).with_type_info(TypeInfo {
        type_name: type_name.to_string(),
        size,
        align,
    }))
}
