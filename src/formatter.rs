//! Source formatting: clang-format when installed, a brace-depth indenter otherwise

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::SandboxConfig;
use crate::core::ExecutionOutcome;
use crate::runner::{CommandSpec, Runner};
use crate::sanitize::DISPLAY_FILE_NAME;

const INDENT: &str = "    ";

/// Which formatter produced the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormatterKind {
    ClangFormat,
    Builtin,
}

/// Format `source`. Never fails: any clang-format problem falls back to the
/// builtin indenter.
pub async fn format_source(
    runner: &dyn Runner,
    config: &SandboxConfig,
    source: &str,
) -> ExecutionOutcome {
    if let Some(formatted) = clang_format(runner, config, source).await {
        return ExecutionOutcome::success(formatted).with_formatter(FormatterKind::ClangFormat);
    }

    info!("Formatting with builtin indenter");
    ExecutionOutcome::success(builtin_format(source)).with_formatter(FormatterKind::Builtin)
}

async fn clang_format(runner: &dyn Runner, config: &SandboxConfig, source: &str) -> Option<String> {
    let spec = CommandSpec::new(&config.formatter.program)
        .with_arg(format!("--style={}", config.formatter.style))
        .with_arg(format!("--assume-filename={}", DISPLAY_FILE_NAME))
        .with_stdin(Some(source))
        .with_timeout(config.formatter.timeout);

    match runner.run(&spec).await {
        Ok(outcome) if outcome.is_success() && !outcome.stdout.trim().is_empty() => {
            Some(outcome.stdout)
        }
        Ok(outcome) => {
            debug!(
                "{} unusable ({:?}): {}",
                config.formatter.program,
                outcome.status,
                outcome.stderr.trim()
            );
            None
        }
        Err(e) => {
            debug!("{} failed: {:#}", config.formatter.program, e);
            None
        }
    }
}

/// Re-indent by brace depth, four spaces per level
pub fn builtin_format(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut depth: usize = 0;

    for line in source.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            out.push('\n');
            continue;
        }

        let level = if trimmed.starts_with('}') || trimmed.starts_with(')') {
            depth.saturating_sub(1)
        } else {
            depth
        };
        out.push_str(&INDENT.repeat(level));
        out.push_str(trimmed);
        out.push('\n');

        let opens = trimmed.matches('{').count();
        let closes = trimmed.matches('}').count();
        depth = (depth + opens).saturating_sub(closes);
    }

    out
}
