//! Tool capability probing
//!
//! Availability and version of external tools are probed on every request so
//! installing a tool takes effect without a restart. Sanitizer support needs a
//! full compile and is therefore computed once and cached.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::config::SandboxConfig;
use crate::core::SourceUnit;
use crate::runner::{CommandSpec, Runner};

const SANITIZER_PROBE_SOURCE: &str = "int main(void) { return 0; }\n";

/// Availability of one external tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStatus {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Everything the `tools` job reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolReport {
    pub compiler: ToolStatus,
    pub memcheck: ToolStatus,
    pub formatter: ToolStatus,
    pub sanitizer_supported: bool,
    pub platform: Platform,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// Run `<program> <version_arg>`; available iff it exits 0
pub async fn probe_tool(
    runner: &dyn Runner,
    program: &str,
    version_arg: &str,
    timeout: Duration,
) -> ToolStatus {
    let spec = CommandSpec::new(program)
        .with_arg(version_arg)
        .with_timeout(timeout);

    let outcome = match runner.run(&spec).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Probe of {} failed: {:#}", program, e);
            return ToolStatus {
                name: program.to_string(),
                available: false,
                version: None,
            };
        }
    };

    if !outcome.is_success() {
        debug!("{} is not available: {:?}", program, outcome.status);
        return ToolStatus {
            name: program.to_string(),
            available: false,
            version: None,
        };
    }

    let version = first_line(&outcome.stdout).or_else(|| first_line(&outcome.stderr));

    ToolStatus {
        name: program.to_string(),
        available: true,
        version,
    }
}

fn first_line(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

/// Process-wide knowledge about the toolchain
pub struct CapabilityCache {
    sanitizer: OnceCell<bool>,
    platform: Platform,
}

impl CapabilityCache {
    pub fn new(platform: Platform) -> Self {
        Self {
            sanitizer: OnceCell::new(),
            platform,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Whether the compiler can build and run a sanitizer-instrumented binary.
    ///
    /// Computed once; concurrent first callers wait on the same probe.
    pub async fn sanitizer_supported(&self, runner: &dyn Runner, config: &SandboxConfig) -> bool {
        *self
            .sanitizer
            .get_or_init(|| async {
                let supported = detect_sanitizer_support(runner, config).await;
                info!("Sanitizer support: {}", supported);
                supported
            })
            .await
    }

    pub async fn memcheck_available(&self, runner: &dyn Runner, config: &SandboxConfig) -> bool {
        if self.platform == Platform::Windows {
            return false;
        }
        probe_tool(
            runner,
            &config.memcheck.program,
            "--version",
            config.probe_timeout,
        )
        .await
        .available
    }

    pub async fn tool_report(&self, runner: &dyn Runner, config: &SandboxConfig) -> ToolReport {
        let compiler = probe_tool(
            runner,
            &config.compiler.program,
            "--version",
            config.probe_timeout,
        )
        .await;

        let memcheck = if self.platform == Platform::Windows {
            ToolStatus {
                name: config.memcheck.program.clone(),
                available: false,
                version: None,
            }
        } else {
            probe_tool(
                runner,
                &config.memcheck.program,
                "--version",
                config.probe_timeout,
            )
            .await
        };

        let formatter = probe_tool(
            runner,
            &config.formatter.program,
            "--version",
            config.probe_timeout,
        )
        .await;

        let sanitizer_supported = self.sanitizer_supported(runner, config).await;

        ToolReport {
            compiler,
            memcheck,
            formatter,
            sanitizer_supported,
            platform: self.platform,
        }
    }
}

/// Build and run a trivial program with the sanitizer flags
async fn detect_sanitizer_support(runner: &dyn Runner, config: &SandboxConfig) -> bool {
    if config.compiler.sanitizer_flags.is_empty() {
        return false;
    }

    let unit = match SourceUnit::create(&config.work_dir, SANITIZER_PROBE_SOURCE) {
        Ok(unit) => unit,
        Err(e) => {
            warn!("Could not prepare sanitizer probe: {:#}", e);
            return false;
        }
    };

    let binary = unit.binary_path();
    let compile = CommandSpec::new(&config.compiler.program)
        .with_args(config.compiler.sanitizer_flags.iter().cloned())
        .with_arg("-o")
        .with_arg(binary.to_string_lossy())
        .with_arg(unit.source_path().to_string_lossy())
        .with_timeout(config.compile_timeout())
        .with_work_dir(unit.dir());

    let supported = match runner.run(&compile).await {
        Ok(outcome) if outcome.is_success() => {
            // Some hosts link ASan fine but refuse to run it (ptrace, vm limits)
            let run = CommandSpec::new(binary.to_string_lossy())
                .with_timeout(config.probe_timeout)
                .with_work_dir(unit.dir());
            matches!(runner.run(&run).await, Ok(outcome) if outcome.is_success())
        }
        Ok(outcome) => {
            debug!("Sanitizer probe compile failed: {}", outcome.stderr.trim());
            false
        }
        Err(e) => {
            warn!("Sanitizer probe errored: {:#}", e);
            false
        }
    };

    unit.cleanup();
    supported
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::fake::{exited, FakeRunner};
    use crate::runner::RunOutcome;

    fn config(dir: &std::path::Path) -> SandboxConfig {
        SandboxConfig::embedded().unwrap().with_work_dir(dir)
    }

    #[tokio::test]
    async fn test_probe_reads_first_version_line() {
        let runner = FakeRunner::succeeding("\ngcc (GCC) 13.2.0\nCopyright\n");
        let status = probe_tool(&runner, "gcc", "--version", Duration::from_secs(1)).await;

        assert!(status.available);
        assert_eq!(status.version.as_deref(), Some("gcc (GCC) 13.2.0"));
        assert_eq!(runner.calls()[0].to_vec(), vec!["gcc", "--version"]);
    }

    #[tokio::test]
    async fn test_probe_version_from_stderr() {
        let runner = FakeRunner::new(|_| Ok(exited(0, "", "valgrind-3.22.0\n")));
        let status = probe_tool(&runner, "valgrind", "--version", Duration::from_secs(1)).await;

        assert_eq!(status.version.as_deref(), Some("valgrind-3.22.0"));
    }

    #[tokio::test]
    async fn test_missing_tool_is_unavailable() {
        let runner = FakeRunner::new(|_| Ok(RunOutcome::spawn_failed("No such file")));
        let status = probe_tool(&runner, "valgrind", "--version", Duration::from_secs(1)).await;
        assert!(!status.available);
        assert!(status.version.is_none());

        let runner = FakeRunner::new(|_| Ok(exited(1, "", "")));
        let status = probe_tool(&runner, "valgrind", "--version", Duration::from_secs(1)).await;
        assert!(!status.available);
    }

    #[tokio::test]
    async fn test_sanitizer_probe_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::succeeding("");
        let cache = CapabilityCache::new(Platform::Unix);

        let (a, b, c) = tokio::join!(
            cache.sanitizer_supported(&runner, &config),
            cache.sanitizer_supported(&runner, &config),
            cache.sanitizer_supported(&runner, &config),
        );
        assert!(a && b && c);
        // one compile plus one run of the probe binary
        assert_eq!(runner.call_count(), 2);

        assert!(cache.sanitizer_supported(&runner, &config).await);
        assert_eq!(runner.call_count(), 2);

        let compile = &runner.calls()[0];
        assert!(compile.args.iter().any(|a| a.starts_with("-fsanitize=")));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_sanitizer_unsupported_when_compile_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::new(|_| Ok(exited(1, "", "cannot find -lasan")));
        let cache = CapabilityCache::new(Platform::Unix);

        assert!(!cache.sanitizer_supported(&runner, &config).await);
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_memcheck_never_available_on_windows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runner = FakeRunner::succeeding("valgrind-3.22.0");

        let cache = CapabilityCache::new(Platform::Windows);
        assert!(!cache.memcheck_available(&runner, &config).await);
        assert_eq!(runner.call_count(), 0);

        let cache = CapabilityCache::new(Platform::Unix);
        assert!(cache.memcheck_available(&runner, &config).await);
        // probed again, never cached
        assert!(cache.memcheck_available(&runner, &config).await);
        assert_eq!(runner.call_count(), 2);
    }
}
