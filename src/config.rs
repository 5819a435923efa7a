//! Sandbox configuration
//!
//! Toolchain names, flags and time limits. Defaults are embedded from
//! `files/sandbox.toml`; an override file and individual environment
//! variables can replace them at startup.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/sandbox.toml"));

/// Compiler invocation settings
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub program: String,
    pub syntax_flags: Vec<String>,
    pub run_flags: Vec<String>,
    pub sanitizer_flags: Vec<String>,
    pub link_flags: Vec<String>,
    pub timeout: Duration,
}

/// Memory checker (valgrind) settings
#[derive(Debug, Clone)]
pub struct MemcheckConfig {
    pub program: String,
    pub timeout: Duration,
    /// Exit code valgrind returns when it detected any error
    pub error_exitcode: i32,
}

/// External formatter settings
#[derive(Debug, Clone)]
pub struct FormatterConfig {
    pub program: String,
    pub style: String,
    pub timeout: Duration,
}

/// Complete sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub compiler: CompilerConfig,
    pub memcheck: MemcheckConfig,
    pub formatter: FormatterConfig,
    /// Wall-clock limit for running a compiled program
    pub run_timeout: Duration,
    /// Per-stream cap on captured output
    pub max_output_bytes: usize,
    /// Largest accepted source text in bytes
    pub max_source_bytes: usize,
    /// Timeout for `--version` style probes
    pub probe_timeout: Duration,
    /// Number of trailing lines kept from preprocessor output
    pub preprocess_tail_lines: usize,
    /// Base directory for per-request temp directories
    pub work_dir: PathBuf,
}

/// Raw TOML configuration
#[derive(Debug, Deserialize)]
struct RawConfig {
    compiler: RawCompiler,
    runtime: RawRuntime,
    memcheck: RawMemcheck,
    formatter: RawFormatter,
    limits: RawLimits,
}

#[derive(Debug, Deserialize)]
struct RawCompiler {
    program: String,
    #[serde(default)]
    syntax_flags: Vec<String>,
    #[serde(default)]
    run_flags: Vec<String>,
    #[serde(default)]
    sanitizer_flags: Vec<String>,
    #[serde(default)]
    link_flags: Vec<String>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawRuntime {
    timeout_ms: u64,
    max_output_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct RawMemcheck {
    program: String,
    timeout_ms: u64,
    error_exitcode: i32,
}

#[derive(Debug, Deserialize)]
struct RawFormatter {
    program: String,
    style: String,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RawLimits {
    max_source_bytes: usize,
    probe_timeout_ms: u64,
    preprocess_tail_lines: usize,
}

impl SandboxConfig {
    /// Embedded defaults from `files/sandbox.toml`
    pub fn embedded() -> Result<Self> {
        Self::from_toml_str(DEFAULT_CONFIG)
    }

    /// Parse and validate a TOML configuration
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).context("Failed to parse sandbox config")?;

        let config = Self {
            compiler: CompilerConfig {
                program: raw.compiler.program,
                syntax_flags: raw.compiler.syntax_flags,
                run_flags: raw.compiler.run_flags,
                sanitizer_flags: raw.compiler.sanitizer_flags,
                link_flags: raw.compiler.link_flags,
                timeout: Duration::from_millis(raw.compiler.timeout_ms),
            },
            memcheck: MemcheckConfig {
                program: raw.memcheck.program,
                timeout: Duration::from_millis(raw.memcheck.timeout_ms),
                error_exitcode: raw.memcheck.error_exitcode,
            },
            formatter: FormatterConfig {
                program: raw.formatter.program,
                style: raw.formatter.style,
                timeout: Duration::from_millis(raw.formatter.timeout_ms),
            },
            run_timeout: Duration::from_millis(raw.runtime.timeout_ms),
            max_output_bytes: raw.runtime.max_output_bytes,
            max_source_bytes: raw.limits.max_source_bytes,
            probe_timeout: Duration::from_millis(raw.limits.probe_timeout_ms),
            preprocess_tail_lines: raw.limits.preprocess_tail_lines,
            work_dir: std::env::temp_dir(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration: `SANDBOX_CONFIG` file if set, embedded defaults
    /// otherwise, then individual environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("SANDBOX_CONFIG") {
            Ok(path) => {
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read sandbox config {}", path))?;
                info!("Loaded sandbox configuration from {}", path);
                Self::from_toml_str(&content)?
            }
            Err(_) => Self::embedded()?,
        };

        if let Ok(cc) = std::env::var("SANDBOX_CC") {
            config.compiler.program = cc;
        }
        if let Ok(valgrind) = std::env::var("SANDBOX_VALGRIND") {
            config.memcheck.program = valgrind;
        }
        if let Ok(clang_format) = std::env::var("SANDBOX_CLANG_FORMAT") {
            config.formatter.program = clang_format;
        }
        if let Ok(dir) = std::env::var("SANDBOX_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }

        std::fs::create_dir_all(&config.work_dir).with_context(|| {
            format!("Failed to create work directory {}", config.work_dir.display())
        })?;
        config.validate()?;

        Ok(config)
    }

    /// Use a different base directory for temp files
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("compiler.timeout_ms", self.compiler.timeout),
            ("runtime.timeout_ms", self.run_timeout),
            ("memcheck.timeout_ms", self.memcheck.timeout),
            ("formatter.timeout_ms", self.formatter.timeout),
            ("limits.probe_timeout_ms", self.probe_timeout),
        ];
        for (name, value) in timeouts {
            if value.is_zero() {
                anyhow::bail!("Invalid sandbox config: {} must be greater than zero", name);
            }
        }

        if self.run_timeout >= self.compile_timeout() {
            anyhow::bail!(
                "Invalid sandbox config: run timeout ({:?}) must be shorter than compile timeout ({:?})",
                self.run_timeout,
                self.compile_timeout()
            );
        }
        if self.memcheck.timeout <= self.run_timeout {
            warn!(
                "memcheck timeout ({:?}) is not longer than the run timeout ({:?}); instrumented runs may time out",
                self.memcheck.timeout, self.run_timeout
            );
        }
        if self.preprocess_tail_lines == 0 || self.max_source_bytes == 0 {
            anyhow::bail!("Invalid sandbox config: limits must be greater than zero");
        }

        Ok(())
    }

    pub fn compile_timeout(&self) -> Duration {
        self.compiler.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_config_parses() {
        let config = SandboxConfig::from_toml_str(DEFAULT_CONFIG).unwrap();

        assert_eq!(config.compiler.program, "gcc");
        assert_eq!(config.memcheck.program, "valgrind");
        assert_eq!(config.memcheck.error_exitcode, 99);
        assert_eq!(config.preprocess_tail_lines, 300);
        assert!(config.run_timeout < config.compile_timeout());
        assert!(config.memcheck.timeout > config.run_timeout);
    }

    #[test]
    fn test_run_timeout_must_be_shorter() {
        let content = DEFAULT_CONFIG.replace("timeout_ms = 5000\nmax_output_bytes", "timeout_ms = 20000\nmax_output_bytes");
        let err = SandboxConfig::from_toml_str(&content).unwrap_err();

        assert!(format!("{:#}", err).contains("run timeout"));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let content = DEFAULT_CONFIG.replace("probe_timeout_ms = 3000", "probe_timeout_ms = 0");
        let err = SandboxConfig::from_toml_str(&content).unwrap_err();

        assert!(format!("{:#}", err).contains("probe_timeout_ms"));
    }
}
