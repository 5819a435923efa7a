//! Sandbox module - The service every job goes through
//!
//! `Sandbox` owns the configuration, the process runner and the capability
//! cache, and exposes one operation per pipeline. Each operation:
//! - validates its input
//! - materializes the source in its own temp directory
//! - runs the pipeline
//! - turns any internal error into a sanitized `system_error`
//! - removes the temp directory
//!
//! Callers only ever receive an `ExecutionOutcome`.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info};

use crate::compiler::{self, BuildProfile, OptLevel};
use crate::config::SandboxConfig;
use crate::core::input::{validate_source, validate_type_name};
use crate::core::{ExecutionOutcome, SourceUnit};
use crate::formatter;
use crate::memcheck;
use crate::playground;
use crate::probe::{CapabilityCache, Platform, ToolReport};
use crate::runner::{ProcessRunner, Runner};
use crate::sanitize::Sanitizer;

pub struct Sandbox {
    config: Arc<SandboxConfig>,
    runner: Arc<dyn Runner>,
    capabilities: CapabilityCache,
}

impl Sandbox {
    /// Sandbox running real processes on this host
    pub fn new(config: SandboxConfig) -> Self {
        let runner = ProcessRunner::new(config.compile_timeout(), config.max_output_bytes);
        Self::with_runner(config, Arc::new(runner), Platform::current())
    }

    pub fn with_runner(config: SandboxConfig, runner: Arc<dyn Runner>, platform: Platform) -> Self {
        Self {
            config: Arc::new(config),
            runner,
            capabilities: CapabilityCache::new(platform),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub async fn check_syntax(&self, source: &str) -> ExecutionOutcome {
        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let result =
            compiler::check_syntax(self.runner.as_ref(), &self.config, &unit, &sanitizer).await;
        self.finish("check_syntax", unit, &sanitizer, result)
    }

    pub async fn compile(&self, source: &str) -> ExecutionOutcome {
        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let sanitize = self.sanitizer_supported().await;
        let result = compiler::compile(
            self.runner.as_ref(),
            &self.config,
            &unit,
            BuildProfile::Run { sanitize },
            &sanitizer,
        )
        .await;
        self.finish("compile", unit, &sanitizer, result)
    }

    pub async fn run(&self, source: &str, stdin: Option<&str>) -> ExecutionOutcome {
        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let sanitize = self.sanitizer_supported().await;
        let result = playground::run(
            self.runner.as_ref(),
            &self.config,
            &unit,
            stdin,
            sanitize,
            &sanitizer,
        )
        .await;
        self.finish("run", unit, &sanitizer, result)
    }

    pub async fn assembly(&self, source: &str, level: Option<&str>) -> ExecutionOutcome {
        let level = OptLevel::from_request(level);
        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let result =
            compiler::emit_assembly(self.runner.as_ref(), &self.config, &unit, level, &sanitizer)
                .await;
        self.finish("assembly", unit, &sanitizer, result)
    }

    pub async fn preprocess(&self, source: &str) -> ExecutionOutcome {
        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let result =
            compiler::preprocess(self.runner.as_ref(), &self.config, &unit, &sanitizer).await;
        self.finish("preprocess", unit, &sanitizer, result)
    }

    pub async fn memcheck(&self, source: &str, stdin: Option<&str>) -> ExecutionOutcome {
        // The platform gate comes before any look at the source
        if !self
            .capabilities
            .memcheck_available(self.runner.as_ref(), &self.config)
            .await
        {
            info!("Memory check requested but valgrind is not available");
            return memcheck::unavailable_outcome(
                self.capabilities.platform(),
                &self.config.memcheck.program,
            );
        }

        let (unit, sanitizer) = match self.prepare(source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let result = memcheck::check_memory(
            self.runner.as_ref(),
            &self.config,
            &unit,
            stdin,
            &sanitizer,
        )
        .await;
        self.finish("memcheck", unit, &sanitizer, result)
    }

    /// Formatting works on stdin and needs no temp files
    pub async fn format(&self, source: &str) -> ExecutionOutcome {
        if let Err(e) = validate_source(source, self.config.max_source_bytes) {
            return e.into();
        }
        let outcome = formatter::format_source(self.runner.as_ref(), &self.config, source).await;
        info!("format finished: {}", outcome.kind);
        outcome
    }

    pub async fn type_info(&self, type_name: &str) -> ExecutionOutcome {
        let type_name = match validate_type_name(type_name) {
            Ok(name) => name,
            Err(e) => return e.into(),
        };
        let source = playground::type_probe_source(&type_name);
        let (unit, sanitizer) = match self.prepare(&source) {
            Ok(prepared) => prepared,
            Err(outcome) => return outcome,
        };
        let result = playground::type_info(
            self.runner.as_ref(),
            &self.config,
            &unit,
            &type_name,
            &sanitizer,
        )
        .await;
        self.finish("type_info", unit, &sanitizer, result)
    }

    pub async fn tools(&self) -> ToolReport {
        self.capabilities
            .tool_report(self.runner.as_ref(), &self.config)
            .await
    }

    async fn sanitizer_supported(&self) -> bool {
        self.capabilities
            .sanitizer_supported(self.runner.as_ref(), &self.config)
            .await
    }

    /// Validate and write the source; failures are already outcomes
    fn prepare(&self, source: &str) -> Result<(SourceUnit, Sanitizer), ExecutionOutcome> {
        validate_source(source, self.config.max_source_bytes)?;

        let unit = SourceUnit::create(&self.config.work_dir, source).map_err(|e| {
            error!("Failed to prepare source: {:#}", e);
            // No unit directory exists yet; hide the base directory instead
            let base = Sanitizer::new().with_path(&self.config.work_dir);
            ExecutionOutcome::system_error(base.clean(&format!("{:#}", e)))
        })?;

        let sanitizer = unit.sanitizer();
        Ok((unit, sanitizer))
    }

    /// Catch-all boundary: errors become `system_error`, and the unit is
    /// always removed.
    fn finish(
        &self,
        operation: &str,
        unit: SourceUnit,
        sanitizer: &Sanitizer,
        result: Result<ExecutionOutcome>,
    ) -> ExecutionOutcome {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("{} failed for {}: {:#}", operation, unit.file_name(), e);
                // Internal error text: hide the base directory as well
                let sanitizer = sanitizer.clone().with_path(&self.config.work_dir);
                ExecutionOutcome::system_error(sanitizer.clean(&format!("{:#}", e)))
            }
        };

        unit.cleanup();
        info!("{} finished: {}", operation, outcome.kind);
        outcome
    }
}
