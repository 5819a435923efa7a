use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::core::{ExecutionOutcome, OutcomeKind};
use crate::probe::ToolReport;
use crate::sandbox::Sandbox;

/// Job enum - one variant per sandbox operation
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "jobType", rename_all = "snake_case")]
pub enum SandboxJob {
    /// Syntax check only
    CheckSyntax(SourceRequest),
    /// Compile without running
    Compile(SourceRequest),
    /// Compile and run with optional stdin
    Run(RunRequest),
    /// Assembly listing
    Assembly(AssemblyRequest),
    /// Preprocessor output
    Preprocess(SourceRequest),
    /// Run under valgrind
    Memcheck(RunRequest),
    Format(SourceRequest),
    TypeInfo(TypeInfoRequest),
    /// Toolchain availability report
    Tools,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRequest {
    pub source_text: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub source_text: String,
    #[serde(default)]
    pub stdin: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyRequest {
    pub source_text: String,
    #[serde(default)]
    pub optimization_level: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfoRequest {
    pub type_name: String,
}

/// One input line: a job plus an optional caller-chosen id
#[derive(Debug, Deserialize)]
pub struct JobEnvelope {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(flatten)]
    pub job: SandboxJob,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobResult {
    Outcome(ExecutionOutcome),
    Tools(ToolReport),
}

/// One output line
#[derive(Debug, Serialize)]
pub struct JobOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub result: JobResult,
}

impl SandboxJob {
    pub fn name(&self) -> &'static str {
        match self {
            SandboxJob::CheckSyntax(_) => "check_syntax",
            SandboxJob::Compile(_) => "compile",
            SandboxJob::Run(_) => "run",
            SandboxJob::Assembly(_) => "assembly",
            SandboxJob::Preprocess(_) => "preprocess",
            SandboxJob::Memcheck(_) => "memcheck",
            SandboxJob::Format(_) => "format",
            SandboxJob::TypeInfo(_) => "type_info",
            SandboxJob::Tools => "tools",
        }
    }
}

pub async fn process_job(sandbox: &Sandbox, job: SandboxJob) -> JobResult {
    let outcome = match job {
        SandboxJob::CheckSyntax(req) => sandbox.check_syntax(&req.source_text).await,
        SandboxJob::Compile(req) => sandbox.compile(&req.source_text).await,
        SandboxJob::Run(req) => sandbox.run(&req.source_text, req.stdin.as_deref()).await,
        SandboxJob::Assembly(req) => {
            sandbox
                .assembly(&req.source_text, req.optimization_level.as_deref())
                .await
        }
        SandboxJob::Preprocess(req) => sandbox.preprocess(&req.source_text).await,
        SandboxJob::Memcheck(req) => {
            sandbox
                .memcheck(&req.source_text, req.stdin.as_deref())
                .await
        }
        SandboxJob::Format(req) => sandbox.format(&req.source_text).await,
        SandboxJob::TypeInfo(req) => sandbox.type_info(&req.type_name).await,
        SandboxJob::Tools => return JobResult::Tools(sandbox.tools().await),
    };
    JobResult::Outcome(outcome)
}

/// Parse one JSON line and run it
pub async fn handle_line(sandbox: &Sandbox, line: &str) -> JobOutput {
    let envelope: JobEnvelope = match serde_json::from_str(line) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Rejected job: {}", e);
            // Keep the id when only the job part was malformed
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("id").cloned());
            return JobOutput {
                id,
                result: JobResult::Outcome(ExecutionOutcome::failure(
                    OutcomeKind::InvalidInput,
                    format!("❌ Invalid job: {}", e),
                )),
            };
        }
    };

    info!("Received {} job (id={:?})", envelope.job.name(), envelope.id);

    JobOutput {
        id: envelope.id,
        result: process_job(sandbox, envelope.job).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxConfig;
    use crate::probe::Platform;
    use crate::runner::fake::FakeRunner;
    use std::sync::Arc;

    fn sandbox(dir: &std::path::Path) -> Sandbox {
        let config = SandboxConfig::embedded().unwrap().with_work_dir(dir);
        Sandbox::with_runner(
            config,
            Arc::new(FakeRunner::succeeding("")),
            Platform::Unix,
        )
    }

    #[test]
    fn test_parse_jobs() {
        let envelope: JobEnvelope = serde_json::from_str(
            r#"{"id": 7, "jobType": "run", "sourceText": "int main(void){}", "stdin": "5"}"#,
        )
        .unwrap();
        assert_eq!(envelope.id, Some(Value::from(7)));
        match envelope.job {
            SandboxJob::Run(req) => {
                assert_eq!(req.source_text, "int main(void){}");
                assert_eq!(req.stdin.as_deref(), Some("5"));
            }
            other => panic!("unexpected job {:?}", other),
        }

        let envelope: JobEnvelope = serde_json::from_str(
            r#"{"jobType": "assembly", "sourceText": "x", "optimizationLevel": "O2"}"#,
        )
        .unwrap();
        assert!(envelope.id.is_none());
        assert!(matches!(
            envelope.job,
            SandboxJob::Assembly(AssemblyRequest { optimization_level: Some(ref l), .. }) if l == "O2"
        ));

        let envelope: JobEnvelope = serde_json::from_str(r#"{"jobType": "tools"}"#).unwrap();
        assert!(matches!(envelope.job, SandboxJob::Tools));

        let envelope: JobEnvelope =
            serde_json::from_str(r#"{"jobType": "type_info", "typeName": "size_t"}"#).unwrap();
        assert_eq!(envelope.job.name(), "type_info");
    }

    #[tokio::test]
    async fn test_bad_job_keeps_id() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());

        let output = handle_line(&sandbox, r#"{"id": "a1", "jobType": "explode"}"#).await;
        assert_eq!(output.id, Some(Value::from("a1")));
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(json["result"]["kind"], "invalid_input");
        assert_eq!(json["result"]["success"], false);

        let output = handle_line(&sandbox, "not json").await;
        assert!(output.id.is_none());
    }

    #[tokio::test]
    async fn test_format_job_output_shape() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = sandbox(dir.path());

        let output = handle_line(
            &sandbox,
            r#"{"id": 1, "jobType": "format", "sourceText": "int x;"}"#,
        )
        .await;
        let json = serde_json::to_value(&output).unwrap();

        assert_eq!(json["id"], 1);
        // fake clang-format prints nothing, so the builtin indenter runs
        assert_eq!(json["result"]["formatter"], "builtin");
        assert_eq!(json["result"]["output"], "int x;\n");
    }
}
