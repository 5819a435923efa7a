mod compiler;
mod config;
mod core;
mod formatter;
mod jobs;
mod memcheck;
mod playground;
mod probe;
mod runner;
mod sandbox;
mod sanitize;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::config::SandboxConfig;
use crate::jobs::{handle_line, JobOutput};
use crate::sandbox::Sandbox;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries results, so logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("csandbox=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let sandbox = Arc::new(Sandbox::new(SandboxConfig::load()?));

    let config = sandbox.config();
    info!(
        "Sandbox config: cc={}, valgrind={}, clang-format={}, work_dir={}",
        config.compiler.program,
        config.memcheck.program,
        config.formatter.program,
        config.work_dir.display()
    );
    info!(
        "Time limits: compile={:?}, run={:?}, memcheck={:?}",
        config.compile_timeout(),
        config.run_timeout,
        config.memcheck.timeout
    );

    let input: Box<dyn AsyncRead + Unpin + Send> = match std::env::args().nth(1) {
        Some(path) => {
            info!("Reading jobs from {}", path);
            Box::new(
                tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("Failed to open job file {}", path))?,
            )
        }
        None => {
            info!("Waiting for jobs on stdin...");
            Box::new(tokio::io::stdin())
        }
    };

    let mut lines = BufReader::new(input).lines();
    let mut stdout = tokio::io::stdout();
    let mut tasks: JoinSet<JobOutput> = JoinSet::new();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("Failed to read job input")? {
                    Some(line) if !line.trim().is_empty() => {
                        let sandbox = Arc::clone(&sandbox);
                        tasks.spawn(async move { handle_line(&sandbox, &line).await });
                    }
                    Some(_) => {}
                    None => input_open = false,
                }
            }
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                match joined {
                    Ok(output) => write_output(&mut stdout, &output).await?,
                    Err(e) => error!("Job task failed: {}", e),
                }
            }
            else => break,
        }
    }

    info!("Input closed, all jobs finished");
    Ok(())
}

async fn write_output(stdout: &mut tokio::io::Stdout, output: &JobOutput) -> Result<()> {
    let mut line = serde_json::to_string(output).context("Failed to serialize job result")?;
    line.push('\n');
    stdout
        .write_all(line.as_bytes())
        .await
        .context("Failed to write job result")?;
    stdout.flush().await.context("Failed to flush stdout")?;
    Ok(())
}
