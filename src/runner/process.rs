//! Process runner implementation
//!
//! Executes external tools directly (argument vector, no shell), collecting
//! stdout/stderr in memory and enforcing a wall-clock timeout.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CommandSpec, RunOutcome, RunStatus, Runner, NO_EXIT_CODE};

/// How long to wait for a killed process to be reaped
const KILL_GRACE: Duration = Duration::from_secs(2);
/// How long to wait for the output readers once the process is gone
const IO_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const READ_CHUNK_SIZE: usize = 8192;

/// Runner that executes programs as direct child processes
pub struct ProcessRunner {
    /// Timeout used when a `CommandSpec` does not carry one
    default_timeout: Duration,
    /// Per-stream cap on captured output
    max_output_bytes: usize,
}

impl ProcessRunner {
    pub fn new(default_timeout: Duration, max_output_bytes: usize) -> Self {
        Self {
            default_timeout,
            max_output_bytes,
        }
    }

    /// Run a program, returning partial output if it has to be killed
    pub async fn execute(&self, spec: &CommandSpec) -> Result<RunOutcome> {
        let timeout = spec.timeout.unwrap_or(self.default_timeout);

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.work_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            // Own process group so grandchildren die with the timeout kill
            cmd.process_group(0);
            if let Some(arg0) = &spec.arg0 {
                cmd.arg0(arg0);
            }
        }

        debug!("Running {:?} with timeout {:?}", spec.to_vec(), timeout);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!("Failed to spawn {}: {}", spec.program, e);
                return Ok(RunOutcome::spawn_failed(format!(
                    "Failed to start {}: {}",
                    spec.program, e
                )));
            }
        };

        // Gone once the child is reaped, so keep it for the group kill
        let pid = child.id();

        let stdout_pipe = child
            .stdout
            .take()
            .context("stdout pipe was unexpectedly not available")?;
        let stderr_pipe = child
            .stderr
            .take()
            .context("stderr pipe was unexpectedly not available")?;

        let stdout_capture = SharedCapture::default();
        let stderr_capture = SharedCapture::default();
        let mut readers = [
            spawn_reader(stdout_pipe, stdout_capture.clone(), self.max_output_bytes),
            spawn_reader(stderr_pipe, stderr_capture.clone(), self.max_output_bytes),
        ];

        // Without input the pipe stays open until the process is gone, so a
        // program reading stdin blocks instead of seeing EOF.
        let stdin_pipe = child.stdin.take();
        let held_stdin = match &spec.stdin {
            Some(input) => {
                if let Some(pipe) = stdin_pipe {
                    spawn_stdin_writer(pipe, stdin_bytes(input));
                }
                None
            }
            None => stdin_pipe,
        };

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                // Background children the program forked must not outlive it
                kill_process_group(pid);
                let status =
                    status.with_context(|| format!("Failed to wait for {}", spec.program))?;
                exit_status_to_run_status(status)
            }
            Err(_) => {
                warn!(
                    "{} exceeded its {:?} limit, killing process group",
                    spec.program, timeout
                );
                terminate(&mut child, pid).await;
                RunStatus::TimedOut
            }
        };
        drop(held_stdin);

        for reader in readers.iter_mut() {
            if tokio::time::timeout(IO_DRAIN_TIMEOUT, &mut *reader)
                .await
                .is_err()
            {
                // Pipe still held open by something we could not kill
                reader.abort();
            }
        }

        let (stdout, stdout_truncated) = take_capture(&stdout_capture);
        let (stderr, stderr_truncated) = take_capture(&stderr_capture);

        debug!(
            "{} finished: status={:?}, stdout={}B, stderr={}B",
            spec.program,
            status,
            stdout.len(),
            stderr.len()
        );

        Ok(RunOutcome {
            status,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
        })
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), 1024 * 1024)
    }
}

#[async_trait]
impl Runner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<RunOutcome> {
        self.execute(spec).await
    }
}

#[derive(Debug, Default)]
struct Captured {
    bytes: Vec<u8>,
    truncated: bool,
}

type SharedCapture = Arc<Mutex<Captured>>;

/// Accumulate a stream into `sink`, keeping at most `cap` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe.
fn spawn_reader<R>(mut reader: R, sink: SharedCapture, cap: usize) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let mut captured = sink.lock().unwrap_or_else(|p| p.into_inner());
                    let room = cap.saturating_sub(captured.bytes.len());
                    if n > room {
                        captured.truncated = true;
                    }
                    captured.bytes.extend_from_slice(&buf[..n.min(room)]);
                }
                Err(e) => {
                    debug!("Output reader stopped: {}", e);
                    break;
                }
            }
        }
    })
}

fn take_capture(capture: &SharedCapture) -> (String, bool) {
    let mut captured = capture.lock().unwrap_or_else(|p| p.into_inner());
    let bytes = std::mem::take(&mut captured.bytes);
    (String::from_utf8_lossy(&bytes).into_owned(), captured.truncated)
}

/// Interactive C programs expect newline-terminated input
fn stdin_bytes(input: &str) -> Vec<u8> {
    let mut bytes = input.as_bytes().to_vec();
    if !input.ends_with('\n') {
        bytes.push(b'\n');
    }
    bytes
}

fn spawn_stdin_writer(mut pipe: ChildStdin, bytes: Vec<u8>) {
    tokio::spawn(async move {
        // A program that exits without reading gives EPIPE here
        if let Err(e) = pipe.write_all(&bytes).await {
            debug!("stdin write stopped: {}", e);
            return;
        }
        let _ = pipe.shutdown().await;
    });
}

/// SIGKILL the process group led by `pid`, if any member is left
fn kill_process_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => debug!("killpg({}) failed: {}", pid, e),
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the child and its process group, then reap it with a bounded wait
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_process_group(pid);

    if let Err(e) = child.start_kill() {
        debug!("start_kill failed: {}", e);
    }

    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => warn!("Failed to reap killed process: {}", e),
        Err(_) => warn!("Killed process was not reaped within {:?}", KILL_GRACE),
    }
}

fn exit_status_to_run_status(status: ExitStatus) -> RunStatus {
    if let Some(code) = status.code() {
        return RunStatus::Exited(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return RunStatus::Signaled(sig);
        }
    }

    RunStatus::Exited(NO_EXIT_CODE)
}
