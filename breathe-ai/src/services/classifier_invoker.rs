//! Classifier invoker
//!
//! Runs the external breath-sound classifier as a child process with the
//! stored artifact's absolute path as its only positional argument.
//!
//! Guarantees:
//! - A hard wall-clock timeout; on expiry the process (and on unix its whole
//!   process group) is killed and reaped before `ClassifierTimeout` returns.
//! - Caller cancellation kills the process immediately. Dropping the future
//!   kills it too (process-group guard + `kill_on_drop`).
//! - stdout/stderr capture is capped; excess output is drained and discarded
//!   so the child never stalls on a full pipe.
//! - The exit status decides completion. Helpers still holding the pipes
//!   after the classifier exits are killed once a short drain grace expires.
//! - At most `max_concurrent` classifier processes run at once; further
//!   invocations wait for a permit.

use crate::config::ClassifierConfig;
use crate::models::{RawClassifierOutput, StoredRef};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on waiting for a killed process to be reaped
const KILL_GRACE: Duration = Duration::from_secs(2);

/// How long output pipes may stay open after the classifier exits
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Read buffer size for output capture
const CAPTURE_CHUNK: usize = 8192;

/// Classifier invocation errors
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Process exceeded its wall-clock limit and was killed
    #[error("Classifier timed out after {} ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    /// Process exited unsuccessfully
    #[error("Classifier exited with {}: {stderr}", describe_exit(.exit_code))]
    Failure {
        exit_code: Option<i32>,
        stderr: String,
    },

    /// Process could not be started
    #[error("Failed to launch classifier: {0}")]
    Spawn(std::io::Error),

    /// Caller cancelled the request
    #[error("Classifier invocation cancelled")]
    Cancelled,

    /// Reading process output failed
    #[error("Classifier I/O error: {0}")]
    Io(std::io::Error),
}

impl ClassifierError {
    /// Stable error kind reported to clients
    pub fn kind(&self) -> &'static str {
        match self {
            ClassifierError::Timeout { .. } => "ClassifierTimeout",
            ClassifierError::Failure { .. } | ClassifierError::Io(_) => "ClassifierFailure",
            ClassifierError::Spawn(_) => "ClassifierSpawnError",
            ClassifierError::Cancelled => "Cancelled",
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "termination by signal".to_string(),
    }
}

/// Launches classifier processes under a concurrency limit
#[derive(Debug, Clone)]
pub struct ClassifierInvoker {
    command: Vec<String>,
    default_timeout: Duration,
    max_output_bytes: usize,
    permits: Arc<Semaphore>,
}

enum Completion {
    Exited(ExitStatus),
    Failed(std::io::Error),
    TimedOut,
    Cancelled,
}

/// Output captured from one pipe
#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

impl ClassifierInvoker {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            command: config.command.clone(),
            default_timeout: config.timeout(),
            max_output_bytes: config.max_output_bytes,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        }
    }

    /// Configured per-invocation timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Permits not currently held by a running invocation
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run the classifier against one stored artifact
    pub async fn run(
        &self,
        stored: &StoredRef,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RawClassifierOutput, ClassifierError> {
        let (program, leading_args) = self.command.split_first().ok_or_else(|| {
            ClassifierError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "classifier command is empty",
            ))
        })?;

        // Queue for a slot; waiting is cancellable but not part of the timeout
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClassifierError::Cancelled),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| ClassifierError::Cancelled)?
            }
        };

        let mut command = Command::new(program);
        command
            .args(leading_args)
            .arg(stored.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(ClassifierError::Spawn)?;
        let mut guard = ProcessGroupGuard::new(&child);

        debug!(
            pid = ?child.id(),
            artifact = %stored.path().display(),
            timeout_ms = timeout.as_millis() as u64,
            "Classifier started"
        );

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let cap = self.max_output_bytes;
        let mut out = Capture::default();
        let mut err = Capture::default();

        let completion = {
            let drain = async {
                tokio::try_join!(
                    capture_bounded(stdout.as_mut(), cap, &mut out),
                    capture_bounded(stderr.as_mut(), cap, &mut err),
                )
            };
            tokio::pin!(drain);
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);

            let mut drained = false;
            let completion = loop {
                tokio::select! {
                    result = &mut drain, if !drained => match result {
                        Ok(_) => drained = true,
                        Err(e) => break Completion::Failed(e),
                    },
                    status = child.wait() => match status {
                        Ok(status) => break Completion::Exited(status),
                        Err(e) => break Completion::Failed(e),
                    },
                    _ = &mut deadline => break Completion::TimedOut,
                    _ = cancel.cancelled() => break Completion::Cancelled,
                }
            };

            match completion {
                // Helpers that inherited the pipes can hold them open after the exit
                Completion::Exited(status) if !drained => {
                    match tokio::time::timeout(EXIT_DRAIN_GRACE, &mut drain).await {
                        Ok(Ok(_)) => Completion::Exited(status),
                        Ok(Err(e)) => Completion::Failed(e),
                        Err(_) => {
                            debug!("Classifier exited with output pipes still open; killing its group");
                            guard.kill_group();
                            Completion::Exited(status)
                        }
                    }
                }
                other => other,
            }
        };

        match completion {
            Completion::Exited(status) => {
                guard.disarm();
                let output = RawClassifierOutput {
                    exit_code: status.code(),
                    stdout: out.bytes,
                    stderr: err.bytes,
                    stdout_truncated: out.truncated,
                    stderr_truncated: err.truncated,
                    duration: started.elapsed(),
                };

                if !output.success() {
                    warn!(
                        exit_code = ?output.exit_code,
                        duration_ms = output.duration.as_millis() as u64,
                        "Classifier reported failure"
                    );
                    return Err(ClassifierError::Failure {
                        exit_code: output.exit_code,
                        stderr: output.stderr_text(),
                    });
                }

                info!(
                    duration_ms = output.duration.as_millis() as u64,
                    stdout_bytes = output.stdout.len(),
                    stdout_truncated = output.stdout_truncated,
                    "Classifier finished"
                );
                Ok(output)
            }
            Completion::Failed(e) => {
                terminate(&mut child, &mut guard).await;
                Err(ClassifierError::Io(e))
            }
            Completion::TimedOut => {
                terminate(&mut child, &mut guard).await;
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    artifact = %stored.path().display(),
                    "Classifier timed out and was killed"
                );
                Err(ClassifierError::Timeout { timeout })
            }
            Completion::Cancelled => {
                terminate(&mut child, &mut guard).await;
                info!(artifact = %stored.path().display(), "Classifier cancelled and killed");
                Err(ClassifierError::Cancelled)
            }
        }
    }
}

/// Kill the child (and its process group) and reap it within `KILL_GRACE`
async fn terminate(child: &mut Child, guard: &mut ProcessGroupGuard) {
    guard.kill_group();
    guard.disarm();
    if let Err(e) = child.start_kill() {
        // Already exited; nothing left to kill
        debug!("start_kill after exit: {}", e);
    }
    if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_err() {
        warn!(pid = ?child.id(), "Killed classifier was not reaped within grace period");
    }
}

/// Capture up to `cap` bytes into `sink`, draining and discarding the rest
///
/// Writes into `sink` as it reads, so a partial capture survives the
/// future being dropped.
async fn capture_bounded<R>(reader: Option<&mut R>, cap: usize, sink: &mut Capture) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(());
    };

    let mut buf = vec![0u8; CAPTURE_CHUNK];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let room = cap.saturating_sub(sink.bytes.len());
        sink.bytes.extend_from_slice(&buf[..n.min(room)]);
        if n > room {
            sink.truncated = true;
        }
    }
}

/// Kills the classifier's process group if the invocation is abandoned
///
/// The child is its own group leader, so this also reaches any helper
/// processes it started.
struct ProcessGroupGuard {
    #[cfg_attr(not(unix), allow(dead_code))]
    pgid: Option<i32>,
    armed: bool,
}

impl ProcessGroupGuard {
    fn new(child: &Child) -> Self {
        Self {
            pgid: child.id().map(|pid| pid as i32),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    fn kill_group(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // SAFETY: kill(2) with a negative pid signals the process group; no memory is shared
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if self.armed {
            self.kill_group();
        }
    }
}
