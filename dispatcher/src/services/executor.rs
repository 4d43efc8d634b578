//! Build executor — runs one invocation to completion under a timeout.
//!
//! Spawns the process, streams stdout/stderr into bounded buffers, waits
//! for exit, and kills the whole process group when the timeout fires.

use std::time::Duration;

use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::models::job::JobId;
use crate::services::command_builder::Invocation;
use crate::services::output::{self, CapturedOutput};

/// How long to keep reading output after the process is gone.
///
/// Background children that inherited the pipes can hold them open.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_secs(5);

/// How a started process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Exited on its own. Signal deaths report `-1`.
    Exited(i32),
    /// Outlived the timeout and was killed.
    TimedOut,
    /// Waiting on the process failed; it was killed.
    WaitFailed(String),
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub outcome: ExitOutcome,
    pub output: CapturedOutput,
}

/// Run `invocation` for `job_id`.
///
/// `on_start` is called with the child's pid once the process exists.
/// Spawn failures are returned as `Err` and `on_start` is never called.
pub async fn run<F>(
    invocation: &Invocation,
    job_id: JobId,
    timeout: Duration,
    output_limit: usize,
    on_start: F,
) -> std::io::Result<Execution>
where
    F: FnOnce(Option<u32>),
{
    let mut child = invocation.command(job_id).spawn()?;
    let pid = child.id();
    on_start(pid);

    let stdout = output::shared(output_limit);
    let stderr = output::shared(output_limit);
    let stdout_task = tokio::spawn(output::capture(child.stdout.take(), stdout.clone()));
    let stderr_task = tokio::spawn(output::capture(child.stderr.take(), stderr.clone()));

    let outcome = match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => ExitOutcome::Exited(status.code().unwrap_or(-1)),
        Ok(Err(e)) => {
            terminate(&mut child, pid).await;
            ExitOutcome::WaitFailed(e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                job_id = %job_id,
                pid,
                timeout_secs = timeout.as_secs(),
                "Build timed out, killing process group"
            );
            terminate(&mut child, pid).await;
            ExitOutcome::TimedOut
        }
    };

    finish_capture(stdout_task).await;
    finish_capture(stderr_task).await;

    Ok(Execution {
        outcome,
        output: CapturedOutput {
            stdout: output::take(&stdout),
            stderr: output::take(&stderr),
        },
    })
}

/// Kill the process group led by `pid`, then kill and reap the child itself.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        // The child leads its own group (see `Invocation::command`).
        // SAFETY: killpg has no memory-safety preconditions.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(
                pid,
                "killpg failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        tracing::debug!("kill after timeout: {e}");
    }
}

async fn finish_capture(task: JoinHandle<()>) {
    let abort = task.abort_handle();
    if tokio::time::timeout(OUTPUT_DRAIN_GRACE, task).await.is_err() {
        tracing::debug!("output pipe still open after exit, keeping partial output");
        abort.abort();
    }
}
