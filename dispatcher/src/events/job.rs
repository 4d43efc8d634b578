//! Build job events, the transition rules that apply them, and the log sink.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::models::job::{BuildJob, FailureReason, JobState, RejectReason, Transition};
use crate::services::output::CapturedOutput;

/// Tracing target for lifecycle records, so aggregators can filter on it.
pub const LOG_TARGET: &str = "shipiru::jobs";

/// Events that can happen to a build job.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// The invocation was resolved. Does not change state.
    InvocationBuilt { command: PathBuf, args: Vec<String> },
    /// The process was started.
    Started { pid: Option<u32> },
    /// The process exited with code 0.
    Succeeded { output: CapturedOutput },
    /// The job ended without success.
    Failed {
        reason: FailureReason,
        exit_code: Option<i32>,
        error: Option<String>,
        output: Option<CapturedOutput>,
    },
    /// The job was refused without starting a process.
    Rejected { reason: RejectReason },
}

impl JobEvent {
    /// State the job is in after this event, if it changes state.
    fn target_state(&self) -> Option<JobState> {
        match self {
            JobEvent::InvocationBuilt { .. } => None,
            JobEvent::Started { .. } => Some(JobState::Running),
            JobEvent::Succeeded { .. } => Some(JobState::Succeeded),
            JobEvent::Failed { .. } => Some(JobState::Failed),
            JobEvent::Rejected { .. } => Some(JobState::Rejected),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid job transition {from} -> {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

impl BuildJob {
    /// Apply `event` at time `at`, enforcing the lifecycle rules.
    pub fn apply(&mut self, event: JobEvent, at: DateTime<Utc>) -> Result<(), TransitionError> {
        let target = event.target_state();
        if let Some(to) = target {
            if !self.state.can_transition_to(to) {
                return Err(TransitionError {
                    from: self.state,
                    to,
                });
            }
        }

        match event {
            JobEvent::InvocationBuilt { command, args } => {
                self.command = Some(command);
                self.args = args;
            }
            JobEvent::Started { pid } => {
                self.pid = pid;
                self.started_at = Some(at);
            }
            JobEvent::Succeeded { output } => {
                self.exit_code = Some(0);
                self.stdout = output.stdout;
                self.stderr = output.stderr;
                self.ended_at = Some(at);
            }
            JobEvent::Failed {
                reason,
                exit_code,
                error,
                output,
            } => {
                self.failure = Some(reason);
                self.exit_code = exit_code;
                self.error = error;
                if let Some(output) = output {
                    self.stdout = output.stdout;
                    self.stderr = output.stderr;
                }
                self.ended_at = Some(at);
            }
            JobEvent::Rejected { reason } => {
                self.rejection = Some(reason);
                self.ended_at = Some(at);
            }
        }

        if let Some(state) = target {
            self.state = state;
            self.transitions.push(Transition { state, at });
        }
        Ok(())
    }
}

/// Write the job's current state to the lifecycle log.
///
/// Called once per transition, including the initial `Queued`.
pub fn record(job: &BuildJob) {
    crate::metrics::job_state_changed(job.state.as_str());
    if let Some(duration) = job.duration_ms() {
        crate::metrics::job_duration(job.state.as_str(), duration.max(0) as u64);
    }

    let duration_ms = job.duration_ms();
    let reason = job.reason();

    match job.state {
        JobState::Queued | JobState::Running => tracing::info!(
            target: LOG_TARGET,
            job_id = %job.id,
            repository = %job.repository,
            branch = %job.branch,
            state = %job.state,
            pid = job.pid,
            "Job {}",
            job.state
        ),
        JobState::Succeeded => tracing::info!(
            target: LOG_TARGET,
            job_id = %job.id,
            repository = %job.repository,
            branch = %job.branch,
            state = %job.state,
            exit_code = job.exit_code,
            duration_ms,
            "Job succeeded"
        ),
        JobState::Failed if job.failure == Some(FailureReason::ScriptNotFound) => tracing::error!(
            target: LOG_TARGET,
            job_id = %job.id,
            repository = %job.repository,
            branch = %job.branch,
            state = %job.state,
            reason,
            error = job.error.as_deref(),
            duration_ms,
            "Job failed: build script unavailable"
        ),
        JobState::Failed | JobState::Rejected => tracing::warn!(
            target: LOG_TARGET,
            job_id = %job.id,
            repository = %job.repository,
            branch = %job.branch,
            state = %job.state,
            reason,
            exit_code = job.exit_code,
            error = job.error.as_deref(),
            duration_ms,
            "Job {}",
            job.state
        ),
    }
}
