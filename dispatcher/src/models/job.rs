//! A build job is one supervised run of the build script for an accepted push.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier (random v4 UUID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Rejected,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Rejected
        )
    }

    /// Whether the lifecycle permits moving from `self` to `next`.
    ///
    /// `Queued -> Failed` covers jobs that never got a process
    /// (missing script, spawn failure).
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Queued, JobState::Failed)
                | (JobState::Queued, JobState::Rejected)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job ended in [`JobState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Process exited with a non-zero code.
    ExitCode,
    /// Process outlived the build timeout and was killed.
    Timeout,
    /// Process could not be started.
    SpawnError,
    /// Build script missing or not executable.
    ScriptNotFound,
    /// Execution unit went away before the job finished.
    Aborted,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ExitCode => "exit_code",
            FailureReason::Timeout => "timeout",
            FailureReason::SpawnError => "spawn_error",
            FailureReason::ScriptNotFound => "script_not_found",
            FailureReason::Aborted => "aborted",
        }
    }
}

/// Why a job ended in [`JobState::Rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Overloaded,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Overloaded => "overloaded",
        }
    }
}

/// One entry of a job's lifecycle history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: JobState,
    pub at: DateTime<Utc>,
}

/// A dispatched build and everything recorded about it.
///
/// Owned by the supervisor; everything outside it only sees clones.
#[derive(Debug, Clone, Serialize)]
pub struct BuildJob {
    pub id: JobId,
    pub repository: String,
    pub branch: String,
    /// Resolved executable, set once the invocation is built.
    pub command: Option<PathBuf>,
    pub args: Vec<String>,
    pub state: JobState,
    pub failure: Option<FailureReason>,
    pub rejection: Option<RejectReason>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub pid: Option<u32>,
    pub stdout: String,
    pub stderr: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub transitions: Vec<Transition>,
}

impl BuildJob {
    /// A fresh job in [`JobState::Queued`].
    pub fn queued(repository: &str, branch: &str) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            repository: repository.to_string(),
            branch: branch.to_string(),
            command: None,
            args: Vec::new(),
            state: JobState::Queued,
            failure: None,
            rejection: None,
            error: None,
            exit_code: None,
            pid: None,
            stdout: String::new(),
            stderr: String::new(),
            created_at: now,
            started_at: None,
            ended_at: None,
            transitions: vec![Transition {
                state: JobState::Queued,
                at: now,
            }],
        }
    }

    /// Wall time from start (or creation, if it never ran) to end.
    pub fn duration_ms(&self) -> Option<i64> {
        let end = self.ended_at?;
        let start = self.started_at.unwrap_or(self.created_at);
        Some((end - start).num_milliseconds().max(0))
    }

    /// Failure or rejection reason, whichever applies.
    pub fn reason(&self) -> Option<&'static str> {
        self.failure
            .map(|f| f.as_str())
            .or_else(|| self.rejection.map(|r| r.as_str()))
    }
}
