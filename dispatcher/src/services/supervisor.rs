//! Dispatch supervisor — owns every build job from acceptance to its
//! terminal state.
//!
//! `submit` decides synchronously (run now, queue, or reject) and returns a
//! snapshot; execution happens on a spawned task per job. Concurrency is
//! bounded per repository and globally. The slot taken at acceptance is
//! released exactly once, by [`SlotGuard`]'s `Drop`, whatever way the
//! execution task ends.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::config::{CommandConfig, DispatchPolicy, OverflowPolicy};
use crate::events::job::{self as job_events, JobEvent};
use crate::models::job::{BuildJob, FailureReason, JobId, RejectReason};
use crate::models::push_event::PushEvent;
use crate::services::command_builder;
use crate::services::executor::{self, Execution, ExitOutcome};

/// Per-repository concurrency tracker.
#[derive(Debug, Clone, Default)]
pub struct RepositoryDispatchState {
    pub active_count: usize,
    pub last_dispatched_at: Option<DateTime<Utc>>,
    queue: VecDeque<Pending>,
}

impl RepositoryDispatchState {
    /// Jobs waiting for a slot.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

#[derive(Debug, Clone)]
struct Pending {
    id: JobId,
    event: PushEvent,
}

#[derive(Debug, Default)]
struct DispatchTable {
    repos: HashMap<String, RepositoryDispatchState>,
    /// Jobs holding a slot, across all repositories.
    active: usize,
    jobs: HashMap<JobId, BuildJob>,
    /// Terminal jobs, oldest first, for history pruning.
    finished: VecDeque<JobId>,
}

impl DispatchTable {
    fn finish(&mut self, id: JobId, history_limit: usize) {
        self.finished.push_back(id);
        while self.finished.len() > history_limit {
            if let Some(old) = self.finished.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }

    /// Forget the longest-idle repositories beyond `keep`. Repositories with
    /// a running or queued job are never dropped.
    fn prune_idle(&mut self, keep: usize) {
        if self.repos.len() <= keep {
            return;
        }
        let mut idle: Vec<(Option<DateTime<Utc>>, String)> = self
            .repos
            .iter()
            .filter(|(_, repo)| repo.active_count == 0 && repo.queue.is_empty())
            .map(|(name, repo)| (repo.last_dispatched_at, name.clone()))
            .collect();
        if idle.len() <= keep {
            return;
        }
        idle.sort();
        let excess = idle.len() - keep;
        for (_, name) in idle.into_iter().take(excess) {
            self.repos.remove(&name);
        }
    }

    /// Take slots for queued jobs while the limits allow, oldest first.
    fn promote(&mut self, policy: &DispatchPolicy) -> Vec<Pending> {
        let mut promoted = Vec::new();
        while self.active < policy.global_limit {
            let next = self
                .repos
                .iter()
                .filter(|(_, repo)| repo.active_count < policy.repo_limit)
                .filter_map(|(name, repo)| {
                    let head = repo.queue.front()?;
                    let created = self.jobs.get(&head.id).map(|j| j.created_at);
                    Some((created, name.clone()))
                })
                .min();
            let Some((_, name)) = next else {
                break;
            };
            let Some(repo) = self.repos.get_mut(&name) else {
                break;
            };
            let Some(pending) = repo.queue.pop_front() else {
                break;
            };
            repo.active_count += 1;
            repo.last_dispatched_at = Some(Utc::now());
            self.active += 1;
            promoted.push(pending);
        }
        promoted
    }
}

struct Inner {
    policy: DispatchPolicy,
    command: CommandConfig,
    table: Mutex<DispatchTable>,
    changed: Notify,
}

/// Handle to the dispatch supervisor. Cheap to clone.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(policy: DispatchPolicy, command: CommandConfig) -> Self {
        tracing::info!(
            repo_limit = policy.repo_limit,
            global_limit = policy.global_limit,
            overflow = ?policy.overflow,
            timeout_secs = policy.build_timeout.as_secs(),
            script = %command.script_path.display(),
            "Dispatch supervisor started"
        );
        Self {
            inner: Arc::new(Inner {
                policy,
                command,
                table: Mutex::new(DispatchTable::default()),
                changed: Notify::new(),
            }),
        }
    }

    /// Accept `event` and return the job's state at acceptance.
    ///
    /// The returned job is `Queued` (running soon or waiting in the
    /// repository queue) or `Rejected` with [`RejectReason::Overloaded`].
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, event: PushEvent) -> BuildJob {
        let policy = &self.inner.policy;
        let mut job = BuildJob::queued(event.repository_name(), event.branch());
        let id = job.id;
        let mut records = vec![job.clone()];

        let (accepted, active) = {
            let mut guard = self.inner.lock();
            let table = &mut *guard;
            let global_free = table.active < policy.global_limit;
            let repo = table
                .repos
                .entry(event.repository_name().to_string())
                .or_default();

            let accepted = if global_free && repo.active_count < policy.repo_limit {
                repo.active_count += 1;
                repo.last_dispatched_at = Some(job.created_at);
                table.active += 1;
                true
            } else {
                match policy.overflow {
                    OverflowPolicy::Queue { capacity } if repo.queue.len() < capacity => {
                        repo.queue.push_back(Pending {
                            id,
                            event: event.clone(),
                        });
                    }
                    _ => {
                        let rejected = JobEvent::Rejected {
                            reason: RejectReason::Overloaded,
                        };
                        if let Err(e) = job.apply(rejected, Utc::now()) {
                            tracing::error!(job_id = %id, "{e}");
                        }
                        records.push(job.clone());
                    }
                }
                false
            };

            table.jobs.insert(id, job.clone());
            if job.state.is_terminal() {
                table.finish(id, policy.history_limit);
                table.prune_idle(policy.history_limit);
            }
            (accepted, table.active)
        };

        crate::metrics::active_jobs(active);
        for record in &records {
            job_events::record(record);
        }
        if accepted {
            self.start(Pending { id, event });
        }
        self.inner.changed.notify_waiters();
        job
    }

    /// Snapshot of a job, if it is active or still in history.
    pub fn job(&self, id: JobId) -> Option<BuildJob> {
        self.inner.lock().jobs.get(&id).cloned()
    }

    /// Most recently created jobs first.
    pub fn recent_jobs(&self, limit: usize) -> Vec<BuildJob> {
        let table = self.inner.lock();
        let mut newest: Vec<&BuildJob> = table.jobs.values().collect();
        newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        newest.into_iter().take(limit).cloned().collect()
    }

    /// Number of jobs currently holding a slot.
    pub fn active_jobs(&self) -> usize {
        self.inner.lock().active
    }

    pub fn repository_state(&self, repository: &str) -> Option<RepositoryDispatchState> {
        self.inner.lock().repos.get(repository).cloned()
    }

    /// Number of repositories with dispatch state held in memory.
    pub fn tracked_repositories(&self) -> usize {
        self.inner.lock().repos.len()
    }

    /// Wait until job `id` is terminal. `None` if the job is unknown.
    pub async fn wait_for(&self, id: JobId) -> Option<BuildJob> {
        loop {
            let notified = self.inner.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let job = self.job(id)?;
            if job.state.is_terminal() {
                return Some(job);
            }
            notified.await;
        }
    }

    fn start(&self, pending: Pending) {
        let slot = SlotGuard {
            inner: self.inner.clone(),
            id: pending.id,
            repository: pending.event.repository_name().to_string(),
        };
        tokio::spawn(self.inner.clone().execute(pending, slot));
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, DispatchTable> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `event` to job `id` and log the result if the state changed.
    fn transition(&self, id: JobId, event: JobEvent) {
        let changes_state = !matches!(event, JobEvent::InvocationBuilt { .. });
        let snapshot = {
            let mut table = self.lock();
            let Some(job) = table.jobs.get_mut(&id) else {
                tracing::error!(job_id = %id, "transition for unknown job");
                return;
            };
            if let Err(e) = job.apply(event, Utc::now()) {
                tracing::error!(job_id = %id, "{e}");
                return;
            }
            let snapshot = job.clone();
            if snapshot.state.is_terminal() {
                table.finish(id, self.policy.history_limit);
            }
            snapshot
        };
        if changes_state {
            job_events::record(&snapshot);
            self.changed.notify_waiters();
        }
    }

    /// Execution unit for one accepted job. Holds `_slot` until it returns.
    async fn execute(self: Arc<Self>, pending: Pending, _slot: SlotGuard) {
        let Pending { id, event } = pending;

        let invocation = match command_builder::build(&event, &self.command) {
            Ok(invocation) => invocation,
            Err(e) => {
                self.transition(
                    id,
                    JobEvent::Failed {
                        reason: FailureReason::ScriptNotFound,
                        exit_code: None,
                        error: Some(e.to_string()),
                        output: None,
                    },
                );
                return;
            }
        };
        self.transition(
            id,
            JobEvent::InvocationBuilt {
                command: invocation.program.clone(),
                args: invocation.args.clone(),
            },
        );

        let result = executor::run(
            &invocation,
            id,
            self.policy.build_timeout,
            self.policy.output_limit,
            |pid| self.transition(id, JobEvent::Started { pid }),
        )
        .await;

        let terminal = match result {
            Err(e) => JobEvent::Failed {
                reason: FailureReason::SpawnError,
                exit_code: None,
                error: Some(e.to_string()),
                output: None,
            },
            Ok(Execution {
                outcome: ExitOutcome::Exited(0),
                output,
            }) => JobEvent::Succeeded { output },
            Ok(Execution {
                outcome: ExitOutcome::Exited(code),
                output,
            }) => JobEvent::Failed {
                reason: FailureReason::ExitCode,
                exit_code: Some(code),
                error: None,
                output: Some(output),
            },
            Ok(Execution {
                outcome: ExitOutcome::TimedOut,
                output,
            }) => JobEvent::Failed {
                reason: FailureReason::Timeout,
                exit_code: None,
                error: Some(format!(
                    "timed out after {}s",
                    self.policy.build_timeout.as_secs_f64()
                )),
                output: Some(output),
            },
            Ok(Execution {
                outcome: ExitOutcome::WaitFailed(e),
                output,
            }) => JobEvent::Failed {
                reason: FailureReason::Aborted,
                exit_code: None,
                error: Some(e),
                output: Some(output),
            },
        };
        self.transition(id, terminal);
    }
}

/// A taken concurrency slot. Dropping it releases the slot, fails the job
/// if it never reached a terminal state, and starts promoted queued jobs.
struct SlotGuard {
    inner: Arc<Inner>,
    id: JobId,
    repository: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let unfinished = self
            .inner
            .lock()
            .jobs
            .get(&self.id)
            .is_some_and(|job| !job.state.is_terminal());
        if unfinished {
            self.inner.transition(
                self.id,
                JobEvent::Failed {
                    reason: FailureReason::Aborted,
                    exit_code: None,
                    error: Some("execution ended before the job finished".to_string()),
                    output: None,
                },
            );
        }

        let (promoted, active) = {
            let mut table = self.inner.lock();
            if let Some(repo) = table.repos.get_mut(&self.repository) {
                repo.active_count = repo.active_count.saturating_sub(1);
            }
            table.active = table.active.saturating_sub(1);
            let promoted = table.promote(&self.inner.policy);
            table.prune_idle(self.inner.policy.history_limit);
            (promoted, table.active)
        };
        crate::metrics::active_jobs(active);

        if promoted.is_empty() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!(
                count = promoted.len(),
                "No runtime available, queued jobs will not start"
            );
            return;
        }
        let supervisor = Supervisor {
            inner: self.inner.clone(),
        };
        for pending in promoted {
            supervisor.start(pending);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use super::*;
    use crate::models::job::JobState;
    use crate::models::push_event::RefKind;
    use crate::services::command_builder::test_support::write_script;

    fn event(repository: &str, branch: &str) -> PushEvent {
        PushEvent::new(
            repository.to_string(),
            format!("git@host:{repository}.git"),
            format!("refs/heads/{branch}"),
            branch.to_string(),
            RefKind::Branch,
        )
    }

    fn supervisor(script: &Path, policy: DispatchPolicy) -> Supervisor {
        Supervisor::new(policy, CommandConfig::new(script))
    }

    async fn wait(sup: &Supervisor, id: JobId) -> BuildJob {
        tokio::time::timeout(Duration::from_secs(20), sup.wait_for(id))
            .await
            .expect("job did not finish in time")
            .expect("job known")
    }

    fn running(sup: &Supervisor) -> usize {
        sup.recent_jobs(usize::MAX)
            .iter()
            .filter(|j| j.state == JobState::Running)
            .count()
    }

    #[tokio::test]
    async fn successful_build_goes_queued_running_succeeded() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "echo \"building $2\"\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let job = sup.submit(event("app", "main"));
        assert_eq!(job.state, JobState::Queued);

        let done = wait(&sup, job.id).await;
        assert_eq!(done.state, JobState::Succeeded);
        assert_eq!(done.exit_code, Some(0));
        assert_eq!(done.stdout, "building main\n");
        assert_eq!(done.command.as_deref(), Some(script.as_path()));
        assert_eq!(done.args, vec!["git@host:app.git", "main"]);
        let states: Vec<_> = done.transitions.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![JobState::Queued, JobState::Running, JobState::Succeeded]
        );
        assert!(done.duration_ms().is_some());
    }

    #[tokio::test]
    async fn non_zero_exit_fails_with_code_and_frees_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 7\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let done = wait(&sup, sup.submit(event("app", "main")).id).await;
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure, Some(FailureReason::ExitCode));
        assert_eq!(done.exit_code, Some(7));
        assert_eq!(done.stderr, "boom\n");

        let repo = sup.repository_state("app").unwrap();
        assert_eq!(repo.active_count, 0);
        assert!(repo.last_dispatched_at.is_some());
        assert_eq!(sup.active_jobs(), 0);

        let again = sup.submit(event("app", "main"));
        assert_eq!(again.state, JobState::Queued);
        wait(&sup, again.id).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_pushes_to_one_repository_run_one_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 1\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let mut handles = Vec::new();
        for i in 0..6 {
            let sup = sup.clone();
            handles.push(tokio::spawn(async move {
                sup.submit(event("app", &format!("b{i}")))
            }));
        }
        let mut jobs = Vec::new();
        for handle in handles {
            jobs.push(handle.await.unwrap());
        }

        let accepted: Vec<_> = jobs.iter().filter(|j| j.state == JobState::Queued).collect();
        let rejected: Vec<_> = jobs
            .iter()
            .filter(|j| j.state == JobState::Rejected)
            .collect();
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected.len(), 5);
        assert!(rejected
            .iter()
            .all(|j| j.rejection == Some(RejectReason::Overloaded)));

        let id = accepted[0].id;
        while !sup.job(id).unwrap().state.is_terminal() {
            assert!(running(&sup) <= 1);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(wait(&sup, id).await.state, JobState::Succeeded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn queue_policy_runs_pushes_in_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.2\n");
        let policy = DispatchPolicy {
            overflow: OverflowPolicy::Queue { capacity: 8 },
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let ids: Vec<JobId> = (0..4)
            .map(|i| sup.submit(event("app", &format!("b{i}"))).id)
            .collect();
        assert_eq!(sup.repository_state("app").unwrap().queued(), 3);

        let mut finished = Vec::new();
        for id in &ids {
            loop {
                assert!(running(&sup) <= 1);
                let job = sup.job(*id).unwrap();
                if job.state.is_terminal() {
                    finished.push(job);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }

        assert!(finished.iter().all(|j| j.state == JobState::Succeeded));
        for pair in finished.windows(2) {
            assert!(pair[0].ended_at.unwrap() <= pair[1].started_at.unwrap());
        }
        // The last slot is released just after its job turns terminal.
        tokio::time::timeout(Duration::from_secs(5), async {
            while sup.active_jobs() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("slots released");
    }

    #[tokio::test]
    async fn full_queue_rejects() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.5\n");
        let policy = DispatchPolicy {
            overflow: OverflowPolicy::Queue { capacity: 1 },
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let first = sup.submit(event("app", "a"));
        let second = sup.submit(event("app", "b"));
        let third = sup.submit(event("app", "c"));
        assert_eq!(first.state, JobState::Queued);
        assert_eq!(second.state, JobState::Queued);
        assert_eq!(third.state, JobState::Rejected);

        assert_eq!(wait(&sup, second.id).await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn global_limit_spans_repositories() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.5\n");
        let policy = DispatchPolicy {
            global_limit: 1,
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let a = sup.submit(event("app", "main"));
        let b = sup.submit(event("api", "main"));
        assert_eq!(a.state, JobState::Queued);
        assert_eq!(b.state, JobState::Rejected);
        wait(&sup, a.id).await;
    }

    #[tokio::test]
    async fn different_repositories_run_side_by_side() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.5\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let a = sup.submit(event("app", "main"));
        let b = sup.submit(event("api", "main"));
        assert_eq!(a.state, JobState::Queued);
        assert_eq!(b.state, JobState::Queued);
        assert_eq!(sup.active_jobs(), 2);
        assert_eq!(wait(&sup, a.id).await.state, JobState::Succeeded);
        assert_eq!(wait(&sup, b.id).await.state, JobState::Succeeded);
    }

    #[tokio::test]
    async fn queued_job_waiting_on_global_limit_starts_when_another_repo_finishes() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.2\n");
        let policy = DispatchPolicy {
            global_limit: 1,
            overflow: OverflowPolicy::Queue { capacity: 4 },
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let a = sup.submit(event("app", "main"));
        let b = sup.submit(event("api", "main"));
        assert_eq!(sup.repository_state("api").unwrap().queued(), 1);

        assert_eq!(wait(&sup, a.id).await.state, JobState::Succeeded);
        assert_eq!(wait(&sup, b.id).await.state, JobState::Succeeded);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timeout_fails_the_job_and_kills_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "hang.sh", "exec sleep 30\n");
        let policy = DispatchPolicy {
            build_timeout: Duration::from_millis(300),
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let done = wait(&sup, sup.submit(event("app", "main")).id).await;
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure, Some(FailureReason::Timeout));

        let pid = done.pid.expect("pid recorded");
        let alive = unsafe { libc::kill(pid as libc::pid_t, 0) } == 0;
        assert!(!alive, "process {pid} still resident");
        assert_eq!(sup.repository_state("app").unwrap().active_count, 0);
    }

    #[tokio::test]
    async fn missing_script_fails_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir.path().join("missing.sh"), DispatchPolicy::default());

        let done = wait(&sup, sup.submit(event("app", "main")).id).await;
        assert_eq!(done.state, JobState::Failed);
        assert_eq!(done.failure, Some(FailureReason::ScriptNotFound));
        assert!(done.started_at.is_none());
        assert!(done.pid.is_none());
        assert_eq!(sup.active_jobs(), 0);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let policy = DispatchPolicy {
            history_limit: 2,
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let id = sup.submit(event("app", "main")).id;
            wait(&sup, id).await;
            ids.push(id);
        }
        assert!(sup.job(ids[0]).is_none());
        assert!(sup.job(ids[1]).is_some());
        assert!(sup.job(ids[2]).is_some());
        assert_eq!(sup.recent_jobs(10).len(), 2);
        assert_eq!(sup.recent_jobs(10)[0].id, ids[2]);
    }

    #[tokio::test]
    async fn idle_repositories_are_forgotten_beyond_the_history_limit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let policy = DispatchPolicy {
            global_limit: 1,
            history_limit: 10,
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let mut accepted = Vec::new();
        for i in 0..500 {
            let job = sup.submit(event(&format!("r{i}"), "main"));
            if job.state == JobState::Queued {
                accepted.push(job.id);
            }
            assert!(sup.tracked_repositories() <= 11);
        }
        for id in accepted {
            wait(&sup, id).await;
        }
        while sup.active_jobs() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sup.tracked_repositories() <= 10);
    }

    #[tokio::test]
    async fn busy_repositories_survive_pruning() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "sleep 0.5\n");
        let policy = DispatchPolicy {
            global_limit: 1,
            history_limit: 1,
            ..DispatchPolicy::default()
        };
        let sup = supervisor(&script, policy);

        let busy = sup.submit(event("busy", "main"));
        for i in 0..5 {
            sup.submit(event(&format!("r{i}"), "main"));
        }
        let state = sup.repository_state("busy").expect("busy repository kept");
        assert_eq!(state.active_count, 1);
        wait(&sup, busy.id).await;
    }

    #[tokio::test]
    async fn recent_jobs_returns_newest_first_up_to_limit() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let mut ids = Vec::new();
        for i in 0..4 {
            let id = sup.submit(event(&format!("r{i}"), "main")).id;
            wait(&sup, id).await;
            ids.push(id);
        }
        let recent: Vec<JobId> = sup.recent_jobs(2).iter().map(|j| j.id).collect();
        assert_eq!(recent, vec![ids[3], ids[2]]);
    }

    #[tokio::test]
    async fn lifecycle_is_written_to_the_job_log_in_order() {
        let (logs, _guard) = job_events::test_support::capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.sh", "exit 0\n");
        let sup = supervisor(&script, DispatchPolicy::default());

        let job = sup.submit(event("app", "main"));
        wait(&sup, job.id).await;

        let id = job.id.to_string();
        let records: Vec<_> = logs
            .records(job_events::LOG_TARGET)
            .into_iter()
            .filter(|r| r["fields"]["job_id"] == id.as_str())
            .collect();
        let states: Vec<&str> = records
            .iter()
            .filter_map(|r| r["fields"]["state"].as_str())
            .collect();
        assert_eq!(states, vec!["queued", "running", "succeeded"]);
        assert!(records.iter().all(|r| r["level"] == "INFO"));
        assert!(records.iter().all(|r| r["fields"]["repository"] == "app"));
        assert!(records.iter().all(|r| r["fields"]["branch"] == "main"));
        assert_eq!(records[2]["fields"]["exit_code"], 0);
        assert!(records[2]["fields"]["duration_ms"].is_i64());
    }
}
