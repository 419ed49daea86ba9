//! Scheduler engine (§4.7): a tick loop over `pynchy_store::StateStore`'s
//! `scheduled_tasks` table, plus a parallel loop over configured
//! `[cron_jobs.*]` host jobs.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono_tz::Tz;
use pynchy_core::types::now as core_now;
use pynchy_store::{HostJob, ScheduledTask, StateStore, TaskRun, TaskStatus};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::error::Result;
use crate::schedule::compute_next_run;
use crate::types::{resolve_timezone, TaskRunOutcome, TaskRunner};

/// Drives the `scheduled_tasks` tick loop (§4.7 steps 1-5) until shutdown
/// is signalled.
pub struct SchedulerEngine {
    store: Arc<StateStore>,
    runner: Arc<dyn TaskRunner>,
    poll_interval: StdDuration,
    tz: Tz,
}

impl SchedulerEngine {
    pub fn new(store: Arc<StateStore>, runner: Arc<dyn TaskRunner>, poll_interval_secs: u64, timezone: &str) -> Self {
        Self {
            store,
            runner,
            poll_interval: StdDuration::from_secs(poll_interval_secs.max(1)),
            tz: resolve_timezone(timezone),
        }
    }

    /// Main loop. Polls every `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_secs = self.poll_interval.as_secs(), "scheduler engine started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One scheduler tick: fetch due tasks, re-check status, run each,
    /// compute the next run, and persist (§4.7 steps 1-5).
    #[instrument(skip(self))]
    async fn tick(&self) -> Result<()> {
        let now = core_now();
        let due = self.store.due_tasks(now)?;
        for task in due {
            if let Err(e) = self.run_one(&task).await {
                error!(task_id = %task.id, error = %e, "failed to run scheduled task");
            }
        }
        Ok(())
    }

    async fn run_one(&self, task: &ScheduledTask) -> Result<()> {
        // Re-check status: it may have been paused between the due_tasks
        // query and now (§4.7 step 2).
        let Some(current) = self.store.get_task(&task.id)? else {
            return Ok(());
        };
        if current.status != TaskStatus::Active {
            return Ok(());
        }

        let started = core_now();
        let outcome = self.runner.run_task(&current).await;
        let finished = core_now();
        let duration_ms = (finished - started).num_milliseconds().max(0);

        let next_run = compute_next_run(current.schedule_type, &current.schedule_value, finished, self.tz)?;
        let status = if next_run.is_some() { TaskStatus::Active } else { TaskStatus::Completed };

        self.store.update_task_after_run(&current.id, next_run, finished, &outcome.result_summary, status)?;
        self.store.append_task_run(&TaskRun {
            task_id: current.id.clone(),
            run_at: started,
            duration_ms,
            status: if outcome.success { "ok".to_string() } else { "error".to_string() },
            result: outcome.success.then(|| outcome.result_summary.clone()),
            error: (!outcome.success).then(|| outcome.result_summary.clone()),
        })?;

        info!(task_id = %current.id, success = outcome.success, next_run = ?next_run, "scheduled task run complete");
        Ok(())
    }
}

/// Drives the host cron job loop (§4.7 "Host cron jobs"): entries are
/// shell subprocesses, never LLM-driven, so they're run directly here
/// rather than through `TaskRunner`.
pub struct HostCronEngine {
    store: Arc<StateStore>,
    poll_interval: StdDuration,
    tz: Tz,
}

impl HostCronEngine {
    pub fn new(store: Arc<StateStore>, poll_interval_secs: u64, timezone: &str) -> Self {
        Self { store, poll_interval: StdDuration::from_secs(poll_interval_secs.max(1)), tz: resolve_timezone(timezone) }
    }

    /// Register (or update) the configured `[cron_jobs.*]` entries in the
    /// store, keyed by their config name. Called once at startup so the
    /// store's `next_run` bookkeeping survives restarts.
    pub fn sync_configured_jobs(&self, jobs: &[HostJob]) -> Result<()> {
        for job in jobs {
            self.store.upsert_host_job(job)?;
        }
        Ok(())
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_secs = self.poll_interval.as_secs(), "host cron engine started");
        let mut interval = tokio::time::interval(self.poll_interval);
        let mut next_run: std::collections::HashMap<String, chrono::DateTime<chrono::Utc>> = std::collections::HashMap::new();
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&mut next_run).await {
                        error!(error = %e, "host cron tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("host cron engine shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, next_run: &mut std::collections::HashMap<String, chrono::DateTime<chrono::Utc>>) -> Result<()> {
        let jobs = self.store.list_host_jobs()?;
        let now = chrono::Utc::now();
        for job in jobs {
            if !job.enabled {
                continue;
            }

            // First sighting of this job: compute its next occurrence from
            // now and wait for it, rather than firing immediately on startup.
            if !next_run.contains_key(&job.id) {
                match crate::schedule::compute_next_run(pynchy_store::ScheduleType::Cron, &job.schedule, now, self.tz) {
                    Ok(Some(nr)) => {
                        next_run.insert(job.id.clone(), nr);
                    }
                    Ok(None) => warn!(job = %job.name, "host cron job's schedule never matches"),
                    Err(e) => error!(job = %job.name, error = %e, "invalid host cron schedule"),
                }
                continue;
            }

            let scheduled = next_run[&job.id];
            if now < scheduled {
                continue;
            }

            match crate::schedule::compute_next_run(pynchy_store::ScheduleType::Cron, &job.schedule, now, self.tz) {
                Ok(Some(nr)) => {
                    next_run.insert(job.id.clone(), nr);
                }
                Ok(None) => {
                    warn!(job = %job.name, "host cron job's schedule never matches, disabling poll");
                    continue;
                }
                Err(e) => {
                    error!(job = %job.name, error = %e, "invalid host cron schedule");
                    continue;
                }
            }
            self.run_job(&job).await;
        }
        Ok(())
    }

    #[instrument(skip(self, job), fields(job = %job.name))]
    async fn run_job(&self, job: &HostJob) {
        let outcome = run_shell_job(job).await;
        info!(success = outcome.success, "host cron job finished");
    }
}

/// Runs one host job as a shell subprocess, enforcing `timeout_seconds`
/// and capturing a truncated tail of stdout/stderr for the summary.
async fn run_shell_job(job: &HostJob) -> TaskRunOutcome {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&job.command);
    if let Some(cwd) = &job.cwd {
        cmd.current_dir(cwd);
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => return TaskRunOutcome::failed(format!("spawn failed: {e}")),
    };

    match tokio::time::timeout(StdDuration::from_secs(job.timeout_seconds), child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let tail = pynchy_session::truncate::truncate_output(&String::from_utf8_lossy(&output.stdout), 2_000);
            if output.status.success() {
                TaskRunOutcome::ok(tail)
            } else {
                let err_tail = pynchy_session::truncate::truncate_output(&String::from_utf8_lossy(&output.stderr), 2_000);
                TaskRunOutcome::failed(format!("exit {:?}: {err_tail}", output.status.code()))
            }
        }
        Ok(Err(e)) => TaskRunOutcome::failed(format!("wait failed: {e}")),
        Err(_) => TaskRunOutcome::failed(format!("timed out after {}s", job.timeout_seconds)),
    }
}
