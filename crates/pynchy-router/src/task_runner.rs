//! Bridges `pynchy-scheduler`'s engine to the router's per-workspace queue
//! and session manager (§4.7 "the scheduler enqueues work through the same
//! per-workspace queue as user messages", §9 "`TaskRunner`").

use std::time::Duration;

use async_trait::async_trait;
use pynchy_core::types::now;
use pynchy_ipc::{ContainerInput, InputMessage};
use pynchy_session::{effective_query_timeout_ms, QueryOutcome};
use pynchy_scheduler::{TaskRunOutcome, TaskRunner};
use pynchy_store::ScheduledTask;
use tracing::warn;

use crate::engine::RouterEngine;

#[async_trait]
impl TaskRunner for RouterEngine {
    /// Runs one scheduled task as a one-shot container (§4.2 "one-shot
    /// containers for scheduled tasks use a timestamped name"), serialized
    /// through the same per-workspace queue a user message would use so a
    /// concurrent inbound message can correctly decide to interrupt it.
    async fn run_task(&self, task: &ScheduledTask) -> TaskRunOutcome {
        let folder = task.group_folder.as_str().to_string();
        let queues = self.queues();
        let mut outcome = TaskRunOutcome::failed("task did not run");

        queues
            .try_run_worker(&folder, || async {
                outcome = self.run_one_shot(task).await;
            })
            .await;
        outcome
    }
}

impl RouterEngine {
    async fn run_one_shot(&self, task: &ScheduledTask) -> TaskRunOutcome {
        let folder = task.group_folder.as_str();
        self.queues().set_active_task(folder, true);

        let Ok(Some(workspace)) = self.store().get_workspace_by_folder(&task.group_folder) else {
            self.queues().set_active_task(folder, false);
            return TaskRunOutcome::failed("workspace not found for scheduled task");
        };
        let ws_cfg = self.config_ref().workspaces.get(folder);
        let mounts = self.mounts_for(&workspace, ws_cfg);
        let invocation_ts = now().timestamp_millis().to_string();
        let mcp_servers = self.mcp_servers_for(folder, &invocation_ts, ws_cfg);
        self.register_invocation(folder, &invocation_ts, workspace.jid.as_str(), workspace.is_admin, ws_cfg);
        let session_id = self.store().get_session_id(&task.group_folder).ok().flatten();

        let input = ContainerInput {
            messages: vec![InputMessage::new(task.prompt.clone())],
            group_folder: folder.to_string(),
            chat_jid: workspace.jid.as_str().to_string(),
            is_admin: workspace.is_admin,
            session_id,
            is_scheduled_task: true,
            system_notices: Vec::new(),
            repo_access: task.repo_access.clone(),
            agent_core: self.config_ref().agent.agent_core.clone(),
            llm_base_url: self.gateway_base_url().to_string(),
            llm_gateway_key: self.gateway_key().to_string(),
            mcp_servers,
        };

        // `0` disables the generic idle timer for one-shot containers — the
        // scheduler's own idle watchdog (`close_stdin`) tears these down.
        let result = match self.sessions_ref().cold_start(input, mounts, true, 0).await {
            Ok(session) => {
                let timeout_ms =
                    effective_query_timeout_ms(self.config_ref().container.timeout_ms, self.config_ref().container.idle_timeout_ms);
                match session.wait_done(Duration::from_millis(timeout_ms)).await {
                    QueryOutcome::Done { new_session_id } => {
                        let _ = self.store().set_session_id(&task.group_folder, &new_session_id);
                        TaskRunOutcome::ok(format!("completed, session {new_session_id}"))
                    }
                    QueryOutcome::CleanShutdown => TaskRunOutcome::ok("completed"),
                    QueryOutcome::Died => TaskRunOutcome::failed("container died before completion"),
                    QueryOutcome::TimedOut => TaskRunOutcome::failed("timed out"),
                }
            }
            Err(e) => {
                warn!(folder, error = %e, "scheduled task cold start failed");
                TaskRunOutcome::failed(format!("cold start failed: {e}"))
            }
        };

        // §4.7 step 4: a successful run of a repo_access task merges the
        // worktree back to main the same way an ended interactive session does.
        if result.success && task.repo_access.is_some() {
            if let Err(e) = self.sync_repo_on_session_end(folder).await {
                warn!(folder, error = %e, "repo sync after scheduled task failed");
            }
        }

        self.unregister_invocation(folder);
        self.queues().set_active_task(folder, false);
        result
    }
}
