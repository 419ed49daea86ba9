//! Tier 2 task handlers (§4.5 "Task dispatcher", §4.7, §4.8): every
//! `tasks/<request_id>.json` command a container can send, registered onto
//! one `TaskDispatcher` by the lifecycle orchestrator at startup.

use std::sync::Arc;

use async_trait::async_trait;
use pynchy_approval::create_pending_question;
use pynchy_bus::{AskUserQuestion, ChannelManager};
use pynchy_core::types::{now, ChatJid, WorkspaceFolder};
use pynchy_git::sync_to_main;
use pynchy_ipc::{IpcError, IpcPaths, Result as IpcResult, TaskHandler, TaskResponse};
use pynchy_store::{ScheduleType, ScheduledTask, StateStore, TaskStatus};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::plugins::ServiceRegistry;

fn bad_payload(reason: impl Into<String>) -> IpcError {
    IpcError::Parse { path: "<task payload>".to_string(), reason: reason.into() }
}

/// `sync_worktree_to_main` (§4.4): merges (or opens a PR for) the calling
/// workspace's worktree against the host's main checkout. Looked up by
/// folder since the task carries no repo name of its own.
pub struct SyncWorktreeToMainHandler {
    pub config: pynchy_core::config::PynchyConfig,
    pub repos: std::collections::HashMap<String, pynchy_git::RepoContext>,
}

#[async_trait]
impl TaskHandler for SyncWorktreeToMainHandler {
    async fn handle(&self, folder: &str, _request_id: Option<&str>, _payload: Value) -> IpcResult<Option<TaskResponse>> {
        let Some(ws) = self.config.workspaces.get(folder) else {
            return Ok(Some(TaskResponse::err(format!("unknown workspace {folder}"))));
        };
        let Some(repo_name) = &ws.repo_access else {
            return Ok(Some(TaskResponse::err(format!("workspace {folder} has no repo_access"))));
        };
        let Some(ctx) = self.repos.get(repo_name) else {
            return Ok(Some(TaskResponse::err(format!("unknown repo {repo_name}"))));
        };
        match sync_to_main(ctx, folder, ws.git_policy).await {
            Ok(outcome) => Ok(Some(TaskResponse::ok(serde_json::json!({ "outcome": format!("{outcome:?}") })))),
            Err(e) => Ok(Some(TaskResponse::err(e.to_string()))),
        }
    }
}

/// `create_periodic_agent` (§4.7): inserts a new `ScheduledTask` row. The
/// scheduler's next poll tick picks it up; this handler never runs the task
/// itself.
pub struct CreatePeriodicAgentHandler {
    pub store: Arc<StateStore>,
}

#[async_trait]
impl TaskHandler for CreatePeriodicAgentHandler {
    async fn handle(&self, folder: &str, _request_id: Option<&str>, payload: Value) -> IpcResult<Option<TaskResponse>> {
        let prompt = payload
            .get("prompt")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_payload("create_periodic_agent missing prompt"))?
            .to_string();
        let schedule_type: ScheduleType = payload
            .get("schedule_type")
            .and_then(Value::as_str)
            .unwrap_or("cron")
            .parse()
            .map_err(bad_payload)?;
        let schedule_value = payload
            .get("schedule_value")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_payload("create_periodic_agent missing schedule_value"))?
            .to_string();
        let chat_jid = payload.get("chat_jid").and_then(Value::as_str).unwrap_or(folder).to_string();
        let repo_access = payload.get("repo_access").and_then(Value::as_str).map(String::from);

        let task = ScheduledTask {
            id: Uuid::now_v7().to_string(),
            group_folder: WorkspaceFolder::from(folder),
            chat_jid: ChatJid::from(chat_jid),
            prompt,
            schedule_type,
            schedule_value,
            next_run: Some(now()),
            last_run: None,
            last_result: None,
            status: TaskStatus::Active,
            context_mode: Default::default(),
            repo_access,
        };
        let id = task.id.clone();
        self.store.create_task(&task).map_err(|e| bad_payload(e.to_string()))?;
        Ok(Some(TaskResponse::ok(serde_json::json!({ "task_id": id }))))
    }
}

/// `ask_user:ask` (§4.8): writes the pending-question file and asks the
/// owning channel to deliver it. Answer delivery happens out-of-band, via
/// `pynchy_approval::deliver_answer` called from wherever a reply arrives.
pub struct AskUserHandler {
    pub paths: IpcPaths,
    pub channels: Arc<ChannelManager>,
}

#[async_trait]
impl TaskHandler for AskUserHandler {
    async fn handle(&self, folder: &str, request_id: Option<&str>, payload: Value) -> IpcResult<Option<TaskResponse>> {
        let Some(request_id) = request_id else {
            return Ok(Some(TaskResponse::err("ask_user:ask requires a request_id")));
        };
        let chat_jid = payload
            .get("chat_jid")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_payload("ask_user:ask missing chat_jid"))?;
        let channel_name = payload
            .get("channel_name")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_payload("ask_user:ask missing channel_name"))?;
        let session_id = payload.get("session_id").and_then(Value::as_str).map(String::from);
        let questions: Vec<AskUserQuestion> = match payload.get("questions").cloned() {
            Some(v) => serde_json::from_value(v).map_err(|e| bad_payload(e.to_string()))?,
            None => return Ok(Some(TaskResponse::err("ask_user:ask missing questions"))),
        };

        let Some(channel) = self.channels.get(channel_name) else {
            warn!(channel_name, "ask_user:ask targets an unregistered channel");
            return Ok(Some(TaskResponse::err(format!("channel {channel_name} not connected"))));
        };

        create_pending_question(&self.paths, folder, chat_jid, channel_name, session_id, request_id, &questions, channel)
            .await
            .map_err(|e| bad_payload(e.to_string()))?;

        // The pending file itself is the response; no immediate reply.
        Ok(None)
    }
}

/// `deploy` (§4.4 step 7, §4.9): tier-1 admin-only manual redeploy trigger,
/// routed through the same continuation-marker mechanism as an
/// origin-drift-detected self-deploy.
pub struct DeployHandler {
    pub repo_root: String,
}

#[async_trait]
impl TaskHandler for DeployHandler {
    async fn handle(&self, folder: &str, _request_id: Option<&str>, _payload: Value) -> IpcResult<Option<TaskResponse>> {
        if let Err(e) = crate::self_deploy::trigger_manual_redeploy(&self.repo_root) {
            warn!(folder, error = %e, "manual redeploy trigger failed");
            return Ok(Some(TaskResponse::err(e.to_string())));
        }
        Ok(Some(TaskResponse::ok(serde_json::json!({ "status": "restarting" }))))
    }
}

/// `service:*` (§1.1 supplemented builtin MCP plugins): routes to whichever
/// in-tree `ServiceHandler` implementation owns the suffix after `service:`.
pub struct ServiceTaskHandler {
    pub registry: Arc<ServiceRegistry>,
}

#[async_trait]
impl TaskHandler for ServiceTaskHandler {
    async fn handle(&self, folder: &str, request_id: Option<&str>, payload: Value) -> IpcResult<Option<TaskResponse>> {
        let command = payload
            .get("service")
            .and_then(Value::as_str)
            .ok_or_else(|| bad_payload("service task missing \"service\" field"))?;
        match self.registry.dispatch(command, folder, payload.clone()).await {
            Ok(result) => Ok(Some(TaskResponse::ok(result))),
            Err(e) => {
                warn!(folder, command, request_id = ?request_id, error = %e, "service handler failed");
                Ok(Some(TaskResponse::err(e.to_string())))
            }
        }
    }
}
