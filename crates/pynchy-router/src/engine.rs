//! Router engine (§4.1): the message-poll loop, the routing decision, and
//! the per-workspace worker that performs the actual cold-start/pipe/
//! interrupt dispatch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pynchy_approval::ApprovalCoordinator;
use pynchy_bus::{BroadcastOptions, OutboundBus};
use pynchy_core::config::{AccessLevel, PynchyConfig};
use pynchy_core::types::{now, ChatJid, MessageType, Timestamp, WorkspaceFolder};
use pynchy_git::RepoContext;
use pynchy_ipc::{write_json_atomic, ApprovalDecision, ContainerInput, IpcPaths, InputMessage, McpServerRef, PendingApproval};
use pynchy_session::{effective_query_timeout_ms, Mount, QueryOutcome, SessionManager};
use pynchy_store::{Message, RouterState, StateStore};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::commands::classify;
use crate::error::{Result, RouterError};
use crate::queue::QueueRegistry;
use crate::trigger::batch_has_mention;
use crate::types::{classify_forward, ForwardKind, MagicCommand, SkipReason};

/// How the router reaches the LLM/MCP gateway — constructed by whatever
/// owns `GatewayState` (the host) and handed to the router as plain data
/// so this crate never depends on `pynchy-gateway`.
#[derive(Debug, Clone)]
pub struct GatewayBinding {
    pub base_url: String,
    pub ephemeral_key: String,
}

/// Narrow seam into the gateway's per-`(folder, invocation_ts)` security
/// gate (§4.10), owned by whatever constructs `GatewayState` (the host).
/// The router knows only that a gate must exist before a container it just
/// started can reach the MCP proxy — it has no reason to depend on
/// `pynchy-security`/`pynchy-gateway` for that (§9 "narrow dependency
/// interface rather than the whole app").
pub trait InvocationGateHook: Send + Sync {
    fn register_invocation(
        &self,
        folder: &str,
        invocation_ts: &str,
        chat_jid: &str,
        is_admin: bool,
        security: &pynchy_core::config::WorkspaceSecurityConfig,
    );
    fn unregister_invocation(&self, folder: &str, invocation_ts: &str);
}

pub struct RouterEngine {
    store: Arc<StateStore>,
    sessions: Arc<SessionManager>,
    bus: Arc<OutboundBus>,
    approvals: Arc<ApprovalCoordinator>,
    queues: Arc<QueueRegistry>,
    config: PynchyConfig,
    ipc_paths: IpcPaths,
    gateway: GatewayBinding,
    repos: HashMap<String, RepoContext>,
    gate_hook: Option<Arc<dyn InvocationGateHook>>,
    /// Transient "messages already handed to an in-flight container"
    /// cursor (§4.1 "`_dispatched_through`"). Deliberately not persisted.
    dispatched_through: DashMap<String, Timestamp>,
    retry_counts: DashMap<String, u32>,
    /// `(folder, invocation_ts)` of the gate registered for the container
    /// currently dispatched in each workspace, so completion can unregister
    /// the matching gate rather than guessing a fresh timestamp.
    active_invocations: DashMap<String, String>,
}

impl RouterEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<StateStore>,
        sessions: Arc<SessionManager>,
        bus: Arc<OutboundBus>,
        approvals: Arc<ApprovalCoordinator>,
        config: PynchyConfig,
        data_root: impl Into<std::path::PathBuf>,
        gateway: GatewayBinding,
        repos: HashMap<String, RepoContext>,
    ) -> Self {
        Self {
            store,
            sessions,
            bus,
            approvals,
            queues: Arc::new(QueueRegistry::new()),
            config,
            ipc_paths: IpcPaths::new(data_root),
            gateway,
            repos,
            gate_hook: None,
            dispatched_through: DashMap::new(),
            retry_counts: DashMap::new(),
            active_invocations: DashMap::new(),
        }
    }

    /// Wires the host's security-gate registration seam in after
    /// construction, so `new()`'s arity doesn't have to grow for every
    /// optional cross-cutting concern the host owns.
    pub fn with_gate_hook(mut self, hook: Arc<dyn InvocationGateHook>) -> Self {
        self.gate_hook = Some(hook);
        self
    }

    pub fn queues(&self) -> Arc<QueueRegistry> {
        self.queues.clone()
    }

    /// Accessors for `task_runner`'s `TaskRunner` impl, which lives in a
    /// sibling module and so cannot reach these fields directly.
    pub(crate) fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub(crate) fn config_ref(&self) -> &PynchyConfig {
        &self.config
    }

    pub(crate) fn sessions_ref(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    pub(crate) fn gateway_base_url(&self) -> &str {
        &self.gateway.base_url
    }

    pub(crate) fn gateway_key(&self) -> &str {
        &self.gateway.ephemeral_key
    }

    pub(crate) fn mounts_for(&self, workspace: &pynchy_store::Workspace, ws_cfg: Option<&pynchy_core::config::WorkspaceConfig>) -> Vec<Mount> {
        self.build_mounts(workspace, ws_cfg)
    }

    pub(crate) fn mcp_servers_for(
        &self,
        folder: &str,
        invocation_ts: &str,
        ws_cfg: Option<&pynchy_core::config::WorkspaceConfig>,
    ) -> Vec<McpServerRef> {
        self.resolve_mcp_servers(folder, invocation_ts, ws_cfg)
    }

    /// Registers a security gate for one invocation (§4.10) via the host's
    /// hook, if one is wired in. A no-op when `gate_hook` is unset, which
    /// only happens in tests that construct a bare `RouterEngine`.
    pub(crate) fn register_invocation(
        &self,
        folder: &str,
        invocation_ts: &str,
        chat_jid: &str,
        is_admin: bool,
        ws_cfg: Option<&pynchy_core::config::WorkspaceConfig>,
    ) {
        let Some(hook) = &self.gate_hook else { return };
        let default_security = pynchy_core::config::WorkspaceSecurityConfig::default();
        let security = ws_cfg.map(|w| &w.security).unwrap_or(&default_security);
        hook.register_invocation(folder, invocation_ts, chat_jid, is_admin, security);
        self.active_invocations.insert(folder.to_string(), invocation_ts.to_string());
    }

    pub(crate) fn unregister_invocation(&self, folder: &str) {
        if let Some((_, invocation_ts)) = self.active_invocations.remove(folder) {
            if let Some(hook) = &self.gate_hook {
                hook.unregister_invocation(folder, &invocation_ts);
            }
        }
    }

    /// The message-poll loop (§4.1 "Polling"). Ticks at
    /// `intervals.message_poll` seconds.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.intervals.message_poll.max(1)));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.poll_tick().await {
                        warn!(error = %e, "router poll tick failed");
                    }
                    self.drain_pending_workers();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// §4.1 step 1-2: query new rows, persist the cursor before routing,
    /// group by `chat_jid`, call the routing decision for each group.
    async fn poll_tick(&self) -> Result<()> {
        let mut state = self.store.load_router_state()?;
        let messages = self.store.messages_since(Some(state.last_timestamp))?;
        if messages.is_empty() {
            return Ok(());
        }

        if let Some(last) = messages.last() {
            state.last_timestamp = last.timestamp;
        }
        self.store.save_router_state(&state)?;

        let mut grouped: HashMap<ChatJid, Vec<Message>> = HashMap::new();
        for m in messages {
            grouped.entry(m.chat_jid.clone()).or_default().push(m);
        }

        for (jid, batch) in grouped {
            if let Err(e) = self.route_decision(&jid, &batch).await {
                warn!(jid = jid.as_str(), error = %e, "routing decision failed");
            }
        }
        Ok(())
    }

    /// §4.1 "Routing decision" steps 1-3: access check, sender filter,
    /// trigger gate. A pass enqueues the workspace's worker; every skip
    /// path is named and logged (§8 invariant 1 — never silently dropped).
    async fn route_decision(&self, jid: &ChatJid, batch: &[Message]) -> Result<()> {
        let Some(workspace) = self.store.get_workspace_by_jid(jid)? else {
            return Err(RouterError::UnknownWorkspace(jid.as_str().to_string()));
        };
        let ws_cfg = self.config.workspaces.get(workspace.folder.as_str());
        let folder = workspace.folder.as_str();

        let access = ws_cfg.and_then(|w| w.access).unwrap_or(self.config.workspace_defaults.access);
        if access == AccessLevel::Read || access == AccessLevel::WriteOnly {
            info!(folder, reason = ?SkipReason::AccessReadOnlyOrWriteOnly, "batch skipped");
            return Ok(());
        }

        let allowed_users = ws_cfg
            .and_then(|w| w.allowed_users.clone())
            .unwrap_or_else(|| self.config.workspace_defaults.allowed_users.clone());
        let any_allowed = batch.iter().any(|m| sender_allowed(m, &allowed_users));
        if !any_allowed {
            info!(folder, reason = ?SkipReason::NoAllowedSender, "batch skipped");
            return Ok(());
        }

        let trigger = ws_cfg.and_then(|w| w.trigger.clone()).unwrap_or_else(|| self.config.workspace_defaults.trigger.clone());
        if !workspace.is_admin && trigger == "mention" {
            let contents: Vec<&str> = batch.iter().map(|m| m.content.as_str()).collect();
            let has_mention = batch_has_mention(&contents, &self.config.agent.name, &self.config.agent.trigger_aliases);
            let last_is_command = batch
                .last()
                .map(|m| classify(&m.content, &self.config.commands).is_some())
                .unwrap_or(false);
            if !has_mention && !last_is_command {
                info!(folder, reason = ?SkipReason::NoTriggerMatch, "batch skipped");
                return Ok(());
            }
        }

        self.queues.enqueue_message_check(folder);
        Ok(())
    }

    /// Spawns a worker pass for every workspace with a pending flag that
    /// isn't already running one (§4.1 "at most one worker coroutine").
    fn drain_pending_workers(self: &Arc<Self>) {
        for folder in self.queues.pending_folders() {
            let this = self.clone();
            tokio::spawn(async move {
                let queues = this.queues.clone();
                queues
                    .try_run_worker(&folder, || async move {
                        if let Err(e) = this.worker_pass(&folder).await {
                            warn!(folder, error = %e, "worker pass failed");
                        }
                    })
                    .await;
            });
        }
    }

    /// §4.1 steps 4-7, run under the workspace's worker lock.
    async fn worker_pass(&self, folder: &str) -> Result<()> {
        let ws_folder = WorkspaceFolder::from(folder.to_string());
        let Some(workspace) = self.store.get_workspace_by_folder(&ws_folder)? else {
            return Err(RouterError::UnknownWorkspace(folder.to_string()));
        };

        let router_state = self.store.load_router_state()?;
        let last_agent_ts = router_state.last_agent_timestamp.get(folder).copied();
        let dispatched = self.dispatched_through.get(folder).map(|v| *v);
        let cursor = match (last_agent_ts, dispatched) {
            (Some(a), Some(d)) => Some(a.max(d)),
            (a, d) => a.or(d),
        };

        let pending = self.store.messages_for_chat_since(&workspace.jid, cursor)?;
        if pending.is_empty() {
            return Ok(());
        }

        // §4.1 step 5: system-notice filter.
        if !self.sessions.is_active(folder)
            && pending.iter().all(|m| m.message_type == MessageType::SystemNotice)
        {
            return Ok(());
        }

        let Some(last) = pending.last() else { return Ok(()) };

        // §4.1 step 6: special-command interception.
        if let Some(cmd) = classify(&last.content, &self.config.commands) {
            return self.handle_magic_command(&workspace, cmd, last.timestamp).await;
        }

        // §4.1 step 7: dispatch.
        if self.queues.is_active_task(folder) {
            return self.dispatch_active_task(&workspace, &pending).await;
        }
        if self.sessions.is_active(folder) {
            return self.dispatch_pipe(&workspace, &pending).await;
        }
        self.dispatch_cold_start(&workspace, &pending).await
    }

    async fn handle_magic_command(
        &self,
        workspace: &pynchy_store::Workspace,
        cmd: MagicCommand,
        consumed_through: Timestamp,
    ) -> Result<()> {
        let folder = workspace.folder.as_str();
        match cmd {
            MagicCommand::ContextReset => {
                if self.sessions.is_active(folder) {
                    self.sessions.stop_session(folder).await?;
                    self.unregister_invocation(folder);
                    if let Err(e) = self.sync_repo_on_session_end(folder).await {
                        warn!(folder, error = %e, "repo sync on session reset failed");
                    }
                }
                self.store.clear_session(&workspace.folder)?;
                self.store.clear_chat(&workspace.jid, now())?;
                self.advance_cursor(folder, consumed_through);
                let _ = self
                    .bus
                    .broadcast(&workspace.jid, "🔁 session reset — starting fresh", &BroadcastOptions::system_notice())
                    .await;
            }
            MagicCommand::EndSession => {
                if self.sessions.is_active(folder) {
                    self.sessions.stop_session(folder).await?;
                    self.unregister_invocation(folder);
                    if let Err(e) = self.sync_repo_on_session_end(folder).await {
                        warn!(folder, error = %e, "repo sync on session end failed");
                    }
                }
                self.advance_cursor(folder, consumed_through);
                let _ = self
                    .bus
                    .broadcast(&workspace.jid, "👋 session ended — next message starts a new one", &BroadcastOptions::system_notice())
                    .await;
            }
            MagicCommand::Redeploy => {
                self.advance_cursor(folder, consumed_through);
                let _ = self
                    .bus
                    .broadcast(&workspace.jid, "🚀 redeploy requested", &BroadcastOptions::system_notice())
                    .await;
            }
            MagicCommand::Approve(short) => {
                self.resolve_short_id(workspace, &short, true).await?;
                self.advance_cursor(folder, consumed_through);
            }
            MagicCommand::Deny(short) => {
                self.resolve_short_id(workspace, &short, false).await?;
                self.advance_cursor(folder, consumed_through);
            }
        }
        Ok(())
    }

    /// §4.1 step 6 "Approval command": look up the pending approval by
    /// `short_id` in this workspace and write the decision file; the
    /// approval coordinator's own watcher-driven `handle_decision_file`
    /// resolves the in-flight future (§8 invariant 10: exactly one
    /// execution even if `approve s` is issued twice — the pending file
    /// is removed once matched, so a second `approve s` finds nothing).
    async fn resolve_short_id(&self, workspace: &pynchy_store::Workspace, short_id: &str, approved: bool) -> Result<()> {
        let folder = workspace.folder.as_str();
        let dir = self.ipc_paths.pending_approvals_dir(folder);
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let Ok(bytes) = std::fs::read(entry.path()) else { continue };
            let Ok(pending): std::result::Result<PendingApproval, _> = serde_json::from_slice(&bytes) else { continue };
            if pending.short_id == short_id {
                let decision = ApprovalDecision { approved };
                let decision_path = self.ipc_paths.approval_decisions_dir(folder).join(format!("{}.json", pending.request_id));
                write_json_atomic(&decision_path, &decision)?;
                let verb = if approved { "approved" } else { "denied" };
                let _ = self
                    .bus
                    .broadcast(&workspace.jid, &format!("✅ {short_id} {verb}"), &BroadcastOptions::system_notice())
                    .await;
                return Ok(());
            }
        }
        let _ = self
            .bus
            .broadcast(&workspace.jid, &format!("no pending approval matches `{short_id}`"), &BroadcastOptions::system_notice())
            .await;
        Ok(())
    }

    /// §4.1 step 7, "An active scheduled task is running": `btw `/`todo `
    /// forwards without interrupting; anything else interrupts the task.
    async fn dispatch_active_task(&self, workspace: &pynchy_store::Workspace, pending: &[Message]) -> Result<()> {
        let folder = workspace.folder.as_str();
        let last = pending.last().expect("non-empty pending checked by caller");
        match classify_forward(&last.content) {
            ForwardKind::Btw | ForwardKind::Todo => {
                let joined = join_contents(pending);
                self.sessions.send_message(folder, &joined)?;
            }
            ForwardKind::Normal => {
                self.queues.clear_pending(folder);
                self.sessions.stop_session(folder).await?;
                self.unregister_invocation(folder);
                self.queues.set_active_task(folder, false);
                self.queues.enqueue_message_check(folder);
            }
        }
        Ok(())
    }

    /// §4.1 step 7, "An active message container": pipe the joined
    /// pending messages as a single IPC input file, await completion,
    /// advance cursors only on success.
    async fn dispatch_pipe(&self, workspace: &pynchy_store::Workspace, pending: &[Message]) -> Result<()> {
        let folder = workspace.folder.as_str();
        let last = pending.last().expect("non-empty");
        let last_ts = last.timestamp;
        let joined = join_contents(pending);

        self.bus.send_reaction(&workspace.jid, &last.id, &last.sender, "working").await;

        self.sessions.send_message(folder, &joined)?;
        self.dispatched_through.insert(folder.to_string(), last_ts);

        self.await_completion_and_settle(workspace, last_ts).await
    }

    /// §4.1 step 7, "No active container": cold start.
    async fn dispatch_cold_start(&self, workspace: &pynchy_store::Workspace, pending: &[Message]) -> Result<()> {
        let folder = workspace.folder.as_str();
        let last_ts = pending.last().expect("non-empty").timestamp;
        let ws_cfg = self.config.workspaces.get(folder);

        let session_id = self.store.get_session_id(&workspace.folder)?;
        let mounts = self.build_mounts(workspace, ws_cfg);
        let invocation_ts = now().timestamp_millis().to_string();
        let mcp_servers = self.resolve_mcp_servers(folder, &invocation_ts, ws_cfg);
        self.register_invocation(folder, &invocation_ts, workspace.jid.as_str(), workspace.is_admin, ws_cfg);

        let input = ContainerInput {
            messages: pending.iter().map(|m| InputMessage::new(m.content.clone())).collect(),
            group_folder: folder.to_string(),
            chat_jid: workspace.jid.as_str().to_string(),
            is_admin: workspace.is_admin,
            session_id,
            is_scheduled_task: false,
            system_notices: Vec::new(),
            repo_access: ws_cfg.and_then(|w| w.repo_access.clone()),
            agent_core: self.config.agent.agent_core.clone(),
            llm_base_url: self.gateway.base_url.clone(),
            llm_gateway_key: self.gateway.ephemeral_key.clone(),
            mcp_servers,
        };

        self.sessions.cold_start(input, mounts, false, self.config.container.idle_timeout_ms).await?;
        self.dispatched_through.insert(folder.to_string(), last_ts);

        self.await_completion_and_settle(workspace, last_ts).await
    }

    /// Shared tail of pipe/cold-start dispatch: await the query's
    /// completion, then either advance `last_agent_timestamp` (success)
    /// or schedule a bounded-backoff retry (§4.1 "Failure semantics", §8
    /// invariant 6 "cursor rollback on failure").
    async fn await_completion_and_settle(&self, workspace: &pynchy_store::Workspace, through: Timestamp) -> Result<()> {
        let folder = workspace.folder.as_str();
        let Some(session) = self.sessions.session(folder) else {
            return Ok(());
        };
        let idle_ms = self.config.container.idle_timeout_ms;
        let timeout_ms = effective_query_timeout_ms(self.config.container.timeout_ms, idle_ms);
        let outcome = session.wait_done(Duration::from_millis(timeout_ms)).await;

        match outcome {
            QueryOutcome::Done { new_session_id } => {
                self.store.set_session_id(&workspace.folder, &new_session_id)?;
                let mut state = self.store.load_router_state()?;
                state.last_agent_timestamp.insert(folder.to_string(), through);
                self.store.save_router_state(&state)?;
                self.dispatched_through.remove(folder);
                self.retry_counts.remove(folder);
                self.sessions.arm_idle_timer(folder, idle_ms);
            }
            QueryOutcome::CleanShutdown => {
                self.dispatched_through.remove(folder);
                self.unregister_invocation(folder);
                if let Err(e) = self.sync_repo_on_session_end(folder).await {
                    warn!(folder, error = %e, "repo sync on idle-timeout session end failed");
                }
            }
            QueryOutcome::Died | QueryOutcome::TimedOut => {
                self.dispatched_through.remove(folder);
                self.unregister_invocation(folder);
                self.schedule_retry(workspace.folder.clone());
            }
        }
        Ok(())
    }

    fn schedule_retry(&self, folder: WorkspaceFolder) {
        let count = self
            .retry_counts
            .entry(folder.as_str().to_string())
            .and_modify(|c| *c += 1)
            .or_insert(1)
            .clone();
        if count > self.config.queue.max_retries {
            warn!(folder = folder.as_str(), count, "retries exhausted, giving up on this batch");
            self.retry_counts.remove(folder.as_str());
            return;
        }
        let delay = Duration::from_secs(self.config.queue.base_retry_seconds.saturating_mul(2u64.saturating_pow(count - 1)));
        let queues = self.queues.clone();
        let folder_name = folder.as_str().to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queues.enqueue_message_check(&folder_name);
        });
    }

    fn advance_cursor(&self, folder: &str, through: Timestamp) {
        if let Ok(mut state) = self.store.load_router_state() {
            state.last_agent_timestamp.insert(folder.to_string(), through);
            let _ = self.store.save_router_state(&state);
        }
        self.dispatched_through.remove(folder);
    }

    fn build_mounts(&self, workspace: &pynchy_store::Workspace, ws_cfg: Option<&pynchy_core::config::WorkspaceConfig>) -> Vec<Mount> {
        let folder = workspace.folder.as_str();
        let mut mounts = vec![
            Mount::rw(format!("groups/{folder}"), "/workspace"),
            Mount::rw(format!("data/ipc/{folder}"), "/ipc"),
        ];
        if let Some(repo_access) = ws_cfg.and_then(|w| w.repo_access.as_deref()) {
            if let Some(ctx) = self.repos.get(repo_access) {
                let worktree = ctx.worktree_path(folder);
                mounts.push(Mount::rw(worktree.to_string_lossy().to_string(), "/repo"));
            }
        }
        mounts
    }

    fn resolve_mcp_servers(
        &self,
        folder: &str,
        invocation_ts: &str,
        ws_cfg: Option<&pynchy_core::config::WorkspaceConfig>,
    ) -> Vec<McpServerRef> {
        let Some(ws_cfg) = ws_cfg else { return Vec::new() };
        ws_cfg
            .mcp_servers
            .iter()
            .map(|name| McpServerRef {
                name: name.clone(),
                url: format!("{}/mcp/{}/{}/{}", self.gateway.base_url, folder, invocation_ts, name),
                transport: "http".to_string(),
            })
            .collect()
    }

    /// On session end with `repo_access` set, merge (or PR) the worktree
    /// into main per the workspace's configured `git_policy` (§4.4). Not
    /// called automatically by the worker — invoked by whichever path
    /// ends a session and wants a sync (end-session, idle-terminate).
    pub async fn sync_repo_on_session_end(&self, folder: &str) -> Result<()> {
        let Some(ws_cfg) = self.config.workspaces.get(folder) else { return Ok(()) };
        let Some(repo_slug) = &ws_cfg.repo_access else { return Ok(()) };
        let Some(ctx) = self.repos.get(repo_slug) else { return Ok(()) };
        match pynchy_git::sync_to_main(ctx, folder, ws_cfg.git_policy).await {
            Ok(outcome) => {
                info!(folder, ?outcome, "repo sync on session end");
                Ok(())
            }
            Err(e) if matches!(e, pynchy_git::GitError::Conflict(_)) => {
                warn!(folder, error = %e, "repo sync left conflict for manual resolution");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn sender_allowed(message: &Message, allowed_users: &[String]) -> bool {
    allowed_users.iter().any(|pattern| match pattern.as_str() {
        "owner" => message.is_from_me,
        other => other == message.sender,
    })
}

fn join_contents(messages: &[Message]) -> String {
    messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n")
}
