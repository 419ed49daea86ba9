//! The lifecycle orchestrator (§4.9 "Startup sequence", §5 "Shared
//! resources"): constructs every subsystem crate once, wires the seams
//! between them, and runs the whole process as a set of `tokio::spawn`ed
//! tasks coordinated by a single `watch::Sender<bool>` shutdown signal.
//!
//! Phase order mirrors §4.9: config -> store -> sessions/bus/approvals ->
//! security gate + gateway -> router -> scheduler -> ipc watcher -> git
//! sync -> HTTP surfaces -> deploy-continuation consume -> run until
//! shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pynchy_approval::ApprovalCoordinator;
use pynchy_bus::{BroadcastOptions, ChannelManager, OutboundBus};
use pynchy_core::config::{McpLaunchConfig, McpServerConfig, PynchyConfig};
use pynchy_core::types::{ChatJid, WorkspaceFolder};
use pynchy_gateway::mcp::{McpLaunch, McpRegistry, McpServerSpec};
use pynchy_gateway::GatewayState;
use pynchy_git::{OriginPollLoop, RepoContext};
use pynchy_ipc::{IpcPaths, IpcWatcher, TaskDispatcher};
use pynchy_router::{GatewayBinding, RouterEngine};
use pynchy_scheduler::{HostCronEngine, SchedulerEngine};
use pynchy_security::GateRegistry;
use pynchy_session::SessionManager;
use pynchy_store::{HostJob, StateStore, Workspace};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::boot_warnings;
use crate::error::{HostError, Result};
use crate::gate_hook::GatewayGateHook;
use crate::http::{self, HostEventBus, HttpState};
use crate::plugins::{notebook, CaldavService, ServiceRegistry, SlackServiceHandler};
use crate::self_deploy::{self, HostSelfDeployHandler};
use crate::task_handlers::{AskUserHandler, CreatePeriodicAgentHandler, DeployHandler, ServiceTaskHandler, SyncWorktreeToMainHandler};

/// The running process. Every background loop is spawned from [`Host::run`]
/// and joined on shutdown; `Host` itself is only a constructor and a
/// `shutdown_tx` handle once running.
pub struct Host {
    config: PynchyConfig,
    data_root: PathBuf,
    store: Arc<StateStore>,
    sessions: Arc<SessionManager>,
    bus: Arc<OutboundBus>,
    approvals: Arc<ApprovalCoordinator>,
    channels: Arc<ChannelManager>,
    gateway_state: Arc<GatewayState>,
    services: Arc<ServiceRegistry>,
    repos: HashMap<String, RepoContext>,
    events: HostEventBus,
}

impl Host {
    /// Phase 1-3 of §4.9: load nothing (the caller already loaded `config`),
    /// open the store, and build every process-wide subsystem that has no
    /// dependency on the others being up yet.
    pub fn new(config: PynchyConfig, data_root: impl Into<PathBuf>) -> Result<Self> {
        let data_root = data_root.into();
        std::fs::create_dir_all(&data_root)?;
        let db_path = data_root.join("pynchy.db");

        let store = Arc::new(StateStore::open(db_path.to_string_lossy().as_ref())?);
        sync_workspaces_to_store(&store, &config)?;

        let runtime_bin = config.container.runtime.clone().unwrap_or_else(|| "docker".to_string());
        let sessions = Arc::new(SessionManager::new(&data_root, &runtime_bin, &config.container.image));

        let mut channels = ChannelManager::new();
        register_channels(&mut channels, &config)?;
        let channels = Arc::new(channels);

        // `OutboundBus` opens its own connection to the same database file
        // rather than sharing `store`'s `Connection` — it only ever needs
        // the ledger/alias/cursor tables, and bundled sqlite tolerates
        // multiple connections against one file.
        let bus_store = StateStore::open(db_path.to_string_lossy().as_ref())?;
        let bus = Arc::new(OutboundBus::new(channels.clone(), bus_store));

        let ipc_paths = IpcPaths::new(&data_root);
        let approvals = Arc::new(ApprovalCoordinator::new(ipc_paths.clone()));

        let gates = GateRegistry::new();
        let mcp = McpRegistry::new(&runtime_bin, gateway_proxy_base_url(&config));
        let gateway_state = Arc::new(GatewayState::new(
            config.gateway.clone(),
            &config.secrets,
            gates,
            approvals.clone(),
            bus.clone(),
            mcp,
        ));

        let mut services = ServiceRegistry::new();
        services.register(Box::new(CaldavService::new(config.caldav.servers.clone())));
        if channels.get("slack").is_some() {
            services.register(Box::new(SlackServiceHandler::new(channels.clone())));
        }

        let repos = build_repo_contexts(&config);

        Ok(Self {
            config,
            data_root,
            store,
            sessions,
            bus,
            approvals,
            channels,
            gateway_state,
            services: Arc::new(services),
            repos,
            events: HostEventBus::new(),
        })
    }

    /// Runs the process until `shutdown_tx` is told to fire (SIGTERM/SIGINT,
    /// installed by the caller in `main.rs`), then waits for every spawned
    /// task to notice. §4.9 phase 4-8.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Result<()> {
        self.warm_up_mcp().await;
        self.reconcile_repos_at_startup().await;

        let gateway_binding =
            GatewayBinding { base_url: gateway_base_url(&self.config), ephemeral_key: self.gateway_state.ephemeral_key.clone() };

        let router = Arc::new(
            RouterEngine::new(
                self.store.clone(),
                self.sessions.clone(),
                self.bus.clone(),
                self.approvals.clone(),
                self.config.clone(),
                &self.data_root,
                gateway_binding,
                self.repos.clone(),
            )
            .with_gate_hook(Arc::new(GatewayGateHook::new(self.gateway_state.clone()))),
        );

        self.consume_deploy_continuation().await;

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn({
            let router = router.clone();
            let shutdown_rx = shutdown_rx.clone();
            async move { router.run(shutdown_rx).await }
        }));

        tasks.push(tokio::spawn({
            let dispatcher = Arc::new(self.build_task_dispatcher(&router));
            let ipc_paths = IpcPaths::new(&self.data_root);
            let sessions = self.sessions.clone();
            let approvals = self.approvals.clone();
            let bus = self.bus.clone();
            let config = self.config.clone();
            let (tx, rx) = mpsc::unbounded_channel();
            let watcher = IpcWatcher::start(ipc_paths.root().to_path_buf(), tx);
            async move {
                let _watcher = match watcher {
                    Ok(w) => w,
                    Err(e) => {
                        error!(error = %e, "ipc watcher failed to start");
                        return;
                    }
                };
                let is_admin_for = {
                    let config = config.clone();
                    move |folder: &str| -> bool { config.workspaces.get(folder).map(|w| w.is_admin).unwrap_or(false) }
                };
                let chat_jid_for =
                    move |folder: &str| -> Option<ChatJid> { config.workspaces.get(folder).map(|w| ChatJid::from(w.chat.as_str())) };
                crate::ipc_loop::run(rx, ipc_paths, dispatcher, sessions, approvals, bus, is_admin_for, chat_jid_for).await;
            }
        }));

        let runner: Arc<dyn pynchy_scheduler::TaskRunner> = router.clone();
        let scheduler = SchedulerEngine::new(self.store.clone(), runner, self.config.scheduler.poll_interval, &self.config.scheduler.timezone);
        tasks.push(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { scheduler.run(shutdown_rx).await }
        }));

        let cron = HostCronEngine::new(self.store.clone(), self.config.scheduler.poll_interval, &self.config.scheduler.timezone);
        if let Err(e) = cron.sync_configured_jobs(&configured_host_jobs(&self.config)) {
            warn!(error = %e, "failed to sync configured cron jobs");
        }
        tasks.push(tokio::spawn({
            let shutdown_rx = shutdown_rx.clone();
            async move { cron.run(shutdown_rx).await }
        }));

        tasks.push(tokio::spawn({
            let mcp = self.gateway_state.mcp.clone();
            let shutdown_rx = shutdown_rx.clone();
            async move { mcp.run_idle_checker(shutdown_rx).await }
        }));

        for repo_poll in self.build_origin_poll_loops() {
            tasks.push(tokio::spawn({
                let shutdown_rx = shutdown_rx.clone();
                async move { repo_poll.run(shutdown_rx).await }
            }));
        }

        tasks.push(tokio::spawn({
            let store = self.store.clone();
            let bus = self.bus.clone();
            let interval_secs = self.config.intervals.catchup_interval;
            let shutdown_rx = shutdown_rx.clone();
            async move { run_catchup_loop(store, bus, interval_secs, shutdown_rx).await }
        }));

        let http_state = Arc::new(HttpState {
            store: self.store.clone(),
            bus: self.bus.clone(),
            events: self.events.clone(),
            data_root: self.data_root.clone(),
        });
        let host_router = http::build_router(http_state);
        let host_addr = format!("127.0.0.1:{}", self.config.server.port);
        tasks.push(tokio::spawn(serve(host_addr, host_router)));

        let gateway_router = pynchy_gateway::build_router(self.gateway_state.clone());
        let gateway_addr = format!("{}:{}", self.config.gateway.bind, self.config.gateway.port);
        tasks.push(tokio::spawn(serve(gateway_addr, gateway_router)));

        info!("pynchy-host startup complete");

        let _ = shutdown_rx.changed().await;
        self.notify_admin_of_shutdown().await;
        for task in tasks {
            task.abort();
        }
        Ok(())
    }

    /// §4.9 "Shutdown": tell every admin workspace the host is going down
    /// before tearing down the spawned tasks, so an operator watching an
    /// admin chat sees it rather than just a dropped connection.
    async fn notify_admin_of_shutdown(&self) {
        for ws in self.config.workspaces.values().filter(|w| w.is_admin) {
            let chat_jid = ChatJid::from(ws.chat.as_str());
            let _ = self.bus.broadcast(&chat_jid, "🛑 shutting down", &BroadcastOptions::system_notice()).await;
        }
    }

    async fn warm_up_mcp(&self) {
        let all_specs = self.all_mcp_specs();
        self.gateway_state.mcp.warm_up_images(&all_specs).await;
        for (folder, specs) in &all_specs {
            if let Err(e) = self.gateway_state.mcp.ensure_workspace_running(folder, specs).await {
                warn!(folder, error = %e, "failed to start configured mcp instance at boot");
            }
        }
    }

    /// Builds `folder -> [McpServerSpec]` from every workspace's declared
    /// `mcp_servers` list, resolved against `[mcp_servers.*]` with the
    /// notebook builtin merged in first (§1.1).
    fn all_mcp_specs(&self) -> HashMap<String, Vec<McpServerSpec>> {
        let mut mcp_servers = self.config.mcp_servers.clone();
        notebook::merge_builtin_defaults(&mut mcp_servers);

        let mut result = HashMap::new();
        for (folder, ws) in &self.config.workspaces {
            let specs: Vec<McpServerSpec> = ws
                .mcp_servers
                .iter()
                .filter_map(|name| mcp_servers.get(name).map(|cfg| to_mcp_server_spec(name, cfg)))
                .collect();
            if !specs.is_empty() {
                result.insert(folder.clone(), specs);
            }
        }
        result
    }

    async fn reconcile_repos_at_startup(&self) {
        for (repo_name, ctx) in &self.repos {
            let folders: Vec<String> = self
                .config
                .workspaces
                .iter()
                .filter(|(_, ws)| ws.repo_access.as_deref() == Some(repo_name.as_str()))
                .map(|(folder, _)| folder.clone())
                .collect();
            let results = pynchy_git::reconcile_at_startup(ctx, &folders).await;
            for (folder, outcome) in results {
                if let Err(e) = outcome {
                    warn!(repo = repo_name, folder, error = %e, "worktree reconciliation failed at startup");
                }
            }
        }
    }

    fn build_origin_poll_loops(&self) -> Vec<OriginPollLoop> {
        self.repos
            .values()
            .map(|ctx| {
                let folders: Vec<(String, ChatJid)> = self
                    .config
                    .workspaces
                    .iter()
                    .filter(|(_, ws)| ws.repo_access.is_some())
                    .map(|(folder, ws)| (folder.clone(), ChatJid::from(ws.chat.as_str())))
                    .collect();
                let deploy = if ctx.is_host_repo {
                    let chat_jids: HashMap<String, ChatJid> =
                        self.config.workspaces.iter().map(|(f, ws)| (f.clone(), ChatJid::from(ws.chat.as_str()))).collect();
                    let handler = HostSelfDeployHandler::new(
                        self.data_root.clone(),
                        ctx.repo_root.clone(),
                        self.config.container.image.clone(),
                        self.sessions.clone(),
                        chat_jids,
                    );
                    Some(Arc::new(handler) as Arc<dyn pynchy_git::SelfDeployHandler>)
                } else {
                    None
                };
                OriginPollLoop::new(ctx.clone(), self.bus.clone(), deploy, folders)
            })
            .collect()
    }

    fn build_task_dispatcher(&self, router: &Arc<RouterEngine>) -> TaskDispatcher {
        let mut dispatcher = TaskDispatcher::new();
        dispatcher.register(
            "sync_worktree_to_main",
            Box::new(SyncWorktreeToMainHandler { config: self.config.clone(), repos: self.repos.clone() }),
        );
        dispatcher.register("create_periodic_agent", Box::new(CreatePeriodicAgentHandler { store: self.store.clone() }));
        dispatcher.register(
            "ask_user:ask",
            Box::new(AskUserHandler { paths: IpcPaths::new(&self.data_root), channels: self.channels.clone() }),
        );
        let host_repo_root = self.repos.values().find(|r| r.is_host_repo).map(|r| r.repo_root.clone()).unwrap_or_default();
        dispatcher.register("deploy", Box::new(DeployHandler { repo_root: host_repo_root }));
        dispatcher.register_prefix("service:", Box::new(ServiceTaskHandler { registry: self.services.clone() }));
        let _ = router;
        dispatcher
    }

    /// §4.4 step 7 / §7 "Startup failure after deploy": consume a pending
    /// continuation left by a prior self-deploy and broadcast "Deploy
    /// complete" to every chat that had a live session when it fired.
    async fn consume_deploy_continuation(&self) {
        let continuation = match self_deploy::consume(&self.data_root) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to read deploy continuation");
                return;
            }
        };
        let Some(continuation) = continuation else { return };

        if continuation.rollback_note.is_some() {
            warn!(sha = continuation.commit_sha, "boot after a rolled-back deploy");
            boot_warnings::record(&self.data_root, format!("rolled back deploy to {}", continuation.previous_commit_sha));
            return;
        }

        let sha_short = &continuation.commit_sha[..continuation.commit_sha.len().min(7)];
        let text = format!(
            "Deploy complete — `{}` {}. {}",
            sha_short, continuation.commit_subject, continuation.resume_prompt
        );
        for jid in continuation.active_sessions.keys() {
            let chat_jid = ChatJid::from(jid.as_str());
            let _ = self.bus.broadcast(&chat_jid, &text, &BroadcastOptions::system_notice()).await;
        }
    }
}

/// §4.3 catch-up sweep: for every workspace, pull any inbound messages the
/// channel's own push path missed and merge them into the store, then retry
/// outbound deliveries still marked pending. Runs independently of the
/// per-message poll loops so a channel outage between ticks is bounded by
/// `intervals.catchup_interval` rather than lost.
async fn run_catchup_loop(store: Arc<StateStore>, bus: Arc<OutboundBus>, interval_secs: u64, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs.max(1)));
    info!(interval_secs, "catch-up reconciliation loop started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Ok(workspaces) = store.list_workspaces() else { continue };
                for workspace in &workspaces {
                    for (channel, messages) in bus.reconcile_inbound(&workspace.jid).await {
                        for msg in messages {
                            let message = pynchy_store::Message {
                                id: format!("{channel}:{}", msg.cursor_id),
                                chat_jid: workspace.jid.clone(),
                                sender: msg.sender_name.clone().unwrap_or_else(|| channel.clone()),
                                sender_name: msg.sender_name.clone(),
                                content: msg.content,
                                timestamp: msg.timestamp.parse().unwrap_or_else(|_| pynchy_core::types::now()),
                                is_from_me: false,
                                message_type: pynchy_core::types::MessageType::User,
                                metadata: None,
                            };
                            if let Err(e) = store.store_message(&message) {
                                warn!(channel, error = %e, "failed to merge reconciled inbound message");
                            }
                        }
                    }
                }
                if let Err(e) = bus.retry_pending_deliveries().await {
                    warn!(error = %e, "outbound delivery retry sweep failed");
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("catch-up reconciliation loop shutting down");
                    break;
                }
            }
        }
    }
}

async fn serve(addr: String, router: axum::Router) {
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr, error = %e, "failed to bind http listener");
            return;
        }
    };
    info!(addr, "http server listening");
    if let Err(e) = axum::serve(listener, router).await {
        error!(addr, error = %e, "http server exited with error");
    }
}

fn gateway_base_url(config: &PynchyConfig) -> String {
    format!("http://127.0.0.1:{}", config.gateway.port)
}

fn gateway_proxy_base_url(config: &PynchyConfig) -> String {
    format!("http://{}:{}", config.gateway.container_facing_host, config.gateway.port)
}

fn to_mcp_server_spec(name: &str, cfg: &McpServerConfig) -> McpServerSpec {
    let launch = match &cfg.launch {
        McpLaunchConfig::Docker { image, port, env } => {
            McpLaunch::Docker { image: image.clone(), port: *port, env: env.clone() }
        }
        McpLaunchConfig::HostScript { command, args, port } => {
            McpLaunch::HostScript { command: command.clone(), args: args.clone(), port: *port }
        }
    };
    McpServerSpec {
        name: name.to_string(),
        launch,
        transport: cfg.transport.clone(),
        public_source: cfg.public_source,
        idle_timeout_secs: cfg.idle_timeout_secs,
    }
}

fn configured_host_jobs(config: &PynchyConfig) -> Vec<HostJob> {
    config
        .cron_jobs
        .iter()
        .map(|(name, job)| HostJob {
            id: name.clone(),
            name: name.clone(),
            schedule: job.schedule.clone(),
            command: job.command.clone(),
            cwd: job.cwd.clone(),
            timeout_seconds: job.timeout_seconds,
            enabled: job.enabled,
        })
        .collect()
}

/// Ensures every `[workspaces.*]` config entry has a matching row in the
/// store and a directory on disk, unregisters rows config no longer
/// declares, and bootstraps a local admin workspace on a first run with no
/// workspaces configured at all (§4.9 phases 2-4).
fn sync_workspaces_to_store(store: &StateStore, config: &PynchyConfig) -> Result<()> {
    let groups_root = PathBuf::from(pynchy_core::config::project_root()).join("groups");

    for (folder, ws) in &config.workspaces {
        let workspace = Workspace {
            jid: ChatJid::from(ws.chat.as_str()),
            name: ws.name.clone(),
            folder: WorkspaceFolder::from(folder.as_str()),
            trigger: ws.trigger.clone().unwrap_or_else(|| config.workspace_defaults.trigger.clone()),
            is_admin: ws.is_admin,
            security_profile: serde_json::to_value(&ws.security).unwrap_or(serde_json::Value::Null),
            added_at: pynchy_core::types::now(),
        };
        store.upsert_workspace(&workspace)?;

        if let Err(e) = std::fs::create_dir_all(groups_root.join(folder)) {
            warn!(folder, error = %e, "failed to create workspace directory");
        }
    }

    // Phase 4: unregister any stored workspace config no longer declares.
    for stored in store.list_workspaces()? {
        if !config.workspaces.contains_key(stored.folder.as_str()) {
            info!(folder = %stored.folder, "unregistering orphaned workspace");
            store.delete_workspace(&stored.folder)?;
        }
    }

    // Phase 3: first-run bootstrap. With no workspaces configured there is
    // nowhere to reach the host from; register the attached local terminal
    // as an admin workspace so boot always leaves at least one.
    if config.workspaces.is_empty() {
        let folder = WorkspaceFolder::from(pynchy_channels_tui::LOCAL_JID);
        let workspace = Workspace {
            jid: ChatJid::from(pynchy_channels_tui::LOCAL_JID),
            name: "admin".to_string(),
            folder: folder.clone(),
            trigger: config.workspace_defaults.trigger.clone(),
            is_admin: true,
            security_profile: serde_json::Value::Null,
            added_at: pynchy_core::types::now(),
        };
        store.upsert_workspace(&workspace)?;
        if let Err(e) = std::fs::create_dir_all(groups_root.join(folder.as_str())) {
            warn!(error = %e, "failed to create bootstrap admin workspace directory");
        }
    }

    Ok(())
}

fn register_channels(channels: &mut ChannelManager, config: &PynchyConfig) -> Result<()> {
    for (name, slack_cfg) in &config.connections.slack {
        let bot_token = std::env::var(&slack_cfg.bot_token_env)
            .map_err(|_| HostError::Startup(format!("missing env var {} for slack connection {name}", slack_cfg.bot_token_env)))?;
        channels.register(Box::new(pynchy_channels_slack::SlackAdapter::new(bot_token)));
    }
    for (name, wa_cfg) in &config.connections.whatsapp {
        channels.register(Box::new(pynchy_channels_whatsapp::WhatsAppAdapter::new(wa_cfg.auth_db_path.clone())));
        let _ = name;
    }
    channels.register(Box::new(pynchy_channels_tui::TuiAdapter::new()));
    Ok(())
}

fn build_repo_contexts(config: &PynchyConfig) -> HashMap<String, RepoContext> {
    let host_repo_root = std::env::var("PYNCHY_HOST_REPO_ROOT").ok();
    config
        .repos
        .iter()
        .map(|(name, repo_cfg)| {
            let is_host_repo = host_repo_root.as_deref() == Some(repo_cfg.local_path.as_str());
            let ctx = RepoContext {
                repo_root: repo_cfg.local_path.clone(),
                repo_slug: name.replace('/', "-"),
                default_branch: "main".to_string(),
                poll_interval_secs: pynchy_core::config::DEFAULT_ORIGIN_POLL_INTERVAL_SECS,
                is_host_repo,
            };
            (name.clone(), ctx)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_mcp_server_spec_preserves_docker_launch_fields() {
        let cfg = McpServerConfig {
            launch: McpLaunchConfig::Docker { image: "notebook:latest".to_string(), port: 8765, env: HashMap::new() },
            transport: "http".to_string(),
            public_source: false,
            idle_timeout_secs: 600,
        };
        let spec = to_mcp_server_spec("notebook", &cfg);
        assert_eq!(spec.name, "notebook");
        match spec.launch {
            McpLaunch::Docker { port, .. } => assert_eq!(port, 8765),
            _ => panic!("expected docker launch"),
        }
    }
}
