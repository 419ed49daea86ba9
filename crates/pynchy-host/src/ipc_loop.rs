//! Drains the `IpcWatcher`'s event channel and routes each file to the
//! subsystem that owns its meaning (§4.5, §4.9 phase 4): `tasks/` envelopes
//! go through the `TaskDispatcher`, `output/` pulses settle the matching
//! `ContainerSession`, and `approval_decisions/` files resolve a pending
//! `ApprovalCoordinator` future.

use std::sync::Arc;

use pynchy_approval::ApprovalCoordinator;
use pynchy_bus::{BroadcastOptions, OutboundBus};
use pynchy_core::types::ChatJid;
use pynchy_ipc::{
    read_and_consume, IpcEvent, IpcEventKind, IpcPaths, OutputEvent, OutputKind, OutputStatus, TaskDispatcher,
    TaskEnvelope, TaskResponse,
};
use pynchy_session::SessionManager;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Owns the watcher's receiver end and runs for the lifetime of the process.
/// `is_admin_for` resolves whether a folder's workspace is admin, needed by
/// `TaskDispatcher::authorize` for cross-workspace task targets. `chat_jid_for`
/// resolves a folder's workspace jid, needed to forward agent output (§2,
/// §4.7 step 3) to the right chat.
pub async fn run(
    mut rx: mpsc::UnboundedReceiver<IpcEvent>,
    paths: IpcPaths,
    dispatcher: Arc<TaskDispatcher>,
    sessions: Arc<SessionManager>,
    approvals: Arc<ApprovalCoordinator>,
    bus: Arc<OutboundBus>,
    is_admin_for: impl Fn(&str) -> bool + Send + Sync + 'static,
    chat_jid_for: impl Fn(&str) -> Option<ChatJid> + Send + Sync + 'static,
) {
    info!("ipc event loop started");
    while let Some(event) = rx.recv().await {
        match event.kind {
            IpcEventKind::Task => handle_task(&event, &paths, &dispatcher, &is_admin_for).await,
            IpcEventKind::Output => handle_output(&event, &paths, &sessions, &bus, &chat_jid_for).await,
            IpcEventKind::ApprovalDecision => {
                if let Err(e) = approvals.handle_decision_file(&event.folder, &event.path) {
                    warn!(folder = %event.folder, error = %e, "approval decision handling failed");
                }
            }
            // Input files are host-authored (initial.json, warm messages);
            // the watcher only ever observes them during crash-recovery
            // sweep, where there is nothing left for the host to react to.
            IpcEventKind::Message => {}
        }
    }
    info!("ipc event loop exiting: channel closed");
}

async fn handle_task(
    event: &IpcEvent,
    paths: &IpcPaths,
    dispatcher: &TaskDispatcher,
    is_admin_for: &(impl Fn(&str) -> bool + Send + Sync),
) {
    let envelope: TaskEnvelope = match read_and_consume(&event.path, &event.folder, &paths.errors_dir()) {
        Ok(Some(envelope)) => envelope,
        Ok(None) => return,
        Err(e) => {
            warn!(folder = %event.folder, error = %e, "failed to parse task envelope");
            return;
        }
    };

    let is_admin = is_admin_for(&event.folder);
    let request_id = envelope.request_id.clone();
    let result = dispatcher
        .dispatch(&envelope.kind, &event.folder, is_admin, request_id.as_deref(), envelope.payload)
        .await;

    let response = match result {
        Ok(response) => response,
        Err(e) => Some(TaskResponse::err(e.to_string())),
    };

    if let (Some(response), Some(request_id)) = (response, request_id) {
        let path = paths.responses_dir(&event.folder).join(format!("{request_id}.json"));
        if let Err(e) = pynchy_ipc::write_json_atomic(&path, &response) {
            warn!(folder = %event.folder, request_id, error = %e, "failed to write task response");
        }
    }
}

/// Routes one `output/{monotonic}.json` event (§2 "container emits output
/// files -> ... -> outbound bus -> channel send"). The query-done pulse
/// settles the matching session and never reaches the bus; every other
/// event kind is forwarded as a chat message, skipping `thinking`/
/// `tool_result` which carry nothing a user needs to see.
async fn handle_output(
    event: &IpcEvent,
    paths: &IpcPaths,
    sessions: &SessionManager,
    bus: &OutboundBus,
    chat_jid_for: &(impl Fn(&str) -> Option<ChatJid> + Send + Sync),
) {
    let output: OutputEvent = match read_and_consume(&event.path, &event.folder, &paths.errors_dir()) {
        Ok(Some(output)) => output,
        Ok(None) => return,
        Err(e) => {
            warn!(folder = %event.folder, error = %e, "failed to parse output event");
            return;
        }
    };

    if output.is_query_done_pulse() {
        let Some(new_session_id) = output.new_session_id else {
            warn!(folder = %event.folder, "query-done pulse missing new_session_id");
            return;
        };
        match sessions.session(&event.folder) {
            Some(session) => session.record_pulse(new_session_id),
            None => warn!(folder = %event.folder, "query-done pulse for unknown session"),
        }
        return;
    }

    let Some(chat_jid) = chat_jid_for(&event.folder) else {
        warn!(folder = %event.folder, "output event for unregistered workspace, dropping");
        return;
    };

    let text = match output.kind {
        OutputKind::Text => output.text.filter(|t| !t.is_empty()),
        // §4.7 step 3: stream a short preview of each tool call as it runs.
        OutputKind::ToolUse => output.tool_name.as_deref().map(|name| format!("🔧 {name}")),
        OutputKind::System => output.text.filter(|t| !t.is_empty()),
        OutputKind::Result if output.status == OutputStatus::Error => {
            output.error.map(|e| format!("⚠️ {e}"))
        }
        OutputKind::Thinking | OutputKind::ToolResult | OutputKind::Result => None,
    };

    let Some(text) = text else { return };
    let opts = if output.kind == OutputKind::System { BroadcastOptions::system_notice() } else { BroadcastOptions::agent() };
    if let Err(e) = bus.broadcast(&chat_jid, &text, &opts).await {
        warn!(folder = %event.folder, error = %e, "failed to broadcast agent output");
    }
}
