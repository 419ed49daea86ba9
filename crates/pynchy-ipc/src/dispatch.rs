use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{IpcError, Result};
use crate::types::TaskResponse;

/// Tier 2 handler for one `tasks/` command prefix (§4.5 "Task dispatcher").
/// Implementations are registered by command name (`sync_worktree_to_main`,
/// `create_periodic_agent`, `ask_user:ask`, `deploy`, `service:*`, ...).
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Handle one task envelope for `folder`, returning the response to
    /// write back to `responses/<request_id>.json` (if the task is
    /// blocking) or `None` for fire-and-forget commands.
    async fn handle(&self, folder: &str, request_id: Option<&str>, payload: Value) -> Result<Option<TaskResponse>>;
}

/// Tier 1 (signal-only) commands: payload is just `{"type": "<signal>"}`,
/// and only admin-workspace containers may send them (§4.5).
pub const TIER1_SIGNALS: &[&str] = &["refresh_groups"];

/// Routes `tasks/` envelopes to registered handlers by `type` prefix.
/// `service:*` is matched as a literal prefix so one handler can cover every
/// `service:<name>` MCP call; all other keys match exactly.
#[derive(Default)]
pub struct TaskDispatcher {
    handlers: HashMap<String, Box<dyn TaskHandler>>,
    prefix_handlers: Vec<(String, Box<dyn TaskHandler>)>,
}

impl TaskDispatcher {
    pub fn new() -> Self {
        Self { handlers: HashMap::new(), prefix_handlers: Vec::new() }
    }

    pub fn register(&mut self, command: impl Into<String>, handler: Box<dyn TaskHandler>) {
        self.handlers.insert(command.into(), handler);
    }

    pub fn register_prefix(&mut self, prefix: impl Into<String>, handler: Box<dyn TaskHandler>) {
        self.prefix_handlers.push((prefix.into(), handler));
    }

    /// Authorization rule (§4.5): non-admin workspaces may only target their
    /// own `chat_jid`; admin workspaces may target any. Call this before
    /// `dispatch` whenever the payload carries a `chatJid`/`chat_jid` field.
    pub fn authorize(is_admin: bool, origin_folder: &str, target_folder: Option<&str>) -> Result<()> {
        match target_folder {
            Some(target) if target != origin_folder && !is_admin => Err(IpcError::Unauthorized(
                format!("workspace {origin_folder} may not target {target}"),
            )),
            _ => Ok(()),
        }
    }

    pub async fn dispatch(
        &self,
        command: &str,
        folder: &str,
        is_admin: bool,
        request_id: Option<&str>,
        payload: Value,
    ) -> Result<Option<TaskResponse>> {
        if TIER1_SIGNALS.contains(&command) && !is_admin {
            return Err(IpcError::Unauthorized(format!(
                "non-admin workspace {folder} may not send signal {command}"
            )));
        }

        if let Some(handler) = self.handlers.get(command) {
            return handler.handle(folder, request_id, payload).await;
        }

        for (prefix, handler) in &self.prefix_handlers {
            if command.starts_with(prefix.as_str()) {
                return handler.handle(folder, request_id, payload).await;
            }
        }

        Err(IpcError::NoHandler(command.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn handle(&self, _folder: &str, _request_id: Option<&str>, payload: Value) -> Result<Option<TaskResponse>> {
            Ok(Some(TaskResponse::ok(payload)))
        }
    }

    #[tokio::test]
    async fn prefix_handler_matches_service_star() {
        let mut d = TaskDispatcher::new();
        d.register_prefix("service:", Box::new(Echo));
        let res = d
            .dispatch("service:x_post", "acme", false, None, serde_json::json!({"a": 1}))
            .await
            .unwrap();
        assert!(res.is_some());
    }

    #[tokio::test]
    async fn unknown_command_errors_rather_than_silently_dropping() {
        let d = TaskDispatcher::new();
        let res = d.dispatch("bogus", "acme", false, None, Value::Null).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn non_admin_cannot_send_tier1_signal() {
        let mut d = TaskDispatcher::new();
        d.register("refresh_groups", Box::new(Echo));
        let res = d.dispatch("refresh_groups", "acme", false, None, Value::Null).await;
        assert!(res.is_err());
    }

    #[test]
    fn authorize_blocks_non_admin_cross_workspace_targeting() {
        assert!(TaskDispatcher::authorize(false, "acme", Some("other")).is_err());
        assert!(TaskDispatcher::authorize(false, "acme", Some("acme")).is_ok());
        assert!(TaskDispatcher::authorize(true, "acme", Some("other")).is_ok());
    }
}
