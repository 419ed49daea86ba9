//! Builtin MCP-adjacent service plugins (§1.1 supplemented ambient
//! features). `caldav` and `slack_service` are kept in-tree as
//! `ServiceHandler` implementations rather than separate MCP server
//! processes, because they're thin enough wrappers around existing crates
//! (`reqwest`, `slack-morphism`) not to earn their own container. `notebook`
//! is different: it's a real MCP instance, just one with a builtin default
//! launch config so operators don't have to spell it out.

pub mod caldav;
pub mod notebook;
pub mod slack_service;

pub use caldav::CaldavService;
pub use slack_service::SlackServiceHandler;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

/// One builtin service's entry point, dispatched by name from a
/// `service:<name>` task envelope.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, folder: &str, payload: Value) -> anyhow::Result<Value>;
}

/// Process-wide registry of builtin service handlers, assembled once at
/// startup from `[caldav.servers.*]` and the Slack connection config.
#[derive(Default)]
pub struct ServiceRegistry {
    handlers: HashMap<String, Box<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, handler: Box<dyn ServiceHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub async fn dispatch(&self, command: &str, folder: &str, payload: Value) -> anyhow::Result<Value> {
        let handler = self
            .handlers
            .get(command)
            .ok_or_else(|| anyhow::anyhow!("no builtin service registered for {command}"))?;
        handler.call(folder, payload).await
    }

    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}
