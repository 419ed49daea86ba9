use serde::{Deserialize, Serialize};

/// How an MCP instance is launched (§4.6 "Docker container or host
/// subprocess").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum McpLaunch {
    Docker { image: String, port: u16, env: std::collections::HashMap<String, String> },
    HostScript { command: String, args: Vec<String>, port: u16 },
}

/// One workspace's configured MCP server, as declared under
/// `[workspaces.<folder>].mcp_servers` plus the trust map entry that
/// decides whether its responses need taint + Cop filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerSpec {
    pub name: String,
    pub launch: McpLaunch,
    pub transport: String,
    /// §4.6 "declared `public_source: true` in the trust map".
    #[serde(default)]
    pub public_source: bool,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl McpServerSpec {
    pub fn container_name(&self, folder: &str) -> String {
        format!("pynchy-mcp-{folder}-{}", self.name)
    }
}
