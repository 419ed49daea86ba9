//! Notebook server plugin (§1.1 supplemented ambient feature,
//! `integrations/plugins/notebook_server/`): a Jupyter-notebook-shaped tool
//! surface. Unlike `caldav`/`slack_service` this isn't a `ServiceHandler` —
//! it's just another lazily-started MCP instance (§4.6), so the only thing
//! this module contributes is the builtin default for `[mcp_servers.notebook]`
//! so a workspace can list `"notebook"` without also having to spell out its
//! launch parameters.

use std::collections::HashMap;

use pynchy_core::config::{McpLaunchConfig, McpServerConfig};

const BUILTIN_NAME: &str = "notebook";
const DEFAULT_IMAGE: &str = "pynchy/notebook-server:latest";
const DEFAULT_PORT: u16 = 8765;

fn default_notebook_config() -> McpServerConfig {
    McpServerConfig {
        launch: McpLaunchConfig::Docker { image: DEFAULT_IMAGE.to_string(), port: DEFAULT_PORT, env: HashMap::new() },
        transport: "http".to_string(),
        public_source: false,
        idle_timeout_secs: 600,
    }
}

/// Inserts the builtin `notebook` entry if the operator hasn't declared one
/// under `[mcp_servers.notebook]` themselves; an explicit config entry always
/// wins.
pub fn merge_builtin_defaults(mcp_servers: &mut HashMap<String, McpServerConfig>) {
    mcp_servers.entry(BUILTIN_NAME.to_string()).or_insert_with(default_notebook_config);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_is_not_overwritten() {
        let mut servers = HashMap::new();
        servers.insert(
            BUILTIN_NAME.to_string(),
            McpServerConfig {
                launch: McpLaunchConfig::Docker { image: "custom:1".to_string(), port: 9, env: HashMap::new() },
                transport: "http".to_string(),
                public_source: false,
                idle_timeout_secs: 1,
            },
        );
        merge_builtin_defaults(&mut servers);
        match &servers[BUILTIN_NAME].launch {
            McpLaunchConfig::Docker { image, .. } => assert_eq!(image, "custom:1"),
            _ => panic!("expected docker launch"),
        }
    }

    #[test]
    fn missing_config_gets_builtin_default() {
        let mut servers = HashMap::new();
        merge_builtin_defaults(&mut servers);
        assert!(servers.contains_key(BUILTIN_NAME));
    }
}
