use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{PynchyError, Result};

pub const APPROVAL_TIMEOUT_SECONDS: u64 = 600;
pub const DEFAULT_ORIGIN_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CATCHUP_INTERVAL_SECS: u64 = 10;

/// Top-level config (`config.toml` + `PYNCHY_*` env overrides). Mirrors §6's
/// section table one struct per `[section]`. Unknown keys anywhere in the
/// tree are rejected at load time.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PynchyConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub owner: OwnerConfig,
    #[serde(default)]
    pub connections: ConnectionsConfig,
    #[serde(default)]
    pub command_center: Option<String>,
    #[serde(default)]
    pub workspace_defaults: WorkspaceDefaultsConfig,
    #[serde(default)]
    pub workspaces: HashMap<String, WorkspaceConfig>,
    #[serde(default)]
    pub commands: CommandsConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub cron_jobs: HashMap<String, CronJobConfig>,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub caldav: CaldavConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub directives: HashMap<String, DirectiveConfig>,
    #[serde(default)]
    pub repos: HashMap<String, RepoConfig>,
    /// `[mcp_servers.<name>]` — launch parameters for the instances a
    /// workspace names in its `mcp_servers` list (§4.6). Keyed by the same
    /// name `WorkspaceConfig::mcp_servers` refers to.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

/// How an MCP instance declared under `[mcp_servers.<name>]` is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "launch", rename_all = "kebab-case", deny_unknown_fields)]
pub enum McpLaunchConfig {
    Docker {
        image: String,
        port: u16,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    HostScript {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        port: u16,
    },
}

/// `[mcp_servers.<name>]`. `pynchy-host` resolves each workspace's
/// `mcp_servers: Vec<String>` name list against this map to build the
/// `pynchy-gateway::mcp::McpServerSpec` values `McpRegistry` needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McpServerConfig {
    #[serde(flatten)]
    pub launch: McpLaunchConfig,
    #[serde(default = "default_mcp_transport")]
    pub transport: String,
    /// §4.6 "declared `public_source: true` in the trust map".
    #[serde(default)]
    pub public_source: bool,
    #[serde(default = "default_mcp_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_mcp_transport() -> String {
    "http".to_string()
}
fn default_mcp_idle_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Drives the trigger pattern: `@<name>` matches this agent's mentions.
    pub name: String,
    #[serde(default)]
    pub trigger_aliases: Vec<String>,
    /// Selects the `AgentCoreDescriptor` wired at startup (§9).
    #[serde(default = "default_agent_core")]
    pub agent_core: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "pynchy".to_string(),
            trigger_aliases: Vec::new(),
            agent_core: default_agent_core(),
        }
    }
}

fn default_agent_core() -> String {
    "claude-code".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerConfig {
    #[serde(default = "default_container_image")]
    pub image: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Overrides `docker` as the container runtime binary (e.g. `podman`).
    pub runtime: Option<String>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: default_container_image(),
            timeout_ms: default_timeout_ms(),
            max_output_size: default_max_output_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_concurrent: default_max_concurrent(),
            runtime: None,
        }
    }
}

fn default_container_image() -> String {
    "pynchy/agent-runtime:latest".to_string()
}
fn default_timeout_ms() -> u64 {
    300_000
}
fn default_max_output_size() -> usize {
    2 * 1024 * 1024
}
fn default_idle_timeout_ms() -> u64 {
    600_000
}
fn default_max_concurrent() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_server_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
        }
    }
}

fn default_server_port() -> u16 {
    8787
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Raw secret strings. None of these are ever logged; `Debug` is derived but
/// every field is masked — see the `Debug` impl below.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SecretsConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gh_token: Option<String>,
    pub claude_oauth_token: Option<String>,
}

impl std::fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "<redacted>"))
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "<redacted>"))
            .field("gh_token", &self.gh_token.as_ref().map(|_| "<redacted>"))
            .field("claude_oauth_token", &self.claude_oauth_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
    /// How the container reaches the host, e.g. `host.docker.internal`.
    #[serde(default = "default_container_facing_host")]
    pub container_facing_host: String,
    /// Selects LiteLLM mode when set (§4.6).
    pub litellm_config: Option<String>,
    #[serde(default)]
    pub images: LiteLlmImages,
    pub master_key: Option<String>,
    #[serde(default)]
    pub ui_creds: Option<UiCreds>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            container_facing_host: default_container_facing_host(),
            litellm_config: None,
            images: LiteLlmImages::default(),
            master_key: None,
            ui_creds: None,
        }
    }
}

fn default_gateway_port() -> u16 {
    18080
}
fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_container_facing_host() -> String {
    "host.docker.internal".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LiteLlmImages {
    pub postgres: Option<String>,
    pub litellm: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiCreds {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct OwnerConfig {
    /// Per-platform owner identity, e.g. `{"slack": "U0123", "whatsapp": "1555...@s.whatsapp.net"}`.
    #[serde(flatten)]
    pub identities: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConnectionsConfig {
    #[serde(default)]
    pub slack: HashMap<String, SlackConnectionConfig>,
    #[serde(default)]
    pub whatsapp: HashMap<String, WhatsappConnectionConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SlackConnectionConfig {
    pub bot_token_env: String,
    pub app_token_env: String,
    pub security: Option<String>,
    #[serde(default)]
    pub chat: HashMap<String, ChatOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WhatsappConnectionConfig {
    pub auth_db_path: String,
    pub security: Option<String>,
    #[serde(default)]
    pub chat: HashMap<String, ChatOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ChatOverride {
    pub access: Option<AccessLevel>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessLevel {
    ReadWrite,
    Read,
    WriteOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceDefaultsConfig {
    #[serde(default)]
    pub context_mode: ContextMode,
    #[serde(default = "default_access")]
    pub access: AccessLevel,
    pub mode: Option<String>,
    pub trust: Option<String>,
    #[serde(default = "default_trigger")]
    pub trigger: String,
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl Default for WorkspaceDefaultsConfig {
    fn default() -> Self {
        Self {
            context_mode: ContextMode::default(),
            access: default_access(),
            mode: None,
            trust: None,
            trigger: default_trigger(),
            allowed_users: vec!["owner".to_string()],
        }
    }
}

fn default_access() -> AccessLevel {
    AccessLevel::ReadWrite
}
fn default_trigger() -> String {
    "mention".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ContextMode {
    #[default]
    Group,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    pub name: String,
    pub chat: String,
    #[serde(default)]
    pub is_admin: bool,
    pub repo_access: Option<String>,
    pub schedule: Option<String>,
    pub prompt: Option<String>,
    pub context_mode: Option<ContextMode>,
    #[serde(default)]
    pub security: WorkspaceSecurityConfig,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub mcp_servers: Vec<String>,
    #[serde(default)]
    pub mcp_kwargs: HashMap<String, serde_json::Value>,
    pub access: Option<AccessLevel>,
    pub mode: Option<String>,
    pub trust: Option<String>,
    pub trigger: Option<String>,
    pub allowed_users: Option<Vec<String>>,
    #[serde(default)]
    pub git_policy: crate::types::GitPolicy,
    /// Per-workspace idle timeout override, in ms; `0` disables the idle timer.
    pub idle_terminate: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSecurityConfig {
    /// Per-tool risk tier overrides, tool name → tier.
    #[serde(default)]
    pub tool_tiers: HashMap<String, RiskTier>,
    #[serde(default = "default_tier")]
    pub default_tier: RiskTier,
    #[serde(default = "default_rate_limit")]
    pub max_calls_per_hour: u32,
    #[serde(default)]
    pub tool_rate_limits: HashMap<String, u32>,
}

fn default_tier() -> RiskTier {
    RiskTier::RulesEngine
}
fn default_rate_limit() -> u32 {
    120
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskTier {
    AlwaysApprove,
    RulesEngine,
    HumanApproval,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandsConfig {
    #[serde(default = "default_reset_aliases")]
    pub reset_aliases: Vec<String>,
    #[serde(default = "default_reset_verbs")]
    pub reset_verbs: Vec<String>,
    #[serde(default = "default_reset_nouns")]
    pub reset_nouns: Vec<String>,
    #[serde(default = "default_end_aliases")]
    pub end_session_aliases: Vec<String>,
    #[serde(default = "default_end_verbs")]
    pub end_session_verbs: Vec<String>,
    #[serde(default = "default_end_nouns")]
    pub end_session_nouns: Vec<String>,
    #[serde(default = "default_redeploy_aliases")]
    pub redeploy_aliases: Vec<String>,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            reset_aliases: default_reset_aliases(),
            reset_verbs: default_reset_verbs(),
            reset_nouns: default_reset_nouns(),
            end_session_aliases: default_end_aliases(),
            end_session_verbs: default_end_verbs(),
            end_session_nouns: default_end_nouns(),
            redeploy_aliases: default_redeploy_aliases(),
        }
    }
}

fn default_reset_aliases() -> Vec<String> {
    vec!["boom".into(), "c".into()]
}
fn default_reset_verbs() -> Vec<String> {
    vec!["reset".into(), "clear".into(), "new".into()]
}
fn default_reset_nouns() -> Vec<String> {
    vec!["context".into(), "chat".into(), "session".into()]
}
fn default_end_aliases() -> Vec<String> {
    vec!["done".into(), "bye".into(), "cya".into()]
}
fn default_end_verbs() -> Vec<String> {
    vec!["end".into()]
}
fn default_end_nouns() -> Vec<String> {
    vec!["session".into()]
}
fn default_redeploy_aliases() -> Vec<String> {
    vec!["r".into(), "redeploy".into(), "deploy".into()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_scheduler_poll_interval")]
    pub poll_interval: u64,
    /// Empty string means auto-detect: `$TZ`, then `/etc/localtime`, then UTC.
    #[serde(default)]
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_scheduler_poll_interval(),
            timezone: String::new(),
        }
    }
}

fn default_scheduler_poll_interval() -> u64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CronJobConfig {
    pub schedule: String,
    pub command: String,
    pub cwd: Option<String>,
    #[serde(default = "default_cron_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "bool_true")]
    pub enabled: bool,
}

fn default_cron_timeout() -> u64 {
    300
}

fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IntervalsConfig {
    #[serde(default = "default_message_poll")]
    pub message_poll: u64,
    #[serde(default = "default_ipc_poll")]
    pub ipc_poll: u64,
    /// §4.3 catch-up sweep: how often to run `reconcile_inbound` across every
    /// workspace and retry pending outbound deliveries, in seconds.
    #[serde(default = "default_catchup_interval")]
    pub catchup_interval: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            message_poll: default_message_poll(),
            ipc_poll: default_ipc_poll(),
            catchup_interval: default_catchup_interval(),
        }
    }
}

fn default_message_poll() -> u64 {
    2
}
fn default_ipc_poll() -> u64 {
    1
}
fn default_catchup_interval() -> u64 {
    DEFAULT_CATCHUP_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_retry_seconds")]
    pub base_retry_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_retry_seconds: default_base_retry_seconds(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}
fn default_base_retry_seconds() -> u64 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct CaldavConfig {
    #[serde(default)]
    pub servers: HashMap<String, CaldavServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaldavServerConfig {
    pub url: String,
    pub username: String,
    pub password: String,
    pub default_calendar: Option<String>,
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct SecurityConfig {
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DirectiveConfig {
    pub file: String,
    /// Scope: a workspace folder, "all", a repo slug, or a list of those.
    pub scope: DirectiveScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectiveScope {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    pub local_path: String,
    pub gh_token_env: Option<String>,
}

impl PynchyConfig {
    /// Load config from `config.toml` with `PYNCHY_*` env var overrides.
    ///
    /// Resolution order: explicit path argument, else
    /// `$PYNCHY_PROJECT_ROOT/config.toml`, else `./config.toml`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PynchyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PYNCHY_").split("__"))
            .extract()
            .map_err(|e| PynchyError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let root = project_root();
    format!("{root}/config.toml")
}

/// Resolves `PYNCHY_PROJECT_ROOT`, falling back to the current directory.
pub fn project_root() -> String {
    std::env::var("PYNCHY_PROJECT_ROOT").unwrap_or_else(|_| ".".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_defaults_match_spec_defaults() {
        let d = WorkspaceDefaultsConfig::default();
        assert_eq!(d.trigger, "mention");
        assert_eq!(d.access, AccessLevel::ReadWrite);
        assert_eq!(d.allowed_users, vec!["owner".to_string()]);
    }

    #[test]
    fn commands_config_accepts_both_verb_noun_orderings_as_separate_lists() {
        let c = CommandsConfig::default();
        assert!(c.reset_verbs.contains(&"reset".to_string()));
        assert!(c.reset_nouns.contains(&"context".to_string()));
    }

    #[test]
    fn secrets_debug_output_never_contains_raw_values() {
        let s = SecretsConfig {
            anthropic_api_key: Some("sk-ant-super-secret".to_string()),
            ..Default::default()
        };
        let debug = format!("{s:?}");
        assert!(!debug.contains("sk-ant-super-secret"));
    }
}
