use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pynchy_core::types::{ChatJid, MessageType, Timestamp, WorkspaceFolder};
use serde::{Deserialize, Serialize};

/// §3 `Chat` — created on first inbound message, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub jid: ChatJid,
    pub name: Option<String>,
    pub last_message_time: Option<Timestamp>,
    pub cleared_at: Option<Timestamp>,
}

/// §3 `Message`. `(timestamp, id)` is the tie-breaking sort order the router
/// relies on for cursor comparisons.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub chat_jid: ChatJid,
    pub sender: String,
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: Timestamp,
    pub is_from_me: bool,
    pub message_type: MessageType,
    pub metadata: Option<serde_json::Value>,
}

/// §3 `Workspace profile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub jid: ChatJid,
    pub name: String,
    pub folder: WorkspaceFolder,
    pub trigger: String,
    pub is_admin: bool,
    /// Serialized `WorkspaceSecurityConfig` (tool tiers, default tier, rate limits).
    pub security_profile: serde_json::Value,
    pub added_at: Timestamp,
}

/// §3 `Scheduled task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Cron,
    Interval,
    Once,
}

impl ScheduleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleType::Cron => "cron",
            ScheduleType::Interval => "interval",
            ScheduleType::Once => "once",
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(ScheduleType::Cron),
            "interval" => Ok(ScheduleType::Interval),
            "once" => Ok(ScheduleType::Once),
            other => Err(format!("unknown schedule_type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Active => "active",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TaskStatus::Active),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    #[default]
    Group,
    Isolated,
}

impl ContextMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextMode::Group => "group",
            ContextMode::Isolated => "isolated",
        }
    }
}

impl std::str::FromStr for ContextMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "group" => Ok(ContextMode::Group),
            "isolated" => Ok(ContextMode::Isolated),
            other => Err(format!("unknown context_mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: String,
    pub group_folder: WorkspaceFolder,
    pub chat_jid: ChatJid,
    pub prompt: String,
    pub schedule_type: ScheduleType,
    pub schedule_value: String,
    pub next_run: Option<Timestamp>,
    pub last_run: Option<Timestamp>,
    pub last_result: Option<String>,
    pub status: TaskStatus,
    pub context_mode: ContextMode,
    pub repo_access: Option<String>,
}

/// §3 `Task run log` — append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub task_id: String,
    pub run_at: Timestamp,
    pub duration_ms: i64,
    pub status: String,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// §3 `Host job` — shell command, no container involved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostJob {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub cwd: Option<String>,
    pub timeout_seconds: u64,
    pub enabled: bool,
}

/// §3 `JID alias` — lets one logical workspace be reachable by multiple
/// channel-native addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JidAlias {
    pub alias_jid: ChatJid,
    pub canonical_jid: ChatJid,
    pub channel_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorDirection {
    Inbound,
    Outbound,
}

impl CursorDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            CursorDirection::Inbound => "inbound",
            CursorDirection::Outbound => "outbound",
        }
    }
}

/// §3 `Outbound ledger` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub chat_jid: ChatJid,
    pub content: String,
    pub timestamp: Timestamp,
    pub source: String,
}

/// §3 `Outbound delivery` row — at most one per `(ledger_id, channel_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub ledger_id: String,
    pub channel_name: String,
    pub delivered_at: Option<Timestamp>,
    pub error: Option<String>,
}

/// §3 `Router state` — `last_timestamp` plus per-workspace agent cursors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RouterState {
    pub last_timestamp: Option<Timestamp>,
    pub last_agent_timestamp: HashMap<String, Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginVerdict {
    Pass,
    Fail,
}

impl PluginVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginVerdict::Pass => "pass",
            PluginVerdict::Fail => "fail",
        }
    }
}

/// §3 `Plugin verification cache`. `error` verdicts are never constructed
/// here — the caller simply does not cache them, per spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginVerification {
    pub plugin_name: String,
    pub git_sha: String,
    pub verdict: PluginVerdict,
    pub reasoning: String,
    pub verified_at: Timestamp,
}

pub fn rfc3339(ts: &Timestamp) -> String {
    ts.to_rfc3339()
}

pub fn parse_rfc3339(s: &str) -> Result<Timestamp, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc))
}
