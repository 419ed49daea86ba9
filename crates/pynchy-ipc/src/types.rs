use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `input/{unique}.json` — one queued message for the container to consume.
/// The close sentinel is an empty file named `_close`, represented
/// separately since it carries no JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl InputMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            kind: "message".to_string(),
            text: text.into(),
        }
    }
}

/// `input/initial.json` — the cold-start payload (§4.2 step 2..4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInput {
    pub messages: Vec<InputMessage>,
    pub group_folder: String,
    pub chat_jid: String,
    pub is_admin: bool,
    pub session_id: Option<String>,
    pub is_scheduled_task: bool,
    pub system_notices: Vec<String>,
    pub repo_access: Option<String>,
    pub agent_core: String,
    pub llm_base_url: String,
    pub llm_gateway_key: String,
    pub mcp_servers: Vec<McpServerRef>,
}

/// One entry of the direct-server-configs API (§4.6): what the container sees
/// for an MCP instance it's permitted to use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerRef {
    pub name: String,
    pub url: String,
    pub transport: String,
}

/// `output/{monotonic}.json` — one event emitted by the container for the
/// in-flight query. The `status`/`type` pair is the discriminant (§6, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputEvent {
    pub status: OutputStatus,
    #[serde(rename = "type")]
    pub kind: OutputKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    System,
    Result,
}

impl OutputEvent {
    /// The query-done pulse: `{status:"success", type:"result", result:null,
    /// new_session_id:"<sid>", error:null}` (§4.2, §8).
    pub fn is_query_done_pulse(&self) -> bool {
        self.status == OutputStatus::Success
            && self.kind == OutputKind::Result
            && self.result.as_ref().map(|v| v.is_null()).unwrap_or(true)
            && self.error.is_none()
    }
}

/// `tasks/{unique}.json` — a command the container sends to the host.
/// Tier 1 (signal-only, admin workspaces only) carries just `type`; Tier 2
/// carries additional fields routed by a prefix-keyed registry (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: Option<String>,
    #[serde(flatten)]
    pub payload: Value,
}

/// `responses/{request_id}.json` — the host's reply to a blocking task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResponse {
    pub fn ok(result: Value) -> Self {
        Self { result: Some(result), error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { result: None, error: Some(msg.into()) }
    }
}

/// `pending_approvals/{request_id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingApproval {
    pub request_id: String,
    pub short_id: String,
    pub source_group: String,
    pub chat_jid: String,
    pub tool_name: String,
    pub request_data: Value,
    pub timestamp: String,
}

/// `approval_decisions/{request_id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
}

/// `pending_questions/{request_id}.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    pub request_id: String,
    pub short_id: String,
    pub source_group: String,
    pub chat_jid: String,
    pub channel_name: String,
    pub session_id: Option<String>,
    pub questions: Vec<AskUserQuestion>,
    #[serde(default)]
    pub message_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskUserQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// A raw file event observed by the watcher, already classified by the
/// directory it landed under.
#[derive(Debug, Clone)]
pub struct IpcEvent {
    pub folder: String,
    pub kind: IpcEventKind,
    pub path: std::path::PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcEventKind {
    Message,
    Task,
    Output,
    ApprovalDecision,
}
