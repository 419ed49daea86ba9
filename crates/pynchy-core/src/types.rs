use std::fmt;

use serde::{Deserialize, Serialize};

/// The unit of addressability for per-chat isolation: a directory under
/// `groups/`, a queue, a session slot, a worktree, an IPC tree, and a set
/// of config overrides. See the glossary entry "Workspace (folder)".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct WorkspaceFolder(pub String);

impl WorkspaceFolder {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkspaceFolder {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkspaceFolder {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque channel-native chat identifier (WhatsApp JID, Slack channel id,
/// TUI session handle, ...). Unique across the whole host; a workspace may
/// be reachable under multiple JIDs via a `JidAlias` row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatJid(pub String);

impl ChatJid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatJid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ChatJid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ChatJid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque session id assigned by the in-container agent runtime and
/// round-tripped through a query-done pulse (`new_session_id`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for anything correlated across IPC files (pending approvals,
/// pending questions, blocking tool calls).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message type discriminant (§3 Data Model, `Message.message_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    User,
    Assistant,
    System,
    /// Host-originated confirmations; stored so the LLM never sees them.
    Host,
    /// Delivered to humans with a 📢 prefix and folded into the agent's next turn.
    SystemNotice,
    ToolResult,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
            MessageType::Host => "host",
            MessageType::SystemNotice => "system_notice",
            MessageType::ToolResult => "tool_result",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageType::User),
            "assistant" => Ok(MessageType::Assistant),
            "system" => Ok(MessageType::System),
            "host" => Ok(MessageType::Host),
            "system_notice" => Ok(MessageType::SystemNotice),
            "tool_result" => Ok(MessageType::ToolResult),
            other => Err(format!("unknown message_type: {other}")),
        }
    }
}

/// Git merge policy for a workspace's worktree (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GitPolicy {
    #[default]
    MergeToMain,
    PullRequest,
}

/// A durable timestamp, always UTC. Stored as RFC 3339 text so it sorts
/// lexicographically the same as it sorts chronologically — `ORDER BY` on
/// the text column doubles as cursor comparison with no numeric column.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

pub fn now() -> Timestamp {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_through_string() {
        for mt in [
            MessageType::User,
            MessageType::Assistant,
            MessageType::System,
            MessageType::Host,
            MessageType::SystemNotice,
            MessageType::ToolResult,
        ] {
            let s = mt.to_string();
            let parsed: MessageType = s.parse().unwrap();
            assert_eq!(parsed, mt);
        }
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        assert!("bogus".parse::<MessageType>().is_err());
    }

    #[test]
    fn workspace_folder_displays_as_inner_string() {
        let f = WorkspaceFolder::from("acme");
        assert_eq!(f.to_string(), "acme");
    }
}
