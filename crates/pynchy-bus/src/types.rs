use serde::{Deserialize, Serialize};

/// A message received from an external channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Logical channel name (e.g. `"slack"`, `"whatsapp"`).
    pub channel: String,

    /// Channel-native chat/conversation identifier.
    pub chat_jid: String,

    /// Human-readable display name for the sender, if available.
    pub sender_name: Option<String>,

    /// Plain text content of the message.
    pub content: String,

    /// ISO-8601 timestamp of when the message was received.
    pub timestamp: String,

    /// A stable id usable as a cursor for `fetch_inbound_since`.
    pub cursor_id: String,
}

/// A message to be delivered to an external channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: String,
    pub chat_jid: String,
    pub content: String,
    pub format: MessageFormat,
}

/// Formatting hint for outbound message content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    PlainText,
    Markdown,
    Html,
}

/// Runtime connection state of a channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Connected,
    Connecting,
    Disconnected,
    Error(String),
}

/// Options accepted by [`crate::bus::OutboundBus::broadcast`] (§4.3).
#[derive(Debug, Clone, Default)]
pub struct BroadcastOptions {
    /// Log delivery failures rather than returning them to the caller.
    pub suppress_errors: bool,
    /// Never deliver to this channel (e.g. the channel the message
    /// originated from, to avoid echoing it back).
    pub skip_channel: Option<String>,
    /// Ledger `source` column: `"agent"`, `"system"`, `"host"`.
    pub source: String,
}

impl BroadcastOptions {
    pub fn agent() -> Self {
        Self { source: "agent".to_string(), ..Default::default() }
    }

    pub fn system_notice() -> Self {
        Self { source: "system".to_string(), ..Default::default() }
    }

    /// A human operator's message sent through `POST /api/send` — stored
    /// with `message_type=host` so the agent never sees its own control
    /// plane traffic as chat input.
    pub fn host() -> Self {
        Self { source: "host".to_string(), ..Default::default() }
    }
}

/// One question posed by `ask_user:ask` (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskUserQuestion {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
}

/// The outcome of one per-channel delivery attempt inside a broadcast.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub channel: String,
    pub message_id: Option<String>,
    pub error: Option<String>,
}
