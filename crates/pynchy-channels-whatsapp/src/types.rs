//! Wire protocol spoken with the WhatsApp bridge process.
//!
//! The multi-device WhatsApp protocol (whatsmeow) has no native Rust
//! binding; rather than hand-roll the Noise handshake this adapter drives a
//! small JSON-over-websocket bridge process (the external collaborator the
//! original `neonize` channel wraps in-process) the same way the host drives
//! a container: one connection, newline-delimited JSON frames, correlated by
//! `request_id` for anything that expects a reply.

use serde::{Deserialize, Serialize};

/// Frame sent from the host to the bridge.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeCommand {
    Send { request_id: String, jid: String, text: String },
    SetTyping { jid: String, is_typing: bool },
    SendReaction { request_id: String, chat_jid: String, message_id: String, sender_jid: String, emoji: String },
    MarkRead { chat_jid: String, message_id: String, sender_jid: String },
    CreateGroup { request_id: String, name: String },
    SyncGroupMetadata { force: bool },
}

/// Frame received from the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeEvent {
    Connected,
    Disconnected,
    LoggedOut,
    QrRequired,
    Message {
        id: String,
        chat_jid: String,
        sender: String,
        sender_name: Option<String>,
        content: String,
        timestamp: String,
        #[serde(default)]
        is_from_me: bool,
    },
    ChatMetadata {
        chat_jid: String,
        name: Option<String>,
    },
    Ack {
        request_id: String,
        message_id: Option<String>,
    },
    Error {
        request_id: Option<String>,
        error: String,
    },
}
