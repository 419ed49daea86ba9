//! Local TUI channel adapter.
//!
//! There is no remote service to dial: `connect` spawns a background task
//! that reads lines from stdin and forwards them as [`InboundMessage`]s
//! through an internal queue; `send_message`/`send_ask_user` print directly
//! to stdout. A single fixed `chat_jid` (`"local"`) represents the one
//! terminal session this process owns — the `tui` CLI subcommand talks to
//! the host over HTTP/websocket and never shares a process with it, so this
//! adapter only matters when the host itself is run attached to a terminal.

use std::io::Write as _;
use std::sync::RwLock;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use pynchy_bus::{AskUserQuestion, Channel, ChannelError, ChannelStatus, InboundMessage, MessageFormat};

/// The only chat JID this adapter ever owns or delivers to.
pub const LOCAL_JID: &str = "local";

/// Channel adapter for the attached local terminal.
pub struct TuiAdapter {
    status: RwLock<ChannelStatus>,
    inbound_tx: mpsc::Sender<InboundMessage>,
    inbound_rx: std::sync::Mutex<Option<mpsc::Receiver<InboundMessage>>>,
}

impl TuiAdapter {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self { status: RwLock::new(ChannelStatus::Disconnected), inbound_tx, inbound_rx: std::sync::Mutex::new(Some(inbound_rx)) }
    }

    /// Takes ownership of the inbound queue. Call once, after `connect`, and
    /// drain it into the router's inbound pipeline (§4.1) — the same way a
    /// webhook handler would push a push-delivered message in directly.
    pub fn take_inbound_receiver(&self) -> Option<mpsc::Receiver<InboundMessage>> {
        self.inbound_rx.lock().unwrap().take()
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().unwrap() = status;
    }
}

impl Default for TuiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TuiAdapter {
    fn name(&self) -> &str {
        "tui"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);
        let tx = self.inbound_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let msg = InboundMessage {
                            channel: "tui".to_string(),
                            chat_jid: LOCAL_JID.to_string(),
                            sender_name: None,
                            content: line,
                            timestamp: chrono::Utc::now().to_rfc3339(),
                            cursor_id: uuid_like_cursor(),
                        };
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("tui: stdin closed, inbound loop exiting");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tui: stdin read error");
                        break;
                    }
                }
            }
        });
        self.set_status(ChannelStatus::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().unwrap().clone()
    }

    async fn send_message(&self, chat_jid: &str, text: &str, format: MessageFormat) -> Result<Option<String>, ChannelError> {
        if chat_jid != LOCAL_JID {
            return Err(ChannelError::SendFailed(format!("unknown tui chat_jid {chat_jid}")));
        }
        print_block(text, format);
        Ok(None)
    }

    fn owns_jid(&self, jid: &str) -> bool {
        jid == LOCAL_JID
    }

    fn supports_ask_user(&self) -> bool {
        true
    }

    async fn send_ask_user(&self, chat_jid: &str, _request_id: &str, questions: &[AskUserQuestion]) -> Result<Option<String>, ChannelError> {
        if chat_jid != LOCAL_JID {
            return Err(ChannelError::SendFailed(format!("unknown tui chat_jid {chat_jid}")));
        }
        let mut out = String::new();
        for q in questions {
            out.push_str(&format!("? {}\n", q.question));
            for (i, opt) in q.options.iter().enumerate() {
                out.push_str(&format!("    {}. {opt}\n", i + 1));
            }
        }
        print_block(&out, MessageFormat::PlainText);
        // No message id: the local terminal has no addressable message to
        // correlate a reply to, so the next inbound line is treated by the
        // router as the answer for this workspace's pending question.
        Ok(None)
    }
}

fn print_block(text: &str, _format: MessageFormat) {
    let mut stdout = std::io::stdout();
    let _ = writeln!(stdout, "{text}");
    let _ = stdout.flush();
}

/// Cheap, dependency-free cursor id — monotonic enough for the local
/// single-process case `fetch_inbound_since` is never actually called
/// against (the TUI channel is push-only).
fn uuid_like_cursor() -> String {
    format!("{:016x}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owns_only_the_local_jid() {
        let adapter = TuiAdapter::new();
        assert!(adapter.owns_jid(LOCAL_JID));
        assert!(!adapter.owns_jid("slack:C123"));
    }

    #[tokio::test]
    async fn connect_sets_connected_status() {
        let mut adapter = TuiAdapter::new();
        assert_eq!(adapter.status(), ChannelStatus::Disconnected);
        adapter.connect().await.unwrap();
        assert_eq!(adapter.status(), ChannelStatus::Connected);
    }

    #[tokio::test]
    async fn send_message_rejects_foreign_jid() {
        let adapter = TuiAdapter::new();
        let err = adapter.send_message("slack:C1", "hi", MessageFormat::PlainText).await.unwrap_err();
        assert!(matches!(err, ChannelError::SendFailed(_)));
    }

    #[test]
    fn inbound_receiver_can_only_be_taken_once() {
        let adapter = TuiAdapter::new();
        assert!(adapter.take_inbound_receiver().is_some());
        assert!(adapter.take_inbound_receiver().is_none());
    }
}
