use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use slack_morphism::prelude::*;
use tracing::{info, warn};

use pynchy_bus::{AskUserQuestion, Channel, ChannelError, ChannelStatus, InboundMessage, MessageFormat};

use crate::context::SlackAppContext;
use crate::error::SlackError;
use crate::send::split_chunks;

/// Slack channel adapter, backed by `slack-morphism`'s Web API client.
///
/// Connection is a readiness check (`auth.test`) rather than a persistent
/// gateway socket — Slack delivery for this host is push (chat.postMessage)
/// only, so there is no long-lived connection to keep alive the way a
/// gateway-based adapter requires.
pub struct SlackAdapter {
    ctx: SlackAppContext,
    status: RwLock<ChannelStatus>,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self { ctx: SlackAppContext::new(bot_token), status: RwLock::new(ChannelStatus::Disconnected) }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.write().unwrap() = status;
    }
}

#[async_trait]
impl Channel for SlackAdapter {
    fn name(&self) -> &str {
        "slack"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);
        let session = self.ctx.session();
        match session.auth_test().await {
            Ok(resp) => {
                info!(team = %resp.team, "slack: connected");
                self.set_status(ChannelStatus::Connected);
                Ok(())
            }
            Err(e) => {
                let msg = e.to_string();
                self.set_status(ChannelStatus::Error(msg.clone()));
                Err(SlackError::Api(msg).into())
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    fn status(&self) -> ChannelStatus {
        self.status.read().unwrap().clone()
    }

    async fn send_message(
        &self,
        chat_jid: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<Option<String>, ChannelError> {
        let session = self.ctx.session();
        let channel = SlackChannelId(chat_jid.to_string());
        let mut last_ts = None;

        for chunk in split_chunks(text) {
            let content = match format {
                MessageFormat::Markdown | MessageFormat::PlainText => SlackMessageContent::new().with_text(chunk),
                MessageFormat::Html => SlackMessageContent::new().with_text(chunk),
            };
            let request = SlackApiChatPostMessageRequest::new(channel.clone(), content);
            match session.chat_post_message(&request).await {
                Ok(resp) => last_ts = Some(resp.ts.to_string()),
                Err(e) => {
                    warn!(error = %e, "slack: send_message failed");
                    return Err(SlackError::Api(e.to_string()).into());
                }
            }
        }

        Ok(last_ts)
    }

    async fn update_message(&self, chat_jid: &str, message_id: &str, text: &str) -> Result<(), ChannelError> {
        let session = self.ctx.session();
        let channel = SlackChannelId(chat_jid.to_string());
        let ts = SlackTs(message_id.to_string());
        let content = SlackMessageContent::new().with_text(text.to_string());
        let request = SlackApiChatUpdateRequest::new(channel, content, ts);

        session.chat_update(&request).await.map_err(|e| SlackError::Api(e.to_string()))?;
        Ok(())
    }

    fn owns_jid(&self, jid: &str) -> bool {
        jid.starts_with('C') || jid.starts_with('D') || jid.starts_with('G')
    }

    fn supports_fetch_inbound(&self) -> bool {
        true
    }

    async fn fetch_inbound_since(
        &self,
        chat_jid: &str,
        cursor: Option<&str>,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        let session = self.ctx.session();
        let mut request = SlackApiConversationsHistoryRequest::new().with_channel(SlackChannelId(chat_jid.to_string()));
        if let Some(cursor) = cursor {
            request = request.with_oldest(SlackTs(cursor.to_string()));
        }

        let resp = session.conversations_history(&request).await.map_err(|e| SlackError::Api(e.to_string()))?;

        let messages = resp
            .messages
            .into_iter()
            .map(|m| InboundMessage {
                channel: "slack".to_string(),
                chat_jid: chat_jid.to_string(),
                sender_name: m.sender.user.map(|u| u.to_string()),
                content: m.content.text.unwrap_or_default(),
                timestamp: m.origin.ts.to_string(),
                cursor_id: m.origin.ts.to_string(),
            })
            .collect();

        Ok(messages)
    }

    async fn send_reaction(&self, chat_jid: &str, message_id: &str, _sender_jid: &str, emoji: &str) -> Result<(), ChannelError> {
        let session = self.ctx.session();
        let request = SlackApiReactionsAddRequest::new(
            SlackChannelId(chat_jid.to_string()),
            SlackReactionName(emoji.trim_matches(':').to_string()),
            SlackTs(message_id.to_string()),
        );
        session.reactions_add(&request).await.map_err(|e| SlackError::Api(e.to_string()))?;
        Ok(())
    }

    /// Slack has no user-level typing indicator API; treated as a no-op
    /// rather than `Unsupported` so callers don't log spurious warnings.
    async fn set_typing(&self, _chat_jid: &str, _is_typing: bool) -> Result<(), ChannelError> {
        Ok(())
    }

    fn supports_ask_user(&self) -> bool {
        true
    }

    async fn send_ask_user(
        &self,
        chat_jid: &str,
        request_id: &str,
        questions: &[AskUserQuestion],
    ) -> Result<Option<String>, ChannelError> {
        let mut text = String::new();
        for q in questions {
            text.push_str(&format!("❓ {}\n", q.question));
            for (i, opt) in q.options.iter().enumerate() {
                text.push_str(&format!("  {}. {}\n", i + 1, opt));
            }
        }
        text.push_str(&format!("\n_reply in this thread to answer (request {request_id})_"));

        self.send_message(chat_jid, &text, MessageFormat::PlainText).await
    }
}

/// Construct a shared [`SlackAppContext`] wrapped for reuse across adapter
/// instances registered under different workspaces but the same bot token.
pub fn shared_context(bot_token: impl Into<String>) -> Arc<SlackAppContext> {
    Arc::new(SlackAppContext::new(bot_token))
}
