//! Slack-posting tool (§1.1 supplemented ambient feature): lets a container
//! push a message to an arbitrary Slack channel/DM outside the normal
//! response-broadcast path, for things like "post today's summary to
//! #standup". Goes straight through the registered `Channel`, not the
//! ledgered `OutboundBus`, since these posts aren't replies to an inbound
//! chat message.

use std::sync::Arc;

use async_trait::async_trait;
use pynchy_bus::{ChannelManager, MessageFormat};
use serde_json::{json, Value};

use super::ServiceHandler;

pub struct SlackServiceHandler {
    channels: Arc<ChannelManager>,
}

impl SlackServiceHandler {
    pub fn new(channels: Arc<ChannelManager>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl ServiceHandler for SlackServiceHandler {
    fn name(&self) -> &str {
        "slack"
    }

    async fn call(&self, _folder: &str, payload: Value) -> anyhow::Result<Value> {
        let chat_jid = payload
            .get("chat_jid")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("slack service call missing \"chat_jid\""))?;
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("slack service call missing \"text\""))?;

        let channel = self
            .channels
            .get("slack")
            .ok_or_else(|| anyhow::anyhow!("slack channel is not connected"))?;

        let message_id = channel
            .send_message(chat_jid, text, MessageFormat::Markdown)
            .await
            .map_err(|e| anyhow::anyhow!("slack send_message failed: {e}"))?;

        Ok(json!({ "message_id": message_id }))
    }
}
