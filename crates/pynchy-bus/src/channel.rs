use async_trait::async_trait;

use crate::{
    error::ChannelError,
    types::{AskUserQuestion, ChannelStatus, InboundMessage, MessageFormat},
};

/// Common interface implemented by every channel adapter (Slack, WhatsApp,
/// the local TUI, …).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`crate::manager::ChannelManager`] and driven from multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"slack"`).
    ///
    /// The name is used as the key inside
    /// [`ChannelManager`](crate::manager::ChannelManager) and must be unique
    /// across all registered adapters.
    fn name(&self) -> &str;

    /// Establish the connection to the external service.
    async fn connect(&mut self) -> Result<(), ChannelError>;

    /// Gracefully close the connection.
    async fn disconnect(&mut self) -> Result<(), ChannelError>;

    /// Return the current runtime status without blocking.
    fn status(&self) -> ChannelStatus;

    /// Send a new message to `chat_jid`, returning a channel-native message
    /// id when the platform supports in-place edits.
    async fn send_message(
        &self,
        chat_jid: &str,
        text: &str,
        format: MessageFormat,
    ) -> Result<Option<String>, ChannelError>;

    /// Edit a previously sent message in place (used by
    /// `finalize_stream_or_broadcast` to turn a streaming placeholder into
    /// final text). The default implementation reports unsupported so
    /// callers fall back to `send_message`.
    async fn update_message(
        &self,
        _chat_jid: &str,
        _message_id: &str,
        _text: &str,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("update_message"))
    }

    /// True if `jid` is a channel-native address this adapter can deliver
    /// to directly (as opposed to one that must be resolved through a JID
    /// alias first).
    fn owns_jid(&self, _jid: &str) -> bool {
        false
    }

    /// True if this adapter implements [`Channel::fetch_inbound_since`].
    fn supports_fetch_inbound(&self) -> bool {
        false
    }

    /// Fetch messages delivered to `chat_jid` since `cursor` (channel-native
    /// cursor value, `None` meaning "from the beginning"), used by the
    /// periodic reconciliation pass (§4.3).
    async fn fetch_inbound_since(
        &self,
        _chat_jid: &str,
        _cursor: Option<&str>,
    ) -> Result<Vec<InboundMessage>, ChannelError> {
        Err(ChannelError::Unsupported("fetch_inbound_since"))
    }

    /// True if this adapter implements [`Channel::send_ask_user`].
    fn supports_ask_user(&self) -> bool {
        false
    }

    /// Present an interactive question to the user, returning a
    /// channel-native message id if one was created (§4.8 ask-user).
    async fn send_ask_user(
        &self,
        _chat_jid: &str,
        _request_id: &str,
        _questions: &[AskUserQuestion],
    ) -> Result<Option<String>, ChannelError> {
        Err(ChannelError::Unsupported("send_ask_user"))
    }

    /// React to a previously delivered message with an emoji (§4.1 step 7's
    /// "working" reaction on dispatch). `sender_jid` is the original
    /// message's sender, required by channels (WhatsApp) whose reaction
    /// protocol addresses the target by `(chat, sender, message_id)` rather
    /// than `message_id` alone.
    async fn send_reaction(
        &self,
        _chat_jid: &str,
        _message_id: &str,
        _sender_jid: &str,
        _emoji: &str,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("send_reaction"))
    }

    /// Toggle the platform's "is typing" presence indicator, if it has one.
    async fn set_typing(&self, _chat_jid: &str, _is_typing: bool) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("set_typing"))
    }

    /// Create a new group chat, returning its channel-native jid.
    async fn create_group(&self, _name: &str) -> Result<String, ChannelError> {
        Err(ChannelError::Unsupported("create_group"))
    }

    /// Refresh locally cached group names/metadata from the platform.
    async fn sync_group_metadata(&self) -> Result<(), ChannelError> {
        Err(ChannelError::Unsupported("sync_group_metadata"))
    }
}
