use std::sync::Arc;

use pynchy_core::types::{now, ChatJid};
use pynchy_store::{CursorDirection, JidAlias, LedgerEntry, StateStore};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::Result,
    manager::ChannelManager,
    types::{BroadcastOptions, DeliveryOutcome, MessageFormat},
};

/// The unified outbound bus (§4.3): one call site that fans a message out to
/// every connected channel, records the attempt to the outbound ledger, and
/// reconciles inbound/outbound state against each channel periodically.
///
/// `channels` is shared (`Arc`) rather than owned so task handlers that need
/// direct channel lookups outside the broadcast path (`ask_user:ask`, the
/// builtin `slack` service plugin) can hold the same registered set without
/// going through the bus — register and `connect_all` the manager first,
/// then wrap it once both this and those call sites need a handle.
pub struct OutboundBus {
    channels: Arc<ChannelManager>,
    store: StateStore,
}

impl OutboundBus {
    pub fn new(channels: Arc<ChannelManager>, store: StateStore) -> Self {
        Self { channels, store }
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    /// One call site for outbound delivery (§4.3 "Bus contract"). For every
    /// connected channel: resolve the alias JID (falling back to `owns_jid`),
    /// send as plain text, record to the ledger. If the ledger write fails,
    /// degrade to fire-and-forget rather than dropping the message.
    pub async fn broadcast(
        &self,
        chat_jid: &ChatJid,
        text: &str,
        opts: &BroadcastOptions,
    ) -> Result<Vec<DeliveryOutcome>> {
        self.broadcast_formatted(chat_jid, text, MessageFormat::PlainText, opts).await
    }

    /// Like [`Self::broadcast`], but converts `text` for each channel's
    /// preferred markup (`format`) before sending.
    pub async fn broadcast_formatted(
        &self,
        chat_jid: &ChatJid,
        text: &str,
        format: MessageFormat,
        opts: &BroadcastOptions,
    ) -> Result<Vec<DeliveryOutcome>> {
        let ledger_id = Uuid::now_v7().to_string();
        let ledger_written = self
            .store
            .insert_ledger_entry(&LedgerEntry {
                id: ledger_id.clone(),
                chat_jid: chat_jid.clone(),
                content: text.to_string(),
                timestamp: now(),
                source: opts.source.clone(),
            })
            .is_ok();

        let mut outcomes = Vec::new();
        for channel in self.channels.iter() {
            if opts.skip_channel.as_deref() == Some(channel.name()) {
                continue;
            }

            let target_jid = self.resolve_delivery_jid(channel.name(), chat_jid);
            let rendered = convert_format(text, format);

            if ledger_written {
                let _ = self.store.record_delivery_pending(&ledger_id, channel.name());
            }

            match channel.send_message(&target_jid, &rendered, format).await {
                Ok(message_id) => {
                    if ledger_written {
                        let _ = self.store.mark_delivered(&ledger_id, channel.name(), now());
                    }
                    outcomes.push(DeliveryOutcome { channel: channel.name().to_string(), message_id, error: None });
                }
                Err(e) => {
                    if ledger_written {
                        let _ = self.store.mark_delivery_error(&ledger_id, channel.name(), &e.to_string());
                    }
                    if opts.suppress_errors {
                        warn!(channel = channel.name(), error = %e, "suppressed broadcast error");
                    } else {
                        warn!(channel = channel.name(), error = %e, "broadcast delivery failed");
                    }
                    outcomes.push(DeliveryOutcome {
                        channel: channel.name().to_string(),
                        message_id: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    /// Finalize a streamed agent reply (§4.3). Channels that were mid-stream
    /// (identified by a prior placeholder message id in `stream_message_ids`)
    /// get an in-place `update_message`; if that fails, fall back to a fresh
    /// `send_message`. Channels with no placeholder use the normal broadcast
    /// path.
    pub async fn finalize_stream_or_broadcast(
        &self,
        chat_jid: &ChatJid,
        text: &str,
        stream_message_ids: &[(String, String)],
        opts: &BroadcastOptions,
    ) -> Result<Vec<DeliveryOutcome>> {
        let mut outcomes = Vec::new();
        let mut streamed_channels = Vec::new();

        for (channel_name, message_id) in stream_message_ids {
            streamed_channels.push(channel_name.clone());
            let Some(channel) = self.channels.get(channel_name) else { continue };
            let target_jid = self.resolve_delivery_jid(channel_name, chat_jid);

            match channel.update_message(&target_jid, message_id, text).await {
                Ok(()) => {
                    outcomes.push(DeliveryOutcome {
                        channel: channel_name.clone(),
                        message_id: Some(message_id.clone()),
                        error: None,
                    });
                }
                Err(e) => {
                    info!(channel = channel_name, error = %e, "stream update failed, sending fresh message");
                    match channel.send_message(&target_jid, text, MessageFormat::PlainText).await {
                        Ok(new_id) => outcomes.push(DeliveryOutcome {
                            channel: channel_name.clone(),
                            message_id: new_id,
                            error: None,
                        }),
                        Err(e) => outcomes.push(DeliveryOutcome {
                            channel: channel_name.clone(),
                            message_id: None,
                            error: Some(e.to_string()),
                        }),
                    }
                }
            }
        }

        let remaining_names: Vec<String> =
            self.channels.names().into_iter().filter(|n| !streamed_channels.contains(n)).collect();
        if !remaining_names.is_empty() {
            let broadcasted = self.broadcast(chat_jid, text, opts).await?;
            outcomes.extend(broadcasted.into_iter().filter(|o| remaining_names.contains(&o.channel)));
        }

        Ok(outcomes)
    }

    /// Resolve the channel-native JID to deliver to: an alias row for
    /// `(channel_name, chat_jid)` if one exists, else `chat_jid` itself
    /// (the `owns_jid` fallback from §4.3).
    fn resolve_delivery_jid(&self, channel_name: &str, chat_jid: &ChatJid) -> String {
        if let Ok(aliases) = self.store.aliases_for_canonical(chat_jid) {
            if let Some(alias) = aliases.iter().find(|a| a.channel_name == channel_name) {
                return alias.alias_jid.as_str().to_string();
            }
        }
        chat_jid.as_str().to_string()
    }

    /// Best-effort "working" reaction on the message that triggered a
    /// dispatch (§4.1 step 7). Fans out to every connected channel the same
    /// way `broadcast` does, but fire-and-forget: `Unsupported` from a
    /// channel with no reaction affordance is expected, not logged.
    pub async fn send_reaction(&self, chat_jid: &ChatJid, message_id: &str, sender_jid: &str, emoji: &str) {
        for channel in self.channels.iter() {
            let target_jid = self.resolve_delivery_jid(channel.name(), chat_jid);
            if let Err(e) = channel.send_reaction(&target_jid, message_id, sender_jid, emoji).await {
                if !matches!(e, crate::error::ChannelError::Unsupported(_)) {
                    warn!(channel = channel.name(), error = %e, "send_reaction failed");
                }
            }
        }
    }

    /// Register an alias so future broadcasts to `canonical` route to
    /// `alias_jid` on `channel_name` (used after a channel resolves its own
    /// native address for a workspace for the first time).
    pub fn remember_alias(&self, alias_jid: &ChatJid, canonical: &ChatJid, channel_name: &str) -> Result<()> {
        self.store.add_alias(&JidAlias {
            alias_jid: alias_jid.clone(),
            canonical_jid: canonical.clone(),
            channel_name: channel_name.to_string(),
        })?;
        Ok(())
    }

    /// Reconciliation pass (§4.3): for each connected channel supporting
    /// `fetch_inbound_since`, pull messages since the stored cursor and
    /// advance it. Returns the number of newly observed messages per
    /// channel; callers are responsible for merge-inserting them into the
    /// messages table (this crate does not depend on the message schema).
    pub async fn reconcile_inbound(&self, chat_jid: &ChatJid) -> Vec<(String, Vec<crate::types::InboundMessage>)> {
        let mut results = Vec::new();
        for channel in self.channels.iter() {
            if !channel.supports_fetch_inbound() {
                continue;
            }
            let cursor = self.store.get_cursor(channel.name(), chat_jid, CursorDirection::Inbound).ok().flatten();
            match channel.fetch_inbound_since(chat_jid.as_str(), cursor.as_deref()).await {
                Ok(messages) => {
                    if let Some(last) = messages.last() {
                        let _ = self.store.set_cursor(
                            channel.name(),
                            chat_jid,
                            CursorDirection::Inbound,
                            &last.cursor_id,
                        );
                    }
                    results.push((channel.name().to_string(), messages));
                }
                Err(e) => warn!(channel = channel.name(), error = %e, "inbound reconciliation failed"),
            }
        }
        results
    }

    /// Outbound retry sweep (§4.3): re-attempt every delivery row with
    /// `delivered_at IS NULL`, using the ledger's original text.
    pub async fn retry_pending_deliveries(&self) -> Result<usize> {
        let pending = self.store.pending_deliveries()?;
        let mut retried = 0;
        for (entry, delivery) in pending {
            let Some(channel) = self.channels.get(&delivery.channel_name) else { continue };
            let target_jid = self.resolve_delivery_jid(&delivery.channel_name, &entry.chat_jid);
            match channel.send_message(&target_jid, &entry.content, MessageFormat::PlainText).await {
                Ok(_) => {
                    let _ = self.store.mark_delivered(&entry.id, &delivery.channel_name, now());
                    retried += 1;
                }
                Err(e) => {
                    let _ = self.store.mark_delivery_error(&entry.id, &delivery.channel_name, &e.to_string());
                }
            }
        }
        Ok(retried)
    }
}

/// Best-effort Markdown↔plain conversion for channels without native
/// Markdown rendering. HTML targets are left to the adapter itself since the
/// escaping rules are platform-specific.
fn convert_format(text: &str, format: MessageFormat) -> String {
    match format {
        MessageFormat::PlainText => strip_markdown(text),
        MessageFormat::Markdown | MessageFormat::Html => text.to_string(),
    }
}

fn strip_markdown(text: &str) -> String {
    text.replace("**", "").replace('_', "").replace('`', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markdown_removes_common_emphasis_markers() {
        assert_eq!(strip_markdown("**bold** and `code`"), "bold and code");
    }
}
