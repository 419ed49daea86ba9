//! `GET /api/events` (§6): server-sent events mirroring the internal event
//! bus — `message`, `agent_activity`, `agent_trace`, `chat_cleared` —
//! fanned out to every connected client via a `tokio::sync::broadcast`
//! channel, the same pattern `skynet-gateway`'s WS layer uses for its own
//! client fan-out.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;

use super::HttpState;

const BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HostEvent {
    Message { chat_jid: String, content: String, sender: String },
    AgentActivity { folder: String, summary: String },
    AgentTrace { folder: String, detail: serde_json::Value },
    ChatCleared { chat_jid: String },
}

/// Fan-out handle, held by `Host` and cloned into every subsystem that
/// needs to emit an event (the router on message dispatch, the gateway's
/// tool-use stream, the clear-chat command handler).
#[derive(Clone)]
pub struct HostEventBus {
    tx: broadcast::Sender<HostEvent>,
}

impl HostEventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: HostEvent) {
        let _ = self.tx.send(event);
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.tx.subscribe()
    }
}

impl Default for HostEventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn events(
    State(state): State<Arc<HttpState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let event = item.ok()?;
        let name = match &event {
            HostEvent::Message { .. } => "message",
            HostEvent::AgentActivity { .. } => "agent_activity",
            HostEvent::AgentTrace { .. } => "agent_trace",
            HostEvent::ChatCleared { .. } => "chat_cleared",
        };
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(Event::default().event(name).data(data)))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
