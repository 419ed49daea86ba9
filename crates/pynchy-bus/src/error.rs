use thiserror::Error;

/// Errors that can occur within any channel adapter.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The underlying transport could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A message could not be delivered to the remote endpoint.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The channel rejected the supplied credentials or token.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// An operation exceeded its allowed time budget.
    #[error("operation timed out after {ms}ms")]
    Timeout { ms: u64 },

    /// The channel-specific configuration is invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// The channel does not implement this capability at all (e.g.
    /// `fetch_inbound_since` on a push-only channel, `send_ask_user` on a
    /// channel with no interactive affordance).
    #[error("{0} is not supported by this channel")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Store(#[from] pynchy_store::StoreError),
}

pub type Result<T> = std::result::Result<T, BusError>;
