/// Errors produced by the Slack adapter.
#[derive(Debug, thiserror::Error)]
pub enum SlackError {
    #[error("slack api error: {0}")]
    Api(String),

    #[error("no bot token configured")]
    NoToken,

    #[error("channel {0} is not connected")]
    NotConnected(String),
}

impl From<SlackError> for pynchy_bus::ChannelError {
    fn from(e: SlackError) -> Self {
        match e {
            SlackError::NoToken => pynchy_bus::ChannelError::AuthFailed("no bot token configured".into()),
            SlackError::NotConnected(c) => pynchy_bus::ChannelError::ConnectionFailed(c),
            SlackError::Api(msg) => pynchy_bus::ChannelError::SendFailed(msg),
        }
    }
}
