/// Errors produced by the WhatsApp bridge adapter.
#[derive(Debug, thiserror::Error)]
pub enum WhatsAppError {
    #[error("whatsapp bridge error: {0}")]
    Bridge(String),

    #[error("bridge not connected")]
    NotConnected,

    #[error("bridge request timed out")]
    Timeout,
}

impl From<WhatsAppError> for pynchy_bus::ChannelError {
    fn from(e: WhatsAppError) -> Self {
        match e {
            WhatsAppError::NotConnected => pynchy_bus::ChannelError::ConnectionFailed("whatsapp bridge not connected".into()),
            WhatsAppError::Timeout => pynchy_bus::ChannelError::SendFailed("whatsapp bridge timed out".into()),
            WhatsAppError::Bridge(msg) => pynchy_bus::ChannelError::SendFailed(msg),
        }
    }
}
