use thiserror::Error;

/// Errors produced by the local TUI channel adapter.
#[derive(Debug, Error)]
pub enum TuiError {
    #[error("stdin closed")]
    StdinClosed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<TuiError> for pynchy_bus::ChannelError {
    fn from(e: TuiError) -> Self {
        pynchy_bus::ChannelError::ConnectionFailed(e.to_string())
    }
}
