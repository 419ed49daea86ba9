use pynchy_core::error::ErrorKind;
use thiserror::Error;

/// Errors raised by the state store (§3 Data Model).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid row data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound(_) => ErrorKind::NotFound,
            StoreError::Database(_) => ErrorKind::InternalError,
            StoreError::Serialization(_) => ErrorKind::ParseError,
            StoreError::Corrupt(_) => ErrorKind::ParseError,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
