//! Top-level error kind for the orchestrator itself (§4.9, §7). Subsystem
//! crates keep their own error enums; this one only covers host-specific
//! wiring failures (phase sequencing, install, token extraction).

use pynchy_core::error::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostError>;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("startup phase failed: {0}")]
    Startup(String),
    #[error("service install failed: {0}")]
    Install(String),
    #[error("token extraction failed: {0}")]
    TokenExtract(String),
    #[error(transparent)]
    Config(#[from] pynchy_core::PynchyError),
    #[error(transparent)]
    Store(#[from] pynchy_store::StoreError),
    #[error(transparent)]
    Ipc(#[from] pynchy_ipc::IpcError),
    #[error(transparent)]
    Git(#[from] pynchy_git::GitError),
    #[error(transparent)]
    Bus(#[from] pynchy_bus::BusError),
    #[error(transparent)]
    Gateway(#[from] pynchy_gateway::GatewayError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::Startup(_) | HostError::Install(_) | HostError::TokenExtract(_) => ErrorKind::InternalError,
            HostError::Config(e) => e.kind(),
            HostError::Store(e) => e.kind(),
            HostError::Ipc(e) => e.kind(),
            HostError::Git(e) => e.kind(),
            HostError::Bus(pynchy_bus::BusError::Channel(_)) => ErrorKind::BackendUnavailable,
            HostError::Bus(pynchy_bus::BusError::Store(e)) => e.kind(),
            HostError::Gateway(e) => e.kind(),
            HostError::Io(_) => ErrorKind::InternalError,
        }
    }
}
