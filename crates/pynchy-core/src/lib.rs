//! Shared types, configuration, and error taxonomy used by every `pynchy-*`
//! crate: the workspace/chat/session identifiers (§3), the `config.toml`
//! schema (§6), and the error-kind taxonomy (§7).

pub mod config;
pub mod error;
pub mod types;

pub use error::{ErrorKind, PynchyError, Result};
