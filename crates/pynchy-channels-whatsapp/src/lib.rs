//! WhatsApp `Channel` adapter (§4.3, §6 `[connections.whatsapp.<name>]`),
//! driven through an external bridge process rather than an in-process
//! whatsmeow binding — see [`types`] for why.

pub mod adapter;
pub mod error;
pub mod types;

pub use adapter::WhatsAppAdapter;
pub use error::WhatsAppError;
