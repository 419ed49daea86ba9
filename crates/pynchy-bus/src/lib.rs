//! The unified outbound bus and `Channel` adapter trait (§4.3): one
//! broadcast call site fanning out to every connected channel, backed by the
//! outbound ledger, plus the JID-alias and inbound-reconciliation machinery
//! shared by every channel adapter.

pub mod bus;
pub mod channel;
pub mod error;
pub mod manager;
pub mod types;

pub use bus::OutboundBus;
pub use channel::Channel;
pub use error::{BusError, ChannelError};
pub use manager::ChannelManager;
pub use types::{
    AskUserQuestion, BroadcastOptions, ChannelStatus, DeliveryOutcome, InboundMessage, MessageFormat,
    OutboundMessage,
};
