//! Security gate (§4.10): per-`(folder, invocation_ts)` policy evaluation
//! for outbound MCP tool writes, consulted by the MCP proxy (§4.6) before
//! forwarding a `tools/call`, and taint tracking for inbound reads from
//! MCP sources declared `public_source` in the trust map.

pub mod engine;
pub mod error;
pub mod types;

pub use engine::{GateRegistry, SecurityGate};
pub use error::{Result, SecurityError};
pub use types::{GatePolicy, WriteVerdict};
