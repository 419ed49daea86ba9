//! Approval and ask-user state machines (§4.8): the two human-in-the-loop
//! flows a container can trigger mid-query — a security-gated tool call
//! awaiting approve/deny, or an `ask_user:ask` question awaiting an
//! answer — each backed by a file under a workspace's IPC tree and an
//! in-memory future the requester awaits.

pub mod approval;
pub mod ask_user;
pub mod error;
pub mod types;

pub use approval::{sweep_expired_pending, ApprovalCoordinator, SharedApprovalCoordinator};
pub use ask_user::{create_pending_question, deliver_answer, reject_unsupported, ColdStartEnqueuer};
pub use error::{ApprovalError, Result};
pub use types::{summarize_payload, ApprovalOutcome, AskUserOutcome};
