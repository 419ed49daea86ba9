//! Shared types for the router & per-workspace queue (§4.1).

/// Why a batch was not dispatched to the agent — every skip path named in
/// §4.1's routing decision, kept explicit so "no lost messages" (§8
/// invariant 1) is auditable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    AccessReadOnlyOrWriteOnly,
    NoAllowedSender,
    NoTriggerMatch,
}

/// A magic command recognized by §4.1 step 6, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MagicCommand {
    ContextReset,
    EndSession,
    Redeploy,
    Approve(String),
    Deny(String),
}

/// `btw `/`todo ` forwarding variants recognized mid-dispatch (§4.1 step 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardKind {
    Normal,
    Btw,
    Todo,
}

pub fn classify_forward(content: &str) -> ForwardKind {
    let trimmed = content.trim_start();
    if trimmed.len() >= 4 && trimmed[..4].eq_ignore_ascii_case("btw ") {
        ForwardKind::Btw
    } else if trimmed.len() >= 5 && trimmed[..5].eq_ignore_ascii_case("todo ") {
        ForwardKind::Todo
    } else {
        ForwardKind::Normal
    }
}
