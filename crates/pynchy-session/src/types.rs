//! Shared types for the container session manager (§4.2).

use serde::{Deserialize, Serialize};

/// Per-workspace session state (§4.2 "States").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    None,
    ColdStarting,
    Alive,
    QueryInFlight,
    Destroying,
    Dead,
}

/// The result of awaiting `ContainerSession::wait_done`.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    /// The container emitted a query-done pulse carrying this session id.
    Done { new_session_id: String },
    /// The container process exited before a pulse arrived during an
    /// in-flight query (§4.2 "Death semantics").
    Died,
    /// The container exited cleanly (exit code 0) without ever starting a
    /// query and without a pulse — not an error (§4.2).
    CleanShutdown,
    /// `wait_done` exceeded the effective timeout.
    TimedOut,
}

/// Stable container name for a message-container session: `pynchy-<folder>`.
pub fn message_container_name(folder: &str) -> String {
    format!("pynchy-{folder}")
}

/// Unique container name for a one-shot (scheduled-task) run:
/// `pynchy-<folder>-<ms>`.
pub fn one_shot_container_name(folder: &str, now_ms: i64) -> String {
    format!("pynchy-{folder}-{now_ms}")
}

/// Effective query-completion timeout: `max(config_timeout, idle_timeout +
/// 30s)` per §5's "query completion (workspace-resolved timeout with a
/// `max(config, idle + 30s)` floor)".
pub fn effective_query_timeout_ms(configured_ms: u64, idle_timeout_ms: u64) -> u64 {
    configured_ms.max(idle_timeout_ms.saturating_add(30_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_names_are_stable_and_unique() {
        assert_eq!(message_container_name("acme"), "pynchy-acme");
        assert_eq!(one_shot_container_name("acme", 123), "pynchy-acme-123");
        assert_ne!(one_shot_container_name("acme", 1), one_shot_container_name("acme", 2));
    }

    #[test]
    fn effective_timeout_takes_the_floor() {
        assert_eq!(effective_query_timeout_ms(10_000, 600_000), 630_000);
        assert_eq!(effective_query_timeout_ms(700_000, 600_000), 700_000);
    }
}
