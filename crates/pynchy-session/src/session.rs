//! `ContainerSession`: the per-workspace state machine described in §9's
//! "mutable coroutines holding state" redesign note — a small state machine
//! with `start_query`/`wait_done`/`record_pulse`/`record_exit` methods,
//! internal state guarded by a single per-session mutex plus a couple of
//! lock-free flags for the hot path (`dead`, `died_before_pulse`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::types::{QueryOutcome, SessionState};

/// One running (or recently-dead) in-container agent for a workspace
/// (§4.2). Exactly one `ContainerSession` exists per workspace folder at a
/// time — the owning [`crate::manager::SessionManager`] enforces this by
/// replacing, never aliasing, the map entry.
pub struct ContainerSession {
    pub folder: String,
    pub container_name: String,
    state: Mutex<SessionState>,
    session_id: Mutex<Option<String>>,
    query_done: Notify,
    dead: AtomicBool,
    died_before_pulse: AtomicBool,
    query_active: AtomicBool,
}

impl ContainerSession {
    pub fn new(folder: impl Into<String>, container_name: impl Into<String>, resume_session_id: Option<String>) -> Self {
        Self {
            folder: folder.into(),
            container_name: container_name.into(),
            state: Mutex::new(SessionState::Alive),
            session_id: Mutex::new(resume_session_id),
            query_done: Notify::new(),
            dead: AtomicBool::new(false),
            died_before_pulse: AtomicBool::new(false),
            query_active: AtomicBool::new(false),
        }
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().expect("session_id mutex poisoned").clone()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state mutex poisoned")
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    /// Begin a new query: the caller has just written an input file (cold
    /// start's `initial.json` or a warm message file) and is about to await
    /// `wait_done`. Clears the `died_before_pulse` flag from any prior run.
    pub fn start_query(&self) {
        *self.state.lock().expect("state mutex poisoned") = SessionState::QueryInFlight;
        self.died_before_pulse.store(false, Ordering::SeqCst);
        self.query_active.store(true, Ordering::SeqCst);
    }

    /// Record a query-done pulse (§4.2): stores the new session id, returns
    /// to `Alive`, and wakes any waiter.
    pub fn record_pulse(&self, new_session_id: String) {
        *self.session_id.lock().expect("session_id mutex poisoned") = Some(new_session_id.clone());
        *self.state.lock().expect("state mutex poisoned") = SessionState::Alive;
        self.query_active.store(false, Ordering::SeqCst);
        debug!(folder = %self.folder, new_session_id, "query-done pulse recorded");
        self.query_done.notify_waiters();
    }

    /// Record that the container process has exited. If a query was in
    /// flight and no pulse had arrived, this is `died_before_pulse` — the
    /// caller unblocks with `QueryOutcome::Died`. A clean exit (code 0)
    /// with no query in flight is a legitimate shutdown, not an error.
    pub fn record_exit(&self, exit_code: Option<i32>) {
        self.dead.store(true, Ordering::SeqCst);
        *self.state.lock().expect("state mutex poisoned") = SessionState::Dead;
        if self.query_active.swap(false, Ordering::SeqCst) {
            self.died_before_pulse.store(true, Ordering::SeqCst);
            warn!(folder = %self.folder, exit_code, "container died before query-done pulse");
        } else {
            debug!(folder = %self.folder, exit_code, "container exited with no query in flight");
        }
        self.query_done.notify_waiters();
    }

    /// Block until the in-flight query completes, the container dies, or
    /// `timeout` elapses. §5: "query completion (workspace-resolved timeout
    /// with a max(config, idle + 30s) floor)".
    pub async fn wait_done(&self, timeout: Duration) -> QueryOutcome {
        if self.died_before_pulse.load(Ordering::SeqCst) {
            return QueryOutcome::Died;
        }
        if !self.query_active.load(Ordering::SeqCst) {
            // Pulse (or death) already landed between start_query and here.
            return self.resolve_after_wake();
        }

        let notified = self.query_done.notified();
        tokio::select! {
            _ = notified => self.resolve_after_wake(),
            _ = tokio::time::sleep(timeout) => QueryOutcome::TimedOut,
        }
    }

    fn resolve_after_wake(&self) -> QueryOutcome {
        if self.died_before_pulse.load(Ordering::SeqCst) {
            QueryOutcome::Died
        } else if self.dead.load(Ordering::SeqCst) {
            QueryOutcome::CleanShutdown
        } else if let Some(sid) = self.session_id() {
            QueryOutcome::Done { new_session_id: sid }
        } else {
            QueryOutcome::CleanShutdown
        }
    }

    pub fn mark_destroying(&self) {
        *self.state.lock().expect("state mutex poisoned") = SessionState::Destroying;
        // Any waiter blocked on a query that will never complete must wake.
        self.query_done.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn death_before_pulse_resolves_as_died() {
        let session = ContainerSession::new("acme", "pynchy-acme", None);
        session.start_query();
        session.record_exit(Some(1));
        let outcome = session.wait_done(Duration::from_secs(1)).await;
        assert!(matches!(outcome, QueryOutcome::Died));
    }

    #[tokio::test]
    async fn clean_exit_without_query_in_flight_is_not_an_error() {
        let session = ContainerSession::new("acme", "pynchy-acme", None);
        session.record_exit(Some(0));
        assert!(session.is_dead());
        let outcome = session.wait_done(Duration::from_secs(1)).await;
        assert!(matches!(outcome, QueryOutcome::CleanShutdown));
    }

    #[tokio::test]
    async fn pulse_in_flight_resolves_with_new_session_id() {
        let session = std::sync::Arc::new(ContainerSession::new("acme", "pynchy-acme", None));
        session.start_query();
        let s2 = session.clone();
        let handle = tokio::spawn(async move { s2.wait_done(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.record_pulse("sess-1".to_string());
        let outcome = handle.await.unwrap();
        match outcome {
            QueryOutcome::Done { new_session_id } => assert_eq!(new_session_id, "sess-1"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_fires_when_no_pulse_arrives() {
        let session = ContainerSession::new("acme", "pynchy-acme", None);
        session.start_query();
        let outcome = session.wait_done(Duration::from_millis(20)).await;
        assert!(matches!(outcome, QueryOutcome::TimedOut));
    }
}
