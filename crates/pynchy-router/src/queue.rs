//! Per-workspace queue (§4.1 "Per-workspace queue invariants", §5 "the
//! per-workspace queue is the sole serialization point"): at most one
//! worker processes a workspace at a time; additional `enqueue_message_check`
//! calls coalesce into a single pending flag rather than stacking up.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, instrument};

/// One workspace's queue state: a coalescing "there is unprocessed work"
/// flag plus the mutex that gives at-most-one-worker.
struct WorkspaceQueueState {
    /// Held for the duration of one worker pass; a second task trying to
    /// acquire it simply sets `pending` and returns rather than blocking.
    worker_lock: Mutex<()>,
    pending: std::sync::atomic::AtomicBool,
    notify: Notify,
    /// `true` while a container bound to this workspace is a scheduled
    /// task rather than a message session (§4.1 "is_active_task").
    active_task: std::sync::atomic::AtomicBool,
}

impl WorkspaceQueueState {
    fn new() -> Self {
        Self {
            worker_lock: Mutex::new(()),
            pending: std::sync::atomic::AtomicBool::new(false),
            notify: Notify::new(),
            active_task: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

/// Registry of per-workspace queues, keyed by folder. Does not itself run
/// workers — `RouterEngine` drives a worker per workspace, using this to
/// enforce the at-most-one-worker invariant and to coalesce repeated
/// "check this workspace" signals (§8 invariant 3).
#[derive(Default)]
pub struct QueueRegistry {
    queues: DashMap<String, Arc<WorkspaceQueueState>>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    fn get_or_create(&self, folder: &str) -> Arc<WorkspaceQueueState> {
        self.queues.entry(folder.to_string()).or_insert_with(|| Arc::new(WorkspaceQueueState::new())).clone()
    }

    /// Coalescing enqueue: marks the workspace as having pending work and
    /// wakes a worker if one is waiting. Idempotent — calling this twice
    /// before a worker drains it results in exactly one pass, not two.
    #[instrument(skip(self))]
    pub fn enqueue_message_check(&self, folder: &str) {
        let state = self.get_or_create(folder);
        state.pending.store(true, std::sync::atomic::Ordering::SeqCst);
        state.notify.notify_one();
        debug!(folder, "message check enqueued");
    }

    pub fn set_active_task(&self, folder: &str, active: bool) {
        self.get_or_create(folder).active_task.store(active, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn is_active_task(&self, folder: &str) -> bool {
        self.queues.get(folder).map(|s| s.active_task.load(std::sync::atomic::Ordering::SeqCst)).unwrap_or(false)
    }

    /// Drops any pending-check flag for a workspace — used when
    /// interrupting a scheduled task (§4.1 step 7 "clear pending tasks on
    /// this workspace's queue").
    pub fn clear_pending(&self, folder: &str) {
        if let Some(state) = self.queues.get(folder) {
            state.pending.store(false, std::sync::atomic::Ordering::SeqCst);
        }
    }

    /// Runs `work` under the workspace's worker lock if nothing else is
    /// currently running it; otherwise marks pending and returns `false`
    /// so the caller knows a worker is already in flight (the in-flight
    /// worker will notice `pending` was (re)set and loop, or the next
    /// `enqueue_message_check` will be picked up once the lock frees).
    pub async fn try_run_worker<F, Fut>(&self, folder: &str, work: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let state = self.get_or_create(folder);
        let Ok(_guard) = state.worker_lock.try_lock() else {
            state.pending.store(true, std::sync::atomic::Ordering::SeqCst);
            return false;
        };
        state.pending.store(false, std::sync::atomic::Ordering::SeqCst);
        work().await;
        true
    }

    /// Folders with a pending flag set right now — the driver loop's work
    /// list for one tick.
    pub fn pending_folders(&self) -> HashSet<String> {
        self.queues
            .iter()
            .filter(|e| e.pending.load(std::sync::atomic::Ordering::SeqCst))
            .map(|e| e.key().clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn coalesces_repeated_enqueues_into_one_pass() {
        let registry = QueueRegistry::new();
        registry.enqueue_message_check("acme");
        registry.enqueue_message_check("acme");
        assert_eq!(registry.pending_folders().len(), 1);
    }

    #[tokio::test]
    async fn second_worker_does_not_run_concurrently() {
        let registry = Arc::new(QueueRegistry::new());
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let r1 = registry.clone();
        let handle = tokio::spawn(async move {
            r1.try_run_worker("acme", || async move {
                let _ = rx.await;
            })
            .await
        });
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let ran_concurrently = registry.try_run_worker("acme", || async {}).await;
        assert!(!ran_concurrently);
        let _ = tx.send(());
        assert!(handle.await.unwrap());
    }
}
