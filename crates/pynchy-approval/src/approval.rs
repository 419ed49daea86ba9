//! Approval state machine (§4.8 "Approval"): a per-`request_id` pending
//! file plus an in-memory future the requester awaits, resolved either by
//! an inbound `approval_decisions/<request_id>.json` file or by timeout.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pynchy_core::config::APPROVAL_TIMEOUT_SECONDS;
use pynchy_core::types::{now, ChatJid, WorkspaceFolder};
use pynchy_ipc::{read_and_consume, write_json_atomic, ApprovalDecision, IpcPaths, PendingApproval};
use pynchy_bus::{BroadcastOptions, OutboundBus};
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApprovalError, Result};
use crate::types::{summarize_payload, ApprovalOutcome};

fn approval_file(paths: &IpcPaths, folder: &str, request_id: &str) -> std::path::PathBuf {
    paths.pending_approvals_dir(folder).join(format!("{request_id}.json"))
}

const SHORT_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SHORT_ID_LEN: usize = 2;
const SHORT_ID_MAX_ATTEMPTS: usize = 64;

/// Owns every in-flight approval request this process knows about.
pub struct ApprovalCoordinator {
    paths: IpcPaths,
    pending: DashMap<String, oneshot::Sender<ApprovalOutcome>>,
}

impl ApprovalCoordinator {
    pub fn new(paths: IpcPaths) -> Self {
        Self { paths, pending: DashMap::new() }
    }

    /// Writes the pending file, broadcasts the notification, and awaits a
    /// decision with the standard timeout (§4.8 steps 1-3). Returns once
    /// resolved; the error-response-on-timeout and pending-file cleanup
    /// happen here so callers never see a half-finished approval.
    pub async fn request_approval(
        &self,
        bus: &OutboundBus,
        folder: &WorkspaceFolder,
        chat_jid: &ChatJid,
        tool_name: &str,
        request_data: &serde_json::Value,
    ) -> Result<ApprovalOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let short_id = self.allocate_short_id(folder.as_str())?;

        let pending = PendingApproval {
            request_id: request_id.clone(),
            short_id: short_id.clone(),
            source_group: folder.as_str().to_string(),
            chat_jid: chat_jid.as_str().to_string(),
            tool_name: tool_name.to_string(),
            request_data: request_data.clone(),
            timestamp: now().to_rfc3339(),
        };
        write_json_atomic(&approval_file(&self.paths, folder.as_str(), &request_id), &pending)?;

        let summary = summarize_payload(request_data);
        let text = format!("🔐 Approval required for {tool_name}: approve {short_id} / deny {short_id}\n{summary}");
        let _ = bus.broadcast(chat_jid, &text, &BroadcastOptions::system_notice()).await;

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        let outcome = match tokio::time::timeout(Duration::from_secs(APPROVAL_TIMEOUT_SECONDS), rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) | Err(_) => ApprovalOutcome::TimedOut,
        };

        self.pending.remove(&request_id);
        let _ = std::fs::remove_file(approval_file(&self.paths, folder.as_str(), &request_id));
        if matches!(outcome, ApprovalOutcome::TimedOut) {
            warn!(request_id, folder = folder.as_str(), "approval timed out");
        }
        Ok(outcome)
    }

    /// Call when the IPC watcher observes a new
    /// `approval_decisions/<request_id>.json` file. Resolves the matching
    /// in-flight `request_approval` future, if any; an orphaned decision
    /// (no matching pending request — e.g. the requester already timed
    /// out) is logged and its file removed.
    pub fn handle_decision_file(&self, folder: &str, path: &std::path::Path) -> Result<()> {
        let request_id = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| ApprovalError::NotFound("<unparseable path>".to_string()))?
            .to_string();

        let decision: ApprovalDecision = match read_and_consume(path, folder, &self.paths.errors_dir()) {
            Ok(Some(d)) => d,
            Ok(None) => return Ok(()),
            Err(e) => {
                warn!(request_id, error = %e, "failed to parse approval decision");
                return Ok(());
            }
        };

        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                let outcome = if decision.approved { ApprovalOutcome::Approved } else { ApprovalOutcome::Denied };
                let _ = tx.send(outcome);
                info!(request_id, approved = decision.approved, "approval decision delivered");
            }
            None => {
                warn!(request_id, "orphaned approval decision — no matching pending request");
            }
        }
        Ok(())
    }

    /// Periodic sweep (§4.8 step 5): nothing to do beyond what
    /// `request_approval`'s own timeout already guarantees, since every
    /// pending entry here owns a live `tokio::time::timeout` future that
    /// self-expires. Exposed for symmetry with the on-disk sweep that
    /// catches pending files left behind by a process restart.
    pub fn active_count(&self) -> usize {
        self.pending.len()
    }

    fn allocate_short_id(&self, folder: &str) -> Result<String> {
        let dir = self.paths.pending_approvals_dir(folder);
        let existing: std::collections::HashSet<String> = std::fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let bytes = std::fs::read(entry.path()).ok()?;
                let parsed: PendingApproval = serde_json::from_slice(&bytes).ok()?;
                Some(parsed.short_id)
            })
            .collect();

        let mut rng = rand::thread_rng();
        for _ in 0..SHORT_ID_MAX_ATTEMPTS {
            let candidate: String = (0..SHORT_ID_LEN)
                .map(|_| SHORT_ID_ALPHABET[rng.gen_range(0..SHORT_ID_ALPHABET.len())] as char)
                .collect();
            if !existing.contains(&candidate) {
                return Ok(candidate);
            }
        }
        Err(ApprovalError::ShortIdExhausted(folder.to_string()))
    }
}

/// Sweeps stale on-disk pending-approval files older than the standard
/// timeout, across every folder (§4.8 step 5). Run periodically by the
/// lifecycle orchestrator; catches files left behind by a process
/// restart, which in-memory `pending` alone cannot.
pub fn sweep_expired_pending(root: &std::path::Path, max_age: Duration) -> std::io::Result<usize> {
    let cutoff = now() - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::seconds(APPROVAL_TIMEOUT_SECONDS as i64));
    let mut removed = 0;

    let Ok(folders) = std::fs::read_dir(root) else { return Ok(0) };
    for folder_entry in folders.flatten() {
        let pending_dir = folder_entry.path().join("pending_approvals");
        let Ok(files) = std::fs::read_dir(&pending_dir) else { continue };
        for file in files.flatten() {
            let path = file.path();
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(pending) = serde_json::from_slice::<PendingApproval>(&bytes) else { continue };
            let Ok(ts) = chrono::DateTime::parse_from_rfc3339(&pending.timestamp) else { continue };
            if ts.with_timezone(&chrono::Utc) < cutoff {
                if std::fs::remove_file(&path).is_ok() {
                    removed += 1;
                }
            }
        }
    }
    Ok(removed)
}

/// Removes `approval_decisions/*.json` files with no matching pending file
/// (§4.8 step 5 "orphaned decisions") — e.g. a decision written after the
/// requester already timed out and removed its pending entry.
pub fn sweep_orphaned_decisions(root: &std::path::Path) -> std::io::Result<usize> {
    let mut removed = 0;
    let Ok(folders) = std::fs::read_dir(root) else { return Ok(0) };
    for folder_entry in folders.flatten() {
        let decisions_dir = folder_entry.path().join("approval_decisions");
        let pending_dir = folder_entry.path().join("pending_approvals");
        let Ok(files) = std::fs::read_dir(&decisions_dir) else { continue };
        for file in files.flatten() {
            let path = file.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            if !pending_dir.join(format!("{stem}.json")).exists() && std::fs::remove_file(&path).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

pub type SharedApprovalCoordinator = Arc<ApprovalCoordinator>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_short_id_avoids_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IpcPaths::new(dir.path());
        let coordinator = ApprovalCoordinator::new(paths.clone());
        std::fs::create_dir_all(paths.pending_approvals_dir("acme")).unwrap();

        let first = coordinator.allocate_short_id("acme").unwrap();
        let taken = PendingApproval {
            request_id: "r1".to_string(),
            short_id: first.clone(),
            source_group: "acme".to_string(),
            chat_jid: "jid".to_string(),
            tool_name: "tool".to_string(),
            request_data: serde_json::json!({}),
            timestamp: now().to_rfc3339(),
        };
        write_json_atomic(&approval_file(&paths, "acme", "r1"), &taken).unwrap();

        let second = coordinator.allocate_short_id("acme").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sweep_expired_pending_removes_only_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = IpcPaths::new(dir.path());
        let fresh = PendingApproval {
            request_id: "fresh".to_string(),
            short_id: "aa".to_string(),
            source_group: "acme".to_string(),
            chat_jid: "jid".to_string(),
            tool_name: "tool".to_string(),
            request_data: serde_json::json!({}),
            timestamp: now().to_rfc3339(),
        };
        let stale = PendingApproval {
            request_id: "stale".to_string(),
            timestamp: (now() - chrono::Duration::seconds(APPROVAL_TIMEOUT_SECONDS as i64 + 60)).to_rfc3339(),
            ..fresh.clone()
        };
        write_json_atomic(&approval_file(&paths, "acme", "fresh"), &fresh).unwrap();
        write_json_atomic(&approval_file(&paths, "acme", "stale"), &stale).unwrap();

        let removed = sweep_expired_pending(dir.path().join("ipc").as_path(), Duration::from_secs(APPROVAL_TIMEOUT_SECONDS)).unwrap();
        assert_eq!(removed, 1);
        assert!(approval_file(&paths, "acme", "fresh").exists());
        assert!(!approval_file(&paths, "acme", "stale").exists());
    }
}
