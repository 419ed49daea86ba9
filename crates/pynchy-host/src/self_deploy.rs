//! Self-deploy continuation (§4.4 step 7, §7 "Startup failure after
//! deploy"): `git reset --hard`-free persistence of in-flight sessions
//! across a self-triggered restart, so the supervisor can bring the host
//! back up mid-conversation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use pynchy_core::types::ChatJid;
use pynchy_git::{rebuild_container_image, SelfDeployHandler};
use pynchy_ipc::write_json_atomic;
use pynchy_session::SessionManager;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

const CONTINUATION_FILE: &str = "deploy_continuation.json";

/// Written right before the process exits for a self-deploy, read back on
/// the next boot's phase 5 (§4.4 step 7's "consume `deploy_continuation.json`
/// if present").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployContinuation {
    pub previous_commit_sha: String,
    pub commit_sha: String,
    /// First line of `commit_sha`'s commit message, for the "Deploy
    /// complete" notice (§4.9 Phase 5 / S6).
    #[serde(default)]
    pub commit_subject: String,
    pub resume_prompt: String,
    /// chat jid -> resumable session id, snapshotted from every folder that
    /// was live at the moment of the deploy.
    pub active_sessions: HashMap<String, String>,
    /// Set by a startup-failure rollback so a second consecutive failure
    /// does not loop: "the continuation is rewritten with a rollback note".
    #[serde(default)]
    pub rollback_note: Option<String>,
}

fn continuation_path(data_root: &Path) -> PathBuf {
    data_root.join(CONTINUATION_FILE)
}

/// Reads and deletes the continuation file if present. Returns `Ok(None)`
/// on a normal boot with no pending continuation.
pub fn consume(data_root: &Path) -> std::io::Result<Option<DeployContinuation>> {
    let path = continuation_path(data_root);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)?;
    let continuation: DeployContinuation = match serde_json::from_str(&raw) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "malformed deploy_continuation.json, discarding");
            std::fs::remove_file(&path)?;
            return Ok(None);
        }
    };
    std::fs::remove_file(&path)?;
    Ok(Some(continuation))
}

/// Startup-failure rollback (§7): reset the host's repo to the previous
/// SHA and rewrite the continuation with a rollback note, so the next boot
/// after the supervisor restart again sees a continuation but does not
/// attempt another rebuild/rollback cycle.
pub async fn rollback_and_mark(
    data_root: &Path,
    repo_root: &str,
    continuation: &DeployContinuation,
    failure_reason: &str,
) -> anyhow::Result<()> {
    error!(error = failure_reason, "startup failed after deploy, rolling back");
    pynchy_git::rollback_to(repo_root, &continuation.previous_commit_sha).await?;
    let marked = DeployContinuation { rollback_note: Some(failure_reason.to_string()), ..continuation.clone() };
    write_json_atomic(&continuation_path(data_root), &marked)?;
    Ok(())
}

/// Manual redeploy trigger (`deploy` task, §4.7 "manual-trigger the
/// self-deploy flow"): no SHA movement of its own, just a marker the running
/// process consumes on its way out — the actual restart is the supervisor
/// noticing the exit and bringing the host back up on the same commit.
pub fn trigger_manual_redeploy(repo_root: &str) -> anyhow::Result<()> {
    info!(repo_root, "manual redeploy requested, exiting for supervisor restart");
    std::process::exit(0);
}

/// `pynchy_git::SelfDeployHandler` implementation wired into the host repo's
/// `OriginPollLoop` only (§4.4 step 7: "only for the host's own repo").
pub struct HostSelfDeployHandler {
    data_root: PathBuf,
    repo_root: String,
    image_tag: String,
    sessions: Arc<SessionManager>,
    /// folder -> chat jid, resolved from workspace config, used to key the
    /// continuation's `active_sessions` the way §4.4 S6 shows
    /// (`{"acme@g.us": "s1"}`, not by folder).
    chat_jids: HashMap<String, ChatJid>,
}

impl HostSelfDeployHandler {
    pub fn new(
        data_root: impl Into<PathBuf>,
        repo_root: impl Into<String>,
        image_tag: impl Into<String>,
        sessions: Arc<SessionManager>,
        chat_jids: HashMap<String, ChatJid>,
    ) -> Self {
        Self { data_root: data_root.into(), repo_root: repo_root.into(), image_tag: image_tag.into(), sessions, chat_jids }
    }

    fn snapshot_active_sessions(&self) -> HashMap<String, String> {
        self.sessions
            .active_sessions()
            .into_iter()
            .filter_map(|(folder, session_id)| {
                let session_id = session_id?;
                let jid = self.chat_jids.get(&folder)?;
                Some((jid.to_string(), session_id))
            })
            .collect()
    }
}

#[async_trait]
impl SelfDeployHandler for HostSelfDeployHandler {
    async fn trigger_deploy(&self, previous_sha: &str, new_sha: &str, commit_subject: &str, rebuild: bool) {
        let active_sessions = self.snapshot_active_sessions();
        let continuation = DeployContinuation {
            previous_commit_sha: previous_sha.to_string(),
            commit_sha: new_sha.to_string(),
            commit_subject: commit_subject.to_string(),
            resume_prompt: "Continue from where you left off.".to_string(),
            active_sessions,
            rollback_note: None,
        };

        if let Err(e) = write_json_atomic(&continuation_path(&self.data_root), &continuation) {
            error!(error = %e, "failed to persist deploy continuation, aborting self-deploy");
            return;
        }

        if rebuild {
            if let Err(e) = rebuild_container_image(&self.repo_root, &self.image_tag).await {
                error!(error = %e, "container image rebuild failed, aborting self-deploy");
                return;
            }
        }

        info!(previous_sha, new_sha, rebuild, "self-deploy: exiting for supervisor restart");
        std::process::exit(1);
    }
}
