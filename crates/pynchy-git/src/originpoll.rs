//! Origin-drift poll loop (§4.4 "Origin-drift poll loop"): per repo,
//! `ls-remote`-poll origin's default branch, fast-forward the host's own
//! checkout when it moves, and fan the update out to every worktree.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pynchy_bus::{BroadcastOptions, OutboundBus};
use pynchy_core::types::ChatJid;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::process::{git, is_dirty};
use crate::types::RepoContext;
use crate::worktree::ensure_worktree;

/// Implemented by `pynchy-host` to carry out a self-deploy when the
/// host's own repo's `container/` or `src/` paths change (§4.4 step 7).
/// Kept as a narrow seam so this crate never depends on the host binary.
#[async_trait]
pub trait SelfDeployHandler: Send + Sync {
    /// `rebuild` is `true` when `container/` changed (image rebuild
    /// required); `false` when only `src/` changed (restart only).
    /// `commit_subject` is `new_sha`'s first commit-message line, carried
    /// into the post-restart "Deploy complete" notice (§4.9 Phase 5).
    async fn trigger_deploy(&self, previous_sha: &str, new_sha: &str, commit_subject: &str, rebuild: bool);
}

pub struct OriginPollLoop {
    ctx: RepoContext,
    bus: Arc<OutboundBus>,
    deploy: Option<Arc<dyn SelfDeployHandler>>,
    folders: Vec<(String, ChatJid)>,
}

impl OriginPollLoop {
    pub fn new(
        ctx: RepoContext,
        bus: Arc<OutboundBus>,
        deploy: Option<Arc<dyn SelfDeployHandler>>,
        folders: Vec<(String, ChatJid)>,
    ) -> Self {
        Self { ctx, bus, deploy, folders }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut last_sha = git(Path::new(&self.ctx.repo_root), &["rev-parse", "HEAD"]).await.ok();
        let mut interval = tokio::time::interval(Duration::from_secs(self.ctx.poll_interval_secs.max(1)));
        info!(repo = %self.ctx.repo_slug, "origin-drift poll loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick(&mut last_sha).await {
                        error!(repo = %self.ctx.repo_slug, error = %e, "origin-drift tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(repo = %self.ctx.repo_slug, "origin-drift poll loop shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self, last_sha: &mut Option<String>) -> crate::error::Result<()> {
        let root = Path::new(&self.ctx.repo_root);

        // 1. Lightweight upstream check.
        let remote_sha = match git(root, &["ls-remote", "origin", &self.ctx.default_branch]).await {
            Ok(line) => line.split_whitespace().next().map(str::to_string),
            Err(e) => {
                warn!(repo = %self.ctx.repo_slug, error = %e, "ls-remote failed, skipping this tick");
                return Ok(());
            }
        };
        let Some(remote_sha) = remote_sha else { return Ok(()) };
        if last_sha.as_deref() == Some(remote_sha.as_str()) {
            return Ok(());
        }

        let previous_sha = last_sha.clone().unwrap_or_default();

        // 3. Pre-flight recovery.
        if root.join(".git/rebase-merge").exists() || root.join(".git/rebase-apply").exists() {
            git(root, &["rebase", "--abort"]).await.ok();
        }
        let was_dirty = is_dirty(root).await.unwrap_or(false);
        if was_dirty {
            git(root, &["stash", "--include-untracked"]).await.ok();
        }

        // 4. Fetch + rebase.
        git(root, &["fetch", "origin"]).await?;
        if let Err(e) = git(root, &["rebase", &format!("origin/{}", self.ctx.default_branch)]).await {
            warn!(repo = %self.ctx.repo_slug, error = %e, "origin rebase failed, aborting this tick");
            git(root, &["rebase", "--abort"]).await.ok();
            return Ok(());
        }

        // 5. Push any commits the host had ahead of origin.
        git(root, &["push", "origin", &self.ctx.default_branch]).await.ok();

        // 6. Restore the stash.
        if was_dirty {
            if let Err(e) = git(root, &["stash", "pop"]).await {
                warn!(repo = %self.ctx.repo_slug, error = %e, "stash pop conflicted, committing marker");
                git(root, &["add", "-A"]).await.ok();
                git(root, &["commit", "-m", "pynchy: preserved pre-sync state (see reflog)"]).await.ok();
            }
        }

        let new_sha = git(root, &["rev-parse", "HEAD"]).await?;
        *last_sha = Some(new_sha.clone());

        // 7. Self-deploy check: only for the host's own repo.
        if self.ctx.is_host_repo && !previous_sha.is_empty() {
            if let Some(handler) = &self.deploy {
                let changed = changed_paths(root, &previous_sha, &new_sha).await.unwrap_or_default();
                let container_changed = changed.iter().any(|p| p.starts_with("container/"));
                let src_changed = changed.iter().any(|p| p.starts_with("src/"));
                if container_changed || src_changed {
                    let commit_subject =
                        git(root, &["log", "-1", "--format=%s", &new_sha]).await.unwrap_or_default();
                    info!(repo = %self.ctx.repo_slug, container_changed, src_changed, "triggering self-deploy");
                    handler.trigger_deploy(&previous_sha, &new_sha, &commit_subject, container_changed).await;
                    return Ok(());
                }
            }
        }

        // 8. Notify every other worktree of the update.
        self.notify_worktrees().await;
        Ok(())
    }

    async fn notify_worktrees(&self) {
        for (folder, chat_jid) in &self.folders {
            match ensure_worktree(&self.ctx, folder).await {
                Ok(notices) if !notices.is_empty() => {
                    for notice in notices {
                        let text = format!("[git-sync] {notice}");
                        let _ = self.bus.broadcast(chat_jid, &text, &BroadcastOptions::system_notice()).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(folder, error = %e, "worktree notify rebase failed");
                    let text = format!("[git-sync] origin updated but {folder}'s worktree could not be synced: {e}");
                    let _ = self.bus.broadcast(chat_jid, &text, &BroadcastOptions::system_notice()).await;
                }
            }
        }
    }
}

async fn changed_paths(root: &Path, from_sha: &str, to_sha: &str) -> crate::error::Result<Vec<String>> {
    let out = git(root, &["diff", "--name-only", &format!("{from_sha}..{to_sha}")]).await?;
    Ok(out.lines().map(str::to_string).collect())
}

/// Rollback on a failed post-deploy startup (§4.4 step 7, §7 "Startup
/// failure after deploy"): reset hard to the previous SHA so the
/// supervisor's next restart comes up on known-good code.
pub async fn rollback_to(repo_root: &str, previous_sha: &str) -> crate::error::Result<()> {
    let root = Path::new(repo_root);
    git(root, &["reset", "--hard", previous_sha]).await?;
    Ok(())
}

/// Rebuilds the host's container image (§4.4 step 7). Shells to `docker
/// build`, matching the same CLI-invocation style as `pynchy-session`.
pub async fn rebuild_container_image(repo_root: &str, image_tag: &str) -> crate::error::Result<()> {
    let status = Command::new("docker")
        .current_dir(repo_root)
        .args(["build", "-t", image_tag, "./container"])
        .status()
        .await
        .map_err(|e| crate::error::GitError::CommandFailed { command: "docker build".to_string(), reason: e.to_string() })?;
    if !status.success() {
        return Err(crate::error::GitError::CommandFailed {
            command: "docker build".to_string(),
            reason: format!("exit {status:?}"),
        });
    }
    Ok(())
}
