//! Worktree lifecycle (§4.4 "Worktree policy", "ensure_worktree",
//! "Reconcile at startup"). Every worktree directory is owned exclusively
//! by this module — no other component in the workspace ever writes to
//! one (§3 ownership summary).

use std::path::Path;

use tracing::{info, warn};

use crate::error::{GitError, Result};
use crate::process::{diverged_counts, git, git_check, head_sha, is_dirty, is_git_dir};
use crate::types::{Notices, RepoContext};

/// Idempotent per §8 "`ensure_worktree` called twice consecutively with no
/// upstream change results in zero notices": create mode on first call,
/// sync mode (fetch + merge) on every call after, broken-worktree repair
/// folding back into create mode.
pub async fn ensure_worktree(ctx: &RepoContext, folder: &str) -> Result<Notices> {
    let path = ctx.worktree_path(folder);

    if path.exists() {
        if is_git_dir(&path).await {
            return sync_worktree(ctx, folder, &path).await;
        }
        warn!(folder, path = %path.display(), "worktree directory exists but is not a git dir, recreating");
        tokio::fs::remove_dir_all(&path).await.ok();
    }

    create_worktree(ctx, folder, &path).await
}

async fn create_worktree(ctx: &RepoContext, folder: &str, path: &Path) -> Result<Notices> {
    let root = Path::new(&ctx.repo_root);
    let branch = RepoContext::branch_for(folder);

    git(root, &["fetch", "origin"]).await?;
    git(root, &["worktree", "prune"]).await.ok();

    // Delete a stale branch left behind by a prior, abandoned worktree —
    // `worktree add -b` fails if the branch already exists.
    if git_check(root, &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")]).await {
        git(root, &["branch", "-D", &branch]).await.ok();
    }

    tokio::fs::create_dir_all(path.parent().unwrap_or(path)).await.ok();
    let upstream = format!("origin/{}", ctx.default_branch);
    git(
        root,
        &["worktree", "add", "-b", &branch, &path.to_string_lossy(), &upstream],
    )
    .await?;

    info!(folder, branch, path = %path.display(), "worktree created");
    Ok(Vec::new())
}

async fn sync_worktree(ctx: &RepoContext, folder: &str, path: &Path) -> Result<Notices> {
    let mut notices = Notices::new();

    if is_dirty(path).await? {
        notices.push("uncommitted changes preserved".to_string());
    }

    git(path, &["fetch"]).await?;
    let head_before = head_sha(path).await?;

    let upstream = format!("origin/{}", ctx.default_branch);
    match git(path, &["merge", "--no-edit", &upstream]).await {
        Ok(_) => {
            let head_after = head_sha(path).await?;
            if head_after != head_before {
                notices.push("auto-pulled".to_string());
            }
        }
        Err(e) => {
            // Do not abort: the agent inside the worktree sees the
            // conflict markers and resolves them (§4.4 "do not abort").
            warn!(folder, error = %e, "merge conflict in worktree sync");
            notices.push(format!("merge conflict during sync: {e} — resolve and call sync again"));
        }
    }

    Ok(notices)
}

/// Reconcile at startup (§4.4): `ensure_worktree` for every known
/// `repo_access` folder, then for every existing worktree whose branch
/// has diverged (both ahead and behind main), attempt a safe rebase from
/// inside the worktree — git refuses to check out a branch used by
/// another worktree, so the rebase must run there, not in the repo root.
pub async fn reconcile_at_startup(ctx: &RepoContext, folders: &[String]) -> Vec<(String, Result<Notices>)> {
    let mut results = Vec::new();
    for folder in folders {
        let outcome = ensure_worktree(ctx, folder).await;
        results.push((folder.clone(), outcome));
    }

    if let Ok(entries) = std::fs::read_dir(ctx.worktrees_root()) {
        for entry in entries.flatten() {
            let Some(folder) = entry.file_name().to_str().map(str::to_string) else { continue };
            if folders.contains(&folder) {
                continue;
            }
            let path = entry.path();
            if let Err(e) = rebase_if_diverged(ctx, &folder, &path).await {
                warn!(folder, error = %e, "startup divergence rebase failed, left for manual resolution");
            }
        }
    }

    results
}

async fn rebase_if_diverged(ctx: &RepoContext, folder: &str, path: &Path) -> Result<()> {
    if !is_git_dir(path).await {
        return Ok(());
    }
    let upstream = format!("origin/{}", ctx.default_branch);
    git(path, &["fetch"]).await?;
    let (ahead, behind) = diverged_counts(path, &upstream).await?;
    if ahead == 0 || behind == 0 {
        return Ok(());
    }

    info!(folder, ahead, behind, "branch diverged from main, attempting safe rebase");
    if let Err(e) = git(path, &["rebase", &upstream]).await {
        git(path, &["rebase", "--abort"]).await.ok();
        return Err(GitError::Conflict(format!("rebase aborted for {folder}: {e}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &str) -> RepoContext {
        RepoContext {
            repo_root: root.to_string(),
            repo_slug: "acme-repo".to_string(),
            default_branch: "main".to_string(),
            poll_interval_secs: 5,
            is_host_repo: false,
        }
    }

    #[test]
    fn worktree_path_nests_under_slug_and_folder() {
        let c = ctx("/repos/acme");
        assert_eq!(c.worktree_path("team1"), std::path::PathBuf::from("/repos/worktrees/acme-repo/team1"));
    }

    #[test]
    fn branch_name_is_stable() {
        assert_eq!(RepoContext::branch_for("team1"), "worktree/team1");
    }
}
