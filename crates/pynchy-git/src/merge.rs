//! Merge-to-main and PR-mode sync (§4.4 "Merge to main", "PR mode"),
//! triggered on session end for workspaces with `repo_access`.

use std::path::Path;

use pynchy_core::types::GitPolicy;
use tracing::{info, warn};

use crate::error::{GitError, Result};
use crate::process::{diverged_counts, git, is_dirty};
use crate::types::{MergeOutcome, RepoContext};

pub async fn sync_to_main(ctx: &RepoContext, folder: &str, policy: GitPolicy) -> Result<MergeOutcome> {
    match policy {
        GitPolicy::MergeToMain => merge_to_main(ctx, folder).await,
        GitPolicy::PullRequest => pr_mode_sync(ctx, folder).await,
    }
}

/// §4.4 "Merge to main", steps 1-5.
async fn merge_to_main(ctx: &RepoContext, folder: &str) -> Result<MergeOutcome> {
    let root = Path::new(&ctx.repo_root);
    let worktree = ctx.worktree_path(folder);
    if !worktree.exists() {
        return Err(GitError::WorktreeMissing(folder.to_string()));
    }
    if is_dirty(&worktree).await? {
        return Err(GitError::Dirty { folder: folder.to_string(), op: "merge to main".to_string() });
    }

    let branch = RepoContext::branch_for(folder);
    let upstream = format!("origin/{}", ctx.default_branch);
    let (ahead, _behind) = diverged_counts(&worktree, &upstream).await?;
    if ahead == 0 {
        return Ok(MergeOutcome::NothingToMerge);
    }

    // 2. Rebase host main onto origin/main.
    git(root, &["fetch", "origin"]).await?;
    if let Err(e) = git(root, &["rebase", &upstream, &ctx.default_branch]).await {
        git(root, &["rebase", "--abort"]).await.ok();
        return Err(GitError::Conflict(format!("host main rebase failed: {e}")));
    }

    // 3. Rebase the worktree branch onto main from inside the worktree.
    if let Err(e) = git(&worktree, &[&"rebase", &ctx.default_branch]).await {
        return Ok(MergeOutcome::ConflictLeftForResolution {
            detail: format!("rebase of {branch} onto {} left conflict markers: {e} — fix and call sync again", ctx.default_branch),
        });
    }

    // 4. Fast-forward merge worktree branch into main.
    git(root, &["checkout", &ctx.default_branch]).await?;
    git(root, &["merge", "--ff-only", &branch]).await?;

    // 5. Push, retrying once on a concurrent-push race (fetch + rebase).
    let pushed = match git(root, &["push", "origin", &ctx.default_branch]).await {
        Ok(_) => true,
        Err(_) => {
            warn!(folder, "push rejected, retrying after fetch+rebase");
            git(root, &["fetch", "origin"]).await?;
            git(root, &["rebase", &upstream]).await.ok();
            git(root, &["push", "origin", &ctx.default_branch]).await.is_ok()
        }
    };

    info!(folder, pushed, "merge to main complete");
    Ok(MergeOutcome::Merged { pushed })
}

/// §4.4 "PR mode": force-with-lease push the worktree branch; return the
/// existing PR if one is open, else create one with a commit-log body.
async fn pr_mode_sync(ctx: &RepoContext, folder: &str) -> Result<MergeOutcome> {
    let worktree = ctx.worktree_path(folder);
    if !worktree.exists() {
        return Err(GitError::WorktreeMissing(folder.to_string()));
    }
    let branch = RepoContext::branch_for(folder);

    git(&worktree, &["push", "--force-with-lease", "origin", &branch]).await?;

    if let Ok(url) = gh(&worktree, &["pr", "view", &branch, "--json", "url", "-q", ".url"]).await {
        if !url.is_empty() {
            return Ok(MergeOutcome::PullRequest { url, created: false });
        }
    }

    let body = git(&worktree, &["log", &format!("origin/{}..{branch}", ctx.default_branch), "--pretty=format:- %s"])
        .await
        .unwrap_or_default();
    let title = format!("pynchy: {folder} changes");
    let url = gh(&worktree, &["pr", "create", "--title", &title, "--body", &body, "--head", &branch]).await?;
    Ok(MergeOutcome::PullRequest { url, created: true })
}

async fn gh(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = tokio::process::Command::new("gh")
        .current_dir(cwd)
        .args(args)
        .output()
        .await
        .map_err(|e| GitError::GitHub(e.to_string()))?;
    if !output.status.success() {
        return Err(GitError::GitHub(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
