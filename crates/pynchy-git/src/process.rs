//! Thin process-invocation wrapper around the `git` CLI (§0 "Git"): every
//! operation in this crate is expressed as plumbing/porcelain subcommands
//! shelled out via `tokio::process::Command`, the same style
//! `pynchy-session::manager` uses for `docker`.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{GitError, Result};

/// Runs `git <args>` in `cwd`, returning trimmed stdout on success.
pub async fn git(cwd: &Path, args: &[&str]) -> Result<String> {
    debug!(cwd = %cwd.display(), args = ?args, "git invoke");
    let output = Command::new("git")
        .current_dir(cwd)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GitError::CommandFailed { command: args.join(" "), reason: e.to_string() })?;

    if !output.status.success() {
        let reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(GitError::CommandFailed { command: args.join(" "), reason });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Like [`git`], but returns `Ok(false)` instead of an error for a
/// nonzero exit — used for plumbing checks (`rev-parse --git-dir`) where
/// failure is an expected, meaningful outcome rather than a fault.
pub async fn git_check(cwd: &Path, args: &[&str]) -> bool {
    match Command::new("git")
        .current_dir(cwd)
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            warn!(args = ?args, error = %e, "git_check spawn failed");
            false
        }
    }
}

pub async fn is_dirty(worktree: &Path) -> Result<bool> {
    let status = git(worktree, &["status", "--porcelain"]).await?;
    Ok(!status.is_empty())
}

pub async fn head_sha(worktree: &Path) -> Result<String> {
    git(worktree, &["rev-parse", "HEAD"]).await
}

pub async fn is_git_dir(path: &Path) -> bool {
    git_check(path, &["rev-parse", "--git-dir"]).await
}

/// `true` if the worktree's branch is both ahead of and behind its
/// upstream (diverged) — `git rev-list --left-right --count` against
/// `<upstream>...HEAD`.
pub async fn diverged_counts(worktree: &Path, upstream: &str) -> Result<(u32, u32)> {
    let out = git(worktree, &["rev-list", "--left-right", "--count", &format!("{upstream}...HEAD")]).await?;
    let mut parts = out.split_whitespace();
    let behind: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let ahead: u32 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok((ahead, behind))
}
