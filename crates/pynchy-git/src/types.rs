//! Shared types for the git sync coordinator (§4.4).

use pynchy_core::types::GitPolicy;

/// Everything the coordinator needs to know about one managed repository.
/// One `RepoContext` exists per `[repos."<owner/repo>"]` config entry, plus
/// one for the host's own repo (which additionally carries deploy logic,
/// driven separately by `pynchy-host`).
#[derive(Debug, Clone)]
pub struct RepoContext {
    /// Absolute path to the primary repository (the shared `.git` object store).
    pub repo_root: String,
    /// Slug used for `<repo_root>/../worktrees/<repo_slug>/<folder>/`.
    pub repo_slug: String,
    pub default_branch: String,
    /// `origin/<default_branch>` drift-poll interval, seconds.
    pub poll_interval_secs: u64,
    /// `true` only for the repo backing the host's own source — drives
    /// the self-deploy path in the origin-poll loop.
    pub is_host_repo: bool,
}

impl RepoContext {
    pub fn worktrees_root(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.repo_root)
            .parent()
            .map(|p| p.join("worktrees").join(&self.repo_slug))
            .unwrap_or_else(|| std::path::PathBuf::from("worktrees").join(&self.repo_slug))
    }

    pub fn worktree_path(&self, folder: &str) -> std::path::PathBuf {
        self.worktrees_root().join(folder)
    }

    pub fn branch_for(folder: &str) -> String {
        format!("worktree/{folder}")
    }
}

/// One workspace's worktree policy + identity, resolved from
/// `[workspaces.<folder>]` config (`repo_access`, `git_policy`, `is_admin`).
#[derive(Debug, Clone)]
pub struct WorkspaceRepoBinding {
    pub folder: String,
    pub is_admin: bool,
    pub policy: GitPolicy,
}

/// Non-fatal, user-facing notices accumulated by a worktree operation
/// (§4.4: "uncommitted changes preserved", "auto-pulled", conflict
/// markers left behind). Surfaced as `system_notice` messages, never
/// swallowed.
pub type Notices = Vec<String>;

/// Result of a `merge_to_main` attempt (§4.4 "Merge to main").
#[derive(Debug, Clone)]
pub enum MergeOutcome {
    Merged { pushed: bool },
    /// Nothing to merge: worktree had zero commits ahead of main.
    NothingToMerge,
    /// A PR was filed or already existed (PR mode).
    PullRequest { url: String, created: bool },
    /// Rebase/merge left conflict markers; the agent must resolve and
    /// call sync again (§4.4 step 3).
    ConflictLeftForResolution { detail: String },
}
