//! Git sync coordinator (§4.4): worktree lifecycle, merge-to-main/PR-mode
//! sync on session end, and an origin-drift poll loop that keeps every
//! worktree (and the host's own checkout) fast-forwarded against origin.
//!
//! Every git operation is a `git`/`gh` CLI invocation shelled via
//! `tokio::process::Command` rather than a library binding, matching how
//! `pynchy-session` drives `docker`.

pub mod error;
pub mod merge;
pub mod originpoll;
pub mod process;
pub mod types;
pub mod worktree;

pub use error::{GitError, Result};
pub use merge::sync_to_main;
pub use originpoll::{rebuild_container_image, rollback_to, OriginPollLoop, SelfDeployHandler};
pub use types::{MergeOutcome, Notices, RepoContext, WorkspaceRepoBinding};
pub use worktree::{ensure_worktree, reconcile_at_startup};
