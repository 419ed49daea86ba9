//! File-based IPC substrate between the host and per-workspace containers
//! (§4.5): atomic writes, consume-then-unlink reads, a recursive directory
//! watcher with crash-recovery sweep, and the Tier 1/Tier 2 task dispatcher.

pub mod atomic;
pub mod dispatch;
pub mod error;
pub mod paths;
pub mod types;
pub mod watcher;

pub use atomic::{read_and_consume, write_json_atomic, write_sentinel};
pub use dispatch::{TaskDispatcher, TaskHandler, TIER1_SIGNALS};
pub use error::{IpcError, Result};
pub use paths::IpcPaths;
pub use types::{
    ApprovalDecision, AskUserQuestion, ContainerInput, InputMessage, IpcEvent, IpcEventKind,
    McpServerRef, OutputEvent, OutputKind, OutputStatus, PendingApproval, PendingQuestion,
    TaskEnvelope, TaskResponse,
};
pub use watcher::{sweep, IpcWatcher};
