use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::types::{IpcEvent, IpcEventKind};

/// Watches `data/ipc/` recursively for created/renamed `.json` files under
/// `<folder>/{input,tasks,output,approval_decisions}/` and enqueues them to
/// an async dispatcher (§4.5 "Watcher"). Also performs a one-shot sweep at
/// construction time so files written while the host was down are not lost
/// on restart (crash recovery).
pub struct IpcWatcher {
    _inner: RecommendedWatcher,
    root: PathBuf,
}

impl IpcWatcher {
    /// Start watching `root` (the `data/ipc` directory), sending every
    /// classified event to `tx`. Performs the startup sweep before
    /// returning so callers can rely on in-flight files from a previous
    /// run being processed exactly once.
    pub fn start(root: impl Into<PathBuf>, tx: mpsc::UnboundedSender<IpcEvent>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;

        let sweep_tx = tx.clone();
        let sweep_root = root.clone();
        sweep(&sweep_root, &sweep_tx);

        let event_tx = tx;
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => dispatch_event(event, &event_tx),
                Err(e) => error!(error = %e, "ipc watcher error"),
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        Ok(Self { _inner: watcher, root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// One-shot directory sweep: treat every existing file under a recognized
/// subdirectory as if it had just been created. Used both at startup and by
/// [`IpcWatcher::start`].
pub fn sweep(root: &Path, tx: &mpsc::UnboundedSender<IpcEvent>) {
    let Ok(folders) = std::fs::read_dir(root) else {
        return;
    };
    for folder_entry in folders.flatten() {
        let folder_path = folder_entry.path();
        if !folder_path.is_dir() {
            continue;
        }
        let Some(folder_name) = folder_path.file_name().map(|n| n.to_string_lossy().to_string())
        else {
            continue;
        };
        if folder_name == "errors" {
            continue;
        }
        for (subdir, kind) in [
            ("input", IpcEventKind::Message),
            ("tasks", IpcEventKind::Task),
            ("output", IpcEventKind::Output),
            ("approval_decisions", IpcEventKind::ApprovalDecision),
        ] {
            let dir = folder_path.join(subdir);
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if is_eligible(&path) {
                    let _ = tx.send(IpcEvent { folder: folder_name.clone(), kind, path });
                }
            }
        }
    }
}

fn dispatch_event(event: Event, tx: &mpsc::UnboundedSender<IpcEvent>) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return;
    }
    for path in event.paths {
        if !is_eligible(&path) {
            continue;
        }
        let Some(kind) = classify(&path) else { continue };
        let Some(folder) = folder_of(&path) else { continue };
        debug!(path = %path.display(), folder, "ipc file observed");
        if tx.send(IpcEvent { folder, kind, path }).is_err() {
            warn!("ipc dispatcher channel closed, dropping event");
        }
    }
}

fn is_eligible(path: &Path) -> bool {
    path.is_file()
        && path.extension().map(|e| e == "json").unwrap_or(false)
        && path.file_name().map(|n| !n.to_string_lossy().ends_with(".tmp")).unwrap_or(false)
}

fn classify(path: &Path) -> Option<IpcEventKind> {
    let parent_name = path.parent()?.file_name()?.to_string_lossy().to_string();
    match parent_name.as_str() {
        "input" => Some(IpcEventKind::Message),
        "tasks" => Some(IpcEventKind::Task),
        "output" => Some(IpcEventKind::Output),
        "approval_decisions" => Some(IpcEventKind::ApprovalDecision),
        _ => None,
    }
}

/// `<ipc_root>/<folder>/<subdir>/<file>` — the folder two components up
/// from the file.
fn folder_of(path: &Path) -> Option<String> {
    let subdir_path = path.parent()?;
    let folder_path = subdir_path.parent()?;
    folder_path.file_name().map(|n| n.to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_all_four_dispatched_subdirs() {
        assert_eq!(
            classify(Path::new("/data/ipc/acme/input/a.json")),
            Some(IpcEventKind::Message)
        );
        assert_eq!(
            classify(Path::new("/data/ipc/acme/tasks/a.json")),
            Some(IpcEventKind::Task)
        );
        assert_eq!(classify(Path::new("/data/ipc/acme/output/a.json")), Some(IpcEventKind::Output));
        assert_eq!(
            classify(Path::new("/data/ipc/acme/approval_decisions/a.json")),
            Some(IpcEventKind::ApprovalDecision)
        );
        assert_eq!(classify(Path::new("/data/ipc/acme/responses/a.json")), None);
    }

    #[test]
    fn folder_of_extracts_workspace_folder() {
        assert_eq!(
            folder_of(Path::new("/data/ipc/acme/input/a.json")),
            Some("acme".to_string())
        );
    }

    #[test]
    fn tmp_files_are_never_eligible() {
        assert!(!is_eligible(Path::new("/data/ipc/acme/input/a.json.tmp")));
    }
}
