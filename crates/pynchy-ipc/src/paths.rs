use std::path::PathBuf;

/// The IPC directory layout under `data/ipc/<folder>/...` (§4.5, §6).
/// Every accessor here is a pure path computation — no I/O.
#[derive(Debug, Clone)]
pub struct IpcPaths {
    root: PathBuf,
}

impl IpcPaths {
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self { root: data_root.into().join("ipc") }
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    pub fn workspace_root(&self, folder: &str) -> PathBuf {
        self.root.join(folder)
    }

    pub fn input_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("input")
    }

    pub fn output_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("output")
    }

    pub fn tasks_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("tasks")
    }

    pub fn responses_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("responses")
    }

    pub fn pending_approvals_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("pending_approvals")
    }

    pub fn approval_decisions_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("approval_decisions")
    }

    pub fn pending_questions_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("pending_questions")
    }

    pub fn merge_results_dir(&self, folder: &str) -> PathBuf {
        self.workspace_root(folder).join("merge_results")
    }

    pub fn initial_input_file(&self, folder: &str) -> PathBuf {
        self.input_dir(folder).join("initial.json")
    }

    pub fn close_sentinel(&self, folder: &str) -> PathBuf {
        self.input_dir(folder).join("_close")
    }

    /// Every directory that must exist before a container is spawned for
    /// `folder` — created eagerly so the watcher always has something to
    /// observe and the container never sees missing mount points.
    pub fn all_dirs(&self, folder: &str) -> Vec<PathBuf> {
        vec![
            self.input_dir(folder),
            self.output_dir(folder),
            self.tasks_dir(folder),
            self.responses_dir(folder),
            self.pending_approvals_dir(folder),
            self.approval_decisions_dir(folder),
            self.pending_questions_dir(folder),
            self.merge_results_dir(folder),
        ]
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_nests_under_folder() {
        let p = IpcPaths::new("/data");
        assert_eq!(p.input_dir("acme"), PathBuf::from("/data/ipc/acme/input"));
        assert_eq!(
            p.initial_input_file("acme"),
            PathBuf::from("/data/ipc/acme/input/initial.json")
        );
        assert_eq!(p.errors_dir(), PathBuf::from("/data/ipc/errors"));
    }
}
