//! `SessionManager` — owns every live container process, keyed by
//! workspace folder (§4.2). This is the "session registry" named in §3's
//! ownership summary: "Container processes are owned by the session
//! registry (a process map keyed by workspace folder)."

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pynchy_ipc::{write_json_atomic, write_sentinel, ContainerInput, IpcPaths, InputMessage};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, instrument, warn};

use crate::error::{Result, SessionError};
use crate::session::ContainerSession;
use crate::types::{message_container_name, one_shot_container_name, QueryOutcome};

struct ManagedSession {
    session: Arc<ContainerSession>,
    child: AsyncMutex<Option<Child>>,
    idle_generation: AtomicU64,
}

/// A bind mount the spawned container should receive: `host_path:container_path[:ro]`.
#[derive(Debug, Clone)]
pub struct Mount {
    pub host_path: String,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    pub fn rw(host: impl Into<String>, container: impl Into<String>) -> Self {
        Self { host_path: host.into(), container_path: container.into(), read_only: false }
    }

    fn to_arg(&self) -> String {
        if self.read_only {
            format!("{}:{}:ro", self.host_path, self.container_path)
        } else {
            format!("{}:{}", self.host_path, self.container_path)
        }
    }
}

/// Owns the registry of live container processes for every workspace.
pub struct SessionManager {
    paths: IpcPaths,
    runtime_bin: String,
    image: String,
    sessions: DashMap<String, Arc<ManagedSession>>,
}

impl SessionManager {
    pub fn new(data_root: impl Into<std::path::PathBuf>, runtime_bin: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            paths: IpcPaths::new(data_root),
            runtime_bin: runtime_bin.into(),
            image: image.into(),
            sessions: DashMap::new(),
        }
    }

    pub fn is_active(&self, folder: &str) -> bool {
        self.sessions.get(folder).map(|e| !e.session.is_dead()).unwrap_or(false)
    }

    pub fn session(&self, folder: &str) -> Option<Arc<ContainerSession>> {
        self.sessions.get(folder).map(|e| e.session.clone())
    }

    /// Snapshot of every live session's folder and resumable session id
    /// (§4.4 step 7 "persist a `deploy_continuation.json` listing active
    /// sessions"), taken right before a self-deploy exits the process.
    pub fn active_sessions(&self) -> Vec<(String, Option<String>)> {
        self.sessions
            .iter()
            .filter(|e| !e.session.is_dead())
            .map(|e| (e.key().clone(), e.value().session.session_id()))
            .collect()
    }

    /// Cold start (§4.2): writes `initial.json`, force-removes any stale
    /// container with the stable name, cleans other stale IPC files,
    /// spawns the container, and registers a new session. `mounts` is the
    /// resolved mount set (workspace dir, optional worktree, IPC dir);
    /// `is_one_shot` selects the timestamped scheduled-task container name.
    /// `idle_timeout_ms` arms the idle-teardown timer (§4.2 "Idle timer")
    /// right after spawn as a dead-man's switch in case the first query
    /// never completes; the query-completion path re-arms it for the next
    /// idle window. Scheduled one-shot runs pass `0` to disable it — the
    /// scheduler's own idle watchdog tears those down instead.
    #[instrument(skip(self, input, mounts), fields(folder = %input.group_folder))]
    pub async fn cold_start(
        self: &Arc<Self>,
        input: ContainerInput,
        mounts: Vec<Mount>,
        is_one_shot: bool,
        idle_timeout_ms: u64,
    ) -> Result<Arc<ContainerSession>> {
        let folder = input.group_folder.clone();
        let container_name = if is_one_shot {
            one_shot_container_name(&folder, chrono::Utc::now().timestamp_millis())
        } else {
            message_container_name(&folder)
        };

        for dir in self.paths.all_dirs(&folder) {
            std::fs::create_dir_all(&dir)?;
        }

        let initial_path = self.paths.initial_input_file(&folder);
        write_json_atomic(&initial_path, &input)?;

        self.force_remove_container(&container_name).await;
        self.clean_stale_ipc_files(&folder, &initial_path)?;

        let child = self.spawn_container(&container_name, &mounts).await?;

        let session = Arc::new(ContainerSession::new(&folder, &container_name, input.session_id.clone()));
        let managed = Arc::new(ManagedSession {
            session: session.clone(),
            child: AsyncMutex::new(Some(child)),
            idle_generation: AtomicU64::new(0),
        });

        self.spawn_process_monitor(managed.clone());
        self.sessions.insert(folder.clone(), managed);

        session.start_query();
        self.arm_idle_timer(&folder, idle_timeout_ms);
        info!(folder, container_name = %session.container_name, "cold start: container spawned");
        Ok(session)
    }

    /// Warm path (§4.2): write a new message file for a live session and
    /// mark a query as in flight. The caller awaits `session.wait_done`.
    #[instrument(skip(self, text), fields(folder))]
    pub fn send_message(&self, folder: &str, text: &str) -> Result<()> {
        let managed = self.sessions.get(folder).ok_or_else(|| SessionError::NotFound(folder.to_string()))?;
        managed.session.start_query();
        let file_name = format!("{}.json", unique_suffix(text));
        let path = self.paths.input_dir(folder).join(file_name);
        write_json_atomic(&path, &InputMessage::new(text))?;
        Ok(())
    }

    /// Closes the IPC input channel without stopping the container —
    /// used by the scheduler's idle watchdog to make a one-shot run exit
    /// cleanly rather than block on `wait_for_ipc_message` (§4.7).
    pub fn close_stdin(&self, folder: &str) -> Result<()> {
        write_sentinel(&self.paths.close_sentinel(folder))?;
        Ok(())
    }

    /// Stop protocol (§4.2), always idempotent:
    /// 1. cancel idle timer, mark dead/destroying
    /// 2. write the close sentinel
    /// 3. graceful stop (SIGTERM via `docker stop`), then force (`docker kill`)
    /// 4. `docker rm -f`
    /// 5. drop the map entry, waking any waiter
    #[instrument(skip(self))]
    pub async fn stop_session(&self, folder: &str) -> Result<()> {
        let Some((_, managed)) = self.sessions.remove(folder) else {
            return Ok(());
        };
        managed.idle_generation.fetch_add(1, Ordering::SeqCst);
        managed.session.mark_destroying();

        let _ = write_sentinel(&self.paths.close_sentinel(folder));

        let mut child_guard = managed.child.lock().await;
        if let Some(mut child) = child_guard.take() {
            let graceful = Command::new(&self.runtime_bin)
                .args(["stop", "-t", "5", &managed.session.container_name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if graceful.is_err() {
                warn!(folder, "docker stop failed, falling back to kill");
            }
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        }
        drop(child_guard);

        self.force_remove_container(&managed.session.container_name).await;
        managed.session.record_exit(None);
        Ok(())
    }

    /// Arm the idle timer (§4.2): fires after `idle_timeout_ms` of no
    /// query activity and destroys the session. `0` disables the timer —
    /// used for scheduled-task (one-shot) sessions via
    /// `idle_timeout_override = 0`.
    pub fn arm_idle_timer(self: &Arc<Self>, folder: &str, idle_timeout_ms: u64) {
        if idle_timeout_ms == 0 {
            return;
        }
        let Some(managed) = self.sessions.get(folder).map(|e| e.clone()) else {
            return;
        };
        let generation = managed.idle_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let folder = folder.to_string();
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(idle_timeout_ms)).await;
            let still_current = manager
                .sessions
                .get(&folder)
                .map(|e| e.idle_generation.load(Ordering::SeqCst) == generation)
                .unwrap_or(false);
            if still_current {
                info!(folder, "idle timeout fired, destroying session");
                let _ = manager.stop_session(&folder).await;
            }
        });
    }

    async fn spawn_container(&self, name: &str, mounts: &[Mount]) -> Result<Child> {
        let mut cmd = Command::new(&self.runtime_bin);
        cmd.args(["run", "-d", "--name", name]);
        for mount in mounts {
            cmd.args(["-v", &mount.to_arg()]);
        }
        cmd.arg(&self.image);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        cmd.spawn().map_err(|e| SessionError::SpawnFailed { folder: name.to_string(), reason: e.to_string() })
    }

    async fn force_remove_container(&self, name: &str) {
        let _ = Command::new(&self.runtime_bin)
            .args(["rm", "-f", name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }

    /// Clean stale `input/`/`output/` files but preserve `initial.json`
    /// (§4.2 step 6).
    fn clean_stale_ipc_files(&self, folder: &str, initial_path: &std::path::Path) -> Result<()> {
        for dir in [self.paths.input_dir(folder), self.paths.output_dir(folder)] {
            let Ok(entries) = std::fs::read_dir(&dir) else { continue };
            for entry in entries.flatten() {
                let path = entry.path();
                if path != initial_path {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }

    /// Forwards the container's stderr to `tracing` and awaits process
    /// exit, recording it on the session (§4.2 "unexpected-death
    /// detection"). Runs for the lifetime of the container.
    fn spawn_process_monitor(&self, managed: Arc<ManagedSession>) {
        tokio::spawn(async move {
            let stderr = {
                let mut guard = managed.child.lock().await;
                guard.as_mut().and_then(|c| c.stderr.take())
            };
            if let Some(stderr) = stderr {
                let folder = managed.session.folder.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        warn!(folder, "container stderr: {line}");
                    }
                });
            }

            let exit_code = {
                let mut guard = managed.child.lock().await;
                if let Some(child) = guard.as_mut() {
                    child.wait().await.ok().and_then(|s| s.code())
                } else {
                    None
                }
            };
            managed.session.record_exit(exit_code);
        });
    }
}

/// Deterministic-enough unique suffix for message input filenames — a hash
/// of the text plus the current time, so repeated identical messages don't
/// collide within the same millisecond.
fn unique_suffix(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or(0).hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Translate a `QueryOutcome` into the worker's retry decision (§7
/// "container died before pulse -> SessionDied -> worker treats as
/// retry, cursor is not advanced").
pub fn outcome_to_result(outcome: QueryOutcome, folder: &str, timeout_ms: u64) -> Result<Option<String>> {
    match outcome {
        QueryOutcome::Done { new_session_id } => Ok(Some(new_session_id)),
        QueryOutcome::CleanShutdown => Ok(None),
        QueryOutcome::Died => Err(SessionError::ContainerDied { folder: folder.to_string() }),
        QueryOutcome::TimedOut => Err(SessionError::Timeout { folder: folder.to_string(), ms: timeout_ms }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_formats_ro_suffix() {
        let m = Mount { host_path: "/a".into(), container_path: "/b".into(), read_only: true };
        assert_eq!(m.to_arg(), "/a:/b:ro");
        let rw = Mount::rw("/a", "/b");
        assert_eq!(rw.to_arg(), "/a:/b");
    }

    #[test]
    fn unique_suffix_differs_across_calls() {
        let a = unique_suffix("hello");
        let b = unique_suffix("hello");
        assert_ne!(a, b);
    }

    #[test]
    fn outcome_translates_died_to_container_died_error() {
        let res = outcome_to_result(QueryOutcome::Died, "acme", 1000);
        assert!(matches!(res, Err(SessionError::ContainerDied { .. })));
    }

    #[test]
    fn outcome_translates_done_to_session_id() {
        let res = outcome_to_result(QueryOutcome::Done { new_session_id: "s1".into() }, "acme", 1000);
        assert_eq!(res.unwrap(), Some("s1".to_string()));
    }
}
