use std::time::Instant;

use tokio::process::{Child, Command};
use tracing::{info, warn};

use crate::error::{GatewayError, Result};
use crate::mcp::spec::{McpLaunch, McpServerSpec};

/// One running (or stopped) MCP backend for a workspace. Docker instances
/// are identified by their stable container name; host-script instances
/// keep the child process handle so it can be killed on stop.
pub enum RunningProcess {
    Docker { container_name: String },
    HostScript { child: Child },
}

pub struct McpInstance {
    pub spec: McpServerSpec,
    pub backend_url: Option<String>,
    pub process: Option<RunningProcess>,
    pub last_activity: Instant,
}

impl McpInstance {
    pub fn new(spec: McpServerSpec) -> Self {
        Self { spec, backend_url: None, process: None, last_activity: Instant::now() }
    }

    pub fn is_running(&self) -> bool {
        self.backend_url.is_some()
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity.elapsed()
    }

    /// Starts the backend if not already running: for Docker, removes any
    /// stale container by the same stable name first (§4.6 "name
    /// collisions"), then runs it; for a host script, spawns the
    /// subprocess. Either way, polls the port until a non-5xx response or
    /// the timeout elapses, then tears down on failure.
    pub async fn ensure_started(&mut self, runtime_bin: &str, folder: &str) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        match &self.spec.launch {
            McpLaunch::Docker { image, port, env } => {
                let container_name = self.spec.container_name(folder);
                let _ = Command::new(runtime_bin).args(["rm", "-f", &container_name]).output().await;

                let mut args = vec!["run".to_string(), "-d".to_string(), "--name".to_string(), container_name.clone(), "-p".to_string(), format!("{port}:{port}")];
                for (k, v) in env {
                    args.push("-e".to_string());
                    args.push(format!("{k}={v}"));
                }
                args.push(image.clone());

                let output = Command::new(runtime_bin).args(&args).output().await?;
                if !output.status.success() {
                    return Err(GatewayError::InstanceStartFailed(
                        self.spec.name.clone(),
                        String::from_utf8_lossy(&output.stderr).to_string(),
                    ));
                }

                let url = format!("http://127.0.0.1:{port}");
                if !health_check(&url).await {
                    let _ = Command::new(runtime_bin).args(["rm", "-f", &container_name]).output().await;
                    return Err(GatewayError::InstanceStartFailed(self.spec.name.clone(), "failed health check".to_string()));
                }

                info!(instance = %self.spec.name, folder, %container_name, "mcp instance started (docker)");
                self.process = Some(RunningProcess::Docker { container_name });
                self.backend_url = Some(url);
            }
            McpLaunch::HostScript { command, args, port } => {
                let child = Command::new(command).args(args).kill_on_drop(true).spawn()?;
                let url = format!("http://127.0.0.1:{port}");
                if !health_check(&url).await {
                    return Err(GatewayError::InstanceStartFailed(self.spec.name.clone(), "failed health check".to_string()));
                }
                info!(instance = %self.spec.name, folder, "mcp instance started (host script)");
                self.process = Some(RunningProcess::HostScript { child });
                self.backend_url = Some(url);
            }
        }

        self.touch();
        Ok(())
    }

    pub async fn stop(&mut self, runtime_bin: &str) {
        match self.process.take() {
            Some(RunningProcess::Docker { container_name }) => {
                let _ = Command::new(runtime_bin).args(["stop", &container_name]).output().await;
                let _ = Command::new(runtime_bin).args(["rm", "-f", &container_name]).output().await;
            }
            Some(RunningProcess::HostScript { mut child }) => {
                let _ = child.kill().await;
            }
            None => {}
        }
        self.backend_url = None;
    }
}

async fn health_check(base_url: &str) -> bool {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + std::time::Duration::from_secs(15);
    while Instant::now() < deadline {
        if let Ok(resp) = client.get(base_url).send().await {
            if resp.status().as_u16() < 500 {
                return true;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;
    }
    warn!(base_url, "mcp instance health check timed out");
    false
}
