use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use pynchy_ipc::McpServerRef;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::mcp::instance::McpInstance;
use crate::mcp::spec::{McpLaunch, McpServerSpec};

/// Tracks every MCP instance this process has started, across every
/// workspace, keyed by `(folder, instance name)` (§4.6 "MCP instance
/// lifecycle"). Instances are lazy: nothing starts until a workspace first
/// needs it.
pub struct McpRegistry {
    instances: DashMap<(String, String), Arc<Mutex<McpInstance>>>,
    runtime_bin: String,
    proxy_base_url: String,
}

impl McpRegistry {
    pub fn new(runtime_bin: impl Into<String>, proxy_base_url: impl Into<String>) -> Self {
        Self { instances: DashMap::new(), runtime_bin: runtime_bin.into(), proxy_base_url: proxy_base_url.into() }
    }

    fn get_or_insert(&self, folder: &str, spec: &McpServerSpec) -> Arc<Mutex<McpInstance>> {
        self.instances
            .entry((folder.to_string(), spec.name.clone()))
            .or_insert_with(|| Arc::new(Mutex::new(McpInstance::new(spec.clone()))))
            .value()
            .clone()
    }

    /// Starts every instance listed for `folder` that isn't already running
    /// (§4.6 "`ensure_workspace_running(folder)`").
    pub async fn ensure_workspace_running(&self, folder: &str, specs: &[McpServerSpec]) -> Result<()> {
        for spec in specs {
            let instance = self.get_or_insert(folder, spec);
            let mut guard = instance.lock().await;
            guard.ensure_started(&self.runtime_bin, folder).await?;
        }
        Ok(())
    }

    /// The backend URL for a running instance, for the proxy to forward to.
    /// Also records activity so the idle checker leaves it alone.
    pub async fn backend_url(&self, folder: &str, instance_id: &str) -> Option<String> {
        let instance = self.instances.get(&(folder.to_string(), instance_id.to_string()))?.value().clone();
        let mut guard = instance.lock().await;
        guard.touch();
        guard.backend_url.clone()
    }

    pub async fn is_public_source(&self, folder: &str, instance_id: &str) -> bool {
        match self.instances.get(&(folder.to_string(), instance_id.to_string())) {
            Some(entry) => entry.value().lock().await.spec.public_source,
            None => false,
        }
    }

    /// §4.6 "direct-server-configs API": one `McpServerRef` per configured
    /// instance in the workspace, pointing the container at the proxy
    /// rather than the raw backend.
    pub fn direct_server_configs(&self, folder: &str, invocation_ts: &str, specs: &[McpServerSpec]) -> Vec<McpServerRef> {
        specs
            .iter()
            .map(|spec| McpServerRef {
                name: spec.name.clone(),
                url: format!("{}/mcp/{folder}/{invocation_ts}/{}", self.proxy_base_url, spec.name),
                transport: spec.transport.clone(),
            })
            .collect()
    }

    /// Background loop: stops any docker/script instance whose idle time
    /// exceeds its configured `idle_timeout_secs` (`0` meaning never).
    pub async fn run_idle_checker(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = interval.tick() => self.sweep_idle().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    async fn sweep_idle(&self) {
        for entry in self.instances.iter() {
            let instance = entry.value().clone();
            let mut guard = instance.lock().await;
            if !guard.is_running() || guard.spec.idle_timeout_secs == 0 {
                continue;
            }
            if guard.idle_for() > Duration::from_secs(guard.spec.idle_timeout_secs) {
                info!(instance = %guard.spec.name, folder = %entry.key().0, "stopping idle mcp instance");
                guard.stop(&self.runtime_bin).await;
            }
        }
    }

    /// Boot-time warm-up: pre-pull every Docker image referenced by any
    /// workspace's MCP configuration, so first use doesn't pay the pull cost.
    pub async fn warm_up_images(&self, all_specs: &HashMap<String, Vec<McpServerSpec>>) {
        let mut images: std::collections::HashSet<String> = std::collections::HashSet::new();
        for specs in all_specs.values() {
            for spec in specs {
                if let McpLaunch::Docker { image, .. } = &spec.launch {
                    images.insert(image.clone());
                }
            }
        }
        for image in images {
            let runtime_bin = self.runtime_bin.clone();
            tokio::spawn(async move {
                info!(image = %image, "pre-pulling mcp image");
                let _ = tokio::process::Command::new(&runtime_bin).args(["pull", &image]).output().await;
            });
        }
    }
}
