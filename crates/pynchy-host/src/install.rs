//! Service installer (§1.1 supplemented ambient feature, `startup_handler.py`
//! in the original): installs the host as a platform service unit so it
//! survives reboots and restarts after a self-deploy exit — `launchd` on
//! macOS, a systemd user unit on Linux. Idempotent: re-running detects an
//! existing unit and is a no-op.

use std::path::PathBuf;
use std::process::Command;

use tracing::info;

use crate::error::{HostError, Result};

const LABEL: &str = "com.pynchy.host";
const UNIT_NAME: &str = "pynchy-host.service";

/// Installs (or confirms already-installed) the service unit that runs
/// `binary_path` with `--config <config_path>` on login/boot.
pub fn install_service(binary_path: &str, config_path: &str) -> Result<()> {
    if cfg!(target_os = "macos") {
        install_launchd(binary_path, config_path)
    } else if cfg!(target_os = "linux") {
        install_systemd(binary_path, config_path)
    } else {
        Err(HostError::Install("service installation is only supported on macOS and Linux".to_string()))
    }
}

fn launchd_plist_path() -> PathBuf {
    dirs_home().join("Library/LaunchAgents").join(format!("{LABEL}.plist"))
}

fn install_launchd(binary_path: &str, config_path: &str) -> Result<()> {
    let plist_path = launchd_plist_path();
    if plist_path.exists() {
        info!(path = %plist_path.display(), "launchd unit already installed, skipping");
        return Ok(());
    }

    let contents = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{LABEL}</string>
    <key>ProgramArguments</key>
    <array>
        <string>{binary_path}</string>
        <string>--config</string>
        <string>{config_path}</string>
    </array>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <true/>
</dict>
</plist>
"#
    );

    if let Some(parent) = plist_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HostError::Install(e.to_string()))?;
    }
    std::fs::write(&plist_path, contents).map_err(|e| HostError::Install(e.to_string()))?;

    let status = Command::new("launchctl")
        .args(["load", "-w"])
        .arg(&plist_path)
        .status()
        .map_err(|e| HostError::Install(format!("launchctl load failed: {e}")))?;
    if !status.success() {
        return Err(HostError::Install(format!("launchctl load exited with {status:?}")));
    }

    info!(path = %plist_path.display(), "installed launchd service unit");
    Ok(())
}

fn systemd_unit_path() -> PathBuf {
    dirs_home().join(".config/systemd/user").join(UNIT_NAME)
}

fn install_systemd(binary_path: &str, config_path: &str) -> Result<()> {
    let unit_path = systemd_unit_path();
    if unit_path.exists() {
        info!(path = %unit_path.display(), "systemd unit already installed, skipping");
        return Ok(());
    }

    let contents = format!(
        r#"[Unit]
Description=pynchy host

[Service]
ExecStart={binary_path} --config {config_path}
Restart=on-failure
RestartSec=5

[Install]
WantedBy=default.target
"#
    );

    if let Some(parent) = unit_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| HostError::Install(e.to_string()))?;
    }
    std::fs::write(&unit_path, contents).map_err(|e| HostError::Install(e.to_string()))?;

    let reload = Command::new("systemctl")
        .args(["--user", "daemon-reload"])
        .status()
        .map_err(|e| HostError::Install(format!("systemctl daemon-reload failed: {e}")))?;
    if !reload.success() {
        return Err(HostError::Install(format!("systemctl daemon-reload exited with {reload:?}")));
    }

    let enable = Command::new("systemctl")
        .args(["--user", "enable", "--now", UNIT_NAME])
        .status()
        .map_err(|e| HostError::Install(format!("systemctl enable failed: {e}")))?;
    if !enable.success() {
        return Err(HostError::Install(format!("systemctl enable exited with {enable:?}")));
    }

    info!(path = %unit_path.display(), "installed systemd user unit");
    Ok(())
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launchd_plist_path_is_under_launch_agents() {
        let path = launchd_plist_path();
        assert!(path.to_string_lossy().contains("LaunchAgents"));
        assert!(path.to_string_lossy().ends_with(".plist"));
    }

    #[test]
    fn systemd_unit_path_is_under_user_systemd_dir() {
        let path = systemd_unit_path();
        assert!(path.to_string_lossy().contains("systemd/user"));
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), UNIT_NAME);
    }
}
