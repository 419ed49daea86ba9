//! `data/boot_warnings.json` (§1.1 supplemented ambient feature): channel
//! setup logs missing credentials rather than failing the boot (§4.9 Phase
//! 2); these are additionally persisted here so a `GET /status` caller or
//! the TUI can surface them without re-parsing logs.

use std::path::{Path, PathBuf};

use pynchy_core::types::{now, Timestamp};
use pynchy_ipc::write_json_atomic;
use serde::{Deserialize, Serialize};
use tracing::warn;

const FILE_NAME: &str = "boot_warnings.json";
/// Bounded count: read at startup, merged with the current run's warnings,
/// truncated to this many most-recent entries.
const MAX_WARNINGS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootWarning {
    pub timestamp: Timestamp,
    pub message: String,
}

fn path(data_root: &Path) -> PathBuf {
    data_root.join(FILE_NAME)
}

fn load(data_root: &Path) -> Vec<BootWarning> {
    let path = path(data_root);
    let Ok(raw) = std::fs::read_to_string(&path) else { return Vec::new() };
    serde_json::from_str(&raw).unwrap_or_default()
}

/// Appends one warning, read-modify-write, dropping the oldest entries past
/// `MAX_WARNINGS`. Called during any startup phase whenever a non-fatal
/// problem is noticed; never itself a reason to fail the phase.
pub fn record(data_root: &Path, message: impl Into<String>) {
    let message = message.into();
    warn!(%message, "boot warning recorded");
    let mut warnings = load(data_root);
    warnings.push(BootWarning { timestamp: now(), message });
    if warnings.len() > MAX_WARNINGS {
        let drop = warnings.len() - MAX_WARNINGS;
        warnings.drain(0..drop);
    }
    if let Err(e) = write_json_atomic(&path(data_root), &warnings) {
        warn!(error = %e, "failed to persist boot_warnings.json");
    }
}

/// Read-only snapshot for `GET /status`.
pub fn current(data_root: &Path) -> Vec<BootWarning> {
    load(data_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_truncates_to_bound() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(MAX_WARNINGS + 10) {
            record(dir.path(), format!("warning {i}"));
        }
        let warnings = current(dir.path());
        assert_eq!(warnings.len(), MAX_WARNINGS);
        assert_eq!(warnings.last().unwrap().message, format!("warning {}", MAX_WARNINGS + 9));
    }
}
