use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::error::{IpcError, Result};

/// Write `value` to `path` via a `.tmp` + rename — §8 property 8 ("no
/// consumer observes a partially-written JSON payload"). The temp file lives
/// alongside the target so the rename stays within one filesystem.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| IpcError::Parse {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(&tmp_path, bytes)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Touch an empty sentinel file (e.g. the `_close` marker) atomically.
pub fn write_sentinel(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = tmp_path_for(path);
    std::fs::write(&tmp_path, b"")?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let name = tmp
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    tmp.set_file_name(format!("{name}.tmp"));
    tmp
}

/// Read and parse a JSON file, then unlink it — "every successful read is
/// followed by unlink" (§4.5 atomicity rule). Parse failures are quarantined
/// to `errors_dir` under `<folder>-<original-name>.json` rather than left in
/// place, so the watcher never retries a file it cannot understand.
pub fn read_and_consume<T: serde::de::DeserializeOwned>(
    path: &Path,
    folder: &str,
    errors_dir: &Path,
) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => {
            let _ = std::fs::remove_file(path);
            Ok(Some(value))
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "quarantining unparseable IPC file");
            quarantine(path, folder, errors_dir)?;
            Err(IpcError::Parse {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        }
    }
}

fn quarantine(path: &Path, folder: &str, errors_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(errors_dir)?;
    let original = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "unknown.json".to_string());
    let dest = errors_dir.join(format!("{folder}-{original}"));
    std::fs::rename(path, dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InputMessage;

    #[test]
    fn write_then_read_round_trips_and_unlinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        write_json_atomic(&path, &InputMessage::new("hi")).unwrap();
        assert!(path.exists());
        assert!(!dir.path().join("a.json.tmp").exists());

        let errors = dir.path().join("errors");
        let msg: InputMessage = read_and_consume(&path, "acme", &errors).unwrap().unwrap();
        assert_eq!(msg.text, "hi");
        assert!(!path.exists(), "file is unlinked after a successful read");
    }

    #[test]
    fn unparseable_file_is_quarantined_not_left_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, b"{not json").unwrap();
        let errors = dir.path().join("errors");

        let result = read_and_consume::<InputMessage>(&path, "acme", &errors);
        assert!(result.is_err());
        assert!(!path.exists());
        assert!(errors.join("acme-bad.json").exists());
    }

    #[test]
    fn missing_file_reads_as_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let errors = dir.path().join("errors");
        let result: Option<InputMessage> = read_and_consume(&path, "acme", &errors).unwrap();
        assert!(result.is_none());
    }
}
