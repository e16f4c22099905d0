//! Write-temp-fsync-rename for all persisted JSON (§4.1).
//!
//! Generalizes the teacher's `StateManager::save_tasks()`, which applied this
//! pattern only to `tasks.json`; here every persisted file — session journal,
//! lock file, parallel session state — goes through the same path.

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::Write as _;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Atomically replace the contents of `path` with `bytes`.
///
/// Creates parent directories if needed, writes to a sibling temp file in
/// the same directory (so the final rename is atomic on the same filesystem),
/// fsyncs it, then persists over `path`. `mode` is applied on unix only.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create directory {}", parent.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;

    tmp.write_all(bytes)
        .with_context(|| format!("failed to write temp file for {}", path.display()))?;
    tmp.as_file_mut()
        .sync_all()
        .with_context(|| format!("failed to fsync temp file for {}", path.display()))?;

    #[cfg(unix)]
    {
        let mut perms = tmp.as_file().metadata()?.permissions();
        perms.set_mode(mode);
        tmp.as_file().set_permissions(perms)?;
    }
    let _ = mode;

    tmp.persist(path)
        .map_err(|e| anyhow::anyhow!("failed to atomically replace {}: {}", path.display(), e))?;

    Ok(())
}

/// Serialize `value` to pretty JSON and write it atomically.
pub fn write_atomic_json<T: serde::Serialize>(path: &Path, value: &T, mode: u32) -> Result<()> {
    let content = serde_json::to_vec_pretty(value).context("failed to serialize value to JSON")?;
    write_atomic(path, &content, mode)
}

/// Read and parse a JSON file, returning `None` if it doesn't exist.
///
/// On parse failure the caller is expected to treat this as §7 "Corruption":
/// rename the bad file aside and start fresh (see `journal::quarantine_corrupt`).
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: T = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Rename a corrupt file aside as `<name>.corrupt.<timestamp>` so a fresh
/// session can be started without losing the bad artifact for diagnosis.
pub fn quarantine(path: &Path) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ");
    let mut quarantined = path.as_os_str().to_owned();
    quarantined.push(format!(".corrupt.{timestamp}"));
    fs::rename(path, Path::new(&quarantined))
        .with_context(|| format!("failed to quarantine corrupt file {}", path.display()))?;
    Ok(())
}

/// Best-effort: open a file for appending, creating it if absent.
pub fn open_append(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.json");
        let sample = Sample { a: 7, b: "hi".into() };

        write_atomic_json(&path, &sample, 0o600).unwrap();
        let read: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(read, Some(sample));
    }

    #[test]
    fn read_json_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let read: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn quarantine_renames_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "not json").unwrap();

        quarantine(&path).unwrap();
        assert!(!path.exists());
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn write_atomic_applies_mode() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("secret.json");
        write_atomic(&path, b"{}", 0o600).unwrap();
        let perms = fs::metadata(&path).unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600);
    }
}
