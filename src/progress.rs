//! Progress Log (§2, §5, §8): append-only markdown artifact summarizing
//! each iteration, capped at 50 KB by truncating from the head at `## `
//! entry boundaries — the teacher's `append_progress()` had no such cap.

use anyhow::{Context, Result};
use std::io::Write as _;
use std::path::{Path, PathBuf};

const MAX_BYTES: usize = 50 * 1024;
const TRUNCATION_HEADER: &str = "<!-- earlier entries truncated -->\n";

pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append a timestamped entry, then enforce the size cap.
    pub fn append(&self, entry: &str) -> Result<()> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let line = format!("\n## {timestamp}\n\n{entry}\n");

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        drop(file);

        self.truncate_if_needed()
    }

    pub fn read(&self) -> Result<String> {
        if !self.path.exists() {
            return Ok(String::new());
        }
        std::fs::read_to_string(&self.path).context("failed to read progress log")
    }

    /// Last `n` entries (split on `## ` boundaries), most recent last —
    /// used as prompt context ("recent progress summary").
    pub fn recent_entries(&self, n: usize) -> Result<Vec<String>> {
        let content = self.read()?;
        let entries = split_entries(&content);
        let start = entries.len().saturating_sub(n);
        Ok(entries[start..].to_vec())
    }

    fn truncate_if_needed(&self) -> Result<()> {
        let content = self.read()?;
        if content.len() <= MAX_BYTES {
            return Ok(());
        }
        let truncated = truncate_from_head(&content, MAX_BYTES);
        crate::atomic::write_atomic(&self.path, truncated.as_bytes(), 0o644)
    }
}

fn split_entries(content: &str) -> Vec<String> {
    let mut entries = Vec::new();
    let mut current = String::new();
    for line in content.lines() {
        if line.starts_with("## ") && !current.trim().is_empty() {
            entries.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        entries.push(current);
    }
    entries
}

/// Drop whole entries from the head until what remains (plus the truncation
/// marker) fits under `max_bytes`. Only two legal outcomes (§9): the content
/// is already `<= max_bytes`, or it is `header + marker + tail starting at
/// the next "## " boundary`.
fn truncate_from_head(content: &str, max_bytes: usize) -> String {
    let entries = split_entries(content);
    let budget = max_bytes.saturating_sub(TRUNCATION_HEADER.len());

    let mut kept_len = 0usize;
    let mut start_idx = entries.len();
    for (idx, entry) in entries.iter().enumerate().rev() {
        if kept_len + entry.len() > budget {
            break;
        }
        kept_len += entry.len();
        start_idx = idx;
    }

    let mut result = String::with_capacity(kept_len + TRUNCATION_HEADER.len());
    result.push_str(TRUNCATION_HEADER);
    for entry in &entries[start_idx..] {
        result.push_str(entry);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_read_yields_last_entry_unchanged() {
        let dir = tempdir().unwrap();
        let log = ProgressLog::new(dir.path().join("progress.md"));
        log.append("T1 completed").unwrap();

        let content = log.read().unwrap();
        assert!(content.contains("T1 completed"));
    }

    #[test]
    fn stays_under_cap_after_many_appends() {
        let dir = tempdir().unwrap();
        let log = ProgressLog::new(dir.path().join("progress.md"));
        let filler = "x".repeat(2000);
        for i in 0..100 {
            log.append(&format!("entry {i}: {filler}")).unwrap();
        }

        let content = log.read().unwrap();
        assert!(content.len() <= MAX_BYTES);
        // The most recent entry must always survive truncation.
        assert!(content.contains("entry 99"));
    }

    #[test]
    fn truncation_preserves_entry_boundaries() {
        let entries = (0..50)
            .map(|i| format!("## entry-{i}\n\n{}\n", "y".repeat(1500)))
            .collect::<String>();

        let truncated = truncate_from_head(&entries, MAX_BYTES);
        assert!(truncated.starts_with(TRUNCATION_HEADER));
        assert!(truncated.len() <= MAX_BYTES + TRUNCATION_HEADER.len());
        // Every kept entry starts cleanly at a "## " boundary.
        for line in truncated.lines().filter(|l| l.starts_with("## ")) {
            assert!(line.starts_with("## entry-"));
        }
    }
}
