//! `ralph-tui logs [--follow]` — stream the current session's iteration
//! logs. Re-pointed at the single `<cwd>/.ralph-tui/logs/` directory (one
//! session per working directory, §6) instead of the teacher's
//! `.ralph-<name>/logs/` per-named-loop scheme.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tokio::time::{interval, Duration};

use crate::cli::LogsArgs;

pub async fn show_logs(args: LogsArgs) -> Result<()> {
    let workdir = resolve_workdir(args.workdir.as_deref())?;
    let logs_dir = workdir.join(".ralph-tui").join("logs");
    if !logs_dir.exists() {
        anyhow::bail!(
            "No .ralph-tui/logs/ directory found in {}. Is there a running or completed session here?",
            workdir.display()
        );
    }

    if args.follow {
        follow_logs(&logs_dir).await
    } else {
        dump_logs(&logs_dir).await
    }
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    workdir.unwrap_or_else(|| Path::new(".")).canonicalize().context("cannot resolve workdir — does it exist?")
}

async fn dump_logs(logs_dir: &Path) -> Result<()> {
    let mut entries = collect_log_files(logs_dir).await?;
    if entries.is_empty() {
        println!("(no log files found in {})", logs_dir.display());
        return Ok(());
    }
    entries.sort_by_key(|(n, _)| *n);

    for (_, path) in &entries {
        let content = tokio::fs::read_to_string(path).await.with_context(|| format!("cannot read log {}", path.display()))?;
        println!("\n─── {} ───", path.file_name().unwrap_or_default().to_string_lossy());
        print!("{content}");
    }
    Ok(())
}

async fn follow_logs(logs_dir: &Path) -> Result<()> {
    println!("Following logs in {} (Ctrl-C to stop)", logs_dir.display());

    let mut current_path: Option<PathBuf> = None;
    let mut file: Option<tokio::fs::File> = None;
    let mut buf = Vec::new();
    let mut ticker = interval(Duration::from_millis(200));

    loop {
        ticker.tick().await;

        let newest = newest_log_file(logs_dir).await;
        match (&current_path, &newest) {
            (_, None) => {}
            (None, Some(new_path)) | (Some(_), Some(new_path)) if current_path.as_deref() != Some(new_path.as_path()) => {
                println!("\n─── {} ───", new_path.file_name().unwrap_or_default().to_string_lossy());
                let f = tokio::fs::File::open(new_path).await.with_context(|| format!("cannot open {}", new_path.display()))?;
                current_path = Some(new_path.clone());
                file = Some(f);
            }
            _ => {}
        }

        if let Some(f) = file.as_mut() {
            buf.clear();
            let n = f.read_to_end(&mut buf).await.unwrap_or(0);
            if n > 0 {
                let chunk = String::from_utf8_lossy(&buf[..n]);
                print!("{chunk}");
                use std::io::Write;
                let _ = std::io::stdout().flush();
            }
        }
    }
}

/// `iteration-<N>-<task>.log` files, paired with their iteration number.
async fn collect_log_files(logs_dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut result = Vec::new();
    let mut read_dir = tokio::fs::read_dir(logs_dir).await.with_context(|| format!("cannot read logs dir: {}", logs_dir.display()))?;

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with("iteration-") && name.ends_with(".log") {
                let n: u32 = name.trim_start_matches("iteration-").split('-').next().and_then(|s| s.parse().ok()).unwrap_or(0);
                result.push((n, path));
            }
        }
    }
    Ok(result)
}

async fn newest_log_file(logs_dir: &Path) -> Option<PathBuf> {
    let mut entries = collect_log_files(logs_dir).await.ok()?;
    entries.sort_by_key(|(n, _)| *n);
    entries.pop().map(|(_, p)| p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn collect_log_files_extracts_iteration_numbers() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("iteration-2-T1.log"), "b").await.unwrap();
        tokio::fs::write(dir.path().join("iteration-10-T2.log"), "a").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored").await.unwrap();

        let mut entries = collect_log_files(dir.path()).await.unwrap();
        entries.sort_by_key(|(n, _)| *n);
        assert_eq!(entries.iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![2, 10]);
    }

    #[tokio::test]
    async fn newest_log_file_picks_highest_iteration() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("iteration-1-T1.log"), "a").await.unwrap();
        tokio::fs::write(dir.path().join("iteration-5-T2.log"), "b").await.unwrap();

        let newest = newest_log_file(dir.path()).await.unwrap();
        assert_eq!(newest.file_name().unwrap().to_str().unwrap(), "iteration-5-T2.log");
    }
}
