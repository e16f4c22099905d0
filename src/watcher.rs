//! Background watchdog for a running agent execution.
//!
//! Runs as a separate tokio task and performs periodic health checks used by
//! the Agent Runner (§4.4):
//!
//! 1. **Output stall** — no stdout/stderr for `stall_timeout` fires
//!    `WatcherEvent::StallDetected`; the runner kills the child and treats
//!    the execution as timed out.
//! 2. **Disk space** — warns when free space on the workdir filesystem drops
//!    below `disk_warn_threshold` (default 1 GiB).
//! 3. **Git conflicts** — detects unmerged files (`UU`, `AA`, `DD`) which
//!    would block a later auto-commit or merge.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

#[derive(Debug, Clone)]
pub enum WatcherEvent {
    DiskSpaceWarning { free_bytes: u64 },
    GitConflictsDetected,
    StallDetected { no_output_secs: u64 },
}

#[derive(Clone)]
pub struct WatcherConfig {
    pub check_interval: Duration,
    pub stall_timeout: Duration,
    pub disk_warn_threshold: u64,
    pub workdir: PathBuf,
}

impl WatcherConfig {
    pub fn new(workdir: PathBuf) -> Self {
        Self {
            check_interval: Duration::from_secs(5),
            stall_timeout: Duration::from_secs(120),
            disk_warn_threshold: 1024 * 1024 * 1024,
            workdir,
        }
    }

    pub fn with_stall_timeout(mut self, d: Duration) -> Self {
        self.stall_timeout = d;
        self
    }
}

/// Dropping this handle (or calling `shutdown`) stops the watcher.
pub struct WatcherHandle {
    _shutdown_tx: oneshot::Sender<()>,
}

impl WatcherHandle {
    pub fn shutdown(self) {
        drop(self);
    }
}

pub fn start_watcher(
    config: WatcherConfig,
) -> (WatcherHandle, mpsc::Receiver<WatcherEvent>, Arc<AtomicU64>) {
    let (event_tx, event_rx) = mpsc::channel::<WatcherEvent>(16);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let last_output_ts = Arc::new(AtomicU64::new(unix_now_secs()));
    let last_output_ts_clone = last_output_ts.clone();

    tokio::spawn(async move {
        run_watcher(config, last_output_ts_clone, event_tx, shutdown_rx).await;
    });

    (WatcherHandle { _shutdown_tx: shutdown_tx }, event_rx, last_output_ts)
}

/// Call from the execution's stdout/stderr reader tasks on every line received.
pub fn update_last_output(ts: &Arc<AtomicU64>) {
    ts.store(unix_now_secs(), Ordering::Relaxed);
}

async fn run_watcher(
    config: WatcherConfig,
    last_output_ts: Arc<AtomicU64>,
    event_tx: mpsc::Sender<WatcherEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = interval(config.check_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stall_fired = false;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown_rx => break,

            _ = ticker.tick() => {
                let last_ts = last_output_ts.load(Ordering::Relaxed);
                let silent_secs = unix_now_secs().saturating_sub(last_ts);

                if silent_secs >= config.stall_timeout.as_secs() {
                    if !stall_fired {
                        stall_fired = true;
                        let _ = event_tx.send(WatcherEvent::StallDetected { no_output_secs: silent_secs }).await;
                    }
                } else {
                    stall_fired = false;
                }

                if let Ok(free) = free_disk_bytes(&config.workdir).await {
                    if free < config.disk_warn_threshold {
                        let _ = event_tx.send(WatcherEvent::DiskSpaceWarning { free_bytes: free }).await;
                    }
                }

                if has_git_conflicts(&config.workdir).await {
                    let _ = event_tx.send(WatcherEvent::GitConflictsDetected).await;
                }
            }
        }
    }
}

/// Free disk space in bytes for the filesystem containing `path`, via `df -k`.
pub async fn free_disk_bytes(path: &Path) -> Result<u64> {
    let output = tokio::process::Command::new("df").arg("-k").arg(path).output().await?;
    if !output.status.success() {
        anyhow::bail!("df failed");
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let avail_kb = stdout
        .lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3).and_then(|s| s.parse::<u64>().ok()))
        .ok_or_else(|| anyhow::anyhow!("failed to parse df output: {}", stdout))?;

    Ok(avail_kb * 1024)
}

pub async fn has_git_conflicts(workdir: &Path) -> bool {
    let output = match tokio::process::Command::new("git")
        .args(["status", "--porcelain"])
        .current_dir(workdir)
        .output()
        .await
    {
        Ok(o) => o,
        Err(_) => return false,
    };

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .any(|line| line.starts_with("UU") || line.starts_with("AA") || line.starts_with("DD"))
}

fn unix_now_secs() -> u64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;
    use tokio::time::timeout;

    fn run_git(workdir: &Path, args: &[&str]) {
        let output = StdCommand::new("git").args(args).current_dir(workdir).output().expect("git runs");
        assert!(output.status.success(), "git {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr));
    }

    fn init_repo(workdir: &Path) {
        run_git(workdir, &["init"]);
        run_git(workdir, &["config", "user.name", "Watcher Test"]);
        run_git(workdir, &["config", "user.email", "watcher-test@example.com"]);
    }

    #[tokio::test]
    async fn stall_detection_fires_after_timeout_with_no_output() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig {
            check_interval: Duration::from_millis(25),
            stall_timeout: Duration::from_secs(1),
            disk_warn_threshold: 0,
            workdir: dir.path().to_path_buf(),
        };

        let (_handle, mut event_rx, last_output_ts) = start_watcher(config);
        last_output_ts.store(unix_now_secs().saturating_sub(5), Ordering::Relaxed);

        let event = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap().unwrap();
        match event {
            WatcherEvent::StallDetected { no_output_secs } => assert!(no_output_secs >= 1),
            other => panic!("expected StallDetected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disk_space_warning_triggers_when_df_reports_low_space() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig {
            check_interval: Duration::from_millis(25),
            stall_timeout: Duration::from_secs(3600),
            disk_warn_threshold: u64::MAX,
            workdir: dir.path().to_path_buf(),
        };

        let (_handle, mut event_rx, _ts) = start_watcher(config);
        let event = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap().unwrap();
        match event {
            WatcherEvent::DiskSpaceWarning { free_bytes } => assert!(free_bytes > 0),
            other => panic!("expected DiskSpaceWarning, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn git_conflict_detection_emits_event_for_uu_status() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());

        let file_path = dir.path().join("conflict.txt");
        fs::write(&file_path, "base\n").unwrap();
        run_git(dir.path(), &["add", "conflict.txt"]);
        run_git(dir.path(), &["commit", "-m", "base"]);

        let default_branch = StdCommand::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        let default_branch = String::from_utf8_lossy(&default_branch.stdout).trim().to_string();

        run_git(dir.path(), &["checkout", "-b", "feature/conflict"]);
        fs::write(&file_path, "feature\n").unwrap();
        run_git(dir.path(), &["commit", "-am", "feature change"]);

        run_git(dir.path(), &["checkout", &default_branch]);
        fs::write(&file_path, "main\n").unwrap();
        run_git(dir.path(), &["commit", "-am", "main change"]);

        let merge_output =
            StdCommand::new("git").args(["merge", "feature/conflict"]).current_dir(dir.path()).output().unwrap();
        assert!(!merge_output.status.success());

        let config = WatcherConfig {
            check_interval: Duration::from_millis(25),
            stall_timeout: Duration::from_secs(3600),
            disk_warn_threshold: 0,
            workdir: dir.path().to_path_buf(),
        };

        let (_handle, mut event_rx, _ts) = start_watcher(config);
        let event = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap().unwrap();
        match event {
            WatcherEvent::GitConflictsDetected => {}
            other => panic!("expected GitConflictsDetected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn watcher_exits_when_handle_is_dropped() {
        let dir = tempdir().unwrap();
        let config = WatcherConfig {
            check_interval: Duration::from_millis(25),
            stall_timeout: Duration::from_secs(3600),
            disk_warn_threshold: 0,
            workdir: dir.path().to_path_buf(),
        };

        let (handle, mut event_rx, _ts) = start_watcher(config);
        drop(handle);

        let recv = timeout(Duration::from_secs(2), event_rx.recv()).await.unwrap();
        assert!(recv.is_none());
    }
}
