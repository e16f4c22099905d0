//! Worktree Manager (§4.6): hands each parallel worker an isolated git
//! worktree + branch, tracks which are active/dirty, and tears them all down
//! at the end of a parallel run. The teacher had nothing like this — its
//! `watch/mod.rs` ran every loop against the same shared working tree — so
//! this module is new, built on top of `git::GitManager`'s worktree methods.

use crate::error::WorktreeError;
use crate::git::GitManager;
use crate::model::WorktreeInfo;
use crate::watcher::free_disk_bytes;
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const MIN_FREE_BYTES: u64 = 200 * 1024 * 1024;

pub struct WorktreeManager {
    root: PathBuf,
    worktrees_dir: PathBuf,
    max_worktrees: usize,
    min_free_bytes: u64,
    git: GitManager,
    active: Mutex<HashMap<String, WorktreeInfo>>,
}

impl WorktreeManager {
    pub fn new(root: &Path, worktrees_dir: PathBuf, max_worktrees: usize) -> Self {
        Self::with_min_free_bytes(root, worktrees_dir, max_worktrees, MIN_FREE_BYTES)
    }

    pub fn with_min_free_bytes(root: &Path, worktrees_dir: PathBuf, max_worktrees: usize, min_free_bytes: u64) -> Self {
        Self {
            root: root.to_path_buf(),
            worktrees_dir,
            max_worktrees,
            min_free_bytes,
            git: GitManager::new(root),
            active: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, worker_id: &str, task_id: &str) -> Result<WorktreeInfo, WorktreeError> {
        {
            let active = self.active.lock().unwrap();
            let live = active.values().filter(|w| w.active).count();
            if self.max_worktrees > 0 && live >= self.max_worktrees {
                return Err(WorktreeError::MaxWorktreesReached(self.max_worktrees));
            }
        }

        if let Ok(free) = free_disk_bytes(&self.root).await {
            if free < self.min_free_bytes {
                return Err(WorktreeError::InsufficientDiskSpace { available: free, required: self.min_free_bytes });
            }
        }

        let path = self.worktrees_dir.join(format!("worker-{worker_id}"));
        let branch = format!("ralph-parallel/{task_id}");

        if path.exists() {
            let _ = self.git.worktree_remove(&path).await;
            let _ = std::fs::remove_dir_all(&path);
            let _ = self.git.worktree_prune().await;
        }

        self.git.worktree_add(&path, &branch).await?;
        self.copy_config_into(&path);

        let info = WorktreeInfo {
            id: worker_id.to_string(),
            path: path.to_string_lossy().to_string(),
            branch,
            worker_id: Some(worker_id.to_string()),
            task_id: task_id.to_string(),
            active: true,
            dirty: false,
            created_at: Utc::now(),
        };

        self.active.lock().unwrap().insert(worker_id.to_string(), info.clone());
        Ok(info)
    }

    /// Copies `.ralph-tui/config.toml` from the main worktree into a freshly
    /// created one, if present (§4.6). Best-effort: a missing or unreadable
    /// config just means the worker falls back to defaults.
    fn copy_config_into(&self, worktree_path: &Path) {
        let source = self.root.join(".ralph-tui").join("config.toml");
        if !source.exists() {
            return;
        }
        let dest_dir = worktree_path.join(".ralph-tui");
        if std::fs::create_dir_all(&dest_dir).is_ok() {
            let _ = std::fs::copy(&source, dest_dir.join("config.toml"));
        }
    }

    pub async fn is_dirty(&self, worker_id: &str) -> Result<bool, WorktreeError> {
        let path = {
            let active = self.active.lock().unwrap();
            let info = active.get(worker_id).ok_or_else(|| WorktreeError::NotFound(worker_id.to_string()))?;
            PathBuf::from(&info.path)
        };
        self.git.worktree_is_dirty(&path).await
    }

    /// Marks a worktree inactive (§4.6). Files and the git worktree/branch
    /// stay on disk until `cleanup_all` tears everything down, so releasing
    /// the same worker twice is a no-op rather than a `NotFound` error.
    pub async fn release(&self, worker_id: &str) -> Result<(), WorktreeError> {
        let mut active = self.active.lock().unwrap();
        let Some(info) = active.get_mut(worker_id) else {
            return Ok(());
        };
        info.active = false;
        Ok(())
    }

    pub async fn cleanup_all(&self) -> Result<(), WorktreeError> {
        let infos: Vec<WorktreeInfo> = self.active.lock().unwrap().values().cloned().collect();
        for info in infos {
            self.git.worktree_remove(Path::new(&info.path)).await?;
            let _ = self.git.branch_delete(&info.branch).await;
        }
        self.active.lock().unwrap().clear();
        self.git.worktree_prune().await?;
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().values().filter(|w| w.active).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn init_repo(dir: &Path) {
        let run = |args: &[&str]| {
            let out = StdCommand::new("git").args(args).current_dir(dir).output().unwrap();
            assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
        };
        run(&["init"]);
        run(&["config", "user.name", "Worktree Test"]);
        run(&["config", "user.email", "worktree-test@example.com"]);
        std::fs::write(dir.join("a.txt"), "a\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-m", "initial"]);
    }

    #[tokio::test]
    async fn acquire_creates_worktree_and_branch() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".ralph-tui").join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 0);

        let info = manager.acquire("w1", "T1").await.unwrap();
        assert!(Path::new(&info.path).exists());
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test]
    async fn acquire_enforces_max_worktrees() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".ralph-tui").join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 1);

        manager.acquire("w1", "T1").await.unwrap();
        let err = manager.acquire("w2", "T2").await.unwrap_err();
        assert!(matches!(err, WorktreeError::MaxWorktreesReached(1)));
    }

    #[tokio::test]
    async fn release_marks_inactive_but_keeps_worktree_until_cleanup() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".ralph-tui").join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 0);

        let info = manager.acquire("w1", "T1").await.unwrap();
        let path = PathBuf::from(&info.path);
        manager.release("w1").await.unwrap();
        assert!(path.exists(), "worktree files should survive release");
        assert_eq!(manager.active_count(), 0);

        manager.cleanup_all().await.unwrap();
        assert!(!path.exists(), "worktree files should be gone after cleanup_all");
    }

    #[tokio::test]
    async fn release_twice_is_a_no_op() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".ralph-tui").join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 0);

        manager.acquire("w1", "T1").await.unwrap();
        manager.release("w1").await.unwrap();
        manager.release("w1").await.unwrap();
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn acquire_copies_config_toml_into_new_worktree() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let config_dir = dir.path().join(".ralph-tui");
        std::fs::create_dir_all(&config_dir).unwrap();
        std::fs::write(config_dir.join("config.toml"), "[defaults]\nagent = \"codex\"\n").unwrap();

        let worktrees_dir = config_dir.join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 0);

        let info = manager.acquire("w1", "T1").await.unwrap();
        let copied = PathBuf::from(&info.path).join(".ralph-tui").join("config.toml");
        assert!(copied.exists());
    }

    #[tokio::test]
    async fn acquire_detaches_stale_path_before_recreating() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let worktrees_dir = dir.path().join(".ralph-tui").join("worktrees");
        let manager = WorktreeManager::new(dir.path(), worktrees_dir, 0);

        let first = manager.acquire("w1", "T1").await.unwrap();
        let path = PathBuf::from(&first.path);
        manager.release("w1").await.unwrap();
        manager.active.lock().unwrap().clear();

        let second = manager.acquire("w1", "T2").await.unwrap();
        assert_eq!(second.path, path.to_string_lossy());
        assert!(path.exists());
    }
}
