//! Default file-based `Tracker` (§10 supplemented feature): persists tasks
//! as `tasks.json` under the session's `.ralph-tui/` directory, adapting the
//! teacher's `state::TaskList` JSON shape onto the atomic-write primitive
//! used everywhere else in this crate instead of its own bespoke save path.

use super::{PrdContext, Tracker};
use crate::atomic;
use crate::model::{Task, TaskStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

pub struct FileTracker {
    path: PathBuf,
    prd_path: Option<PathBuf>,
    cache: Mutex<Option<Vec<Task>>>,
}

impl FileTracker {
    pub fn new(ralph_dir: &std::path::Path) -> Self {
        Self { path: ralph_dir.join("tasks.json"), prd_path: None, cache: Mutex::new(None) }
    }

    pub fn with_prd(mut self, prd_path: PathBuf) -> Self {
        self.prd_path = Some(prd_path);
        self
    }

    fn load(&self) -> Result<Vec<Task>> {
        if let Some(cached) = self.cache.lock().unwrap().clone() {
            return Ok(cached);
        }
        let tasks = atomic::read_json::<Vec<Task>>(&self.path)
            .context("failed to read tasks.json")?
            .unwrap_or_default();
        *self.cache.lock().unwrap() = Some(tasks.clone());
        Ok(tasks)
    }

    fn save(&self, tasks: &[Task]) -> Result<()> {
        atomic::write_atomic_json(&self.path, &tasks.to_vec(), 0o644)?;
        *self.cache.lock().unwrap() = Some(tasks.to_vec());
        Ok(())
    }
}

#[async_trait]
impl Tracker for FileTracker {
    async fn initialize(&self) -> Result<()> {
        if !self.path.exists() {
            self.save(&[])?;
        }
        Ok(())
    }

    async fn get_tasks(&self) -> Result<Vec<Task>> {
        self.load()
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.load()?.into_iter().find(|t| t.id == id))
    }

    async fn update_task_status(&self, id: &str, status: TaskStatus) -> Result<()> {
        let mut tasks = self.load()?;
        let task = tasks.iter_mut().find(|t| t.id == id).with_context(|| format!("unknown task id {id}"))?;
        task.status = status;
        self.save(&tasks)
    }

    async fn get_prd_context(&self) -> Result<Option<PrdContext>> {
        let Some(path) = &self.prd_path else { return Ok(None) };
        let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        Ok(Some(PrdContext { name, content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn task(id: &str, priority: u32, status: TaskStatus, depends_on: &[&str]) -> Task {
        Task {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: String::new(),
            status,
            priority,
            parent_id: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            metadata: Default::default(),
            preferred_agent: None,
        }
    }

    #[tokio::test]
    async fn initialize_creates_empty_tasks_file() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path());
        tracker.initialize().await.unwrap();
        assert!(dir.path().join("tasks.json").exists());
        assert!(tracker.get_tasks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_next_task_respects_priority_and_dependencies() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path());
        tracker
            .save(&[
                task("T2", 1, TaskStatus::Open, &["T1"]),
                task("T1", 5, TaskStatus::Open, &[]),
                task("T3", 0, TaskStatus::Open, &[]),
            ])
            .unwrap();

        let next = tracker.get_next_task().await.unwrap().unwrap();
        assert_eq!(next.id, "T3");
    }

    #[tokio::test]
    async fn get_next_task_skips_tasks_with_incomplete_dependencies() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path());
        tracker
            .save(&[task("T1", 0, TaskStatus::Open, &["T0"]), task("T0", 0, TaskStatus::InProgress, &[])])
            .unwrap();

        assert!(tracker.get_next_task().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_task_status_persists_across_reload() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path());
        tracker.save(&[task("T1", 0, TaskStatus::Open, &[])]).unwrap();
        tracker.update_task_status("T1", TaskStatus::Completed).await.unwrap();

        let reloaded = FileTracker::new(dir.path());
        let tasks = reloaded.get_tasks().await.unwrap();
        assert_eq!(tasks[0].status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn is_complete_true_only_when_every_task_terminal() {
        let dir = tempdir().unwrap();
        let tracker = FileTracker::new(dir.path());
        tracker.save(&[task("T1", 0, TaskStatus::Completed, &[]), task("T2", 0, TaskStatus::Cancelled, &[])]).unwrap();
        assert!(tracker.is_complete().await.unwrap());
    }
}
