//! Tracker interface (§6): the engine's view of "what work is left". The
//! teacher had no equivalent — task state lived inline in `state::TaskList`
//! with no seam for a different backend — so this trait is new, modeled on
//! the teacher's `Agent` trait shape (a small `Send + Sync` object boundary
//! the engine depends on abstractly).

pub mod file_tracker;

pub use file_tracker::FileTracker;

use crate::model::Task;
use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Default)]
pub struct PrdContext {
    pub name: String,
    pub content: String,
}

#[async_trait]
pub trait Tracker: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn get_tasks(&self) -> Result<Vec<Task>>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>>;

    /// Next actionable task: open, not blocked by an incomplete dependency,
    /// lowest `priority` first, ties broken by lexicographically smaller id
    /// (§4.5 tie-break rule).
    async fn get_next_task(&self) -> Result<Option<Task>> {
        let tasks = self.get_tasks().await?;
        let completed: std::collections::HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == crate::model::TaskStatus::Completed)
            .map(|t| t.id.as_str())
            .collect();

        let mut candidates: Vec<&Task> = tasks
            .iter()
            .filter(|t| t.status == crate::model::TaskStatus::Open)
            .filter(|t| t.depends_on.iter().all(|dep| completed.contains(dep.as_str())))
            .collect();

        candidates.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates.into_iter().next().cloned())
    }

    async fn update_task_status(&self, id: &str, status: crate::model::TaskStatus) -> Result<()>;

    async fn complete_task(&self, id: &str) -> Result<()> {
        self.update_task_status(id, crate::model::TaskStatus::Completed).await
    }

    async fn is_complete(&self) -> Result<bool> {
        let tasks = self.get_tasks().await?;
        Ok(!tasks.is_empty()
            && tasks
                .iter()
                .all(|t| matches!(t.status, crate::model::TaskStatus::Completed | crate::model::TaskStatus::Cancelled)))
    }

    async fn get_epics(&self) -> Result<Vec<Task>> {
        let tasks = self.get_tasks().await?;
        Ok(tasks.into_iter().filter(|t| t.parent_id.is_none()).collect())
    }

    async fn get_prd_context(&self) -> Result<Option<PrdContext>> {
        Ok(None)
    }
}
