//! Parallel Executor (§4.8): runs the task graph's depth-ordered groups one
//! at a time, fanning each group's tasks out across worktree-isolated
//! workers bounded by a semaphore, then serially draining the merge queue
//! before starting the next group. Adapts the teacher's `watch/mod.rs`
//! semaphore + `JoinSet` worker-supervision shape — previously used to run N
//! independent PRD loops — onto graph-ordered, dependency-aware groups with
//! a real merge step between them instead of N loops that never interacted.

use crate::agent::{create_adapter, ExecuteOptions};
use crate::engine::contains_completion_marker;
use crate::events::{Event, EventBus};
use crate::git::GitManager;
use crate::graph;
use crate::journal::SessionJournal;
use crate::merge::MergeQueue;
use crate::model::{MergeOperation, ParallelSessionState, TaskStatus};
use crate::tracker::Tracker;
use crate::worktree::WorktreeManager;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

/// A cloneable, detached trigger for `ParallelExecutor::request_stop`, mirroring
/// `engine::CancelHandle` — lets a signal handler request a stop between group
/// iterations without needing to outlive the borrow `run` holds on `&self`.
#[derive(Clone)]
pub struct ParallelCancelHandle {
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
}

impl ParallelCancelHandle {
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub max_parallel_workers: usize,
    pub max_worktrees: usize,
    pub min_free_disk_bytes: u64,
    pub max_requeue_count: u32,
    pub agent_id: String,
    pub model: Option<String>,
    pub timeout_ms: u64,
    pub stall_timeout_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_workers: 4,
            max_worktrees: 4,
            min_free_disk_bytes: 200 * 1024 * 1024,
            max_requeue_count: 1,
            agent_id: "codex".to_string(),
            model: None,
            timeout_ms: 600_000,
            stall_timeout_ms: 120_000,
        }
    }
}

struct WorkerOutcome {
    task_id: String,
    branch: Option<String>,
    completed: bool,
}

pub struct ParallelExecutor {
    tracker: Arc<dyn Tracker>,
    journal: Arc<SessionJournal>,
    events: EventBus,
    git: GitManager,
    worktrees: Arc<WorktreeManager>,
    config: ExecutorConfig,
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
}

impl ParallelExecutor {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        journal: Arc<SessionJournal>,
        events: EventBus,
        workdir: std::path::PathBuf,
        config: ExecutorConfig,
    ) -> Self {
        let worktrees = Arc::new(WorktreeManager::with_min_free_bytes(
            &workdir,
            journal.worktrees_dir.clone(),
            config.max_worktrees,
            config.min_free_disk_bytes,
        ));
        Self {
            tracker,
            journal,
            events,
            git: GitManager::new(&workdir),
            worktrees,
            config,
            stop_requested: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Notify::new()),
        }
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    /// An owned handle that can request a stop from outside `run`'s borrow,
    /// e.g. a spawned `tokio::signal` listener (§5 Cancellation).
    pub fn cancel_handle(&self) -> ParallelCancelHandle {
        ParallelCancelHandle { stop_requested: self.stop_requested.clone(), cancel: self.cancel.clone() }
    }

    pub async fn run(&self) -> Result<ParallelSessionState> {
        let tasks = self.tracker.get_tasks().await.context("loading tasks for parallel run")?;
        let task_graph = graph::build(&tasks);

        let mut state = match self.load_parallel_state()? {
            Some(previous) if self.git.ref_exists(&previous.session_start_tag).await => {
                self.events.emit(Event::TasksRefreshed);
                if let Some(branch) = &previous.session_branch {
                    self.git.create_or_checkout_branch(branch).await.context("resuming session branch")?;
                }
                previous
            }
            Some(previous) => {
                anyhow::bail!(
                    "cannot resume parallel session {}: sessionStartTag '{}' no longer exists",
                    previous.session_id,
                    previous.session_start_tag
                );
            }
            None => {
                let original_branch = self.git.current_branch().await.unwrap_or_else(|_| "main".to_string());
                let session_id = Uuid::new_v4();
                let session_branch = format!("ralph-session/{}", short_id(&session_id));
                let start_tag = format!("ralph-session-start/{}", short_id(&session_id));

                if let Ok(sha) = self.git.head_sha().await {
                    let _ = self.git.tag(&start_tag, &sha).await;
                }
                self.git.create_or_checkout_branch(&session_branch).await.context("creating session branch")?;

                ParallelSessionState {
                    session_id,
                    task_graph: task_graph.clone(),
                    last_completed_group_index: -1,
                    merged_task_ids: Vec::new(),
                    failed_task_ids: Vec::new(),
                    requeued_task_ids: Vec::new(),
                    session_start_tag: start_tag,
                    session_branch: Some(session_branch),
                    original_branch: Some(original_branch),
                }
            }
        };

        state.task_graph = task_graph.clone();
        let resume_from = (state.last_completed_group_index + 1).max(0) as usize;

        for (group_index, group) in task_graph.groups.iter().enumerate() {
            if group_index < resume_from {
                continue;
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                self.persist_parallel_state(&state)?;
                anyhow::bail!("parallel run stopped before group {group_index}");
            }
            self.events.emit(Event::TasksRefreshed);
            let outcomes = self.run_group(&group.task_ids).await;

            let merge_queue = MergeQueue::new(self.journal.ralph_dir().parent().unwrap_or(std::path::Path::new(".")), self.config.max_requeue_count);
            for outcome in &outcomes {
                if let Some(branch) = &outcome.branch {
                    merge_queue.enqueue(MergeOperation::new(outcome.task_id.clone(), branch.clone(), format!("merge {}", outcome.task_id)));
                }
            }
            let merge_results = merge_queue.drain().await;
            for result in merge_results {
                if result.requeue_count > 0 && !state.requeued_task_ids.contains(&result.task_id) {
                    state.requeued_task_ids.push(result.task_id.clone());
                }
                match result.status {
                    crate::model::MergeStatus::Completed => {
                        state.merged_task_ids.push(result.task_id.clone());
                        let _ = self.tracker.complete_task(&result.task_id).await;
                    }
                    crate::model::MergeStatus::Conflicted | crate::model::MergeStatus::Failed | crate::model::MergeStatus::RolledBack => {
                        state.failed_task_ids.push(result.task_id.clone());
                        let _ = self.tracker.update_task_status(&result.task_id, TaskStatus::Blocked).await;
                    }
                    _ => {}
                }
            }

            for outcome in &outcomes {
                let _ = self.worktrees.release(&outcome.task_id).await;
            }

            state.last_completed_group_index = group_index as i64;
            self.persist_parallel_state(&state)?;
        }

        let _ = self.worktrees.cleanup_all().await;
        Ok(state)
    }

    async fn run_group(&self, task_ids: &[String]) -> Vec<WorkerOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_workers.max(1)));
        let mut joinset = JoinSet::new();

        for task_id in task_ids {
            let semaphore = semaphore.clone();
            let task_id = task_id.clone();
            let tracker = self.tracker.clone();
            let worktrees = self.worktrees.clone();
            let events = self.events.clone();
            let config = self.config.clone();

            joinset.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                run_worker(task_id, tracker, worktrees, events, config).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = joinset.join_next().await {
            if let Ok(outcome) = joined {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    fn persist_parallel_state(&self, state: &ParallelSessionState) -> Result<()> {
        crate::atomic::write_atomic_json(&self.journal.parallel_session_path, state, 0o600)
    }

    pub fn load_parallel_state(&self) -> Result<Option<ParallelSessionState>> {
        crate::atomic::read_json(&self.journal.parallel_session_path)
    }
}

async fn run_worker(
    task_id: String,
    tracker: Arc<dyn Tracker>,
    worktrees: Arc<WorktreeManager>,
    events: EventBus,
    config: ExecutorConfig,
) -> WorkerOutcome {
    events.emit(Event::TaskActivated { task_id: task_id.clone() });

    let Ok(task) = tracker.get_task(&task_id).await else {
        return WorkerOutcome { task_id, branch: None, completed: false };
    };
    let Some(task) = task else {
        return WorkerOutcome { task_id, branch: None, completed: false };
    };

    let worker_id = task_id.clone();
    let info = match worktrees.acquire(&worker_id, &task_id).await {
        Ok(info) => info,
        Err(_) => return WorkerOutcome { task_id, branch: None, completed: false },
    };

    let _ = tracker.update_task_status(&task_id, TaskStatus::InProgress).await;

    let Ok(adapter) = create_adapter(&config.agent_id) else {
        return WorkerOutcome { task_id, branch: Some(info.branch), completed: false };
    };

    let ctx = crate::prompt::PromptContext::new().set("taskId", &task.id).set("taskTitle", &task.title).set_opt(
        "taskDescription",
        Some(task.description.clone()).filter(|d| !d.is_empty()),
    );
    let prompt = crate::prompt::render(crate::prompt::DEFAULT_TEMPLATE, &ctx);

    let options = ExecuteOptions {
        model: config.model.clone(),
        files: Vec::new(),
        timeout_ms: config.timeout_ms,
        stall_timeout_ms: config.stall_timeout_ms,
        interrupt_grace_ms: 5_000,
    };

    let handle = adapter.execute(&prompt, std::path::Path::new(&info.path), options, &events, &task_id);
    let result = handle.wait().await;

    let completed = match result {
        Ok(r) => contains_completion_marker(&r.stdout) && matches!(r.status, crate::model::ExecutionStatus::Completed),
        Err(_) => false,
    };

    if completed {
        let worktree_git = GitManager::new(std::path::Path::new(&info.path));
        if worktree_git.has_changes().await.unwrap_or(false) {
            let _ = worktree_git.commit_all(&format!("complete {task_id}")).await;
        }
        events.emit(Event::TaskCompleted { task_id: task_id.clone() });
    }

    WorkerOutcome { task_id, branch: Some(info.branch), completed }
}

fn short_id(id: &Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_id_truncates_to_eight_hex_chars() {
        let id = Uuid::new_v4();
        let short = short_id(&id);
        assert_eq!(short.len(), 8);
        assert!(short.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn default_config_matches_engine_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.max_parallel_workers, 4);
        assert_eq!(config.max_worktrees, 4);
        assert_eq!(config.min_free_disk_bytes, 200 * 1024 * 1024);
        assert_eq!(config.agent_id, "codex");
        assert_eq!(config.timeout_ms, 600_000);
    }
}
