//! Core persisted and in-memory data model shared by every subsystem (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

// ── Task (tracker-supplied) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Completed,
    Blocked,
    Cancelled,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    /// Lower priority value sorts first.
    #[serde(default)]
    pub priority: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Tracker-suppliable hint for which agent plugin should run this task.
    /// Accepted but not consulted by the engine's selection logic — the
    /// operator's configured `fallback_order` always wins (§9 decisions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_agent: Option<String>,
}

// ── Iteration record ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStatus {
    Running,
    Completed,
    Failed,
    Interrupted,
    Skipped,
    RateLimited,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub iteration: u32,
    pub task_id: String,
    pub status: IterationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub promise_complete: bool,
    pub task_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_exit: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_changed: Option<u32>,
}

impl IterationRecord {
    pub fn started(iteration: u32, task_id: impl Into<String>) -> Self {
        Self {
            iteration,
            task_id: task_id.into(),
            status: IterationStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            duration_ms: None,
            promise_complete: false,
            task_completed: false,
            agent_exit: None,
            agent_error: None,
            stdout_hash: None,
            commit_hash: None,
            files_changed: None,
        }
    }

    pub fn finish(&mut self, status: IterationStatus) {
        let ended_at = Utc::now();
        self.duration_ms = (ended_at - self.started_at).num_milliseconds().try_into().ok();
        self.ended_at = Some(ended_at);
        self.status = status;
    }
}

// ── Execution result (from the agent runner) ────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Failed,
    Interrupted,
    Timeout,
    RateLimited,
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub interrupted: bool,
    pub retry_after_ms: Option<u64>,
    pub token_usage: Option<UsageSample>,
}

// ── Usage accumulator ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UsageSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_window_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_context_tokens: Option<u64>,
    /// Always normalized to an absolute percentage (0–100) before storage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_context_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_context_window_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_remaining_context_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_remaining_context_percent: Option<f64>,
}

impl UsageSummary {
    pub fn accumulate(&mut self, sample: &UsageSample) {
        self.total_input_tokens += sample.input_tokens.unwrap_or(0);
        self.total_output_tokens += sample.output_tokens.unwrap_or(0);
        self.total_tokens += sample
            .total_tokens
            .unwrap_or_else(|| sample.input_tokens.unwrap_or(0) + sample.output_tokens.unwrap_or(0));
        if let Some(v) = sample.context_window_tokens {
            self.last_context_window_tokens = Some(v);
        }
        if let Some(v) = sample.remaining_context_tokens {
            self.last_remaining_context_tokens = Some(v);
        }
        if let Some(v) = sample.remaining_context_percent {
            self.last_remaining_context_percent = Some(v);
        }
    }
}

// ── Rate-limit / active-agent state ──────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitState {
    pub primary_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limited_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentReason {
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAgentState {
    pub plugin: String,
    pub reason: AgentReason,
    pub since: DateTime<Utc>,
}

// ── Session state ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: Uuid,
    pub cwd: String,
    pub tracker_name: String,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub current_iteration: u32,
    /// 0 means unlimited.
    pub max_iterations: u32,
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub skipped_task_ids: Vec<String>,
    /// Tasks this engine owns as `in_progress`; reconciled back to `open`
    /// on graceful shutdown or crash recovery (§4.3).
    #[serde(default)]
    pub activated_task_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_state: Option<RateLimitState>,
}

impl SessionState {
    pub fn new(cwd: String, tracker_name: String, agent_name: String, max_iterations: u32) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            cwd,
            tracker_name,
            agent_name,
            model: None,
            status: SessionStatus::Running,
            started_at: now,
            updated_at: now,
            current_iteration: 0,
            max_iterations,
            iterations: Vec::new(),
            skipped_task_ids: Vec::new(),
            activated_task_ids: Vec::new(),
            rate_limit_state: None,
        }
    }

    /// Resumable iff paused/interrupted and work remains (§4.3).
    pub fn is_resumable(&self) -> bool {
        matches!(self.status, SessionStatus::Paused | SessionStatus::Interrupted)
            && (self.max_iterations == 0 || self.current_iteration < self.max_iterations)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

// ── Lock record ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    pub pid: u32,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_id: Option<String>,
    pub acquired_at: DateTime<Utc>,
}

// ── Worker / worktree / merge ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerDisplayState {
    pub id: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub current_iteration: u32,
    pub max_iterations: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeInfo {
    pub id: String,
    pub path: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    pub task_id: String,
    pub active: bool,
    pub dirty: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Queued,
    InProgress,
    Completed,
    Conflicted,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOperation {
    pub id: String,
    pub task_id: String,
    pub status: MergeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_tag: Option<String>,
    pub source_branch: String,
    pub commit_message: String,
    pub queued_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub conflicted_files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub requeue_count: u32,
}

impl MergeOperation {
    pub fn new(task_id: impl Into<String>, source_branch: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            status: MergeStatus::Queued,
            backup_tag: None,
            source_branch: source_branch.into(),
            commit_message: message.into(),
            queued_at: Utc::now(),
            started_at: None,
            completed_at: None,
            conflicted_files: Vec::new(),
            error: None,
            requeue_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileConflict {
    pub file_path: String,
    pub ours_content: String,
    pub theirs_content: String,
    pub base_content: String,
    pub conflict_markers: String,
}

// ── Task graph ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub task: Task,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub depth: u32,
    pub in_cycle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelGroup {
    pub depth: u32,
    pub task_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: HashMap<String, GraphNode>,
    pub groups: Vec<ParallelGroup>,
    pub actionable_task_count: usize,
    pub max_parallelism: usize,
}

// ── Parallel session recovery state ──────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelSessionState {
    pub session_id: Uuid,
    pub task_graph: TaskGraph,
    pub last_completed_group_index: i64,
    pub merged_task_ids: Vec<String>,
    pub failed_task_ids: Vec<String>,
    pub requeued_task_ids: Vec<String>,
    pub session_start_tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_branch: Option<String>,
}

// ── Broadcast (coordinator) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub category: String,
    pub summary: String,
    pub details: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
    pub priority: BroadcastPriority,
}

/// Recent log lines kept for display purposes, capped to bound memory.
#[derive(Debug, Default)]
pub struct RecentLog {
    pub lines: VecDeque<String>,
    cap: usize,
}

impl RecentLog {
    pub fn new(cap: usize) -> Self {
        Self { lines: VecDeque::with_capacity(cap), cap }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() >= self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}
