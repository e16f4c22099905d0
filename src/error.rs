//! Typed errors at subsystem seams. The CLI boundary wraps these in
//! `anyhow::Error` with `.context(...)`, the same way the rest of the
//! crate uses `anyhow` for operator-facing reporting.

use thiserror::Error;

/// The five-bucket taxonomy every subsystem error maps onto (see §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    RetryableLogical,
    Permanent,
    Corruption,
    Cancellation,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock held by live process {pid} on {hostname}")]
    Held { pid: u32, hostname: String },
    #[error("failed to read lock file: {0}")]
    Read(#[source] std::io::Error),
    #[error("lock file is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("failed to write lock file: {0}")]
    Write(#[source] std::io::Error),
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::Held { .. } => ErrorKind::Permanent,
            LockError::Read(_) | LockError::Write(_) => ErrorKind::Transient,
            LockError::Corrupt(_) => ErrorKind::Corruption,
        }
    }
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("session journal not found at {0}")]
    NotFound(String),
    #[error("session journal is corrupt: {0}")]
    Corrupt(#[source] serde_json::Error),
    #[error("failed to persist session journal: {0}")]
    Write(#[source] std::io::Error),
}

impl JournalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            JournalError::NotFound(_) => ErrorKind::Permanent,
            JournalError::Corrupt(_) => ErrorKind::Corruption,
            JournalError::Write(_) => ErrorKind::Transient,
        }
    }
}

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("invalid git ref '{reference}': {reason}")]
    InvalidRef { reference: String, reason: String },
    #[error("maximum worktree count reached ({0})")]
    MaxWorktreesReached(usize),
    #[error("insufficient free disk space: {available} bytes available, {required} required")]
    InsufficientDiskSpace { available: u64, required: u64 },
    #[error("git operation failed: {0}")]
    Git(String),
    #[error("worktree {0} not found")]
    NotFound(String),
}

impl WorktreeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorktreeError::InvalidRef { .. } => ErrorKind::Permanent,
            WorktreeError::MaxWorktreesReached(_) => ErrorKind::Permanent,
            WorktreeError::InsufficientDiskSpace { .. } => ErrorKind::Permanent,
            WorktreeError::Git(_) => ErrorKind::Transient,
            WorktreeError::NotFound(_) => ErrorKind::Permanent,
        }
    }
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Invalid git ref for {field}: {reason}")]
    InvalidGitRef { field: String, reason: String },
    #[error("merge conflict in {0} file(s)")]
    Conflicted(usize),
    #[error("merge requeue limit exceeded for task {0}")]
    RequeueExhausted(String),
    #[error("git operation failed: {0}")]
    Git(String),
    #[error("post-merge validation command failed with status {0}")]
    ValidationFailed(i32),
}

impl MergeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MergeError::InvalidGitRef { .. } => ErrorKind::Permanent,
            MergeError::Conflicted(_) => ErrorKind::RetryableLogical,
            MergeError::RequeueExhausted(_) => ErrorKind::Permanent,
            MergeError::Git(_) => ErrorKind::Transient,
            MergeError::ValidationFailed(_) => ErrorKind::RetryableLogical,
        }
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent '{0}' is not available on PATH")]
    Unavailable(String),
    #[error("unknown agent plugin '{0}'")]
    UnknownPlugin(String),
    #[error("agent exited without completing: {0}")]
    IncompleteExit(String),
    #[error("agent is rate limited, retry after {retry_after_ms:?}ms")]
    RateLimited { retry_after_ms: Option<u64> },
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("agent execution was interrupted")]
    Interrupted,
    #[error("agent execution timed out")]
    Timeout,
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Unavailable(_) | AgentError::UnknownPlugin(_) => ErrorKind::Permanent,
            AgentError::IncompleteExit(_) => ErrorKind::RetryableLogical,
            AgentError::RateLimited { .. } => ErrorKind::Transient,
            AgentError::Spawn(_) => ErrorKind::Transient,
            AgentError::Interrupted => ErrorKind::Cancellation,
            AgentError::Timeout => ErrorKind::RetryableLogical,
        }
    }
}
