//! Merge Queue & Conflict Resolver (§4.7): a serial FIFO pipeline that tags a
//! backup ref, attempts a fast-forward-or-merge, and on conflict either
//! hands the conflicting files to an `AiResolver` callback (bounded by
//! `max_requeue_count`) or rolls back to the backup tag. New module — the
//! teacher never merged anything back to a shared branch.

use crate::error::MergeError;
use crate::git::{GitManager, MergeOutcome};
use crate::model::{FileConflict, MergeOperation, MergeStatus};
use chrono::Utc;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

/// Callback given a batch of conflicting files for a merge; returns `true`
/// if it resolved them (staged replacement content) and the merge should be
/// retried, `false` to give up and roll back.
pub type AiResolver = Box<dyn Fn(&[FileConflict]) -> bool + Send + Sync>;

pub struct MergeQueue {
    git: GitManager,
    queue: Mutex<VecDeque<MergeOperation>>,
    max_requeue_count: u32,
    resolver: Option<AiResolver>,
    post_merge_validate: Option<Box<dyn Fn(&Path) -> Result<(), i32> + Send + Sync>>,
}

impl MergeQueue {
    pub fn new(workdir: &Path, max_requeue_count: u32) -> Self {
        Self {
            git: GitManager::new(workdir),
            queue: Mutex::new(VecDeque::new()),
            max_requeue_count,
            resolver: None,
            post_merge_validate: None,
        }
    }

    pub fn with_resolver(mut self, resolver: AiResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_post_merge_validation(mut self, validate: Box<dyn Fn(&Path) -> Result<(), i32> + Send + Sync>) -> Self {
        self.post_merge_validate = Some(validate);
        self
    }

    pub fn enqueue(&self, op: MergeOperation) {
        self.queue.lock().unwrap().push_back(op);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the queue in FIFO order, returning each operation's final
    /// state. One bad merge does not stop the rest of the queue.
    pub async fn drain(&self) -> Vec<MergeOperation> {
        let mut results = Vec::new();
        loop {
            let next = self.queue.lock().unwrap().pop_front();
            let Some(op) = next else { break };
            results.push(self.process(op).await);
        }
        results
    }

    async fn process(&self, mut op: MergeOperation) -> MergeOperation {
        op.status = MergeStatus::InProgress;
        op.started_at = Some(Utc::now());

        let backup_tag = format!("ralph-backup/{}", op.id);
        let backup_ok = match self.git.head_sha().await {
            Ok(sha) => self.git.tag(&backup_tag, &sha).await.is_ok(),
            Err(_) => false,
        };
        if backup_ok {
            op.backup_tag = Some(backup_tag.clone());
        }

        let mut requeue_count = 0;
        loop {
            match self.git.merge_ff_or_commit(&op.source_branch).await {
                Ok(MergeOutcome::Merged) => {
                    if let Some(validate) = &self.post_merge_validate {
                        if let Err(code) = validate(self.git.workdir()) {
                            self.rollback(&op, &backup_tag).await;
                            op.status = MergeStatus::RolledBack;
                            op.error = Some(MergeError::ValidationFailed(code).to_string());
                            op.completed_at = Some(Utc::now());
                            return op;
                        }
                    }
                    op.status = MergeStatus::Completed;
                    op.completed_at = Some(Utc::now());
                    return op;
                }
                Ok(MergeOutcome::Conflicted(files)) => {
                    op.conflicted_files = files.clone();
                    let conflicts = self.load_conflicts(&files).await;

                    let resolved = self.resolver.as_ref().map(|r| r(&conflicts)).unwrap_or(false);
                    if resolved && requeue_count < self.max_requeue_count {
                        requeue_count += 1;
                        op.requeue_count = requeue_count;
                        let _ = self.git.add_all().await;
                        continue;
                    }

                    self.rollback(&op, &backup_tag).await;
                    op.status = MergeStatus::Conflicted;
                    op.error = Some(MergeError::RequeueExhausted(op.task_id.clone()).to_string());
                    op.completed_at = Some(Utc::now());
                    return op;
                }
                Err(e) => {
                    self.rollback(&op, &backup_tag).await;
                    op.status = MergeStatus::Failed;
                    op.error = Some(e.to_string());
                    op.completed_at = Some(Utc::now());
                    return op;
                }
            }
        }
    }

    async fn rollback(&self, op: &MergeOperation, backup_tag: &str) {
        let _ = self.git.abort_merge().await;
        if op.backup_tag.is_some() {
            let _ = self.git.reset_hard(backup_tag).await;
        }
    }

    async fn load_conflicts(&self, files: &[String]) -> Vec<FileConflict> {
        let mut conflicts = Vec::new();
        for file in files {
            let path = self.git.workdir().join(file);
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            conflicts.push(FileConflict {
                file_path: file.clone(),
                ours_content: String::new(),
                theirs_content: String::new(),
                base_content: String::new(),
                conflict_markers: content,
            });
        }
        conflicts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;
    use tempfile::tempdir;

    fn run_git(dir: &Path, args: &[&str]) {
        let out = StdCommand::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    }

    fn init_repo(dir: &Path) {
        run_git(dir, &["init"]);
        run_git(dir, &["config", "user.name", "Merge Test"]);
        run_git(dir, &["config", "user.email", "merge-test@example.com"]);
        std::fs::write(dir.join("a.txt"), "base\n").unwrap();
        run_git(dir, &["add", "-A"]);
        run_git(dir, &["commit", "-m", "base"]);
    }

    #[tokio::test]
    async fn clean_merge_completes_without_conflict() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        run_git(dir.path(), &["checkout", "-b", "feature"]);
        std::fs::write(dir.path().join("b.txt"), "new file\n").unwrap();
        run_git(dir.path(), &["add", "-A"]);
        run_git(dir.path(), &["commit", "-m", "add b"]);
        run_git(dir.path(), &["checkout", "-"]);

        let queue = MergeQueue::new(dir.path(), 1);
        queue.enqueue(MergeOperation::new("T1", "feature", "merge feature"));
        let results = queue.drain().await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, MergeStatus::Completed);
        assert!(dir.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn conflicting_merge_without_resolver_rolls_back() {
        let dir = tempdir().unwrap();
        init_repo(dir.path());
        let default_branch_out = StdCommand::new("git").args(["rev-parse", "--abbrev-ref", "HEAD"]).current_dir(dir.path()).output().unwrap();
        let default_branch = String::from_utf8_lossy(&default_branch_out.stdout).trim().to_string();

        run_git(dir.path(), &["checkout", "-b", "feature"]);
        std::fs::write(dir.path().join("a.txt"), "feature change\n").unwrap();
        run_git(dir.path(), &["commit", "-am", "feature change"]);

        run_git(dir.path(), &["checkout", &default_branch]);
        std::fs::write(dir.path().join("a.txt"), "main change\n").unwrap();
        run_git(dir.path(), &["commit", "-am", "main change"]);
        let head_before = StdCommand::new("git").args(["rev-parse", "HEAD"]).current_dir(dir.path()).output().unwrap();
        let head_before = String::from_utf8_lossy(&head_before.stdout).trim().to_string();

        let queue = MergeQueue::new(dir.path(), 0);
        queue.enqueue(MergeOperation::new("T1", "feature", "merge feature"));
        let results = queue.drain().await;

        assert_eq!(results[0].status, MergeStatus::Conflicted);
        let head_after = StdCommand::new("git").args(["rev-parse", "HEAD"]).current_dir(dir.path()).output().unwrap();
        let head_after = String::from_utf8_lossy(&head_after.stdout).trim().to_string();
        assert_eq!(head_before, head_after, "rollback should restore HEAD");
    }
}
