use crate::error::{MergeError, WorktreeError};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Thin async wrapper around the `git` binary. Extended from the teacher's
/// branch/commit-only helper with worktree, tag, and merge plumbing needed
/// by the Worktree Manager (§4.6) and Merge Queue (§4.7) — neither of which
/// existed in the teacher repo.
pub struct GitManager {
    workdir: PathBuf,
}

impl GitManager {
    pub fn new(workdir: &Path) -> Self {
        Self { workdir: workdir.to_path_buf() }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    // ── Internal helper ──────────────────────────────────────────────────────

    async fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .with_context(|| format!("failed to run: git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("git {} failed: {}", args[0], stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    // ── Branch / commit (teacher's original surface) ─────────────────────────

    pub async fn is_git_repo(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"]).await.is_ok()
    }

    pub async fn current_branch(&self) -> Result<String> {
        self.run(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    pub async fn create_or_checkout_branch(&self, branch: &str) -> Result<()> {
        let list = self.run(&["branch", "--list", branch]).await.unwrap_or_default();
        if list.trim().is_empty() {
            self.run(&["checkout", "-b", branch]).await?;
        } else {
            self.run(&["checkout", branch]).await?;
        }
        Ok(())
    }

    pub async fn has_changes(&self) -> Result<bool> {
        let status = self.run(&["status", "--porcelain"]).await?;
        Ok(!status.trim().is_empty())
    }

    pub async fn commit_all(&self, message: &str) -> Result<String> {
        self.run(&["add", "-A"]).await?;
        self.run(&["commit", "-m", message]).await
    }

    pub async fn head_sha(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"]).await
    }

    // ── Worktree operations (new, §4.6) ──────────────────────────────────────

    pub async fn worktree_add(&self, path: &Path, branch: &str) -> Result<(), WorktreeError> {
        validate_ref(branch).map_err(|reason| WorktreeError::InvalidRef {
            reference: branch.to_string(),
            reason,
        })?;
        self.run(&["worktree", "add", "-b", branch, &path.to_string_lossy()])
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<(), WorktreeError> {
        self.run(&["worktree", "remove", "--force", &path.to_string_lossy()])
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;
        Ok(())
    }

    pub async fn worktree_prune(&self) -> Result<(), WorktreeError> {
        self.run(&["worktree", "prune"]).await.map_err(|e| WorktreeError::Git(e.to_string()))?;
        Ok(())
    }

    pub async fn branch_delete(&self, branch: &str) -> Result<()> {
        self.run(&["branch", "-D", branch]).await?;
        Ok(())
    }

    pub async fn worktree_is_dirty(&self, path: &Path) -> Result<bool, WorktreeError> {
        let output = Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(path)
            .output()
            .await
            .map_err(|e| WorktreeError::Git(e.to_string()))?;
        if !output.status.success() {
            return Err(WorktreeError::Git(String::from_utf8_lossy(&output.stderr).to_string()));
        }
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    // ── Merge operations (new, §4.7) ─────────────────────────────────────────

    pub async fn tag(&self, name: &str, target: &str) -> Result<(), MergeError> {
        validate_ref(name)
            .map_err(|reason| MergeError::InvalidGitRef { field: "tag".into(), reason })?;
        self.run(&["tag", name, target]).await.map_err(|e| MergeError::Git(e.to_string()))?;
        Ok(())
    }

    pub async fn merge_ff_or_commit(&self, source_branch: &str) -> Result<MergeOutcome, MergeError> {
        validate_ref(source_branch)
            .map_err(|reason| MergeError::InvalidGitRef { field: "sourceBranch".into(), reason })?;

        let output = Command::new("git")
            .args(["merge", "--no-edit", source_branch])
            .current_dir(&self.workdir)
            .output()
            .await
            .map_err(|e| MergeError::Git(e.to_string()))?;

        if output.status.success() {
            return Ok(MergeOutcome::Merged);
        }

        let conflicted = self.conflicted_files().await.unwrap_or_default();
        if !conflicted.is_empty() {
            return Ok(MergeOutcome::Conflicted(conflicted));
        }

        Err(MergeError::Git(String::from_utf8_lossy(&output.stderr).trim().to_string()))
    }

    pub async fn conflicted_files(&self) -> Result<Vec<String>> {
        let output = self.run(&["diff", "--name-only", "--diff-filter=U"]).await?;
        Ok(output.lines().map(|l| l.to_string()).filter(|l| !l.is_empty()).collect())
    }

    pub async fn abort_merge(&self) -> Result<()> {
        let _ = self.run(&["merge", "--abort"]).await;
        Ok(())
    }

    pub async fn reset_hard(&self, target: &str) -> Result<(), MergeError> {
        validate_ref(target)
            .map_err(|reason| MergeError::InvalidGitRef { field: "resetTarget".into(), reason })?;
        self.run(&["reset", "--hard", target]).await.map_err(|e| MergeError::Git(e.to_string()))?;
        Ok(())
    }

    pub async fn add_all(&self) -> Result<()> {
        self.run(&["add", "-A"]).await?;
        Ok(())
    }

    pub async fn ref_exists(&self, reference: &str) -> bool {
        self.run(&["rev-parse", "--verify", "--quiet", reference]).await.is_ok()
    }
}

pub enum MergeOutcome {
    Merged,
    Conflicted(Vec<String>),
}

/// Git ref validator (§4.6), applied to every externally-provided ref
/// (branch names, tags, merge sources) before it's ever handed to `git`.
///
/// Rejects: empty; whitespace or control characters; any of `~ ^ : ? * [ \`;
/// `..`; `@{`; consecutive `/`; leading/trailing `.`; `.lock` suffix; any
/// slash-separated segment starting with `.`.
pub fn validate_ref(reference: &str) -> Result<(), String> {
    if reference.is_empty() {
        return Err("ref is empty".to_string());
    }
    if reference.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err("ref contains whitespace or control characters".to_string());
    }
    const FORBIDDEN: &[char] = &['~', '^', ':', '?', '*', '[', '\\'];
    if reference.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(format!("ref contains a forbidden character ({FORBIDDEN:?})"));
    }
    if reference.contains("..") {
        return Err("ref contains '..'".to_string());
    }
    if reference.contains("@{") {
        return Err("ref contains '@{'".to_string());
    }
    if reference.contains("//") {
        return Err("ref contains consecutive '/'".to_string());
    }
    if reference.starts_with('.') {
        return Err("starts with '.'".to_string());
    }
    if reference.ends_with('.') {
        return Err("ends with '.'".to_string());
    }
    if reference.ends_with(".lock") {
        return Err("ref ends with '.lock'".to_string());
    }
    if reference.split('/').any(|segment| segment.starts_with('.')) {
        return Err("a path segment starts with '.'".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validator_accepts_well_formed_ref() {
        assert!(validate_ref("ralph-parallel/T1").is_ok());
        assert!(validate_ref("ralph-session/abcd1234").is_ok());
    }

    #[test]
    fn validator_rejects_each_documented_case() {
        let cases = ["", "a b", "a..b", "a\u{0}b", ".a", "a.", "a//b", "a.lock", "a~1", "a@{1}"];
        for case in cases {
            assert!(validate_ref(case).is_err(), "expected '{case}' to be rejected");
        }
    }

    #[test]
    fn validator_rejects_hidden_branch_used_in_scenario_six() {
        let err = validate_ref(".hidden").unwrap_err();
        assert!(err.contains("starts with"));
    }
}
