//! Session Journal (§4.3): persists `SessionState` under
//! `<cwd>/.ralph-tui/session.json` via the atomic writer, with crash
//! reconciliation on load.

use crate::atomic;
use crate::error::JournalError;
use crate::model::{SessionState, SessionStatus};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

pub struct SessionJournal {
    ralph_dir: PathBuf,
    session_path: PathBuf,
    pub logs_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub progress_path: PathBuf,
    pub parallel_session_path: PathBuf,
}

/// Summary of reconciliation performed while loading a prior session.
#[derive(Debug, Default, Clone)]
pub struct Reconciliation {
    pub reopened_task_ids: Vec<String>,
    pub reconciled: bool,
}

impl SessionJournal {
    /// Root everything under `<cwd>/.ralph-tui/`.
    pub fn new(cwd: &Path) -> Result<Self> {
        let ralph_dir = cwd.join(".ralph-tui");
        let logs_dir = ralph_dir.join("logs");
        let worktrees_dir = ralph_dir.join("worktrees");
        std::fs::create_dir_all(&logs_dir)?;

        Ok(Self {
            session_path: ralph_dir.join("session.json"),
            progress_path: ralph_dir.join("progress.md"),
            parallel_session_path: ralph_dir.join("parallel-session.json"),
            logs_dir,
            worktrees_dir,
            ralph_dir,
        })
    }

    pub fn ralph_dir(&self) -> &Path {
        &self.ralph_dir
    }

    pub fn session_path(&self) -> &Path {
        &self.session_path
    }

    pub fn has_session(&self) -> bool {
        self.session_path.exists()
    }

    /// Load the session, if any. On parse failure the bad file is quarantined
    /// and `Ok(None)` is returned so a fresh session can start (§7 Corruption).
    pub fn load(&self) -> Result<Option<SessionState>, JournalError> {
        match atomic::read_json::<SessionState>(&self.session_path) {
            Ok(state) => Ok(state),
            Err(_) => {
                warn!(path = %self.session_path.display(), "session journal is corrupt, quarantining");
                let _ = atomic::quarantine(&self.session_path);
                Ok(None)
            }
        }
    }

    pub fn save(&self, state: &SessionState) -> Result<(), JournalError> {
        atomic::write_atomic_json(&self.session_path, state, 0o600)
            .map_err(|e| JournalError::Write(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))
    }

    pub fn reset(&self) {
        let _ = std::fs::remove_file(&self.session_path);
    }

    /// Crash reconciliation (§4.3): when a prior session loaded with
    /// `status == Running`, every `activatedTaskIds` entry must be returned
    /// to `open` through the tracker before new work begins, and `status`
    /// transitions to `Interrupted`.
    ///
    /// Per §9's decision, the internal status used here is `Interrupted`
    /// immediately — the CLI's `status` surface is responsible for relabeling
    /// it as a "running"-colored warning so operators aren't confused.
    pub fn reconcile(state: &mut SessionState) -> Reconciliation {
        if state.status != SessionStatus::Running {
            return Reconciliation::default();
        }

        let reopened = std::mem::take(&mut state.activated_task_ids);
        state.status = SessionStatus::Interrupted;
        state.touch();

        Reconciliation { reopened_task_ids: reopened, reconciled: true }
    }

    /// Human-readable snapshot for `ralph-tui status`, without acquiring the lock.
    pub fn summary(&self) -> Result<Option<String>, JournalError> {
        let Some(state) = self.load()? else { return Ok(None) };
        Ok(Some(format!(
            "session {} — {} — iteration {}/{} — {} task(s) completed",
            state.session_id,
            state.status_label(),
            state.current_iteration,
            if state.max_iterations == 0 { "∞".to_string() } else { state.max_iterations.to_string() },
            state.iterations.iter().filter(|i| i.task_completed).count(),
        )))
    }
}

trait StatusLabel {
    fn status_label(&self) -> &'static str;
}

impl StatusLabel for SessionState {
    fn status_label(&self) -> &'static str {
        match self.status {
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            // Surfaced to operators as "running" per the §9 decision record;
            // the label here is for internal/debug use only.
            SessionStatus::Interrupted => "interrupted",
        }
    }
}

/// Exit codes for the status/driver commands, per §6: 0 completed, 1 running
/// or paused, 2 failed or no session.
pub fn exit_code_for(state: Option<&SessionState>) -> i32 {
    match state.map(|s| s.status) {
        None => 2,
        Some(SessionStatus::Completed) => 0,
        Some(SessionStatus::Failed) => 2,
        Some(SessionStatus::Running)
        | Some(SessionStatus::Paused)
        | Some(SessionStatus::Interrupted) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SessionState;
    use tempfile::tempdir;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let journal = SessionJournal::new(dir.path()).unwrap();
        let state = SessionState::new(
            dir.path().display().to_string(),
            "file".into(),
            "codex".into(),
            20,
        );

        journal.save(&state).unwrap();
        let loaded = journal.load().unwrap().unwrap();
        assert_eq!(loaded.session_id, state.session_id);
        assert_eq!(loaded.status, state.status);
    }

    #[test]
    fn reconcile_reopens_activated_tasks_and_marks_interrupted() {
        let mut state = SessionState::new("cwd".into(), "file".into(), "codex".into(), 0);
        state.activated_task_ids = vec!["T7".to_string()];

        let outcome = SessionJournal::reconcile(&mut state);

        assert!(outcome.reconciled);
        assert_eq!(outcome.reopened_task_ids, vec!["T7".to_string()]);
        assert!(state.activated_task_ids.is_empty());
        assert_eq!(state.status, SessionStatus::Interrupted);
    }

    #[test]
    fn reconcile_is_noop_for_non_running_status() {
        let mut state = SessionState::new("cwd".into(), "file".into(), "codex".into(), 0);
        state.status = SessionStatus::Completed;

        let outcome = SessionJournal::reconcile(&mut state);
        assert!(!outcome.reconciled);
        assert_eq!(state.status, SessionStatus::Completed);
    }

    #[test]
    fn exit_code_mapping() {
        let mut state = SessionState::new("cwd".into(), "file".into(), "codex".into(), 0);
        state.status = SessionStatus::Completed;
        assert_eq!(exit_code_for(Some(&state)), 0);
        state.status = SessionStatus::Failed;
        assert_eq!(exit_code_for(Some(&state)), 2);
        state.status = SessionStatus::Running;
        assert_eq!(exit_code_for(Some(&state)), 1);
        assert_eq!(exit_code_for(None), 2);
    }

    #[test]
    fn corrupt_journal_is_quarantined_and_load_returns_none() {
        let dir = tempdir().unwrap();
        let journal = SessionJournal::new(dir.path()).unwrap();
        std::fs::write(&journal.session_path, "not json").unwrap();

        let loaded = journal.load().unwrap();
        assert!(loaded.is_none());
        assert!(!journal.session_path.exists());
    }
}
