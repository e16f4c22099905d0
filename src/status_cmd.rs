//! `ralph-tui status [--json]` — reads `session.json`/`session.lock`
//! without acquiring the lock (§6). Adapts the teacher's `show_status`
//! multi-directory scan down to the single `.ralph-tui/` per cwd and maps
//! the internal `Interrupted` status back to a "running"-colored line per
//! the §9 decision so a crashed-but-reconcilable session doesn't read as
//! an error to the operator.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::StatusArgs;
use crate::journal::SessionJournal;
use crate::lock::{is_pid_alive, SessionLock};
use crate::model::SessionStatus;

pub async fn show_status(args: StatusArgs) -> Result<()> {
    let workdir = resolve_workdir(args.workdir.as_deref())?;
    let journal = SessionJournal::new(&workdir)?;
    let lock = SessionLock::new(journal.ralph_dir());

    let state = journal.load().context("reading session journal")?;
    let lock_check = lock.check().context("reading session lock")?;

    if args.json {
        let payload = serde_json::json!({
            "workdir": workdir.display().to_string(),
            "session": state,
            "locked": lock_check.is_locked && !lock_check.is_stale,
        });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(());
    }

    let Some(state) = state else {
        println!("No session recorded in {}", workdir.display());
        return Ok(());
    };

    let alive = lock_check.record.as_ref().map(|r| is_pid_alive(r.pid)).unwrap_or(false);
    let label = display_label(state.status, alive);
    let completed = state.iterations.iter().filter(|i| i.task_completed).count();

    println!("Session {} — {}", state.session_id, label);
    println!("  workdir:   {}", workdir.display());
    println!("  agent:     {}", state.agent_name);
    println!("  iteration: {}/{}", state.current_iteration, if state.max_iterations == 0 { "∞".to_string() } else { state.max_iterations.to_string() });
    println!("  completed: {completed} task(s)");
    if let Some(record) = &lock_check.record {
        println!("  pid:       {} ({})", record.pid, if alive { "alive" } else { "dead" });
    }

    Ok(())
}

/// Surfaces `Interrupted` as "running" per the reconciliation decision
/// record — an operator seeing a crashed-but-reconcilable session should
/// not read it as a failure.
fn display_label(status: SessionStatus, pid_alive: bool) -> &'static str {
    match status {
        SessionStatus::Running if pid_alive => "running",
        SessionStatus::Running => "running (stale — process not found)",
        SessionStatus::Paused => "paused",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Interrupted => "running (recoverable — interrupted)",
    }
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    workdir.unwrap_or_else(|| Path::new(".")).canonicalize().context("Cannot resolve workdir — does it exist?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_status_is_labeled_as_recoverable_running() {
        assert_eq!(display_label(SessionStatus::Interrupted, false), "running (recoverable — interrupted)");
    }

    #[test]
    fn completed_status_is_labeled_completed_regardless_of_pid() {
        assert_eq!(display_label(SessionStatus::Completed, true), "completed");
    }

    #[test]
    fn running_status_with_dead_pid_is_flagged_stale() {
        assert_eq!(display_label(SessionStatus::Running, false), "running (stale — process not found)");
    }
}
