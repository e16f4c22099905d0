//! `ralph-tui stop [--all]` — send a cancellation signal to the process
//! holding the session lock in a working directory. Re-pointed at the
//! single `<cwd>/.ralph-tui/session.lock` record (§4.2) instead of the
//! teacher's `.ralph`/`.ralph-<name>` multi-directory scan — there is only
//! ever one session per cwd now, so `--all` is a no-op kept for interface
//! stability with callers that always pass it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::cli::StopArgs;
use crate::lock::{is_pid_alive, SessionLock};

pub async fn stop_loops(args: StopArgs) -> Result<()> {
    let _ = args.all;
    let workdir = resolve_workdir(args.workdir.as_deref())?;
    let ralph_dir = workdir.join(".ralph-tui");
    let lock = SessionLock::new(&ralph_dir);

    let check = lock.check().context("reading session lock")?;
    let Some(record) = check.record else {
        println!("No running ralph-tui session found in {}", workdir.display());
        return Ok(());
    };

    if check.is_stale {
        println!("Lock for PID {} in {} is stale — removing it.", record.pid, lock.path().display());
        lock.release();
        return Ok(());
    }

    println!("Sending SIGTERM to PID {} ({})", record.pid, workdir.display());
    send_sigterm(record.pid)?;
    println!("SIGTERM sent to PID {}", record.pid);
    Ok(())
}

fn resolve_workdir(workdir: Option<&Path>) -> Result<PathBuf> {
    workdir.unwrap_or_else(|| Path::new(".")).canonicalize().context("Cannot resolve workdir — does it exist?")
}

fn send_sigterm(pid: u32) -> Result<()> {
    if !is_pid_alive(pid) {
        anyhow::bail!("PID {pid} is not running");
    }

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Signal::SIGTERM).with_context(|| format!("Failed to send SIGTERM to PID {pid}"))?;
    }

    #[cfg(not(unix))]
    {
        let output = std::process::Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).output().context("Failed to run taskkill")?;
        if !output.status.success() {
            anyhow::bail!("taskkill failed for PID {pid}: {}", String::from_utf8_lossy(&output.stderr).trim());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LockRecord;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn stale_lock_with_dead_pid_is_detected_not_signaled() {
        let dir = tempdir().unwrap();
        let ralph_dir = dir.path().join(".ralph-tui");
        std::fs::create_dir_all(&ralph_dir).unwrap();
        let lock = SessionLock::new(&ralph_dir);

        let stale = LockRecord { pid: 999_999, hostname: "nowhere".into(), boot_id: None, acquired_at: Utc::now() };
        crate::atomic::write_atomic_json(lock.path(), &stale, 0o600).unwrap();

        let check = lock.check().unwrap();
        assert!(check.is_stale);
        assert!(send_sigterm(stale.pid).is_err());
    }

    #[test]
    fn no_lock_file_reports_no_session() {
        let dir = tempdir().unwrap();
        let ralph_dir = dir.path().join(".ralph-tui");
        std::fs::create_dir_all(&ralph_dir).unwrap();
        let lock = SessionLock::new(&ralph_dir);

        let check = lock.check().unwrap();
        assert!(!check.is_locked);
        assert!(check.record.is_none());
    }
}
