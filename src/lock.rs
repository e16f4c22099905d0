//! Per-working-directory exclusive lock keyed by `(pid, hostname, bootId)` (§4.2).
//!
//! The liveness probe is grounded in the teacher's `stop.rs::is_pid_alive()`:
//! a harmless signal is sent to the recorded pid and `EPERM` is treated as
//! "alive, but owned by someone else" rather than "dead".

use crate::atomic;
use crate::error::LockError;
use crate::model::LockRecord;
use chrono::Utc;
use std::path::{Path, PathBuf};

pub struct SessionLock {
    path: PathBuf,
}

pub enum AcquireOutcome {
    Acquired,
    /// A live lock exists; acquisition refused.
    Locked(LockRecord),
}

pub struct CheckResult {
    pub is_locked: bool,
    pub is_stale: bool,
    pub record: Option<LockRecord>,
}

impl SessionLock {
    pub fn new(ralph_dir: &Path) -> Self {
        Self { path: ralph_dir.join("session.lock") }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `acquire(cwd)`: fails with `Locked` if a live record exists; reclaims
    /// stale locks (recorded pid dead on this host, or host mismatch already
    /// implies a different machine holds it — only the local case is
    /// reclaimable here).
    pub fn acquire(&self) -> Result<AcquireOutcome, LockError> {
        let check = self.check()?;
        if check.is_locked && !check.is_stale {
            return Ok(AcquireOutcome::Locked(check.record.expect("locked implies record")));
        }

        let record = LockRecord {
            pid: std::process::id(),
            hostname: hostname(),
            boot_id: boot_id(),
            acquired_at: Utc::now(),
        };
        self.write(&record)?;
        Ok(AcquireOutcome::Acquired)
    }

    pub fn check(&self) -> Result<CheckResult, LockError> {
        let record: Option<LockRecord> = match atomic::read_json(&self.path) {
            Ok(r) => r,
            Err(_) => {
                // Corrupt lock file: treat as stale so a fresh acquire can proceed.
                return Ok(CheckResult { is_locked: true, is_stale: true, record: None });
            }
        };

        let Some(record) = record else {
            return Ok(CheckResult { is_locked: false, is_stale: false, record: None });
        };

        let same_host = record.hostname == hostname();
        let same_boot = match (&record.boot_id, boot_id()) {
            (Some(a), Some(b)) => *a == b,
            _ => true,
        };
        let alive = same_host && same_boot && is_pid_alive(record.pid);

        Ok(CheckResult { is_locked: true, is_stale: !alive, record: Some(record) })
    }

    fn write(&self, record: &LockRecord) -> Result<(), LockError> {
        atomic::write_atomic_json(&self.path, record, 0o600).map_err(|e| {
            LockError::Write(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })
    }

    /// Release must run on every normal exit path (§5).
    pub fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Send a harmless signal to `pid` to check whether it still exists.
/// Mirrors the teacher's `stop.rs::is_pid_alive` (signal 0 probe, `EPERM`
/// treated as "process exists, belongs to someone else").
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), Option::<Signal>::None).is_ok()
    }

    #[cfg(not(unix))]
    {
        std::process::Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }
}

fn hostname() -> String {
    if let Ok(h) = std::env::var("HOSTNAME") {
        if !h.is_empty() {
            return h;
        }
    }
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown-host".to_string())
}

/// Best-effort boot id, used to detect a reboot between runs. Linux exposes
/// one at `/proc/sys/kernel/random/boot_id`; other platforms have none, in
/// which case the boot-id check is simply skipped (treated as matching).
fn boot_id() -> Option<String> {
    std::fs::read_to_string("/proc/sys/kernel/random/boot_id")
        .ok()
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_allows_reacquire() {
        let dir = tempdir().unwrap();
        let lock = SessionLock::new(dir.path());

        assert!(matches!(lock.acquire().unwrap(), AcquireOutcome::Acquired));
        let check = lock.check().unwrap();
        assert!(check.is_locked);
        assert!(!check.is_stale);

        lock.release();
        let check = lock.check().unwrap();
        assert!(!check.is_locked);
    }

    #[test]
    fn stale_lock_with_dead_pid_is_reclaimable() {
        let dir = tempdir().unwrap();
        let lock = SessionLock::new(dir.path());

        // Pick a PID extremely unlikely to be alive.
        let stale = LockRecord {
            pid: 999_999,
            hostname: hostname(),
            boot_id: boot_id(),
            acquired_at: Utc::now(),
        };
        atomic::write_atomic_json(&lock.path, &stale, 0o600).unwrap();

        let check = lock.check().unwrap();
        assert!(check.is_stale);

        assert!(matches!(lock.acquire().unwrap(), AcquireOutcome::Acquired));
    }

    #[test]
    fn acquire_refuses_when_live_process_holds_lock() {
        let dir = tempdir().unwrap();
        let lock = SessionLock::new(dir.path());
        let live = LockRecord {
            pid: std::process::id(),
            hostname: hostname(),
            boot_id: boot_id(),
            acquired_at: Utc::now(),
        };
        atomic::write_atomic_json(&lock.path, &live, 0o600).unwrap();

        match lock.acquire().unwrap() {
            AcquireOutcome::Locked(rec) => assert_eq!(rec.pid, std::process::id()),
            AcquireOutcome::Acquired => panic!("expected Locked"),
        }
    }
}
