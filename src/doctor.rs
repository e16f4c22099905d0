//! `ralph-tui doctor` — probes configured `AgentAdapter`s via `detect()`,
//! checks git availability, and checks disk space against a minimum
//! threshold (§6). Adapts the teacher's ad hoc per-binary auth probes and
//! `df -k` parsing in `main.rs` onto the `AgentAdapter` trait so doctor
//! exercises the exact same detection path the engine uses at runtime.

use crate::agent::create_adapter;
use crate::cli::DoctorArgs;
use crate::watcher::free_disk_bytes;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

const MIN_FREE_DISK_BYTES: u64 = 200 * 1024 * 1024;

struct DoctorRow {
    check: String,
    status: String,
    details: String,
}

pub async fn run_doctor(args: DoctorArgs) -> Result<()> {
    let workdir = args.workdir.unwrap_or_else(|| PathBuf::from(".")).canonicalize().context("Cannot resolve workdir — does it exist?")?;

    let mut rows = Vec::new();

    for agent_id in ["claude", "codex", "gemini", "opencode"] {
        let adapter = create_adapter(agent_id).expect("built-in agent id");
        let detection = adapter.detect();
        let (status, details) = if !detection.available {
            ("MISSING", detection.error.unwrap_or_else(|| "not found on PATH".to_string()))
        } else {
            ("OK", format!("installed{}", detection.version.map(|v| format!(" (v{v})")).unwrap_or_default()))
        };
        rows.push(DoctorRow { check: format!("agent:{agent_id}"), status: status.to_string(), details });
    }

    if !command_on_path("git") {
        rows.push(DoctorRow { check: "git".to_string(), status: "FAIL".to_string(), details: "git not found on PATH".to_string() });
    } else {
        let git_version = detect_git_version().await;
        rows.push(DoctorRow {
            check: "git".to_string(),
            status: "OK".to_string(),
            details: git_version.unwrap_or_else(|e| format!("installed (version probe failed: {e})")),
        });

        let (status, details) = match is_git_repo(&workdir).await {
            Ok(true) => ("OK", format!("{} is a git repository", workdir.display())),
            Ok(false) => ("WARN", format!("{} is not a git repository", workdir.display())),
            Err(e) => ("WARN", format!("failed to check repo status: {e}")),
        };
        rows.push(DoctorRow { check: "git-repo".to_string(), status: status.to_string(), details });
    }

    let disk_row = match free_disk_bytes(&workdir).await {
        Ok(free) => DoctorRow {
            check: "disk".to_string(),
            status: if free < MIN_FREE_DISK_BYTES { "WARN" } else { "OK" }.to_string(),
            details: format!("{} free (minimum {})", human_bytes(free), human_bytes(MIN_FREE_DISK_BYTES)),
        },
        Err(e) => DoctorRow { check: "disk".to_string(), status: "WARN".to_string(), details: format!("failed to check disk space: {e}") },
    };
    rows.push(disk_row);

    println!("ralph-tui doctor report for {}", workdir.display());
    println!();
    print_doctor_table(&rows);

    Ok(())
}

fn command_on_path(bin: &str) -> bool {
    std::process::Command::new("which").arg(bin).stdout(Stdio::null()).stderr(Stdio::null()).status().map(|s| s.success()).unwrap_or(false)
}

async fn detect_git_version() -> Result<String> {
    let output = Command::new("git").arg("--version").stdout(Stdio::piped()).stderr(Stdio::piped()).output().await.context("failed to execute `git --version`")?;
    if !output.status.success() {
        anyhow::bail!("{}", first_non_empty_line(&String::from_utf8_lossy(&output.stderr)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

async fn is_git_repo(workdir: &Path) -> Result<bool> {
    let output = Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(["rev-parse", "--is-inside-work-tree"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .context("failed to execute git repo probe")?;

    if !output.status.success() {
        return Ok(false);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
}

fn human_bytes(bytes: u64) -> String {
    let gib = bytes as f64 / (1024.0 * 1024.0 * 1024.0);
    if gib >= 1.0 {
        return format!("{gib:.1} GiB");
    }
    let mib = bytes as f64 / (1024.0 * 1024.0);
    format!("{mib:.1} MiB")
}

fn first_non_empty_line(text: &str) -> String {
    text.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default().to_string()
}

fn print_doctor_table(rows: &[DoctorRow]) {
    let mut check_w = "CHECK".len();
    let mut status_w = "STATUS".len();
    for row in rows {
        check_w = check_w.max(row.check.len());
        status_w = status_w.max(row.status.len());
    }

    println!("{:<check_w$}  {:<status_w$}  DETAILS", "CHECK", "STATUS", check_w = check_w, status_w = status_w);
    println!("{}  {}  {}", "-".repeat(check_w), "-".repeat(status_w), "-".repeat(48));

    for row in rows {
        println!("{:<check_w$}  {:<status_w$}  {}", row.check, row.status, row.details, check_w = check_w, status_w = status_w);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_bytes_switches_units_at_one_gib() {
        assert_eq!(human_bytes(512 * 1024 * 1024), "512.0 MiB");
        assert!(human_bytes(2 * 1024 * 1024 * 1024).ends_with("GiB"));
    }

    #[test]
    fn first_non_empty_line_skips_blank_lines() {
        assert_eq!(first_non_empty_line("\n\n  hello\nworld\n"), "hello");
    }
}
