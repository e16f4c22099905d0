//! Agent Runner (§4.4) and `AgentAdapter` interface (§6).
//!
//! Generalizes the teacher's narrow `Agent` trait (`is_available`/`spawn`,
//! synchronous, no streaming contract) into the full adapter surface the
//! engine needs, and generalizes `orchestrator::run_iteration()` — which
//! hard-coded the drain/watch/timeout loop once per call site — into a
//! single reusable `run_execution()` shared by every adapter.

mod claude;
mod codex;
mod gemini;
mod opencode;

pub use claude::ClaudeAdapter;
pub use codex::CodexAdapter;
pub use gemini::GeminiAdapter;
pub use opencode::OpenCodeAdapter;

use crate::error::AgentError;
use crate::events::{Event, EventBus};
use crate::model::{ExecutionResult, ExecutionStatus, UsageSample};
use crate::usage;
use crate::watcher::{self, WatcherConfig, WatcherEvent};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    None,
    Jsonl,
}

#[derive(Debug, Clone)]
pub struct AgentMeta {
    pub id: String,
    pub name: String,
    pub default_command: String,
    pub supports_streaming: bool,
    pub supports_interrupt: bool,
    pub supports_file_context: bool,
    pub supports_subagent_tracing: bool,
    pub structured_output_format: OutputFormat,
}

#[derive(Debug, Clone, Default)]
pub struct AgentDetectResult {
    pub available: bool,
    pub version: Option<String>,
    pub executable_path: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SandboxRequirements {
    pub auth_paths: Vec<String>,
    pub binary_paths: Vec<String>,
    pub runtime_paths: Vec<String>,
    pub requires_network: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub model: Option<String>,
    pub files: Vec<PathBuf>,
    /// 0 = infinite.
    pub timeout_ms: u64,
    pub stall_timeout_ms: u64,
    pub interrupt_grace_ms: u64,
}

#[derive(Debug, Clone)]
pub enum DisplayEvent {
    Text { content: String },
    ToolUse { name: String, input: String },
    ToolResult { content: String },
    Error { message: String },
    System { subtype: String },
}

/// Adapters may translate proprietary JSONL shapes into `DisplayEvent`s.
/// The default implementation treats every non-JSON line as plain text and
/// every JSON line it can't otherwise classify as a `system` event.
pub fn classify_line(line: &str, format: OutputFormat) -> DisplayEvent {
    if format != OutputFormat::Jsonl {
        return DisplayEvent::Text { content: line.to_string() };
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
        return DisplayEvent::Text { content: line.to_string() };
    };
    let kind = value.get("type").and_then(|v| v.as_str()).unwrap_or("");
    match kind {
        "text" | "message_update" | "assistant" => DisplayEvent::Text {
            content: value.get("content").and_then(|v| v.as_str()).unwrap_or(line).to_string(),
        },
        "tool_use" | "function" => DisplayEvent::ToolUse {
            name: value.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            input: value.get("input").map(|v| v.to_string()).unwrap_or_default(),
        },
        "tool_result" => DisplayEvent::ToolResult {
            content: value.get("content").map(|v| v.to_string()).unwrap_or_default(),
        },
        "error" => DisplayEvent::Error {
            message: value.get("message").and_then(|v| v.as_str()).unwrap_or(line).to_string(),
        },
        _ => DisplayEvent::System { subtype: kind.to_string() },
    }
}

/// Non-blocking handle to an in-flight execution (§4.4).
pub struct ExecutionHandle {
    result_rx: oneshot::Receiver<ExecutionResult>,
    interrupt: Arc<Notify>,
    interrupted_flag: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl ExecutionHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn interrupt(&self) {
        self.interrupted_flag.store(true, Ordering::SeqCst);
        self.interrupt.notify_one();
    }

    /// A cloneable handle to this execution's interrupt signal, usable after
    /// `wait()` has consumed `self` — lets a caller race cancellation against
    /// `wait()` without holding onto the `ExecutionHandle` itself.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { interrupt: self.interrupt.clone(), interrupted_flag: self.interrupted_flag.clone() }
    }

    pub async fn wait(self) -> Result<ExecutionResult, AgentError> {
        self.result_rx.await.map_err(|_| AgentError::Interrupted)
    }
}

#[derive(Clone)]
pub struct InterruptHandle {
    interrupt: Arc<Notify>,
    interrupted_flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.interrupted_flag.store(true, Ordering::SeqCst);
        self.interrupt.notify_one();
    }
}

pub trait AgentAdapter: Send + Sync {
    fn meta(&self) -> AgentMeta;
    fn detect(&self) -> AgentDetectResult {
        detect_binary(&self.meta().default_command)
    }
    fn execute(&self, prompt: &str, workdir: &Path, options: ExecuteOptions, events: &EventBus, task_id: &str) -> ExecutionHandle;
    fn get_sandbox_requirements(&self) -> SandboxRequirements {
        SandboxRequirements::default()
    }
    fn validate_model(&self, _model: &str) -> Option<String> {
        None
    }
}

const DETECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

/// `detect()`: locate the CLI on PATH, run `--version`, extract `d+.d+.d+`,
/// capped at 15s. Runs the blocking `Command::output()` call on its own
/// thread so a hung binary (e.g. one waiting on stdin) can't block the
/// caller forever — a timed-out detection reports `available: false`.
pub fn detect_binary(command: &str) -> AgentDetectResult {
    let command = command.to_string();
    let (tx, rx) = std::sync::mpsc::channel();

    let handle = std::thread::spawn(move || {
        let output = std::process::Command::new(&command)
            .arg("--version")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let _ = tx.send((output, which(&command)));
    });

    match rx.recv_timeout(DETECT_TIMEOUT) {
        Ok((Ok(o), executable_path)) if o.status.success() => {
            let text = String::from_utf8_lossy(&o.stdout);
            AgentDetectResult { available: true, version: extract_semver(&text), executable_path, error: None }
        }
        Ok((Ok(o), executable_path)) => AgentDetectResult {
            available: false,
            version: None,
            executable_path,
            error: Some(String::from_utf8_lossy(&o.stderr).trim().to_string()),
        },
        Ok((Err(e), _)) => AgentDetectResult { available: false, version: None, executable_path: None, error: Some(e.to_string()) },
        Err(_) => {
            // The worker thread is left to finish on its own; we just stop waiting on it.
            drop(handle);
            AgentDetectResult {
                available: false,
                version: None,
                executable_path: None,
                error: Some(format!("detection timed out after {}s", DETECT_TIMEOUT.as_secs())),
            }
        }
    }
}

fn which(command: &str) -> Option<String> {
    std::process::Command::new("which")
        .arg(command)
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
}

fn extract_semver(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    for start in 0..bytes.len() {
        let rest = &text[start..];
        let mut chars = rest.char_indices();
        let mut dots = 0;
        let mut end = 0;
        let mut saw_digit = false;
        for (idx, c) in &mut chars {
            if c.is_ascii_digit() {
                saw_digit = true;
                end = idx + 1;
            } else if c == '.' && saw_digit {
                dots += 1;
                end = idx + 1;
            } else {
                break;
            }
        }
        if dots >= 2 && saw_digit {
            let candidate = rest[..end].trim_end_matches('.');
            if candidate.matches('.').count() >= 2 {
                return Some(candidate.to_string());
            }
        }
    }
    None
}

/// Shared spawn-and-stream runner used by every concrete adapter. Prompts
/// are delivered via stdin (never argv) to avoid ARG_MAX and shell
/// metacharacter interpretation, exactly as the teacher's per-CLI adapters
/// did — generalized here into one implementation instead of four copies.
pub fn run_execution(
    mut command: Command,
    prompt: String,
    workdir: &Path,
    options: ExecuteOptions,
    output_format: OutputFormat,
    events: EventBus,
    task_id: String,
) -> ExecutionHandle {
    command
        .current_dir(workdir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let (result_tx, result_rx) = oneshot::channel();
    let interrupt = Arc::new(Notify::new());
    let interrupted_flag = Arc::new(AtomicBool::new(false));
    let running = Arc::new(AtomicBool::new(true));

    let interrupt_task = interrupt.clone();
    let interrupted_flag_task = interrupted_flag.clone();
    let running_task = running.clone();
    let workdir = workdir.to_path_buf();

    tokio::spawn(async move {
        let result = execute_inner(
            command,
            prompt,
            &workdir,
            options,
            output_format,
            interrupt_task,
            interrupted_flag_task,
            events,
            task_id,
        )
        .await;
        running_task.store(false, Ordering::SeqCst);
        let _ = result_tx.send(result);
    });

    ExecutionHandle { result_rx, interrupt, interrupted_flag, running }
}

#[allow(clippy::too_many_arguments)]
async fn execute_inner(
    mut command: Command,
    prompt: String,
    workdir: &Path,
    options: ExecuteOptions,
    output_format: OutputFormat,
    interrupt: Arc<Notify>,
    interrupted_flag: Arc<AtomicBool>,
    events: EventBus,
    task_id: String,
) -> ExecutionResult {
    let started_at = Utc::now();
    let execution_id = Uuid::new_v4();

    let mut child = match command.spawn() {
        Ok(c) => c,
        Err(e) => {
            return ExecutionResult {
                execution_id,
                status: ExecutionStatus::Failed,
                exit_code: None,
                stdout: String::new(),
                stderr: e.to_string(),
                started_at,
                ended_at: Utc::now(),
                duration_ms: 0,
                interrupted: false,
                retry_after_ms: None,
                token_usage: None,
            };
        }
    };

    let mut stdin = child.stdin.take();
    let prompt_bytes = prompt.into_bytes();
    tokio::spawn(async move {
        if let Some(stdin) = stdin.as_mut() {
            let _ = stdin.write_all(&prompt_bytes).await;
            let _ = stdin.shutdown().await;
        }
    });

    let stdout = child.stdout.take().expect("stdout piped");
    let stderr = child.stderr.take().expect("stderr piped");

    let watcher_config = WatcherConfig::new(workdir.to_path_buf()).with_stall_timeout(
        Duration::from_millis(if options.stall_timeout_ms == 0 { 120_000 } else { options.stall_timeout_ms }),
    );
    let (watcher_handle, mut watcher_events, last_output_ts) = watcher::start_watcher(watcher_config);

    let stdout_lines = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));
    let stderr_lines = Arc::new(tokio::sync::Mutex::new(Vec::<String>::new()));

    let stdout_buf = stdout_lines.clone();
    let ts_out = last_output_ts.clone();
    let events_out = events.clone();
    let task_id_out = task_id.clone();
    let stdout_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            watcher::update_last_output(&ts_out);
            let display_line = match classify_line(&line, output_format) {
                DisplayEvent::Text { content } => content,
                DisplayEvent::ToolUse { name, input } => format!("[tool_use:{name}] {input}"),
                DisplayEvent::ToolResult { content } => format!("[tool_result] {content}"),
                DisplayEvent::Error { message } => format!("[error] {message}"),
                DisplayEvent::System { subtype } => format!("[system:{subtype}]"),
            };
            events_out.emit(Event::AgentOutput { task_id: task_id_out.clone(), line: display_line });
            stdout_buf.lock().await.push(line);
        }
    });

    let stderr_buf = stderr_lines.clone();
    let ts_err = last_output_ts.clone();
    let stderr_task = tokio::spawn(async move {
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            watcher::update_last_output(&ts_err);
            stderr_buf.lock().await.push(line);
        }
    });

    let hard_timeout = if options.timeout_ms == 0 {
        None
    } else {
        Some(tokio::time::sleep(Duration::from_millis(options.timeout_ms)))
    };
    tokio::pin!(hard_timeout);

    let mut status;
    let mut was_interrupted = false;
    let mut was_timeout = false;

    loop {
        tokio::select! {
            biased;

            _ = interrupt.notified() => {
                let _ = child.start_kill();
                let grace = Duration::from_millis(if options.interrupt_grace_ms == 0 { 5000 } else { options.interrupt_grace_ms });
                let _ = tokio::time::timeout(grace, child.wait()).await;
                let _ = child.start_kill();
                was_interrupted = true;
                status = child.try_wait().ok().flatten();
                break;
            }

            exit = child.wait() => {
                status = exit.ok();
                break;
            }

            _ = async { if let Some(sleep) = hard_timeout.as_mut().as_pin_mut() { sleep.await } else { std::future::pending().await } }, if hard_timeout.is_some() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                was_timeout = true;
                status = None;
                break;
            }

            event = watcher_events.recv() => {
                match event {
                    Some(WatcherEvent::StallDetected { .. }) => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        was_timeout = true;
                        status = None;
                        break;
                    }
                    Some(_) => continue,
                    None => continue,
                }
            }
        }
    }

    watcher_handle.shutdown();
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let stdout_text = stdout_lines.lock().await.join("\n");
    let stderr_text = stderr_lines.lock().await.join("\n");
    let combined = format!("{stdout_text}\n{stderr_text}");

    let token_usage = usage::strongest_sample(stdout_lines.lock().await.iter().cloned());
    let retry_after = usage::detect_rate_limit(&combined);

    let ended_at = Utc::now();
    let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
    let exit_code = status.and_then(|s| s.code());

    let execution_status = if interrupted_flag.load(Ordering::SeqCst) && was_interrupted {
        ExecutionStatus::Interrupted
    } else if retry_after.is_some() {
        ExecutionStatus::RateLimited
    } else if was_timeout {
        ExecutionStatus::Timeout
    } else if exit_code == Some(0) {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Failed
    };

    ExecutionResult {
        execution_id,
        status: execution_status,
        exit_code,
        stdout: stdout_text,
        stderr: stderr_text,
        started_at,
        ended_at,
        duration_ms,
        interrupted: was_interrupted,
        retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        token_usage,
    }
}

/// Factory mirroring the teacher's `agents::create_agent`, now returning
/// `AgentAdapter` trait objects registered by plugin id.
pub fn create_adapter(id: &str) -> Result<Box<dyn AgentAdapter>, AgentError> {
    match id {
        "claude" => Ok(Box::new(ClaudeAdapter)),
        "codex" => Ok(Box::new(CodexAdapter)),
        "gemini" => Ok(Box::new(GeminiAdapter)),
        "opencode" => Ok(Box::new(OpenCodeAdapter)),
        other => Err(AgentError::UnknownPlugin(other.to_string())),
    }
}

pub const DEFAULT_FALLBACK_ORDER: &[&str] = &["claude", "codex", "gemini", "opencode"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_semver_finds_dotted_triplet() {
        assert_eq!(extract_semver("codex-cli 1.2.3\n"), Some("1.2.3".to_string()));
        assert_eq!(extract_semver("no version here"), None);
    }

    #[test]
    fn classify_line_falls_back_to_text_for_non_jsonl() {
        let event = classify_line("plain text", OutputFormat::None);
        assert!(matches!(event, DisplayEvent::Text { .. }));
    }

    #[test]
    fn classify_line_extracts_tool_use_from_jsonl() {
        let line = r#"{"type":"tool_use","name":"edit","input":{"path":"a.rs"}}"#;
        match classify_line(line, OutputFormat::Jsonl) {
            DisplayEvent::ToolUse { name, .. } => assert_eq!(name, "edit"),
            other => panic!("expected ToolUse, got {other:?}"),
        }
    }
}
