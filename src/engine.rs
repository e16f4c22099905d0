//! Sequential Engine (§4.5): the main iteration loop. Generalizes the
//! teacher's `orchestrator::run()` — which owned task selection, prompt
//! building, agent spawning, and persistence all inline in one function —
//! into a state machine driving the `Tracker`/`AgentAdapter`/`EventBus`
//! seams, with an explicit idle → running → pausing/stopping → idle
//! lifecycle instead of a single `loop { … }` with a `break` scattered
//! through it.

use crate::agent::{create_adapter, AgentAdapter, ExecuteOptions, DEFAULT_FALLBACK_ORDER};
use crate::error::AgentError;
use crate::events::{Event, EventBus};
use crate::journal::SessionJournal;
use crate::model::{
    ActiveAgentState, AgentReason, IterationRecord, IterationStatus, RateLimitState, SessionState,
    SessionStatus, UsageSummary,
};
use crate::progress::ProgressLog;
use crate::prompt::{self, PromptContext};
use crate::tracker::Tracker;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    Retry,
    Skip,
    Abort,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub fallback_order: Vec<String>,
    pub model: Option<String>,
    pub max_iterations: u32,
    pub timeout_ms: u64,
    pub stall_timeout_ms: u64,
    pub interrupt_grace_ms: u64,
    pub max_consecutive_failures: u32,
    pub error_policy: ErrorPolicy,
    pub rate_limit_cooldown_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_order: DEFAULT_FALLBACK_ORDER.iter().map(|s| s.to_string()).collect(),
            model: None,
            max_iterations: 0,
            timeout_ms: 600_000,
            stall_timeout_ms: 120_000,
            interrupt_grace_ms: 5_000,
            max_consecutive_failures: 3,
            error_policy: ErrorPolicy::Retry,
            rate_limit_cooldown_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineLifecycle {
    Idle,
    Running,
    Pausing,
    Paused,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    AllComplete,
    MaxIterations,
    RequestedStop,
    RequestedPause,
    ConsecutiveFailures,
}

/// A cloneable, detached trigger for `Engine::request_stop` (§5 Cancellation).
/// Lets a signal handler spawned alongside the engine request a stop without
/// needing to outlive the borrow `Engine::run` holds on `&self`.
#[derive(Clone)]
pub struct CancelHandle {
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
}

impl CancelHandle {
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }
}

pub struct Engine {
    tracker: Arc<dyn Tracker>,
    journal: SessionJournal,
    progress: ProgressLog,
    events: EventBus,
    config: EngineConfig,
    pause_requested: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    cancel: Arc<Notify>,
}

impl Engine {
    pub fn new(tracker: Arc<dyn Tracker>, journal: SessionJournal, progress: ProgressLog, events: EventBus, config: EngineConfig) -> Self {
        Self {
            tracker,
            journal,
            progress,
            events,
            config,
            pause_requested: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Notify::new()),
        }
    }

    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.notify_one();
    }

    /// An owned handle that can request a stop from outside `run`'s borrow,
    /// e.g. a spawned `tokio::signal` listener (§5 Cancellation).
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle { stop_requested: self.stop_requested.clone(), cancel: self.cancel.clone() }
    }

    /// Runs the engine loop to completion, pause, or stop. `state` is
    /// mutated and persisted after every iteration so a crash mid-run loses
    /// at most the in-flight iteration.
    pub async fn run(&self, state: &mut SessionState) -> Result<StopReason> {
        self.events.emit(Event::EngineStarted { session_id: state.session_id.to_string() });
        state.status = SessionStatus::Running;

        let mut fallback_order = self.config.fallback_order.clone();
        if fallback_order.is_empty() {
            fallback_order.push(state.agent_name.clone());
        }
        let mut agent_index = fallback_order.iter().position(|a| *a == state.agent_name).unwrap_or(0);

        let mut usage = UsageSummary::default();
        let mut consecutive_failures = 0u32;

        let reason = loop {
            if self.stop_requested.load(Ordering::SeqCst) {
                break StopReason::RequestedStop;
            }
            if self.pause_requested.load(Ordering::SeqCst) {
                break StopReason::RequestedPause;
            }
            if self.config.max_iterations != 0 && state.current_iteration >= self.config.max_iterations {
                break StopReason::MaxIterations;
            }
            if self.tracker.is_complete().await.context("checking tracker completion")? {
                break StopReason::AllComplete;
            }

            let Some(task) = self.tracker.get_next_task().await.context("selecting next task")? else {
                break StopReason::AllComplete;
            };

            self.events.emit(Event::TaskSelected { task_id: task.id.clone() });
            self.tracker.update_task_status(&task.id, crate::model::TaskStatus::InProgress).await?;
            state.activated_task_ids.push(task.id.clone());
            self.events.emit(Event::TaskActivated { task_id: task.id.clone() });

            state.current_iteration += 1;
            let iteration_no = state.current_iteration;
            let mut record = IterationRecord::started(iteration_no, task.id.clone());
            self.events.emit(Event::IterationStarted { iteration: iteration_no, task_id: task.id.clone() });

            let recent = self.progress.recent_entries(5).unwrap_or_default().join("\n");
            let ctx = PromptContext::new()
                .set("taskId", &task.id)
                .set("taskTitle", &task.title)
                .set_opt("taskDescription", Some(task.description.clone()).filter(|s| !s.is_empty()))
                .set_opt("dependsOn", Some(task.depends_on.join(", ")).filter(|s| !s.is_empty()))
                .set_opt("recentProgress", Some(recent).filter(|s| !s.is_empty()));
            let rendered = prompt::render(prompt::DEFAULT_TEMPLATE, &ctx);

            let agent_id = fallback_order[agent_index].clone();
            let adapter = create_adapter(&agent_id)?;

            let options = ExecuteOptions {
                model: self.config.model.clone(),
                files: Vec::new(),
                timeout_ms: self.config.timeout_ms,
                stall_timeout_ms: self.config.stall_timeout_ms,
                interrupt_grace_ms: self.config.interrupt_grace_ms,
            };

            let workdir = std::path::PathBuf::from(&state.cwd);
            let handle = adapter.execute(&rendered, &workdir, options, &self.events, &task.id);

            // Race the agent against a cancellation request so a stop/pause
            // signal interrupts the in-flight process (grace → kill, §4.4)
            // instead of waiting for it to finish naturally (§5 Cancellation).
            let interrupter = handle.interrupt_handle();
            let cancel = self.cancel.clone();
            let cancel_watcher = tokio::spawn(async move {
                cancel.notified().await;
                interrupter.interrupt();
            });
            let exec_result = handle.wait().await;
            cancel_watcher.abort();

            match exec_result {
                Ok(result) => {
                    if let Some(sample) = &result.token_usage {
                        usage.accumulate(sample);
                    }

                    record.agent_exit = result.exit_code;
                    record.stdout_hash = Some(format!("{:x}", md5_like_hash(&result.stdout)));
                    let promise_complete = contains_completion_marker(&result.stdout);
                    record.promise_complete = promise_complete;

                    match result.status {
                        crate::model::ExecutionStatus::RateLimited => {
                            record.finish(IterationStatus::RateLimited);
                            self.events.emit(Event::IterationRateLimited {
                                iteration: iteration_no,
                                task_id: task.id.clone(),
                                retry_after_ms: result.retry_after_ms,
                            });
                            state.rate_limit_state = Some(RateLimitState {
                                primary_agent: fallback_order[agent_index].clone(),
                                limited_at: Some(chrono::Utc::now()),
                                fallback_agent: None,
                            });

                            if agent_index + 1 < fallback_order.len() {
                                agent_index += 1;
                                self.events.emit(Event::AgentSwitched { new_agent: fallback_order[agent_index].clone() });
                            } else {
                                self.events.emit(Event::AgentAllLimited);
                                tokio::time::sleep(Duration::from_millis(
                                    result.retry_after_ms.unwrap_or(self.config.rate_limit_cooldown_ms),
                                ))
                                .await;
                                agent_index = 0;
                            }
                        }
                        crate::model::ExecutionStatus::Completed if promise_complete => {
                            record.finish(IterationStatus::Completed);
                            record.task_completed = true;
                            self.tracker.complete_task(&task.id).await?;
                            state.activated_task_ids.retain(|id| id != &task.id);
                            self.events.emit(Event::TaskCompleted { task_id: task.id.clone() });
                            self.events.emit(Event::IterationCompleted {
                                iteration: iteration_no,
                                task_id: task.id.clone(),
                                status: IterationStatus::Completed,
                            });
                            consecutive_failures = 0;
                        }
                        crate::model::ExecutionStatus::Interrupted => {
                            record.finish(IterationStatus::Interrupted);
                            self.events.emit(Event::IterationCompleted {
                                iteration: iteration_no,
                                task_id: task.id.clone(),
                                status: IterationStatus::Interrupted,
                            });
                            let _ = self.progress.append(&format!("iteration {iteration_no} interrupted"));
                            state.iterations.push(record);
                            self.persist(state).await?;
                            break StopReason::RequestedStop;
                        }
                        _ => {
                            consecutive_failures += 1;
                            record.agent_error = Some(format!("exit {:?} without completion marker", result.exit_code));
                            let abort_now = self.handle_failure(&task.id, iteration_no, &mut record);
                            if abort_now || consecutive_failures >= self.config.max_consecutive_failures {
                                state.iterations.push(record);
                                self.persist(state).await?;
                                break StopReason::ConsecutiveFailures;
                            }
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    record.agent_error = Some(e.to_string());
                    self.events.emit(Event::IterationFailed { iteration: iteration_no, task_id: task.id.clone(), error: e.to_string() });
                    let abort_now = self.handle_failure(&task.id, iteration_no, &mut record);
                    if abort_now || matches!(e, AgentError::Interrupted) || consecutive_failures >= self.config.max_consecutive_failures {
                        state.iterations.push(record);
                        self.persist(state).await?;
                        break StopReason::ConsecutiveFailures;
                    }
                }
            }

            let _ = self.progress.append(&format!(
                "iteration {iteration_no} for {}: {:?}{}",
                task.id,
                record.status,
                if record.task_completed { " (task completed)" } else { "" }
            ));
            state.iterations.push(record);
            self.persist(state).await?;
        };

        state.status = match reason {
            StopReason::AllComplete => SessionStatus::Completed,
            StopReason::MaxIterations => SessionStatus::Paused,
            StopReason::RequestedStop => SessionStatus::Interrupted,
            StopReason::RequestedPause => SessionStatus::Paused,
            StopReason::ConsecutiveFailures => SessionStatus::Failed,
        };
        self.persist(state).await?;
        self.events.emit(Event::SessionStatusChanged { status: state.status });
        self.events.emit(Event::EngineStopped { reason: format!("{reason:?}") });

        Ok(reason)
    }

    /// Applies the configured error policy to a failed iteration. Returns
    /// `true` if the policy itself demands an immediate abort (§4.5 error
    /// policy); retry/skip instead defer to the consecutive-failure counter.
    fn handle_failure(&self, task_id: &str, iteration: u32, record: &mut IterationRecord) -> bool {
        match self.config.error_policy {
            ErrorPolicy::Retry => {
                record.finish(IterationStatus::Failed);
                self.events.emit(Event::IterationRetrying { iteration, task_id: task_id.to_string(), attempt: iteration });
                false
            }
            ErrorPolicy::Skip => {
                record.finish(IterationStatus::Skipped);
                self.events.emit(Event::IterationSkipped { iteration, task_id: task_id.to_string() });
                false
            }
            ErrorPolicy::Abort => {
                record.finish(IterationStatus::Failed);
                true
            }
        }
    }

    async fn persist(&self, state: &mut SessionState) -> Result<()> {
        state.touch();
        self.journal.save(state).map_err(|e| anyhow::anyhow!(e))
    }
}

/// Case-insensitive, whitespace-tolerant detection of the literal promise
/// marker (§4.4, §6): `<promise>COMPLETE</promise>` possibly surrounded by
/// extra whitespace within the tags.
pub fn contains_completion_marker(output: &str) -> bool {
    let normalized: String = output.chars().filter(|c| !c.is_whitespace()).collect();
    normalized.to_ascii_lowercase().contains("<promise>complete</promise>")
}

/// Cheap, dependency-free content fingerprint (not cryptographic) used only
/// to notice whether stdout changed between iterations.
fn md5_like_hash(content: &str) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_marker_is_detected_despite_whitespace_and_case() {
        assert!(contains_completion_marker("work done\n<PROMISE> Complete </promise>\n"));
        assert!(contains_completion_marker("<promise>COMPLETE</promise>"));
        assert!(!contains_completion_marker("still working"));
    }
}
