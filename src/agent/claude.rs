//! Adapted from the teacher's `agents/claude.rs`, which spawned
//! `claude --dangerously-skip-permissions --print -p -` directly. Kept as a
//! thin `AgentAdapter` wrapping the shared `run_execution` runner instead of
//! owning its own spawn/stream loop.

use super::{
    detect_binary, run_execution, AgentAdapter, AgentDetectResult, AgentMeta, ExecuteOptions,
    ExecutionHandle, OutputFormat, SandboxRequirements,
};
use crate::events::EventBus;
use std::path::Path;
use tokio::process::Command;

pub struct ClaudeAdapter;

impl AgentAdapter for ClaudeAdapter {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            id: "claude".to_string(),
            name: "Claude Code".to_string(),
            default_command: "claude".to_string(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_file_context: true,
            supports_subagent_tracing: false,
            structured_output_format: OutputFormat::None,
        }
    }

    fn detect(&self) -> AgentDetectResult {
        detect_binary("claude")
    }

    fn execute(&self, prompt: &str, workdir: &Path, options: ExecuteOptions, events: &EventBus, task_id: &str) -> ExecutionHandle {
        let mut command = Command::new("claude");
        command.args(["--dangerously-skip-permissions", "--print", "-p", "-"]);
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        run_execution(command, prompt.to_string(), workdir, options, OutputFormat::None, events.clone(), task_id.to_string())
    }

    fn get_sandbox_requirements(&self) -> SandboxRequirements {
        SandboxRequirements {
            auth_paths: vec!["~/.claude".to_string()],
            binary_paths: vec!["claude".to_string()],
            runtime_paths: vec![],
            requires_network: true,
        }
    }
}
