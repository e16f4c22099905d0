//! Adapted from the teacher's `agents/codex.rs`, which spawned
//! `codex exec --full-auto` with the prompt on stdin.

use super::{
    detect_binary, run_execution, AgentAdapter, AgentDetectResult, AgentMeta, ExecuteOptions,
    ExecutionHandle, OutputFormat, SandboxRequirements,
};
use crate::events::EventBus;
use std::path::Path;
use tokio::process::Command;

pub struct CodexAdapter;

impl AgentAdapter for CodexAdapter {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            id: "codex".to_string(),
            name: "Codex CLI".to_string(),
            default_command: "codex".to_string(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_file_context: true,
            supports_subagent_tracing: false,
            structured_output_format: OutputFormat::None,
        }
    }

    fn detect(&self) -> AgentDetectResult {
        detect_binary("codex")
    }

    fn execute(&self, prompt: &str, workdir: &Path, options: ExecuteOptions, events: &EventBus, task_id: &str) -> ExecutionHandle {
        let mut command = Command::new("codex");
        command.args(["exec", "--full-auto"]);
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        run_execution(command, prompt.to_string(), workdir, options, OutputFormat::None, events.clone(), task_id.to_string())
    }

    fn get_sandbox_requirements(&self) -> SandboxRequirements {
        SandboxRequirements {
            auth_paths: vec!["~/.codex".to_string()],
            binary_paths: vec!["codex".to_string()],
            runtime_paths: vec![],
            requires_network: true,
        }
    }
}
