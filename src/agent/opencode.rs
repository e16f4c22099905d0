//! Adapted from the teacher's `agents/opencode.rs`, which spawned
//! `opencode run` with the prompt delivered on stdin.

use super::{
    detect_binary, run_execution, AgentAdapter, AgentDetectResult, AgentMeta, ExecuteOptions,
    ExecutionHandle, OutputFormat, SandboxRequirements,
};
use crate::events::EventBus;
use std::path::Path;
use tokio::process::Command;

pub struct OpenCodeAdapter;

impl AgentAdapter for OpenCodeAdapter {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            id: "opencode".to_string(),
            name: "OpenCode".to_string(),
            default_command: "opencode".to_string(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_file_context: true,
            supports_subagent_tracing: false,
            structured_output_format: OutputFormat::None,
        }
    }

    fn detect(&self) -> AgentDetectResult {
        detect_binary("opencode")
    }

    fn execute(&self, prompt: &str, workdir: &Path, options: ExecuteOptions, events: &EventBus, task_id: &str) -> ExecutionHandle {
        let mut command = Command::new("opencode");
        command.arg("run");
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        run_execution(command, prompt.to_string(), workdir, options, OutputFormat::None, events.clone(), task_id.to_string())
    }

    fn get_sandbox_requirements(&self) -> SandboxRequirements {
        SandboxRequirements {
            auth_paths: vec!["~/.config/opencode".to_string()],
            binary_paths: vec!["opencode".to_string()],
            runtime_paths: vec![],
            requires_network: true,
        }
    }
}
