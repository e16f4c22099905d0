//! Adapted from the teacher's `agents/gemini.rs`. The CLI takes `-p` with an
//! empty argument and the real prompt on stdin, avoiding E2BIG on large
//! prompts passed as argv.

use super::{
    detect_binary, run_execution, AgentAdapter, AgentDetectResult, AgentMeta, ExecuteOptions,
    ExecutionHandle, OutputFormat, SandboxRequirements,
};
use crate::events::EventBus;
use std::path::Path;
use tokio::process::Command;

pub struct GeminiAdapter;

impl AgentAdapter for GeminiAdapter {
    fn meta(&self) -> AgentMeta {
        AgentMeta {
            id: "gemini".to_string(),
            name: "Gemini CLI".to_string(),
            default_command: "gemini".to_string(),
            supports_streaming: true,
            supports_interrupt: true,
            supports_file_context: true,
            supports_subagent_tracing: false,
            structured_output_format: OutputFormat::None,
        }
    }

    fn detect(&self) -> AgentDetectResult {
        detect_binary("gemini")
    }

    fn execute(&self, prompt: &str, workdir: &Path, options: ExecuteOptions, events: &EventBus, task_id: &str) -> ExecutionHandle {
        let mut command = Command::new("gemini");
        command.args(["-p", "", "--yolo"]);
        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }
        run_execution(command, prompt.to_string(), workdir, options, OutputFormat::None, events.clone(), task_id.to_string())
    }

    fn get_sandbox_requirements(&self) -> SandboxRequirements {
        SandboxRequirements {
            auth_paths: vec!["~/.gemini".to_string()],
            binary_paths: vec!["gemini".to_string()],
            runtime_paths: vec![],
            requires_network: true,
        }
    }
}
