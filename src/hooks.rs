//! Webhook dispatch (§9/§10): now just another `EventBus` subscriber
//! instead of being called ad hoc from the orchestrator. Keeps the teacher's
//! curl-based POST (avoiding a heavyweight HTTP client dependency) but maps
//! every `Event` variant through one serializer instead of five bespoke
//! `HookEvent` shapes the caller had to construct by hand.

use crate::events::{Event, EventBus};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HookConfig {
    pub url: String,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl HookConfig {
    pub fn new(url: String, token: Option<String>) -> Self {
        Self { url, token, timeout: Duration::from_secs(10) }
    }
}

#[derive(Debug, Serialize)]
struct HookPayload {
    event: String,
    detail: serde_json::Value,
}

fn to_payload(event: &Event) -> Option<HookPayload> {
    let (name, detail) = match event {
        Event::IterationCompleted { iteration, task_id, status } => (
            "iteration_completed",
            serde_json::json!({ "iteration": iteration, "task_id": task_id, "status": format!("{status:?}") }),
        ),
        Event::IterationFailed { iteration, task_id, error } => {
            ("iteration_failed", serde_json::json!({ "iteration": iteration, "task_id": task_id, "error": error }))
        }
        Event::TaskCompleted { task_id } => ("task_completed", serde_json::json!({ "task_id": task_id })),
        Event::AllComplete { total_tasks, total_iterations } => {
            ("all_complete", serde_json::json!({ "total_tasks": total_tasks, "total_iterations": total_iterations }))
        }
        Event::AgentAllLimited => ("agent_all_limited", serde_json::json!({})),
        Event::EngineStopped { reason } => ("engine_stopped", serde_json::json!({ "reason": reason })),
        _ => return None,
    };
    Some(HookPayload { event: name.to_string(), detail })
}

/// Registers a fire-and-forget webhook listener on `bus`. Spawns one tokio
/// task per notable event so a slow or unreachable webhook never blocks the
/// engine loop.
pub fn register(bus: &EventBus, config: HookConfig) {
    bus.subscribe(move |event| {
        let Some(payload) = to_payload(event) else { return };
        let config = config.clone();
        tokio::spawn(async move {
            send(&config, &payload).await;
        });
    });
}

async fn send(config: &HookConfig, payload: &HookPayload) {
    let body = match serde_json::to_string(payload) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "failed to serialize hook payload");
            return;
        }
    };

    let mut cmd = tokio::process::Command::new("curl");
    cmd.arg("-s")
        .arg("-X")
        .arg("POST")
        .arg("-H")
        .arg("Content-Type: application/json")
        .arg("--max-time")
        .arg(config.timeout.as_secs().to_string());

    if let Some(token) = &config.token {
        cmd.arg("-H").arg(format!("Authorization: Bearer {token}"));
    }

    cmd.arg("-d").arg(&body).arg(&config.url);
    cmd.stdout(std::process::Stdio::null()).stderr(std::process::Stdio::piped());

    match cmd.output().await {
        Ok(output) if output.status.success() => {
            debug!(event = %payload.event, url = %config.url, "hook delivered");
        }
        Ok(output) => {
            warn!(event = %payload.event, status = %output.status, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "hook delivery failed");
        }
        Err(e) => {
            warn!(event = %payload.event, error = %e, "hook delivery error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IterationStatus;

    #[test]
    fn maps_known_events_to_named_payloads() {
        let payload = to_payload(&Event::TaskCompleted { task_id: "T1".into() }).unwrap();
        assert_eq!(payload.event, "task_completed");

        let payload =
            to_payload(&Event::IterationCompleted { iteration: 1, task_id: "T1".into(), status: IterationStatus::Completed }).unwrap();
        assert_eq!(payload.event, "iteration_completed");
    }

    #[test]
    fn unmapped_events_are_skipped() {
        assert!(to_payload(&Event::EnginePaused).is_none());
    }
}
