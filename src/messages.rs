//! Payloads carried by the durable queue and the result store.
//!
//! Both are JSON with camelCase keys so that workers written against the
//! same contract in other languages can share the queues.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::worker::SandboxOutcome;

/// Queue payload handed from the dispatcher to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub invocation_id: Uuid,
    pub function_id: Uuid,
    pub code: String,
    #[serde(default)]
    pub input: Value,
    pub runtime: String,
}

/// Outcome vocabulary used by workers. Distinct from the persisted
/// invocation status; see `InvocationStatus::from`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    Success,
    Error,
    Timeout,
}

impl WorkerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Success => "SUCCESS",
            WorkerStatus::Error => "ERROR",
            WorkerStatus::Timeout => "TIMEOUT",
        }
    }
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result-store payload written once by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub invocation_id: Uuid,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_raw: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Classify a sandbox outcome.
    ///
    /// On success the raw output is parsed as JSON, falling back to
    /// `{"result": "<raw>"}`. On error or timeout the raw output becomes the
    /// error message verbatim.
    pub fn from_outcome(invocation_id: Uuid, outcome: SandboxOutcome, elapsed: Duration) -> Self {
        let (output, error_message) = match outcome.status {
            WorkerStatus::Success => (parse_output(&outcome.output), None),
            WorkerStatus::Error | WorkerStatus::Timeout => (None, Some(outcome.output.clone())),
        };

        Self {
            invocation_id,
            status: outcome.status,
            output,
            output_raw: Some(outcome.output),
            error_message,
            logs: (!outcome.logs.is_empty()).then_some(outcome.logs),
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    /// ERROR envelope for a request the worker could not run at all.
    pub fn rejected(invocation_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            invocation_id,
            status: WorkerStatus::Error,
            output: None,
            output_raw: None,
            error_message: Some(message.into()),
            logs: None,
            duration_ms: 0,
        }
    }
}

fn parse_output(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw).unwrap_or_else(|_| json!({ "result": raw })))
}
