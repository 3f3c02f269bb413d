use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::messages::{ExecutionResult, WorkerStatus};

/// Persisted invocation status. `Pending` is initial; the other three are
/// terminal and reached exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Pending,
    Success,
    Fail,
    Timeout,
}

impl InvocationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvocationStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationStatus::Pending => "pending",
            InvocationStatus::Success => "success",
            InvocationStatus::Fail => "fail",
            InvocationStatus::Timeout => "timeout",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(InvocationStatus::Pending),
            "success" => Some(InvocationStatus::Success),
            "fail" => Some(InvocationStatus::Fail),
            "timeout" => Some(InvocationStatus::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for InvocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<WorkerStatus> for InvocationStatus {
    fn from(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Success => InvocationStatus::Success,
            WorkerStatus::Error => InvocationStatus::Fail,
            WorkerStatus::Timeout => InvocationStatus::Timeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub id: Uuid,
    pub function_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoked_by: Option<String>,
    pub input_event: Value,
    pub status: InvocationStatus,
    /// Present iff `status` is `Success`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_result: Option<Value>,
    /// Present iff `status` is `Fail` or `Timeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub invoked_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invocation {
    pub fn new(function_id: Uuid, input_event: Value, invoked_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            function_id,
            invoked_by: Some(invoked_by.into()),
            input_event,
            status: InvocationStatus::Pending,
            output_result: None,
            error_message: None,
            duration_ms: None,
            invoked_at: now,
            created_at: now,
        }
    }

    pub fn apply(&mut self, completion: &InvocationCompletion) {
        self.status = completion.status;
        self.output_result = completion.output_result.clone();
        self.error_message = completion.error_message.clone();
        self.duration_ms = Some(completion.duration_ms);
    }
}

/// Terminal fields written onto a pending invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationCompletion {
    pub status: InvocationStatus,
    pub output_result: Option<Value>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl InvocationCompletion {
    /// Translate a worker result into terminal invocation fields.
    pub fn from_result(result: &ExecutionResult) -> Self {
        let status = InvocationStatus::from(result.status);
        let (output_result, error_message) = match status {
            InvocationStatus::Success => (Some(result.output.clone().unwrap_or(Value::Null)), None),
            _ => {
                let message = result
                    .error_message
                    .as_deref()
                    .filter(|m| !m.trim().is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("execution finished with status {}", result.status));
                (None, Some(message))
            }
        };

        Self {
            status,
            output_result,
            error_message,
            duration_ms: result.duration_ms,
        }
    }
}
