use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::invocation::InvocationStatus;

/// One-time request to invoke a function at `scheduled_at`.
///
/// `executed` flips to true when an engine claims the row, before the
/// invocation runs. `status` and `error_message` are filled in once the
/// invocation resolves or the engine gives up waiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub function_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub payload: Value,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub status: Option<InvocationStatus>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn new(function_id: Uuid, scheduled_at: DateTime<Utc>, payload: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            function_id,
            scheduled_at,
            payload,
            executed: false,
            executed_at: None,
            status: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invoker identity recorded on invocations fired by this schedule.
    pub fn invoker(&self) -> String {
        format!("schedule:{}", self.id)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateScheduleRequest {
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub payload: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_schedule_is_unclaimed() {
        let s = Schedule::new(Uuid::new_v4(), Utc::now(), json!({"x": 1}));
        assert!(!s.executed);
        assert!(s.executed_at.is_none());
        assert!(s.status.is_none());
        assert_eq!(s.invoker(), format!("schedule:{}", s.id));
    }

    #[test]
    fn create_request_fields_are_optional() {
        let req: CreateScheduleRequest = serde_json::from_str("{}").unwrap();
        assert!(req.scheduled_at.is_none());
        assert!(req.payload.is_none());

        let req: CreateScheduleRequest = serde_json::from_value(json!({
            "scheduled_at": "2030-01-01T00:00:00Z",
            "payload": {"x": 1}
        }))
        .unwrap();
        assert_eq!(req.payload, Some(json!({"x": 1})));
        assert_eq!(
            req.scheduled_at.unwrap().to_rfc3339(),
            "2030-01-01T00:00:00+00:00"
        );
    }
}
