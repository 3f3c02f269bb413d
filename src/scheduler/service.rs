use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{FaasError, Result};
use crate::scheduler::schedule::{CreateScheduleRequest, Schedule};
use crate::store::Store;

/// Create, list and delete schedules.
#[derive(Clone)]
pub struct ScheduleService {
    store: Arc<dyn Store>,
}

impl ScheduleService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn create_schedule(
        &self,
        function_id: Uuid,
        req: CreateScheduleRequest,
    ) -> Result<Schedule> {
        let scheduled_at = req
            .scheduled_at
            .ok_or_else(|| FaasError::validation("scheduled_at is required"))?;
        if scheduled_at < Utc::now() {
            return Err(FaasError::validation("scheduled_at must be in the future"));
        }

        if self.store.get_function(function_id).await?.is_none() {
            return Err(FaasError::FunctionNotFound(function_id));
        }

        let payload = match req.payload {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(p) => p,
        };

        let schedule = Schedule::new(function_id, scheduled_at, payload);
        self.store.create_schedule(&schedule).await?;

        tracing::info!(
            schedule_id = %schedule.id,
            function_id = %function_id,
            scheduled_at = %schedule.scheduled_at,
            "Schedule created"
        );
        Ok(schedule)
    }

    pub async fn list_schedules(&self, function_id: Uuid) -> Result<Vec<Schedule>> {
        self.store.list_schedules(function_id).await
    }

    pub async fn delete_schedule(&self, function_id: Uuid, schedule_id: Uuid) -> Result<()> {
        if !self.store.delete_schedule(function_id, schedule_id).await? {
            return Err(FaasError::ScheduleNotFound(schedule_id));
        }
        tracing::info!(schedule_id = %schedule_id, function_id = %function_id, "Schedule deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{CreateFunctionRequest, FunctionService};
    use crate::store::{MemoryCodeStore, MemoryStore};
    use chrono::Duration;
    use serde_json::json;

    async fn setup() -> (ScheduleService, Uuid) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let functions = FunctionService::new(store.clone(), Arc::new(MemoryCodeStore::new()));
        let f = functions
            .create_function(CreateFunctionRequest {
                name: "f".into(),
                code: "def handler(e): return e".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        (ScheduleService::new(store), f.id)
    }

    fn at(offset_secs: i64, payload: Option<Value>) -> CreateScheduleRequest {
        CreateScheduleRequest {
            scheduled_at: Some(Utc::now() + Duration::seconds(offset_secs)),
            payload,
        }
    }

    #[tokio::test]
    async fn missing_payload_defaults_to_empty_object() {
        let (svc, fid) = setup().await;
        let s = svc.create_schedule(fid, at(60, None)).await.unwrap();
        assert_eq!(s.payload, json!({}));
        assert!(!s.executed);

        let listed = svc.list_schedules(fid).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, s.id);
    }

    #[tokio::test]
    async fn past_or_missing_time_is_rejected() {
        let (svc, fid) = setup().await;
        let err = svc
            .create_schedule(fid, at(-60, Some(json!({"x": 1}))))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = svc
            .create_schedule(fid, CreateScheduleRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "scheduled_at is required");
    }

    #[tokio::test]
    async fn unknown_function_is_not_found() {
        let (svc, _) = setup().await;
        let err = svc
            .create_schedule(Uuid::new_v4(), at(60, None))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_unknown_schedule_is_not_found() {
        let (svc, fid) = setup().await;
        let s = svc.create_schedule(fid, at(60, None)).await.unwrap();
        svc.delete_schedule(fid, s.id).await.unwrap();
        assert!(svc.delete_schedule(fid, s.id).await.unwrap_err().is_not_found());
    }
}
