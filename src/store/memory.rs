use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{FaasError, Result};
use crate::function::Function;
use crate::invocation::{Invocation, InvocationCompletion, InvocationStatus};
use crate::scheduler::Schedule;
use crate::store::{FunctionStore, InvocationStore, ScheduleStore};

#[derive(Debug, Default)]
struct Tables {
    functions: HashMap<Uuid, Function>,
    invocations: HashMap<Uuid, Invocation>,
    schedules: HashMap<Uuid, Schedule>,
}

/// In-process store. The write lock plays the role of the row locks: a
/// claim selects and flips under one guard, so concurrent claimants never
/// see the same schedule.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FunctionStore for MemoryStore {
    async fn create_function(&self, function: &Function) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.functions.contains_key(&function.id) {
            return Err(FaasError::Internal(format!(
                "duplicate function id {}",
                function.id
            )));
        }
        let mut row = function.clone();
        row.code = None;
        tables.functions.insert(row.id, row);
        Ok(())
    }

    async fn bind_code_locator(&self, id: Uuid, locator: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        let function = tables
            .functions
            .get_mut(&id)
            .ok_or(FaasError::FunctionNotFound(id))?;
        function.code_locator = Some(locator.to_string());
        function.updated_at = Utc::now();
        Ok(())
    }

    async fn get_function(&self, id: Uuid) -> Result<Option<Function>> {
        Ok(self.tables.read().await.functions.get(&id).cloned())
    }

    async fn list_functions(&self) -> Result<Vec<Function>> {
        let tables = self.tables.read().await;
        let mut functions: Vec<Function> = tables.functions.values().cloned().collect();
        functions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(functions)
    }

    async fn delete_function(&self, id: Uuid) -> Result<Option<Function>> {
        let mut tables = self.tables.write().await;
        let removed = tables.functions.remove(&id);
        if removed.is_some() {
            tables.invocations.retain(|_, inv| inv.function_id != id);
            tables.schedules.retain(|_, s| s.function_id != id);
        }
        Ok(removed)
    }
}

#[async_trait]
impl InvocationStore for MemoryStore {
    async fn create_invocation(&self, invocation: &Invocation) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.functions.contains_key(&invocation.function_id) {
            return Err(FaasError::FunctionNotFound(invocation.function_id));
        }
        tables.invocations.insert(invocation.id, invocation.clone());
        Ok(())
    }

    async fn get_invocation(&self, id: Uuid) -> Result<Option<Invocation>> {
        Ok(self.tables.read().await.invocations.get(&id).cloned())
    }

    async fn complete_invocation(
        &self,
        id: Uuid,
        completion: &InvocationCompletion,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.invocations.get_mut(&id) {
            Some(inv) if inv.status == InvocationStatus::Pending => {
                inv.apply(completion);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(FaasError::InvocationNotFound(id)),
        }
    }

    async fn list_invocations(&self, function_id: Uuid, limit: usize) -> Result<Vec<Invocation>> {
        let tables = self.tables.read().await;
        let mut invocations: Vec<Invocation> = tables
            .invocations
            .values()
            .filter(|inv| inv.function_id == function_id)
            .cloned()
            .collect();
        invocations.sort_by(|a, b| b.invoked_at.cmp(&a.invoked_at));
        invocations.truncate(limit);
        Ok(invocations)
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.functions.contains_key(&schedule.function_id) {
            return Err(FaasError::FunctionNotFound(schedule.function_id));
        }
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn list_schedules(&self, function_id: Uuid) -> Result<Vec<Schedule>> {
        let tables = self.tables.read().await;
        let mut schedules: Vec<Schedule> = tables
            .schedules
            .values()
            .filter(|s| s.function_id == function_id)
            .cloned()
            .collect();
        schedules.sort_by(|a, b| b.scheduled_at.cmp(&a.scheduled_at));
        Ok(schedules)
    }

    async fn delete_schedule(&self, function_id: Uuid, schedule_id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.schedules.get(&schedule_id) {
            Some(s) if s.function_id == function_id => {
                tables.schedules.remove(&schedule_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn claim_due_schedules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Schedule>> {
        let mut tables = self.tables.write().await;
        let mut due: Vec<&mut Schedule> = tables
            .schedules
            .values_mut()
            .filter(|s| !s.executed && s.scheduled_at <= now)
            .collect();
        due.sort_by_key(|s| s.scheduled_at);

        let claimed = due
            .into_iter()
            .take(limit)
            .map(|s| {
                s.executed = true;
                s.executed_at = Some(now);
                s.updated_at = now;
                s.clone()
            })
            .collect();
        Ok(claimed)
    }

    async fn resolve_schedule(
        &self,
        id: Uuid,
        status: InvocationStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        let schedule = tables
            .schedules
            .get_mut(&id)
            .ok_or(FaasError::ScheduleNotFound(id))?;
        let now = Utc::now();
        schedule.executed = true;
        schedule.executed_at.get_or_insert(now);
        schedule.status = Some(status);
        schedule.error_message = error_message.map(str::to_string);
        schedule.updated_at = now;
        Ok(())
    }
}
