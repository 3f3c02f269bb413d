//! Persistence: the relational system of record and the code blob store.
//!
//! The relational store is the only shared resource that needs
//! transactional discipline. It backs the atomic schedule claim and the
//! guarded one-time terminal update of invocations.

pub mod code;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::function::Function;
use crate::invocation::{Invocation, InvocationCompletion, InvocationStatus};
use crate::scheduler::Schedule;

pub use code::{CodeStore, LocalCodeStore, MemoryCodeStore};
pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait FunctionStore: Send + Sync {
    /// Insert a function row. The code locator is bound separately.
    async fn create_function(&self, function: &Function) -> Result<()>;

    async fn bind_code_locator(&self, id: Uuid, locator: &str) -> Result<()>;

    async fn get_function(&self, id: Uuid) -> Result<Option<Function>>;

    /// All functions, newest first.
    async fn list_functions(&self) -> Result<Vec<Function>>;

    /// Delete a function together with its invocations and schedules.
    /// Returns the deleted row, if there was one.
    async fn delete_function(&self, id: Uuid) -> Result<Option<Function>>;
}

#[async_trait]
pub trait InvocationStore: Send + Sync {
    async fn create_invocation(&self, invocation: &Invocation) -> Result<()>;

    async fn get_invocation(&self, id: Uuid) -> Result<Option<Invocation>>;

    /// Write terminal fields if the invocation is still pending.
    /// Returns whether this call performed the transition.
    async fn complete_invocation(&self, id: Uuid, completion: &InvocationCompletion)
        -> Result<bool>;

    /// Invocations of a function, newest first.
    async fn list_invocations(&self, function_id: Uuid, limit: usize) -> Result<Vec<Invocation>>;
}

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_schedule(&self, schedule: &Schedule) -> Result<()>;

    /// Schedules of a function, latest fire time first.
    async fn list_schedules(&self, function_id: Uuid) -> Result<Vec<Schedule>>;

    async fn delete_schedule(&self, function_id: Uuid, schedule_id: Uuid) -> Result<bool>;

    /// Atomically select up to `limit` unexecuted schedules due at `now`,
    /// skipping rows held by concurrent claimants, and flip them to
    /// executed in the same transaction. A schedule is returned by at most
    /// one call.
    async fn claim_due_schedules(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Schedule>>;

    /// Record the terminal status of a claimed schedule.
    async fn resolve_schedule(
        &self,
        id: Uuid,
        status: InvocationStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
}

/// Full relational store.
pub trait Store: FunctionStore + InvocationStore + ScheduleStore {}

impl<T: FunctionStore + InvocationStore + ScheduleStore> Store for T {}
