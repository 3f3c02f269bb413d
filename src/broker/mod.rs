//! Transient coordination channels between the control plane and workers.
//!
//! - [`ExecutionQueue`]: one FIFO partition per [`RuntimeFamily`], at-least-once
//! - [`ResultStore`]: one TTL-bounded [`ExecutionResult`] per invocation
//!
//! Neither is a system of record. An expired result is indistinguishable
//! from one that has not been written yet, and callers treat both as
//! "still pending".

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::function::RuntimeFamily;
use crate::messages::{ExecutionRequest, ExecutionResult};

pub use self::memory::{MemoryQueue, MemoryResultStore};
pub use self::redis::RedisBroker;

/// Key prefix of result entries.
pub const RESULT_KEY_PREFIX: &str = "result:";

pub fn result_key(invocation_id: Uuid) -> String {
    format!("{}{}", RESULT_KEY_PREFIX, invocation_id)
}

#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Append a raw payload to a partition.
    async fn push_raw(&self, family: RuntimeFamily, payload: String) -> Result<()>;

    /// Pop the oldest payload of a partition, waiting up to `timeout`.
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn pop(&self, family: RuntimeFamily, timeout: Duration) -> Result<Option<String>>;

    async fn push(&self, family: RuntimeFamily, request: &ExecutionRequest) -> Result<()> {
        let payload = serde_json::to_string(request)?;
        self.push_raw(family, payload).await
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> Result<()>;

    /// The stored result, or `None` if it was never written or has expired.
    async fn get(&self, invocation_id: Uuid) -> Result<Option<ExecutionResult>>;
}
