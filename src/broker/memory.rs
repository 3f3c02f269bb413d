use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use crate::broker::{ExecutionQueue, ResultStore};
use crate::error::Result;
use crate::function::RuntimeFamily;
use crate::messages::ExecutionResult;

/// In-process queue with one FIFO per runtime family.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    partitions: RwLock<HashMap<RuntimeFamily, VecDeque<String>>>,
    arrivals: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting in a partition.
    pub async fn len(&self, family: RuntimeFamily) -> usize {
        self.partitions
            .read()
            .await
            .get(&family)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, family: RuntimeFamily) -> bool {
        self.len(family).await == 0
    }

    async fn try_pop(&self, family: RuntimeFamily) -> Option<String> {
        self.partitions
            .write()
            .await
            .get_mut(&family)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl ExecutionQueue for MemoryQueue {
    async fn push_raw(&self, family: RuntimeFamily, payload: String) -> Result<()> {
        self.partitions
            .write()
            .await
            .entry(family)
            .or_default()
            .push_back(payload);
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn pop(&self, family: RuntimeFamily, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push in between is not missed.
            let arrived = self.arrivals.notified();
            if let Some(payload) = self.try_pop(family).await {
                return Ok(Some(payload));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, arrived).await;
        }
    }
}

/// In-process result store with per-entry expiry.
#[derive(Debug, Default)]
pub struct MemoryResultStore {
    entries: RwLock<HashMap<Uuid, (ExecutionResult, Instant)>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put(&self, result: &ExecutionResult, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        // Results that are never polled would otherwise stay forever
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(result.invocation_id, (result.clone(), now + ttl));
        Ok(())
    }

    async fn get(&self, invocation_id: Uuid) -> Result<Option<ExecutionResult>> {
        let mut entries = self.entries.write().await;
        match entries.get(&invocation_id) {
            Some((_, expires_at)) if Instant::now() >= *expires_at => {
                entries.remove(&invocation_id);
                Ok(None)
            }
            Some((result, _)) => Ok(Some(result.clone())),
            None => Ok(None),
        }
    }
}
