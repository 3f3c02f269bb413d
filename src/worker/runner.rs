use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::{ExecutionQueue, ResultStore};
use crate::config::BrokerConfig;
use crate::function::RuntimeFamily;
use crate::messages::{ExecutionRequest, ExecutionResult};
use crate::worker::sandbox::Sandbox;

/// Consumes one runtime partition: pop a request, run it, publish the
/// result.
#[derive(Clone)]
pub struct WorkerLoop {
    family: RuntimeFamily,
    queue: Arc<dyn ExecutionQueue>,
    results: Arc<dyn ResultStore>,
    sandbox: Arc<dyn Sandbox>,
    config: BrokerConfig,
}

impl WorkerLoop {
    pub fn new(
        family: RuntimeFamily,
        queue: Arc<dyn ExecutionQueue>,
        results: Arc<dyn ResultStore>,
        sandbox: Arc<dyn Sandbox>,
        config: BrokerConfig,
    ) -> Self {
        Self {
            family,
            queue,
            results,
            sandbox,
            config,
        }
    }

    /// Run until `shutdown` fires. Shutdown is checked between pops, so a
    /// pop in flight completes and whatever it returned is executed and
    /// published before returning. A Redis `BRPOP` cannot be withdrawn once
    /// sent; abandoning it would lose the message it pops. Stopping can take
    /// up to one `pop_timeout` plus one execution.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            runtime = %self.family,
            queue = %self.family.queue_name(),
            "Worker started"
        );

        while !shutdown.is_cancelled() {
            match self.queue.pop(self.family, self.config.pop_timeout).await {
                Ok(Some(raw)) => {
                    self.handle_message(&raw).await;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(runtime = %self.family, error = %e, "Queue pop failed");
                    // Avoid spinning while the broker is unreachable
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.pop_timeout) => {}
                    }
                }
            }
        }

        tracing::info!(runtime = %self.family, "Worker stopped");
    }

    /// Process one queue payload. Returns the result that was published,
    /// or `None` if the payload was dropped.
    pub async fn handle_message(&self, raw: &str) -> Option<ExecutionResult> {
        let result = match serde_json::from_str::<ExecutionRequest>(raw) {
            Ok(request) => self.execute(request).await,
            Err(e) => {
                // Salvage the id so the caller is not left pending
                let invocation_id = serde_json::from_str::<Value>(raw)
                    .ok()
                    .and_then(|v| v.get("invocationId").cloned())
                    .and_then(|id| serde_json::from_value::<Uuid>(id).ok());
                match invocation_id {
                    Some(id) => {
                        tracing::warn!(invocation_id = %id, error = %e, "Rejecting incomplete request");
                        ExecutionResult::rejected(id, format!("invalid request format: {}", e))
                    }
                    None => {
                        tracing::warn!(runtime = %self.family, error = %e, "Dropping malformed queue payload");
                        return None;
                    }
                }
            }
        };

        if let Err(e) = self.results.put(&result, self.config.result_ttl).await {
            tracing::error!(
                invocation_id = %result.invocation_id,
                error = %e,
                "Failed to store result; invocation stays pending"
            );
            return None;
        }
        Some(result)
    }

    async fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        tracing::info!(
            invocation_id = %request.invocation_id,
            function_id = %request.function_id,
            runtime = %request.runtime,
            "Processing invocation"
        );

        let started = Instant::now();
        let outcome = self.sandbox.run(&request.code, &request.input).await;
        let result = ExecutionResult::from_outcome(request.invocation_id, outcome, started.elapsed());

        tracing::info!(
            invocation_id = %request.invocation_id,
            status = %result.status,
            duration_ms = result.duration_ms,
            "Finished invocation"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{MemoryQueue, MemoryResultStore};
    use crate::messages::WorkerStatus;
    use crate::worker::SandboxOutcome;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Echoes the input back as the output.
    struct EchoSandbox;

    #[async_trait]
    impl Sandbox for EchoSandbox {
        async fn run(&self, _code: &str, input: &Value) -> SandboxOutcome {
            SandboxOutcome {
                status: WorkerStatus::Success,
                output: input.to_string(),
                logs: String::new(),
            }
        }
    }

    fn worker(queue: Arc<MemoryQueue>, results: Arc<MemoryResultStore>) -> WorkerLoop {
        let config = BrokerConfig {
            pop_timeout: Duration::from_millis(20),
            ..BrokerConfig::default()
        };
        WorkerLoop::new(RuntimeFamily::Python, queue, results, Arc::new(EchoSandbox), config)
    }

    #[tokio::test]
    async fn valid_request_publishes_result() {
        let results = Arc::new(MemoryResultStore::new());
        let w = worker(Arc::new(MemoryQueue::new()), results.clone());
        let id = Uuid::new_v4();
        let raw = json!({
            "invocationId": id,
            "functionId": Uuid::new_v4(),
            "code": "def handler(e): return e",
            "input": {"n": 1},
            "runtime": "python3.11"
        })
        .to_string();

        let published = w.handle_message(&raw).await.unwrap();
        assert_eq!(published.status, WorkerStatus::Success);
        assert_eq!(published.output, Some(json!({"n": 1})));
        assert_eq!(results.get(id).await.unwrap(), Some(published));
    }

    #[tokio::test]
    async fn incomplete_request_with_id_gets_error_envelope() {
        let results = Arc::new(MemoryResultStore::new());
        let w = worker(Arc::new(MemoryQueue::new()), results.clone());
        let id = Uuid::new_v4();
        let raw = json!({"invocationId": id, "input": {}}).to_string();

        let published = w.handle_message(&raw).await.unwrap();
        assert_eq!(published.status, WorkerStatus::Error);
        assert!(published
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("invalid request format"));
        assert!(results.get(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn garbage_is_dropped() {
        let w = worker(Arc::new(MemoryQueue::new()), Arc::new(MemoryResultStore::new()));
        assert!(w.handle_message("not json").await.is_none());
        assert!(w.handle_message(r#"{"code": "x"}"#).await.is_none());
    }

    #[tokio::test]
    async fn run_consumes_queue_until_cancelled() {
        let queue = Arc::new(MemoryQueue::new());
        let results = Arc::new(MemoryResultStore::new());
        let w = worker(queue.clone(), results.clone());
        let shutdown = CancellationToken::new();
        let handle = {
            let w = w.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { w.run(token).await })
        };

        let request = ExecutionRequest {
            invocation_id: Uuid::new_v4(),
            function_id: Uuid::new_v4(),
            code: String::new(),
            input: json!({"k": "v"}),
            runtime: "python3.11".into(),
        };
        queue.push(RuntimeFamily::Python, &request).await.unwrap();

        let mut stored = None;
        for _ in 0..100 {
            stored = results.get(request.invocation_id).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(stored.unwrap().output, Some(json!({"k": "v"})));

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn message_popped_during_shutdown_is_still_published() {
        let queue = Arc::new(MemoryQueue::new());
        let results = Arc::new(MemoryResultStore::new());
        let config = BrokerConfig {
            pop_timeout: Duration::from_secs(2),
            ..BrokerConfig::default()
        };
        let w = WorkerLoop::new(
            RuntimeFamily::Python,
            queue.clone(),
            results.clone(),
            Arc::new(EchoSandbox),
            config,
        );
        let shutdown = CancellationToken::new();
        let handle = {
            let token = shutdown.clone();
            tokio::spawn(async move { w.run(token).await })
        };
        // Let the worker block in pop, then cancel before anything arrives
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();

        let request = ExecutionRequest {
            invocation_id: Uuid::new_v4(),
            function_id: Uuid::new_v4(),
            code: String::new(),
            input: json!({"late": true}),
            runtime: "python3.11".into(),
        };
        queue.push(RuntimeFamily::Python, &request).await.unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
        let stored = results.get(request.invocation_id).await.unwrap();
        assert_eq!(stored.unwrap().output, Some(json!({"late": true})));
    }
}
