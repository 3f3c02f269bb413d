#![allow(dead_code)]

//! Shared fixtures: an in-process pipeline with a scripted sandbox.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faas_lite::broker::{MemoryQueue, MemoryResultStore};
use faas_lite::config::{BrokerConfig, SchedulerConfig, ServerConfig};
use faas_lite::control_plane::{Backends, ControlPlane};
use faas_lite::function::{CreateFunctionRequest, RuntimeFamily};
use faas_lite::invocation::{Invocation, InvocationDispatcher};
use faas_lite::messages::WorkerStatus;
use faas_lite::store::{MemoryCodeStore, MemoryStore};
use faas_lite::worker::{Sandbox, SandboxOutcome, WorkerLoop};

/// Sandbox that interprets the code string as a tiny script:
///
/// - `double` returns `{"doubled": input.n * 2}`
/// - `fail` exits with an error
/// - `sleep` exceeds any deadline and reports a timeout
/// - anything else echoes the input
pub struct ScriptedSandbox;

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, code: &str, input: &Value) -> SandboxOutcome {
        match code.trim() {
            "double" => {
                let n = input.get("n").and_then(Value::as_i64).unwrap_or(0);
                SandboxOutcome {
                    status: WorkerStatus::Success,
                    output: format!(r#"{{"doubled": {}}}"#, n * 2),
                    logs: String::new(),
                }
            }
            "fail" => SandboxOutcome {
                status: WorkerStatus::Error,
                output: "RuntimeError: handler blew up".into(),
                logs: "Traceback (most recent call last): ...".into(),
            },
            "sleep" => SandboxOutcome {
                status: WorkerStatus::Timeout,
                output: "execution timed out after 30s".into(),
                logs: String::new(),
            },
            _ => SandboxOutcome {
                status: WorkerStatus::Success,
                output: input.to_string(),
                logs: String::new(),
            },
        }
    }
}

pub struct Pipeline {
    pub plane: ControlPlane,
    pub store: Arc<MemoryStore>,
    pub queue: Arc<MemoryQueue>,
    pub results: Arc<MemoryResultStore>,
    pub shutdown: CancellationToken,
}

pub fn fast_scheduler() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_millis(100),
        batch_size: 20,
        poll_interval: Duration::from_millis(50),
        max_poll_attempts: 60,
        max_in_flight: 16,
    }
}

/// Control plane over in-memory backends. Workers are not started.
pub fn pipeline(scheduler: SchedulerConfig) -> Pipeline {
    let store = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryQueue::new());
    let results = Arc::new(MemoryResultStore::new());
    let backends = Backends {
        store: store.clone(),
        code: Arc::new(MemoryCodeStore::new()),
        queue: queue.clone(),
        results: results.clone(),
    };
    let config = ServerConfig {
        scheduler,
        ..ServerConfig::default()
    };
    Pipeline {
        plane: ControlPlane::new(config, backends),
        store,
        queue,
        results,
        shutdown: CancellationToken::new(),
    }
}

impl Pipeline {
    /// Start a scripted worker on every partition.
    pub fn start_workers(&self) {
        for family in RuntimeFamily::ALL {
            let worker = WorkerLoop::new(
                family,
                self.queue.clone(),
                self.results.clone(),
                Arc::new(ScriptedSandbox),
                BrokerConfig {
                    pop_timeout: Duration::from_millis(50),
                    ..BrokerConfig::default()
                },
            );
            let token = self.shutdown.clone();
            tokio::spawn(async move { worker.run(token).await });
        }
    }

    pub fn dispatcher(&self) -> &InvocationDispatcher {
        self.plane.dispatcher()
    }

    pub async fn create_function(&self, runtime: &str, code: &str) -> Uuid {
        self.plane
            .functions()
            .create_function(CreateFunctionRequest {
                name: "test-fn".into(),
                runtime: Some(runtime.into()),
                code: code.into(),
                ..Default::default()
            })
            .await
            .unwrap()
            .id
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Poll until the invocation leaves `pending` or the deadline passes.
pub async fn poll_until_terminal(
    dispatcher: &InvocationDispatcher,
    id: Uuid,
    deadline: Duration,
) -> Invocation {
    let started = std::time::Instant::now();
    loop {
        let inv = dispatcher.poll_result(id).await.unwrap();
        if inv.status.is_terminal() || started.elapsed() >= deadline {
            return inv;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
