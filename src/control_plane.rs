use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::api::{self, ApiState};
use crate::broker::{ExecutionQueue, MemoryQueue, MemoryResultStore, RedisBroker, ResultStore};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::function::{FunctionService, RuntimeFamily};
use crate::invocation::InvocationDispatcher;
use crate::scheduler::{ScheduleEngine, ScheduleService};
use crate::shutdown::drain_tasks;
use crate::store::{CodeStore, LocalCodeStore, MemoryStore, PgStore, Store};
use crate::worker::{ProcessSandbox, WorkerLoop};

/// Shared resources every process role talks to.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn Store>,
    pub code: Arc<dyn CodeStore>,
    pub queue: Arc<dyn ExecutionQueue>,
    pub results: Arc<dyn ResultStore>,
}

impl Backends {
    /// Everything in process. Only one process can use these.
    pub fn in_memory(code: Arc<dyn CodeStore>) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            code,
            queue: Arc::new(MemoryQueue::new()),
            results: Arc::new(MemoryResultStore::new()),
        }
    }

    /// PostgreSQL and Redis when configured, in-process fallbacks otherwise.
    pub async fn connect(
        database_url: Option<&str>,
        redis_url: Option<&str>,
        code_path: &Path,
    ) -> Result<Self> {
        let store: Arc<dyn Store> = match database_url {
            Some(url) => {
                let pg = PgStore::connect(url).await?;
                pg.init_schema().await?;
                tracing::info!("Using PostgreSQL store");
                Arc::new(pg)
            }
            None => {
                tracing::warn!("No database configured, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let (queue, results): (Arc<dyn ExecutionQueue>, Arc<dyn ResultStore>) = match redis_url {
            Some(url) => {
                let broker = RedisBroker::connect(url).await?;
                (Arc::new(broker.clone()), Arc::new(broker))
            }
            None => {
                tracing::warn!("No Redis configured, using in-process queue and result store");
                (Arc::new(MemoryQueue::new()), Arc::new(MemoryResultStore::new()))
            }
        };

        tokio::fs::create_dir_all(code_path).await?;
        tracing::info!(path = %code_path.display(), "Using local code store");

        Ok(Self {
            store,
            code: Arc::new(LocalCodeStore::new(code_path)),
            queue,
            results,
        })
    }
}

/// API server, schedule engine and optional embedded workers in one
/// process.
pub struct ControlPlane {
    config: ServerConfig,
    backends: Backends,
    functions: FunctionService,
    dispatcher: InvocationDispatcher,
    schedules: ScheduleService,
    engine: ScheduleEngine,
}

impl ControlPlane {
    pub fn new(config: ServerConfig, backends: Backends) -> Self {
        let functions = FunctionService::new(backends.store.clone(), backends.code.clone());
        let dispatcher = InvocationDispatcher::new(
            functions.clone(),
            backends.store.clone(),
            backends.queue.clone(),
            backends.results.clone(),
        );
        let schedules = ScheduleService::new(backends.store.clone());
        let engine = ScheduleEngine::new(
            backends.store.clone(),
            dispatcher.clone(),
            config.scheduler.clone(),
        );

        Self {
            config,
            backends,
            functions,
            dispatcher,
            schedules,
            engine,
        }
    }

    pub fn api_state(&self) -> ApiState {
        ApiState {
            functions: self.functions.clone(),
            dispatcher: self.dispatcher.clone(),
            schedules: self.schedules.clone(),
        }
    }

    pub fn dispatcher(&self) -> &InvocationDispatcher {
        &self.dispatcher
    }

    pub fn functions(&self) -> &FunctionService {
        &self.functions
    }

    pub fn schedules(&self) -> &ScheduleService {
        &self.schedules
    }

    pub fn engine(&self) -> &ScheduleEngine {
        &self.engine
    }

    /// Spawn one worker per runtime family consuming this process's queue.
    pub fn spawn_workers(&self, tasks: &mut JoinSet<()>, shutdown: &CancellationToken) {
        for family in RuntimeFamily::ALL {
            let worker = WorkerLoop::new(
                family,
                self.backends.queue.clone(),
                self.backends.results.clone(),
                Arc::new(ProcessSandbox::new(family, self.config.sandbox.clone())),
                self.config.broker.clone(),
            );
            let token = shutdown.clone();
            tasks.spawn(async move { worker.run(token).await });
        }
    }

    /// Run until `shutdown` fires or the API server fails.
    ///
    /// Background loops are stopped and drained before returning.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let mut tasks = JoinSet::new();

        if self.config.run_scheduler {
            let engine = self.engine.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { engine.run(token).await });
        }

        if self.config.embedded_workers {
            self.spawn_workers(&mut tasks, &shutdown);
        }

        let served = api::serve(self.config.listen_addr, self.api_state(), shutdown.clone()).await;
        if let Err(e) = &served {
            tracing::error!(error = %e, "API server failed");
        }

        // Stop background loops whether the server exited cleanly or not
        shutdown.cancel();
        let grace = self.config.scheduler.await_budget() + self.config.sandbox.timeout;
        drain_tasks(&mut tasks, grace, "control plane").await;

        served
    }
}
