use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser};
use tracing_subscriber::EnvFilter;

use faas_lite::broker::RedisBroker;
use faas_lite::config::{BrokerConfig, SandboxConfig, SchedulerConfig, ServerConfig, WorkerConfig};
use faas_lite::control_plane::{Backends, ControlPlane};
use faas_lite::function::RuntimeFamily;
use faas_lite::shutdown::install_shutdown_handler;
use faas_lite::worker::{ProcessSandbox, WorkerLoop};

#[derive(Parser, Debug)]
#[command(name = "faas-lite")]
#[command(version)]
#[command(about = "A small serverless function execution control plane")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API and the schedule engine
    Server(ServerArgs),

    /// Run a worker consuming one runtime partition
    Worker(WorkerArgs),

    /// Run a stand-alone schedule engine instance
    Scheduler(SchedulerArgs),
}

// =============================================================================
// Shared Arguments
// =============================================================================

#[derive(ClapArgs, Debug)]
struct BrokerArgs {
    /// Redis URL for the queue and result store. Omit to use the in-process broker.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Seconds a worker result stays readable
    #[arg(long, default_value = "600")]
    result_ttl_secs: u64,

    /// Seconds a worker blocks on the queue between liveness checks
    #[arg(long, default_value = "5")]
    pop_timeout_secs: u64,
}

impl BrokerArgs {
    fn config(&self) -> BrokerConfig {
        BrokerConfig {
            redis_url: self.redis_url.clone(),
            result_ttl: Duration::from_secs(self.result_ttl_secs),
            pop_timeout: Duration::from_secs(self.pop_timeout_secs),
        }
    }
}

#[derive(ClapArgs, Debug)]
struct StoreArgs {
    /// PostgreSQL URL. Omit to use the in-memory store.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Directory holding function source blobs
    #[arg(long, env = "CODE_PATH", default_value = "/data/code")]
    code_path: PathBuf,
}

#[derive(ClapArgs, Debug)]
struct EngineArgs {
    /// Milliseconds between claim ticks
    #[arg(long, default_value = "1000")]
    tick_ms: u64,

    /// Maximum schedules claimed per tick
    #[arg(long, default_value = "20")]
    batch_size: usize,

    /// Maximum schedules dispatched or awaited at once
    #[arg(long, default_value = "64")]
    max_in_flight: usize,
}

impl EngineArgs {
    fn config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_millis(self.tick_ms),
            batch_size: self.batch_size,
            max_in_flight: self.max_in_flight,
            ..SchedulerConfig::default()
        }
    }
}

#[derive(ClapArgs, Debug)]
struct SandboxArgs {
    /// Seconds before user code is killed
    #[arg(long, default_value = "30")]
    timeout_secs: u64,

    /// Python interpreter
    #[arg(long, default_value = "python3")]
    python_bin: String,

    /// Node.js interpreter
    #[arg(long, default_value = "node")]
    node_bin: String,

    /// Parent directory for per-run workspaces
    #[arg(long)]
    work_root: Option<PathBuf>,
}

impl SandboxArgs {
    fn config(&self) -> SandboxConfig {
        SandboxConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            work_root: self.work_root.clone(),
            python_bin: self.python_bin.clone(),
            node_bin: self.node_bin.clone(),
        }
    }
}

// =============================================================================
// Subcommand Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Address for the HTTP API
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Do not run the schedule engine in this process
    #[arg(long)]
    no_scheduler: bool,

    /// Run workers inside this process. Defaults to on when no Redis URL is set.
    #[arg(long)]
    embedded_workers: Option<bool>,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    sandbox: SandboxArgs,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Runtime family to consume (python or javascript)
    #[arg(long, env = "WORKER_RUNTIME")]
    runtime: RuntimeFamily,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    sandbox: SandboxArgs,
}

#[derive(Parser, Debug)]
struct SchedulerArgs {
    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    broker: BrokerArgs,

    #[command(flatten)]
    engine: EngineArgs,
}

// =============================================================================
// Entry Points
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_server(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let broker = args.broker.config();
    let embedded_workers = args
        .embedded_workers
        .unwrap_or(broker.redis_url.is_none());

    let config = ServerConfig {
        listen_addr: args.listen,
        database_url: args.store.database_url.clone(),
        code_path: args.store.code_path.clone(),
        broker,
        scheduler: args.engine.config(),
        run_scheduler: !args.no_scheduler,
        embedded_workers,
        sandbox: args.sandbox.config(),
    };

    if config.broker.redis_url.is_none() && !config.embedded_workers {
        tracing::warn!("In-process broker without embedded workers: invocations will stay pending");
    }

    let shutdown = install_shutdown_handler()?;
    let backends = Backends::connect(
        config.database_url.as_deref(),
        config.broker.redis_url.as_deref(),
        &config.code_path,
    )
    .await?;

    tracing::info!(
        listen = %config.listen_addr,
        scheduler = config.run_scheduler,
        embedded_workers = config.embedded_workers,
        "Starting control plane"
    );
    ControlPlane::new(config, backends).run(shutdown).await?;
    Ok(())
}

async fn run_worker(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = WorkerConfig {
        runtime: args.runtime,
        sandbox: args.sandbox.config(),
        broker: args.broker.config(),
    };

    let redis_url = config
        .broker
        .redis_url
        .as_deref()
        .ok_or("a worker needs --redis-url (or REDIS_URL) to reach the queue")?;
    let broker = RedisBroker::connect(redis_url).await?;

    let shutdown = install_shutdown_handler()?;
    let worker = WorkerLoop::new(
        config.runtime,
        Arc::new(broker.clone()),
        Arc::new(broker),
        Arc::new(ProcessSandbox::new(config.runtime, config.sandbox.clone())),
        config.broker.clone(),
    );
    worker.run(shutdown).await;
    Ok(())
}

async fn run_scheduler(args: SchedulerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let broker = args.broker.config();
    if args.store.database_url.is_none() || broker.redis_url.is_none() {
        return Err("a stand-alone scheduler needs both --database-url and --redis-url".into());
    }

    let backends = Backends::connect(
        args.store.database_url.as_deref(),
        broker.redis_url.as_deref(),
        &args.store.code_path,
    )
    .await?;

    let shutdown = install_shutdown_handler()?;
    let plane = ControlPlane::new(
        ServerConfig {
            scheduler: args.engine.config(),
            broker,
            ..ServerConfig::default()
        },
        backends,
    );
    plane.engine().run(shutdown).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    match args.command {
        Commands::Server(server_args) => run_server(server_args).await?,
        Commands::Worker(worker_args) => run_worker(worker_args).await?,
        Commands::Scheduler(scheduler_args) => run_scheduler(scheduler_args).await?,
    }

    Ok(())
}
