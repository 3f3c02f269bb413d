use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::function::RuntimeFamily;

/// Configuration for the subprocess sandbox.
///
/// The sandbox is a timeout-guarded child process in a throwaway
/// directory. It is a process isolation boundary, not a security boundary.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Hard wall-clock bound; the child is killed when it is exceeded
    pub timeout: Duration,
    /// Parent directory for per-run workspaces (system temp dir if unset)
    pub work_root: Option<PathBuf>,
    /// Interpreter used for the Python family
    pub python_bin: String,
    /// Interpreter used for the JavaScript family
    pub node_bin: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            work_root: None,
            python_bin: "python3".to_string(),
            node_bin: "node".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Interpreter binary for a runtime family.
    pub fn interpreter(&self, family: RuntimeFamily) -> &str {
        match family {
            RuntimeFamily::Python => &self.python_bin,
            RuntimeFamily::JavaScript => &self.node_bin,
        }
    }
}

/// Durable queue and result store settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL. `None` selects the in-process broker.
    pub redis_url: Option<String>,
    /// How long a worker's result stays readable
    pub result_ttl: Duration,
    /// Blocking pop timeout used by workers between liveness checks
    pub pop_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            result_ttl: Duration::from_secs(600),
            pop_timeout: Duration::from_secs(5),
        }
    }
}

/// Schedule claim engine settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Maximum schedules claimed per tick
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// `poll_interval * max_poll_attempts` is the scheduler-side timeout
    pub max_poll_attempts: u32,
    /// Cap on schedules being dispatched or awaited at once
    pub max_in_flight: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            batch_size: 20,
            poll_interval: Duration::from_millis(500),
            max_poll_attempts: 120,
            max_in_flight: 64,
        }
    }
}

impl SchedulerConfig {
    /// Total time a schedule waits for its invocation before it is
    /// recorded as timed out.
    pub fn await_budget(&self) -> Duration {
        self.poll_interval * self.max_poll_attempts
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// PostgreSQL URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Root directory of the code blob store
    pub code_path: PathBuf,
    pub broker: BrokerConfig,
    pub scheduler: SchedulerConfig,
    /// Run the schedule engine inside the server process
    pub run_scheduler: bool,
    /// Run one worker per runtime family inside the server process.
    /// Only useful with the in-process broker.
    pub embedded_workers: bool,
    /// Sandbox settings for embedded workers
    pub sandbox: SandboxConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "0.0.0.0:8080"
                .parse()
                .expect("default listen address is valid"),
            database_url: None,
            code_path: PathBuf::from("/data/code"),
            broker: BrokerConfig::default(),
            scheduler: SchedulerConfig::default(),
            run_scheduler: true,
            embedded_workers: false,
            sandbox: SandboxConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub runtime: RuntimeFamily,
    pub sandbox: SandboxConfig,
    pub broker: BrokerConfig,
}

impl WorkerConfig {
    pub fn new(runtime: RuntimeFamily) -> Self {
        Self {
            runtime,
            sandbox: SandboxConfig::default(),
            broker: BrokerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_config_default() {
        let cfg = SandboxConfig::default();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert!(cfg.work_root.is_none());
        assert_eq!(cfg.interpreter(RuntimeFamily::Python), "python3");
        assert_eq!(cfg.interpreter(RuntimeFamily::JavaScript), "node");
    }

    #[test]
    fn sandbox_config_with_timeout() {
        let cfg = SandboxConfig::default().with_timeout(Duration::from_millis(250));
        assert_eq!(cfg.timeout, Duration::from_millis(250));
    }

    #[test]
    fn broker_config_default() {
        let cfg = BrokerConfig::default();
        assert!(cfg.redis_url.is_none());
        assert_eq!(cfg.result_ttl, Duration::from_secs(600));
        assert_eq!(cfg.pop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn scheduler_await_budget_is_sixty_seconds() {
        let cfg = SchedulerConfig::default();
        assert_eq!(cfg.batch_size, 20);
        assert_eq!(cfg.max_poll_attempts, 120);
        assert_eq!(cfg.await_budget(), Duration::from_secs(60));
    }

    #[test]
    fn server_config_default() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:8080");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.code_path, PathBuf::from("/data/code"));
        assert!(cfg.run_scheduler);
        assert!(!cfg.embedded_workers);
    }

    #[test]
    fn worker_config_new() {
        let cfg = WorkerConfig::new(RuntimeFamily::JavaScript);
        assert_eq!(cfg.runtime, RuntimeFamily::JavaScript);
        assert_eq!(cfg.sandbox.timeout, Duration::from_secs(30));
    }
}
