use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{FaasError, Result};
use crate::invocation::{InvocationDispatcher, InvocationStatus};
use crate::scheduler::schedule::Schedule;
use crate::shutdown::drain_tasks;
use crate::store::Store;

/// Claims due schedules and runs each one through the dispatcher.
///
/// Any number of engines may share one store. The claim flips `executed`
/// before the invocation runs, so a schedule fires at most once; a crash
/// between claim and dispatch drops it.
#[derive(Clone)]
pub struct ScheduleEngine {
    store: Arc<dyn Store>,
    dispatcher: InvocationDispatcher,
    config: SchedulerConfig,
    permits: Arc<Semaphore>,
}

impl ScheduleEngine {
    pub fn new(
        store: Arc<dyn Store>,
        dispatcher: InvocationDispatcher,
        config: SchedulerConfig,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            store,
            dispatcher,
            config,
            permits,
        }
    }

    /// Tick until `shutdown` fires, then wait for in-flight schedules.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            max_in_flight = self.config.max_in_flight,
            "Schedule engine started"
        );

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Schedule engine stopping");
                    break;
                }
                _ = ticker.tick() => {
                    // A failed claim leaves rows unclaimed for the next tick
                    if let Err(e) = self.tick(&mut tasks).await {
                        tracing::warn!(error = %e, "Schedule claim failed");
                    }
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Schedule task panicked");
                    }
                }
            }
        }

        let grace = self.config.await_budget() + self.config.poll_interval;
        drain_tasks(&mut tasks, grace, "schedules").await;
        tracing::info!("Schedule engine stopped");
    }

    /// Claim one batch and spawn a task per claimed schedule. Returns the
    /// number claimed.
    ///
    /// The batch never exceeds the free in-flight slots, so nothing is
    /// claimed that cannot start right away.
    pub async fn tick(&self, tasks: &mut JoinSet<()>) -> Result<usize> {
        let limit = self
            .config
            .batch_size
            .min(self.permits.available_permits());
        if limit == 0 {
            tracing::debug!("All schedule slots busy, skipping claim");
            return Ok(0);
        }

        let claimed = self.store.claim_due_schedules(Utc::now(), limit).await?;
        let count = claimed.len();

        for schedule in claimed {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| FaasError::Internal(format!("schedule slots closed: {}", e)))?;
            let engine = self.clone();
            tasks.spawn(async move {
                let _permit = permit;
                engine.execute(schedule).await;
            });
        }

        if count > 0 {
            tracing::info!(claimed = count, "Claimed due schedules");
        }
        Ok(count)
    }

    /// Invoke a claimed schedule and wait a bounded time for its outcome.
    /// Returns the status recorded on the schedule.
    pub async fn execute(&self, schedule: Schedule) -> InvocationStatus {
        let schedule_id = schedule.id;
        let invoker = schedule.invoker();

        let invocation = match self
            .dispatcher
            .invoke(schedule.function_id, schedule.payload, &invoker)
            .await
        {
            Ok(inv) => inv,
            Err(e) => {
                tracing::warn!(schedule_id = %schedule_id, error = %e, "Scheduled invocation failed to start");
                self.resolve(schedule_id, InvocationStatus::Fail, Some(&e.to_string()))
                    .await;
                return InvocationStatus::Fail;
            }
        };

        tracing::info!(
            schedule_id = %schedule_id,
            invocation_id = %invocation.id,
            "Scheduled invocation dispatched"
        );

        for _ in 0..self.config.max_poll_attempts {
            tokio::time::sleep(self.config.poll_interval).await;
            match self.dispatcher.poll_result(invocation.id).await {
                Ok(inv) if inv.status.is_terminal() => {
                    self.resolve(schedule_id, inv.status, inv.error_message.as_deref())
                        .await;
                    return inv.status;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        schedule_id = %schedule_id,
                        invocation_id = %invocation.id,
                        error = %e,
                        "Polling scheduled invocation failed"
                    );
                }
            }
        }

        let message = format!(
            "execution timed out after {} seconds",
            self.config.await_budget().as_secs()
        );
        self.resolve(schedule_id, InvocationStatus::Timeout, Some(&message))
            .await;
        InvocationStatus::Timeout
    }

    async fn resolve(&self, schedule_id: Uuid, status: InvocationStatus, error: Option<&str>) {
        match self.store.resolve_schedule(schedule_id, status, error).await {
            Ok(()) => {
                tracing::info!(schedule_id = %schedule_id, status = %status, "Schedule resolved");
            }
            Err(e) => {
                tracing::error!(
                    schedule_id = %schedule_id,
                    status = %status,
                    error = %e,
                    "Failed to record schedule status"
                );
            }
        }
    }
}
