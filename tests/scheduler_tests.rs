mod test_harness;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::task::JoinSet;

use faas_lite::invocation::InvocationStatus;
use faas_lite::scheduler::{CreateScheduleRequest, Schedule};
use faas_lite::store::{MemoryStore, ScheduleStore};
use test_harness::{fast_scheduler, pipeline};

#[tokio::test]
async fn test_concurrent_claimants_never_share_a_schedule() {
    let p = pipeline(fast_scheduler());
    let fid = p.create_function("python3.11", "noop").await;

    let now = Utc::now();
    let mut expected = HashSet::new();
    for i in 0..50 {
        let s = Schedule::new(fid, now - chrono::Duration::seconds(i), json!({"i": i}));
        p.store.create_schedule(&s).await.unwrap();
        expected.insert(s.id);
    }

    let store: Arc<MemoryStore> = p.store.clone();
    let mut claimants = JoinSet::new();
    for _ in 0..8 {
        let store = store.clone();
        claimants.spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = store.claim_due_schedules(Utc::now(), 3).await.unwrap();
                if batch.is_empty() {
                    return mine;
                }
                mine.extend(batch.into_iter().map(|s| s.id));
                tokio::task::yield_now().await;
            }
        });
    }

    let mut claimed = Vec::new();
    while let Some(joined) = claimants.join_next().await {
        claimed.extend(joined.unwrap());
    }

    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), unique.len(), "a schedule was claimed twice");
    assert_eq!(unique, expected);
}

#[tokio::test]
async fn test_one_schedule_claimed_by_exactly_one_engine() {
    let p = pipeline(fast_scheduler());
    let fid = p.create_function("python3.11", "noop").await;
    let s = Schedule::new(fid, Utc::now(), json!({}));
    p.store.create_schedule(&s).await.unwrap();

    let mut claimants = JoinSet::new();
    for _ in 0..16 {
        let store = p.store.clone();
        claimants.spawn(async move { store.claim_due_schedules(Utc::now(), 10).await.unwrap() });
    }

    let mut winners = 0;
    while let Some(joined) = claimants.join_next().await {
        let batch = joined.unwrap();
        if !batch.is_empty() {
            assert_eq!(batch[0].id, s.id);
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_future_schedule_runs_once_and_resolves() {
    let p = pipeline(fast_scheduler());
    p.start_workers();
    let fid = p.create_function("python3.11", "echo").await;

    let schedule = p
        .plane
        .schedules()
        .create_schedule(
            fid,
            CreateScheduleRequest {
                scheduled_at: Some(Utc::now() + chrono::Duration::seconds(2)),
                payload: Some(json!({"x": 1})),
            },
        )
        .await
        .unwrap();

    let engine = p.plane.engine().clone();
    let token = p.shutdown.clone();
    let engine_task = tokio::spawn(async move { engine.run(token).await });

    tokio::time::sleep(Duration::from_secs(5)).await;

    let rows = p.plane.schedules().list_schedules(fid).await.unwrap();
    let row = rows.iter().find(|r| r.id == schedule.id).unwrap();
    assert!(row.executed);
    assert!(row.executed_at.is_some());
    assert!(
        matches!(
            row.status,
            Some(InvocationStatus::Success | InvocationStatus::Fail | InvocationStatus::Timeout)
        ),
        "schedule still unresolved: {:?}",
        row.status
    );
    assert_eq!(row.status, Some(InvocationStatus::Success));

    // Exactly one invocation, tagged with the schedule
    let invocations = p.dispatcher().list_invocations(fid, None).await.unwrap();
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations[0].invoked_by.as_deref(),
        Some(format!("schedule:{}", schedule.id).as_str())
    );
    assert_eq!(invocations[0].input_event, json!({"x": 1}));
    assert_eq!(invocations[0].output_result, Some(json!({"x": 1})));

    p.shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), engine_task)
        .await
        .expect("engine did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_two_engines_fire_a_schedule_once() {
    let p = pipeline(fast_scheduler());
    p.start_workers();
    let fid = p.create_function("python3.11", "echo").await;
    for _ in 0..10 {
        p.store
            .create_schedule(&Schedule::new(fid, Utc::now(), json!({})))
            .await
            .unwrap();
    }

    let mut engines = Vec::new();
    for _ in 0..2 {
        let engine = p.plane.engine().clone();
        let token = p.shutdown.clone();
        engines.push(tokio::spawn(async move { engine.run(token).await }));
    }

    tokio::time::sleep(Duration::from_secs(2)).await;
    p.shutdown.cancel();
    for e in engines {
        e.await.unwrap();
    }

    let invocations = p.dispatcher().list_invocations(fid, Some(100)).await.unwrap();
    assert_eq!(invocations.len(), 10);
    let rows = p.plane.schedules().list_schedules(fid).await.unwrap();
    assert!(rows.iter().all(|r| r.executed && r.status == Some(InvocationStatus::Success)));
}

#[tokio::test]
async fn test_schedule_without_worker_times_out_on_scheduler_side() {
    let mut config = fast_scheduler();
    config.poll_interval = Duration::from_millis(20);
    config.max_poll_attempts = 10;
    let p = pipeline(config);
    let fid = p.create_function("python3.11", "echo").await;
    let s = Schedule::new(fid, Utc::now(), json!({}));
    p.store.create_schedule(&s).await.unwrap();

    let mut tasks = JoinSet::new();
    assert_eq!(p.plane.engine().tick(&mut tasks).await.unwrap(), 1);
    while tasks.join_next().await.is_some() {}

    let rows = p.plane.schedules().list_schedules(fid).await.unwrap();
    assert_eq!(rows[0].status, Some(InvocationStatus::Timeout));
    assert!(rows[0]
        .error_message
        .as_deref()
        .unwrap()
        .starts_with("execution timed out after"));

    // The invocation itself is still pending; the two timeouts are independent
    let invocations = p.dispatcher().list_invocations(fid, None).await.unwrap();
    assert_eq!(invocations[0].status, InvocationStatus::Pending);
}
