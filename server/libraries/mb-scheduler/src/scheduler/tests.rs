//
// Copyright 2025 Tabs Data Inc.
//

use super::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use mb_execution::calls::{CallFilter, CallStore};
use mb_execution::counter::MemoryCounterBackend;
use mb_execution::engine::{EngineLimits, StaticLimits};
use mb_execution::pool::{PoolConfig, ProcessPool};
use mb_execution::resolver::WorkerLauncher;
use mb_objects::types::function::FunctionVersion;
use mb_objects::types::schedule::{IntervalUnit, ScheduleMethod, ScheduleSpec};
use mb_registry::registry::FunctionRegistry;
use serde_json::json;
use testdir::testdir;
use tokio::process::Command;

/// Workers never answer; scheduler tests assert dispatch, not execution.
struct SleeperLauncher;

#[async_trait]
impl WorkerLauncher for SleeperLauncher {
    async fn launch(&self, _version: &FunctionVersion) -> Result<Command, MbError> {
        let mut command = Command::new("sleep");
        command.arg("300");
        Ok(command)
    }
}

struct Fixture {
    scheduler: Scheduler,
    registry: FunctionRegistry,
    calls: CallStore,
}

async fn fixture(cap: u64) -> Fixture {
    let db = mb_database::test_utils::db().await.unwrap();
    let registry = FunctionRegistry::new(db.clone(), testdir!().join("functions"));
    let engine = ExecutionEngine::new(
        CallStore::new(db.clone()),
        Arc::new(FunctionRegistry::new(db.clone(), testdir!().join("functions"))),
        Arc::new(ProcessPool::new(
            PoolConfig::default(),
            Box::new(SleeperLauncher),
        )),
        Arc::new(MemoryCounterBackend::new()),
        Arc::new(StaticLimits(EngineLimits::default())),
    );
    let scheduler = Scheduler::new(
        ScheduleStore::new(db.clone()),
        engine,
        Arc::new(StaticSchedulerLimits(cap)),
        std::time::Duration::from_secs(5),
    );
    Fixture {
        scheduler,
        registry,
        calls: CallStore::new(db),
    }
}

fn interval_spec(unit: IntervalUnit, value: u32) -> ScheduleSpec {
    ScheduleSpec {
        method: ScheduleMethod::Interval { unit, value },
        timezone: "UTC".to_string(),
    }
}

const SOURCE: &str = "def main(input):\n    return input\n";

async fn make_due(fixture: &Fixture, id: mb_common::id::Id, at: DateTime<Utc>) {
    // push the fire instant into the past without going through the advance rules
    sqlx::query("UPDATE function_schedules SET next_run_at = ?1 WHERE id = ?2")
        .bind(at)
        .bind(id)
        .execute(fixture.scheduler.store().db_writer())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_tick_dispatches_due_schedule_and_advances() {
    let fixture = fixture(10).await;
    fixture
        .registry
        .put_version("job", SOURCE, "", mb_common::id::id())
        .await
        .unwrap();

    let schedule = fixture
        .scheduler
        .store()
        .create("hourly", "job", interval_spec(IntervalUnit::Hours, 1), json!({"k": 1}))
        .await
        .unwrap();
    let fire_at = UniqueUtc::now_millis() - ChronoDuration::minutes(5);
    make_due(&fixture, schedule.id(), fire_at).await;

    let fired = fixture.scheduler.tick().await.unwrap();
    assert_eq!(fired, 1);

    let schedule = fixture.scheduler.store().get(schedule.id()).await.unwrap();
    assert_eq!(schedule.last_run_at(), Some(fire_at));
    assert!(schedule.last_call_id().is_some());
    assert!(schedule.is_active());
    // the new fire instant is strictly in the future
    assert!(schedule.next_run_at().unwrap() > UniqueUtc::now_millis());

    // the dispatched call exists and was triggered by the scheduler
    let call = fixture
        .calls
        .get(schedule.last_call_id().unwrap())
        .await
        .unwrap();
    assert_eq!(call.trigger_type(), mb_objects::types::call::TriggerType::Schedule);
    assert_eq!(call.caller_id(), Some(mb_common::id::system_id()));
}

#[tokio::test]
async fn test_tick_is_capped_and_ordered() {
    let fixture = fixture(2).await;
    fixture
        .registry
        .put_version("job", SOURCE, "", mb_common::id::id())
        .await
        .unwrap();

    let now = UniqueUtc::now_millis();
    let mut ids = Vec::new();
    for i in 0..3 {
        let schedule = fixture
            .scheduler
            .store()
            .create(
                &format!("s{i}"),
                "job",
                interval_spec(IntervalUnit::Hours, 1),
                json!(null),
            )
            .await
            .unwrap();
        // s0 is the most overdue, s2 the least
        make_due(&fixture, schedule.id(), now - ChronoDuration::minutes(30 - i * 10)).await;
        ids.push(schedule.id());
    }

    let fired = fixture.scheduler.tick().await.unwrap();
    assert_eq!(fired, 2);

    // the two most overdue schedules fired, the third did not
    assert!(fixture.scheduler.store().get(ids[0]).await.unwrap().last_run_at().is_some());
    assert!(fixture.scheduler.store().get(ids[1]).await.unwrap().last_run_at().is_some());
    assert!(fixture.scheduler.store().get(ids[2]).await.unwrap().last_run_at().is_none());
}

#[tokio::test]
async fn test_once_schedule_deactivates_after_firing() {
    let fixture = fixture(10).await;
    fixture
        .registry
        .put_version("job", SOURCE, "", mb_common::id::id())
        .await
        .unwrap();

    let spec = ScheduleSpec {
        method: ScheduleMethod::Once {
            date: "2026-01-01".to_string(),
            time: "09:00:00".to_string(),
        },
        timezone: "UTC".to_string(),
    };
    let schedule = fixture
        .scheduler
        .store()
        .create("one-shot", "job", spec, json!(null))
        .await
        .unwrap();
    make_due(&fixture, schedule.id(), UniqueUtc::now_millis() - ChronoDuration::minutes(1)).await;

    fixture.scheduler.tick().await.unwrap();

    let schedule = fixture.scheduler.store().get(schedule.id()).await.unwrap();
    assert!(!schedule.is_active());
    assert_eq!(schedule.next_run_at(), None);
    assert!(schedule.last_call_id().is_some());
}

#[tokio::test]
async fn test_dispatch_failure_records_failed_call_and_tick_continues() {
    let fixture = fixture(10).await;
    // "ghost" is never registered: dispatch fails, the fire is still recorded
    let schedule = fixture
        .scheduler
        .store()
        .create("broken", "ghost", interval_spec(IntervalUnit::Hours, 1), json!(null))
        .await
        .unwrap();
    make_due(&fixture, schedule.id(), UniqueUtc::now_millis() - ChronoDuration::minutes(1)).await;

    let fired = fixture.scheduler.tick().await.unwrap();
    assert_eq!(fired, 1);

    let schedule = fixture.scheduler.store().get(schedule.id()).await.unwrap();
    let call = fixture
        .calls
        .get(schedule.last_call_id().unwrap())
        .await
        .unwrap();
    assert_eq!(call.status(), CallStatus::Failed);
    assert_eq!(
        call.error_type().as_deref(),
        Some(error_types::DISPATCH_FAILED)
    );

    // the schedule advanced normally
    assert!(schedule.is_active());
    assert!(schedule.next_run_at().is_some());
}

#[tokio::test]
async fn test_restart_hardening_skips_already_fired_instant() {
    let fixture = fixture(10).await;
    fixture
        .registry
        .put_version("job", SOURCE, "", mb_common::id::id())
        .await
        .unwrap();

    let schedule = fixture
        .scheduler
        .store()
        .create("hourly", "job", interval_spec(IntervalUnit::Hours, 1), json!(null))
        .await
        .unwrap();
    let fire_at = UniqueUtc::now_millis() - ChronoDuration::minutes(1);
    make_due(&fixture, schedule.id(), fire_at).await;
    // simulate a crash after dispatch but before the advance was persisted
    sqlx::query("UPDATE function_schedules SET last_run_at = ?1 WHERE id = ?2")
        .bind(fire_at)
        .bind(schedule.id())
        .execute(fixture.scheduler.store().db_writer())
        .await
        .unwrap();

    fixture.scheduler.tick().await.unwrap();

    // no call was dispatched for the already-fired instant
    let (_, total) = fixture.calls.list(&CallFilter::default(), 10, 0).await.unwrap();
    assert_eq!(total, 0);

    // but the schedule advanced past it
    let schedule = fixture.scheduler.store().get(schedule.id()).await.unwrap();
    assert!(schedule.next_run_at().unwrap() > UniqueUtc::now_millis());
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let fixture = fixture(10).await;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    let handle = tokio::spawn(async move {
        trigger.cancelled().await;
    });

    shutdown.cancel();
    fixture.scheduler.run(shutdown).await;
    handle.await.unwrap();
}
