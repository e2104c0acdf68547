//
// Copyright 2025 Tabs Data Inc.
//

//! The scheduler loop: a single coordinator task waking on a fixed interval.
//! Each tick selects due schedules in fire order, dispatches them through the
//! execution engine and persists the advanced fire instant. Dispatch happens
//! before the persist, so a crash in between double-fires at most once on
//! recovery; a restart-hardening predicate skips schedules whose recorded last
//! fire already matches the due instant.

use crate::spec::advance;
use crate::store::ScheduleStore;
use async_trait::async_trait;
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_error::MbError;
use mb_execution::engine::{Caller, ExecutionEngine};
use mb_objects::types::call::{CallStatus, FunctionCall, TriggerType, error_types};
use mb_objects::types::schedule::FunctionSchedule;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Source of the per-tick admission cap, read from runtime settings each tick.
#[async_trait]
pub trait SchedulerLimitsSource: Send + Sync {
    async fn max_schedules_per_tick(&self) -> Result<u64, MbError>;
}

/// Fixed cap, for tests and bootstrap.
pub struct StaticSchedulerLimits(pub u64);

#[async_trait]
impl SchedulerLimitsSource for StaticSchedulerLimits {
    async fn max_schedules_per_tick(&self) -> Result<u64, MbError> {
        Ok(self.0)
    }
}

/// The scheduler. One instance per process; single-writer over schedule rows.
pub struct Scheduler {
    store: ScheduleStore,
    engine: ExecutionEngine,
    limits: Arc<dyn SchedulerLimitsSource>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: ScheduleStore,
        engine: ExecutionEngine,
        limits: Arc<dyn SchedulerLimitsSource>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            limits,
            tick_interval,
        }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    /// Runs ticks until shutdown is requested, then drains the current tick and
    /// returns.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Scheduler started, tick interval {:?}",
            self.tick_interval
        );
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        error!("Scheduler tick failed: {}", err);
                    }
                }
            }
        }
    }

    /// One tick: select due schedules and fire them in `next_run_at` order.
    /// Per-schedule errors are recorded and do not abort the tick.
    pub async fn tick(&self) -> Result<usize, MbError> {
        let now = UniqueUtc::now_millis();
        let cap = self.limits.max_schedules_per_tick().await?;
        let due = self.store.due(now, cap).await?;
        let fired = due.len();

        for schedule in due {
            // the scheduled time, not now
            let Some(fire_at) = schedule.next_run_at() else {
                continue;
            };

            // restart hardening: this instant was already dispatched by a prior
            // process that crashed before persisting the advance
            let call_id = if schedule.last_run_at() == Some(fire_at) {
                debug!(
                    "Schedule '{}' already fired at {}, advancing only",
                    schedule.name(),
                    fire_at
                );
                None
            } else {
                Some(self.dispatch(&schedule).await)
            };

            let next_run_at = match advance(schedule.spec(), fire_at, now) {
                Ok(next) => next,
                Err(err) => {
                    // a schedule that cannot advance would fire forever
                    error!(
                        "Schedule '{}' cannot compute its next fire instant, deactivating: {}",
                        schedule.name(),
                        err
                    );
                    self.store.deactivate(schedule.id()).await?;
                    continue;
                }
            };

            self.store
                .record_fire(schedule.id(), fire_at, call_id, next_run_at)
                .await?;
        }
        Ok(fired)
    }

    /// Dispatches one fire through the engine. Every failure still produces a
    /// FAILED call row so the fire is visible in the call history.
    async fn dispatch(&self, schedule: &FunctionSchedule) -> Id {
        let result = self
            .engine
            .invoke_async(
                schedule.function_name(),
                schedule.input().0.clone(),
                Caller::System,
                TriggerType::Schedule,
            )
            .await;
        match result {
            Ok(call) => {
                debug!(
                    "Schedule '{}' dispatched call {}",
                    schedule.name(),
                    call.id()
                );
                call.id()
            }
            Err(err) => {
                warn!(
                    "Schedule '{}' failed to dispatch: {}",
                    schedule.name(),
                    err
                );
                self.record_dispatch_failure(schedule, &err).await
            }
        }
    }

    async fn record_dispatch_failure(&self, schedule: &FunctionSchedule, err: &MbError) -> Id {
        let call = FunctionCall::pending(
            id::id(),
            schedule.function_name().clone(),
            None,
            TriggerType::Schedule,
            Some(id::system_id()),
            schedule.input().0.clone(),
            UniqueUtc::now_millis(),
        );
        let call_id = call.id();
        let recorded: Result<(), MbError> = async {
            self.engine.calls().insert(&call).await?;
            self.engine
                .calls()
                .finish(
                    call_id,
                    CallStatus::Failed,
                    None,
                    Some(error_types::DISPATCH_FAILED),
                    Some(&err.to_string()),
                )
                .await?;
            Ok(())
        }
        .await;
        if let Err(record_err) = recorded {
            error!(
                "Cannot record dispatch failure of schedule '{}': {}",
                schedule.name(),
                record_err
            );
        }
        call_id
    }
}

#[cfg(test)]
mod tests;
