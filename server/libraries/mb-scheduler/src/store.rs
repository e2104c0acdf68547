//
// Copyright 2025 Tabs Data Inc.
//

//! Persistence of schedule entities. The scheduler owns these rows; API access
//! goes through the same store.

use crate::spec::{initial_next_run, validate_spec};
use chrono::{DateTime, Utc};
use mb_common::id::{self, Id};
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::schedule::{FunctionSchedule, ScheduleSpec};
use serde_json::Value;

#[mb_error]
pub enum ScheduleError {
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(Id) = 1000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// A partial update of a schedule.
#[derive(Debug, Default, Clone)]
pub struct SchedulePatch {
    pub name: Option<String>,
    pub spec: Option<ScheduleSpec>,
    pub input: Option<Value>,
    pub is_active: Option<bool>,
}

/// Schedule row DAO over the system database.
#[derive(Clone)]
pub struct ScheduleStore {
    db: DbPool,
}

impl ScheduleStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    #[cfg(test)]
    pub(crate) fn db_writer(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.db.writer()
    }

    pub async fn create(
        &self,
        name: &str,
        function_name: &str,
        spec: ScheduleSpec,
        input: Value,
    ) -> Result<FunctionSchedule, MbError> {
        validate_spec(&spec)?;
        let now = UniqueUtc::now_millis();
        let next_run_at = initial_next_run(&spec, now)?;
        let schedule = FunctionSchedule::new(
            id::id(),
            name.to_string(),
            function_name.to_string(),
            spec,
            input,
            next_run_at,
            now,
        );
        sqlx::query(
            r#"
            INSERT INTO function_schedules
                (id, name, function_name, spec, input, is_active, next_run_at, last_run_at,
                 last_call_id, timezone, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(schedule.id())
        .bind(schedule.name())
        .bind(schedule.function_name())
        .bind(schedule.spec())
        .bind(schedule.input())
        .bind(schedule.is_active())
        .bind(schedule.next_run_at())
        .bind(schedule.last_run_at())
        .bind(schedule.last_call_id())
        .bind(schedule.timezone())
        .bind(schedule.created_at())
        .bind(schedule.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(ScheduleError::Sql)?;
        Ok(schedule)
    }

    pub async fn get(&self, id: Id) -> Result<FunctionSchedule, MbError> {
        let schedule: Option<FunctionSchedule> =
            sqlx::query_as("SELECT * FROM function_schedules WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.reader())
                .await
                .map_err(ScheduleError::Sql)?;
        Ok(schedule.ok_or(ScheduleError::ScheduleNotFound(id))?)
    }

    pub async fn list(&self) -> Result<Vec<FunctionSchedule>, MbError> {
        let schedules = sqlx::query_as("SELECT * FROM function_schedules ORDER BY name")
            .fetch_all(self.db.reader())
            .await
            .map_err(ScheduleError::Sql)?;
        Ok(schedules)
    }

    /// Applies a patch. A changed spec, or a reactivation, recomputes the next
    /// fire instant.
    pub async fn update(&self, id: Id, patch: SchedulePatch) -> Result<FunctionSchedule, MbError> {
        let schedule = self.get(id).await?;
        let now = UniqueUtc::now_millis();

        let name = patch.name.unwrap_or_else(|| schedule.name().clone());
        let spec_changed = patch.spec.is_some();
        let spec = patch.spec.unwrap_or_else(|| schedule.spec().clone());
        validate_spec(&spec)?;
        let input = patch
            .input
            .unwrap_or_else(|| schedule.input().0.clone());
        let is_active = patch.is_active.unwrap_or(schedule.is_active());

        let reactivated = is_active && !schedule.is_active();
        let next_run_at = if spec_changed || reactivated {
            initial_next_run(&spec, now)?
        } else {
            schedule.next_run_at()
        };

        sqlx::query(
            r#"
            UPDATE function_schedules
            SET name = ?1, spec = ?2, input = ?3, is_active = ?4, next_run_at = ?5,
                timezone = ?6, updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(&name)
        .bind(&spec)
        .bind(mb_objects::types::call::JsonPayload(input))
        .bind(is_active)
        .bind(next_run_at)
        .bind(&spec.timezone)
        .bind(now)
        .bind(id)
        .execute(self.db.writer())
        .await
        .map_err(ScheduleError::Sql)?;
        self.get(id).await
    }

    pub async fn delete(&self, id: Id) -> Result<(), MbError> {
        let deleted = sqlx::query("DELETE FROM function_schedules WHERE id = ?1")
            .bind(id)
            .execute(self.db.writer())
            .await
            .map_err(ScheduleError::Sql)?;
        if deleted.rows_affected() == 0 {
            Err(ScheduleError::ScheduleNotFound(id))?;
        }
        Ok(())
    }

    /// Active schedules due at `now`, ordered by their fire instant, capped.
    pub async fn due(
        &self,
        now: DateTime<Utc>,
        cap: u64,
    ) -> Result<Vec<FunctionSchedule>, MbError> {
        let schedules = sqlx::query_as(
            r#"
            SELECT * FROM function_schedules
            WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
            ORDER BY next_run_at ASC
            LIMIT ?2
            "#,
        )
        .bind(now)
        .bind(cap as i64)
        .fetch_all(self.db.reader())
        .await
        .map_err(ScheduleError::Sql)?;
        Ok(schedules)
    }

    /// Persists the outcome of one fire: the dispatched call, the fire instant
    /// and the advanced next instant (null deactivates).
    pub async fn record_fire(
        &self,
        id: Id,
        fire_at: DateTime<Utc>,
        call_id: Option<Id>,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<(), MbError> {
        sqlx::query(
            r#"
            UPDATE function_schedules
            SET last_run_at = ?1,
                last_call_id = COALESCE(?2, last_call_id),
                next_run_at = ?3,
                is_active = ?4,
                updated_at = ?5
            WHERE id = ?6
            "#,
        )
        .bind(fire_at)
        .bind(call_id)
        .bind(next_run_at)
        .bind(next_run_at.is_some())
        .bind(UniqueUtc::now_millis())
        .bind(id)
        .execute(self.db.writer())
        .await
        .map_err(ScheduleError::Sql)?;
        Ok(())
    }

    /// Deactivates a schedule whose next fire instant cannot be computed.
    pub async fn deactivate(&self, id: Id) -> Result<(), MbError> {
        sqlx::query(
            "UPDATE function_schedules SET is_active = 0, next_run_at = NULL, updated_at = ?1 WHERE id = ?2",
        )
        .bind(UniqueUtc::now_millis())
        .bind(id)
        .execute(self.db.writer())
        .await
        .map_err(ScheduleError::Sql)?;
        Ok(())
    }
}
