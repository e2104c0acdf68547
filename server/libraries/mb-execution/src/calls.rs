//
// Copyright 2025 Tabs Data Inc.
//

//! Persistence of function calls. The engine owns call lifecycles from PENDING
//! to a terminal state; terminal states never change.

use mb_common::id::Id;
use mb_common::time::UniqueUtc;
use mb_database::sql::DbPool;
use mb_error::{MbError, mb_error};
use mb_objects::types::call::{CallStatus, FunctionCall, TriggerType, error_types};
use tracing::warn;

#[mb_error]
pub enum CallError {
    #[error("Function call not found: {0}")]
    CallNotFound(Id) = 1000,
    #[error("Sql error: {0}")]
    Sql(#[from] sqlx::Error) = 7000,
}

/// Filters of the admin call listing.
#[derive(Debug, Default, Clone)]
pub struct CallFilter {
    pub function_name: Option<String>,
    pub status: Option<CallStatus>,
    pub trigger_type: Option<TriggerType>,
}

/// Call row DAO over the system database.
#[derive(Clone)]
pub struct CallStore {
    db: DbPool,
}

impl CallStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, call: &FunctionCall) -> Result<(), MbError> {
        sqlx::query(
            r#"
            INSERT INTO function_calls
                (id, function_name, version_id, trigger_type, caller_id, status, started_at,
                 ended_at, duration_ms, input, output, error_type, error_message, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            "#,
        )
        .bind(call.id())
        .bind(call.function_name())
        .bind(call.version_id())
        .bind(call.trigger_type())
        .bind(call.caller_id())
        .bind(call.status())
        .bind(call.started_at())
        .bind(call.ended_at())
        .bind(call.duration_ms())
        .bind(call.input())
        .bind(call.output())
        .bind(call.error_type())
        .bind(call.error_message())
        .bind(call.created_at())
        .bind(call.updated_at())
        .execute(self.db.writer())
        .await
        .map_err(CallError::Sql)?;
        Ok(())
    }

    pub async fn get(&self, id: Id) -> Result<FunctionCall, MbError> {
        let call: Option<FunctionCall> =
            sqlx::query_as("SELECT * FROM function_calls WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.reader())
                .await
                .map_err(CallError::Sql)?;
        Ok(call.ok_or(CallError::CallNotFound(id))?)
    }

    /// Transitions a pending call to running.
    pub async fn mark_running(&self, id: Id) -> Result<FunctionCall, MbError> {
        let now = UniqueUtc::now_millis();
        sqlx::query(
            r#"
            UPDATE function_calls SET status = ?1, started_at = ?2, updated_at = ?2
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(CallStatus::Running)
        .bind(now)
        .bind(id)
        .bind(CallStatus::Pending)
        .execute(self.db.writer())
        .await
        .map_err(CallError::Sql)?;
        self.get(id).await
    }

    /// Finishes a call into a terminal state. Calls already terminal are left
    /// untouched, which makes concurrent cancellation races harmless.
    pub async fn finish(
        &self,
        id: Id,
        status: CallStatus,
        output: Option<serde_json::Value>,
        error_type: Option<&str>,
        error_message: Option<&str>,
    ) -> Result<FunctionCall, MbError> {
        let now = UniqueUtc::now_millis();
        let updated = sqlx::query(
            r#"
            UPDATE function_calls
            SET status = ?1,
                output = ?2,
                error_type = ?3,
                error_message = ?4,
                ended_at = ?5,
                duration_ms = CASE WHEN started_at IS NOT NULL
                    THEN CAST((julianday(?5) - julianday(started_at)) * 86400000 AS INTEGER)
                    ELSE NULL END,
                updated_at = ?5
            WHERE id = ?6 AND status IN (?7, ?8)
            "#,
        )
        .bind(status)
        .bind(output.map(mb_objects::types::call::JsonPayload))
        .bind(error_type)
        .bind(error_message)
        .bind(now)
        .bind(id)
        .bind(CallStatus::Pending)
        .bind(CallStatus::Running)
        .execute(self.db.writer())
        .await
        .map_err(CallError::Sql)?;
        if updated.rows_affected() == 0 {
            warn!("Call {} was already terminal, keeping its state", id);
        }
        self.get(id).await
    }

    /// Lists calls, newest first, with the admin filters.
    pub async fn list(
        &self,
        filter: &CallFilter,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<FunctionCall>, u64), MbError> {
        // absent filters match everything; parameters are always referenced
        let where_clause = "(?1 IS NULL OR function_name = ?1) \
             AND (?2 IS NULL OR status = ?2) \
             AND (?3 IS NULL OR trigger_type = ?3)";

        let count_sql = format!("SELECT COUNT(*) FROM function_calls WHERE {where_clause}");
        let list_sql = format!(
            "SELECT * FROM function_calls WHERE {where_clause} ORDER BY id DESC LIMIT ?4 OFFSET ?5",
        );

        let (total,): (i64,) = sqlx::query_as(&count_sql)
            .bind(filter.function_name.clone())
            .bind(filter.status)
            .bind(filter.trigger_type)
            .fetch_one(self.db.reader())
            .await
            .map_err(CallError::Sql)?;
        let calls = sqlx::query_as(&list_sql)
            .bind(filter.function_name.clone())
            .bind(filter.status)
            .bind(filter.trigger_type)
            .bind(limit as i64)
            .bind(offset as i64)
            .fetch_all(self.db.reader())
            .await
            .map_err(CallError::Sql)?;
        Ok((calls, total as u64))
    }

    /// Recovery sweep on process start: calls left over from a prior process can
    /// never finish and are failed in one statement.
    pub async fn recover_abandoned(&self) -> Result<u64, MbError> {
        let now = UniqueUtc::now_millis();
        let updated = sqlx::query(
            r#"
            UPDATE function_calls
            SET status = ?1, error_type = ?2, error_message = ?3, ended_at = ?4, updated_at = ?4
            WHERE status IN (?5, ?6)
            "#,
        )
        .bind(CallStatus::Failed)
        .bind(error_types::ABANDONED)
        .bind("call was abandoned by a previous server process")
        .bind(now)
        .bind(CallStatus::Pending)
        .bind(CallStatus::Running)
        .execute(self.db.writer())
        .await
        .map_err(CallError::Sql)?;
        if updated.rows_affected() > 0 {
            warn!("Recovered {} abandoned calls", updated.rows_affected());
        }
        Ok(updated.rows_affected())
    }
}
