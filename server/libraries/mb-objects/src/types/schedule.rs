//
// Copyright 2025 Tabs Data Inc.
//

use crate::types::call::JsonPayload;
use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Units of interval schedules.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl IntervalUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            IntervalUnit::Seconds => 1,
            IntervalUnit::Minutes => 60,
            IntervalUnit::Hours => 3600,
            IntervalUnit::Days => 86400,
        }
    }
}

/// How and when a schedule fires, tagged by `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum ScheduleMethod {
    /// Fire once at a local date and time, then deactivate.
    Once { date: String, time: String },
    /// Fire every `value` units, timezone-agnostic.
    Interval { unit: IntervalUnit, value: u32 },
    /// Fire per a 5-field cron expression in the schedule's timezone.
    Cron {
        cron: String,
        #[serde(default)]
        description: String,
    },
}

/// The `schedule` JSON on a schedule row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSpec {
    #[serde(flatten)]
    pub method: ScheduleMethod,
    pub timezone: String,
}

sqlx_json_codec!(ScheduleSpec);

/// A schedule driving periodic invocations of a function.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct FunctionSchedule {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    function_name: String,
    #[getset(get = "pub")]
    spec: ScheduleSpec,
    #[getset(get = "pub")]
    input: JsonPayload,
    #[getset(get_copy = "pub")]
    is_active: bool,
    #[getset(get_copy = "pub")]
    next_run_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    last_run_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    last_call_id: Option<Id>,
    #[getset(get = "pub")]
    timezone: String,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl FunctionSchedule {
    pub fn new(
        id: Id,
        name: String,
        function_name: String,
        spec: ScheduleSpec,
        input: serde_json::Value,
        next_run_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        let timezone = spec.timezone.clone();
        Self {
            id,
            name,
            function_name,
            spec,
            input: JsonPayload(input),
            is_active: true,
            next_run_at,
            last_run_at: None,
            last_call_id: None,
            timezone,
            created_at: now,
            updated_at: now,
        }
    }
}
