//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Lifecycle states of a function call. Terminal states are final.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CallStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, CallStatus::Pending | CallStatus::Running)
    }
}

sqlx_str_codec!(CallStatus);

/// What started an invocation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Api,
}

sqlx_str_codec!(TriggerType);

/// Error types recorded on failed calls, beyond those raised by user code.
pub mod error_types {
    pub const ABANDONED: &str = "abandoned";
    pub const CANCELLED: &str = "cancelled";
    pub const CRASHED: &str = "crashed";
    pub const DISPATCH_FAILED: &str = "dispatch_failed";
    pub const PROTOCOL_ERROR: &str = "protocol_error";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const TIMEOUT: &str = "timeout";
}

/// JSON payload stored as a TEXT column (call input/output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonPayload(pub serde_json::Value);

impl Default for JsonPayload {
    fn default() -> Self {
        Self(serde_json::Value::Null)
    }
}

sqlx_json_codec!(JsonPayload);

/// One invocation of a function, from pending to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct FunctionCall {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    function_name: String,
    #[getset(get_copy = "pub")]
    version_id: Option<Id>,
    #[getset(get_copy = "pub")]
    trigger_type: TriggerType,
    #[getset(get_copy = "pub")]
    caller_id: Option<Id>,
    #[getset(get_copy = "pub")]
    status: CallStatus,
    #[getset(get_copy = "pub")]
    started_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    ended_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    duration_ms: Option<i64>,
    #[getset(get = "pub")]
    input: JsonPayload,
    #[getset(get = "pub")]
    output: Option<JsonPayload>,
    #[getset(get = "pub")]
    error_type: Option<String>,
    #[getset(get = "pub")]
    error_message: Option<String>,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl FunctionCall {
    pub fn pending(
        id: Id,
        function_name: String,
        version_id: Option<Id>,
        trigger_type: TriggerType,
        caller_id: Option<Id>,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            function_name,
            version_id,
            trigger_type,
            caller_id,
            status: CallStatus::Pending,
            started_at: None,
            ended_at: None,
            duration_ms: None,
            input: JsonPayload(input),
            output: None,
            error_type: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!CallStatus::Pending.is_terminal());
        assert!(!CallStatus::Running.is_terminal());
        assert!(CallStatus::Succeeded.is_terminal());
        assert!(CallStatus::Failed.is_terminal());
        assert!(CallStatus::TimedOut.is_terminal());
        assert!(CallStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(CallStatus::TimedOut.to_string(), "timed_out");
        assert_eq!(
            "timed_out".parse::<CallStatus>().unwrap(),
            CallStatus::TimedOut
        );
        assert_eq!(TriggerType::Schedule.to_string(), "schedule");
    }
}
