//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::CopyGetters;
use mb_common::id::Id;
use serde::{Deserialize, Serialize};

/// A login session. Access tokens carry the session id; refresh tokens also carry
/// the rotation id. Revoking the session invalidates both immediately.
#[derive(Debug, Clone, Serialize, Deserialize, CopyGetters, sqlx::FromRow)]
#[getset(get_copy = "pub")]
pub struct Session {
    id: Id,
    user_id: Id,
    refresh_id: Id,
    access_expires_at: DateTime<Utc>,
    refresh_expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: Id,
        user_id: Id,
        refresh_id: Id,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id,
            refresh_id,
            access_expires_at,
            refresh_expires_at,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}
