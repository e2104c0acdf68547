//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};

/// A user account. Users are deactivated, never destroyed, while they own records.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct User {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    email: String,
    #[getset(get = "pub")]
    #[serde(skip_serializing)]
    password_hash: String,
    #[getset(get_copy = "pub")]
    is_admin: bool,
    #[getset(get_copy = "pub")]
    is_active: bool,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(id: Id, email: String, password_hash: String, is_admin: bool, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email,
            password_hash,
            is_admin,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}
