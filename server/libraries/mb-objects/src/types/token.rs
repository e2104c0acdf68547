//
// Copyright 2025 Tabs Data Inc.
//

use chrono::{DateTime, Utc};
use getset::{CopyGetters, Getters};
use mb_common::id::Id;
use serde::{Deserialize, Serialize};

/// An application token. The plaintext secret is returned exactly once at creation;
/// only the digest is stored. A revoked token is never re-activated.
#[derive(Debug, Clone, Serialize, Deserialize, Getters, CopyGetters, sqlx::FromRow)]
pub struct ApplicationToken {
    #[getset(get_copy = "pub")]
    id: Id,
    #[getset(get = "pub")]
    name: String,
    #[getset(get = "pub")]
    #[serde(skip_serializing)]
    hash: String,
    #[getset(get_copy = "pub")]
    is_active: bool,
    #[getset(get_copy = "pub")]
    expires_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    last_used_at: Option<DateTime<Utc>>,
    #[getset(get_copy = "pub")]
    created_at: DateTime<Utc>,
    #[getset(get_copy = "pub")]
    updated_at: DateTime<Utc>,
}

impl ApplicationToken {
    pub fn new(
        id: Id,
        name: String,
        hash: String,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            hash,
            is_active: true,
            expires_at,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A token is usable when active and not past its expiration.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|at| at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mb_common::id;
    use mb_common::time::UniqueUtc;

    #[test]
    fn test_usability() {
        let now = UniqueUtc::now_millis();
        let token = ApplicationToken::new(id::id(), "ci".to_string(), "h".to_string(), None, now);
        assert!(token.is_usable(now));

        let expired = ApplicationToken::new(
            id::id(),
            "old".to_string(),
            "h2".to_string(),
            Some(now - Duration::hours(1)),
            now,
        );
        assert!(!expired.is_usable(now));
    }
}
