//
// Copyright 2025 Tabs Data Inc.
//

//! Wall clock helpers for database timestamps.
//!
//! Entity rows, call transitions and schedule fires are all stamped with
//! millisecond-precision UTC times, and several places rely on consecutive
//! stamps being distinct (ordering call history, asserting that a terminal
//! state did not move). [`UniqueUtc::now_millis`] guarantees that: two calls
//! never observe the same millisecond.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// The last millisecond handed out. 0 means no stamp was issued yet.
static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Type holder for [`UniqueUtc::now_millis`].
pub struct UniqueUtc;

impl UniqueUtc {
    /// The current UTC time truncated to milliseconds, strictly greater than
    /// every value returned before.
    ///
    /// When the real clock has not moved past the last issued stamp (several
    /// calls within one millisecond, or a small backwards clock step), the
    /// stamp is bumped one millisecond ahead instead of sleeping. As soon as
    /// the real clock catches up, stamps track it again.
    pub fn now_millis() -> DateTime<Utc> {
        let millis = next_unique(&LAST_ISSUED_MILLIS, Utc::now().timestamp_millis());
        DateTime::<Utc>::from_timestamp_millis(millis)
            .expect("current time is representable as a chrono timestamp")
    }
}

/// Lock-free issue of the next stamp: the maximum of the real clock and one
/// past the last issued value.
fn next_unique(last_issued: &AtomicI64, real_now: i64) -> i64 {
    let mut last = last_issued.load(Ordering::Relaxed);
    loop {
        let candidate = real_now.max(last + 1);
        match last_issued.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(issued) => last = issued,
        }
    }
}
