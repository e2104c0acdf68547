//
// Copyright 2025 Tabs Data Inc.
//

//! Schedule spec evaluation: validation and next-fire computation for the three
//! schedule methods.
//!
//! Cron and once are evaluated in the schedule's timezone through a 5-field cron
//! matcher stepping local minutes. Daylight-saving rules: a local time that does
//! not exist resolves to the first valid instant after the gap; a doubled local
//! time fires on its first instance. Interval schedules are timezone-agnostic.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use mb_error::mb_error;
use mb_objects::types::schedule::{IntervalUnit, ScheduleMethod, ScheduleSpec};

/// Bound on local minutes scanned for a cron match, two years' worth.
const MAX_CRON_SCAN_MINUTES: i64 = 2 * 366 * 24 * 60;

#[mb_error]
pub enum SpecError {
    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String) = 0,
    #[error("Interval value must be at least 1")]
    ZeroInterval = 1,
    #[error("Invalid cron expression '{0}': {1}")]
    InvalidCron(String, String) = 2,
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String) = 3,
    #[error("Invalid time '{0}', expected HH:MM:SS")]
    InvalidTime(String) = 4,
    #[error("No computable next fire instant")]
    NoNextInstant = 7000,
}

/// Parses and checks a spec. Called at schedule create/update time.
pub fn validate_spec(spec: &ScheduleSpec) -> Result<(), SpecError> {
    parse_tz(&spec.timezone)?;
    match &spec.method {
        ScheduleMethod::Once { date, time } => {
            parse_date(date)?;
            parse_time(time)?;
            Ok(())
        }
        ScheduleMethod::Interval { value, .. } => {
            if *value == 0 {
                return Err(SpecError::ZeroInterval);
            }
            Ok(())
        }
        ScheduleMethod::Cron { cron, .. } => validate_cron(cron),
    }
}

/// The first fire instant of a freshly created or reactivated schedule.
pub fn initial_next_run(
    spec: &ScheduleSpec,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SpecError> {
    let tz = parse_tz(&spec.timezone)?;
    match &spec.method {
        ScheduleMethod::Once { date, time } => {
            let local = NaiveDateTime::new(parse_date(date)?, parse_time(time)?);
            Ok(Some(resolve_local(&tz, local).ok_or(SpecError::NoNextInstant)?))
        }
        ScheduleMethod::Interval { unit, value } => {
            Ok(Some(now + interval_step(*unit, *value)))
        }
        ScheduleMethod::Cron { cron, .. } => {
            Ok(Some(cron_next(cron, now, tz).ok_or(SpecError::NoNextInstant)?))
        }
    }
}

/// The fire instant following `fire_at`, strictly in the future of `now`.
/// `None` deactivates the schedule (a once spec after firing).
pub fn advance(
    spec: &ScheduleSpec,
    fire_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, SpecError> {
    let tz = parse_tz(&spec.timezone)?;
    match &spec.method {
        ScheduleMethod::Once { .. } => Ok(None),
        ScheduleMethod::Interval { unit, value } => {
            let step = interval_step(*unit, *value);
            let mut next = fire_at + step;
            // skip fires missed during an outage
            while next <= now {
                next += step;
            }
            Ok(Some(next))
        }
        ScheduleMethod::Cron { cron, .. } => {
            let after = now.max(fire_at);
            Ok(Some(cron_next(cron, after, tz).ok_or(SpecError::NoNextInstant)?))
        }
    }
}

fn interval_step(unit: IntervalUnit, value: u32) -> Duration {
    Duration::seconds(unit.seconds() * value as i64)
}

fn parse_tz(timezone: &str) -> Result<Tz, SpecError> {
    timezone
        .parse::<Tz>()
        .map_err(|_| SpecError::UnknownTimezone(timezone.to_string()))
}

fn parse_date(date: &str) -> Result<NaiveDate, SpecError> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| SpecError::InvalidDate(date.to_string()))
}

fn parse_time(time: &str) -> Result<NaiveTime, SpecError> {
    NaiveTime::parse_from_str(time, "%H:%M:%S").map_err(|_| SpecError::InvalidTime(time.to_string()))
}

/// Resolves a local naive datetime in a timezone: a nonexistent local time (DST
/// gap) advances minute-wise to the first valid instant; a doubled local time
/// takes its first instance.
fn resolve_local(tz: &Tz, mut local: NaiveDateTime) -> Option<DateTime<Utc>> {
    for _ in 0..180 {
        match tz.from_local_datetime(&local) {
            chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
            chrono::LocalResult::Ambiguous(first, _) => return Some(first.with_timezone(&Utc)),
            chrono::LocalResult::None => local += Duration::minutes(1),
        }
    }
    None
}

// --------------------------------------------------------- 5-field cron matcher

/// Validates a 5-field cron expression (minute, hour, day-of-month, month,
/// day-of-week; Sunday is 0).
pub fn validate_cron(cron: &str) -> Result<(), SpecError> {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(SpecError::InvalidCron(
            cron.to_string(),
            format!("expected 5 fields, found {}", fields.len()),
        ));
    }
    let ranges = [(0u32, 59u32), (0, 23), (1, 31), (1, 12), (0, 7)];
    let names = ["minute", "hour", "day-of-month", "month", "day-of-week"];
    for (i, field) in fields.iter().enumerate() {
        validate_cron_field(field, names[i], ranges[i].0, ranges[i].1)
            .map_err(|msg| SpecError::InvalidCron(cron.to_string(), msg))?;
    }
    Ok(())
}

fn validate_cron_field(field: &str, name: &str, min: u32, max: u32) -> Result<(), String> {
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("{name}: invalid step '{step}'"))?;
                if step == 0 {
                    return Err(format!("{name}: step must be at least 1"));
                }
                (range, Some(step))
            }
            None => (part, None),
        };
        match range {
            "*" => {}
            _ => match range.split_once('-') {
                Some((lo, hi)) => {
                    let lo: u32 = lo.parse().map_err(|_| format!("{name}: invalid '{lo}'"))?;
                    let hi: u32 = hi.parse().map_err(|_| format!("{name}: invalid '{hi}'"))?;
                    if lo > hi || lo < min || hi > max {
                        return Err(format!("{name}: range {lo}-{hi} out of {min}-{max}"));
                    }
                }
                None => {
                    let value: u32 = range
                        .parse()
                        .map_err(|_| format!("{name}: invalid '{range}'"))?;
                    if value < min || value > max {
                        return Err(format!("{name}: {value} out of {min}-{max}"));
                    }
                    if step.is_some() {
                        return Err(format!("{name}: step needs a range or '*'"));
                    }
                }
            },
        }
    }
    Ok(())
}

fn cron_field_matches(field: &str, value: u32) -> bool {
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => match step.parse::<u32>() {
                Ok(step) if step > 0 => (range, step),
                _ => continue,
            },
            None => (part, 1),
        };
        let (lo, hi) = match range {
            "*" => (u32::MIN, u32::MAX),
            _ => match range.split_once('-') {
                Some((lo, hi)) => match (lo.parse(), hi.parse()) {
                    (Ok(lo), Ok(hi)) => (lo, hi),
                    _ => continue,
                },
                None => match range.parse::<u32>() {
                    Ok(v) => (v, v),
                    Err(_) => continue,
                },
            },
        };
        let base = if range == "*" { 0 } else { lo };
        if value >= lo && value <= hi && (value - base) % step == 0 {
            return true;
        }
    }
    false
}

/// Checks a local naive datetime against a 5-field cron expression.
fn cron_matches_local(cron: &str, local: &NaiveDateTime) -> bool {
    let fields: Vec<&str> = cron.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    let dow = local.weekday().num_days_from_sunday();
    cron_field_matches(fields[0], local.minute())
        && cron_field_matches(fields[1], local.hour())
        && cron_field_matches(fields[2], local.day())
        && cron_field_matches(fields[3], local.month())
        && (cron_field_matches(fields[4], dow) || (dow == 0 && cron_field_matches(fields[4], 7)))
}

/// The smallest instant strictly after `after` whose local representation in
/// `tz` matches the cron expression, honoring the DST rules above.
pub fn cron_next(cron: &str, after: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let mut candidate = truncate_minute(local_after) + Duration::minutes(1);
    for _ in 0..MAX_CRON_SCAN_MINUTES {
        if cron_matches_local(cron, &candidate) {
            if let Some(instant) = resolve_local(&tz, candidate) {
                // DST gap resolution may land before `after`; keep scanning then
                if instant > after {
                    return Some(instant);
                }
            }
        }
        candidate += Duration::minutes(1);
    }
    None
}

fn truncate_minute(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_second(0).unwrap().with_nanosecond(0).unwrap()
}
