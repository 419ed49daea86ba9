//! Next-run computation for `ScheduledTask::{schedule_type, schedule_value}`
//! (§4.7 step 5): `cron`, `interval` (seconds), and `once` (RFC3339 instant).
//!
//! No cron-parsing crate is vendored anywhere a `pynchy-*` crate depends on,
//! so standard five-field cron expressions are matched by hand below.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use pynchy_store::ScheduleType;

use crate::error::{Result, SchedulerError};

/// Compute the next UTC instant `schedule_value` should fire, strictly
/// after `from`. `tz` is the scheduler's resolved timezone, used to
/// interpret cron fields in local time before converting back to UTC.
pub fn compute_next_run(schedule_type: ScheduleType, schedule_value: &str, from: DateTime<Utc>, tz: Tz) -> Result<Option<DateTime<Utc>>> {
    match schedule_type {
        ScheduleType::Once => {
            let at = DateTime::parse_from_rfc3339(schedule_value)
                .map_err(|e| invalid(schedule_type, schedule_value, e.to_string()))?
                .with_timezone(&Utc);
            Ok((at > from).then_some(at))
        }
        ScheduleType::Interval => {
            let secs: i64 = schedule_value
                .trim()
                .parse()
                .map_err(|_| invalid(schedule_type, schedule_value, "not a positive integer number of seconds".into()))?;
            if secs <= 0 {
                return Err(invalid(schedule_type, schedule_value, "interval must be positive".into()));
            }
            Ok(Some(from + chrono::Duration::seconds(secs)))
        }
        ScheduleType::Cron => {
            let expr = CronExpr::parse(schedule_value).map_err(|e| invalid(schedule_type, schedule_value, e))?;
            Ok(expr.next_after(from, tz))
        }
    }
}

fn invalid(schedule_type: ScheduleType, value: &str, reason: String) -> SchedulerError {
    SchedulerError::InvalidSchedule { schedule_type: schedule_type.as_str().to_string(), value: value.to_string(), reason }
}

/// A parsed standard five-field cron expression: `minute hour day-of-month
/// month day-of-week`. Each field is a set of matching values; `*` matches
/// everything. Supports `*`, single values, comma lists, and `a-b` ranges.
/// Step syntax (`*/5`) is not supported.
struct CronExpr {
    minute: FieldSet,
    hour: FieldSet,
    day_of_month: FieldSet,
    month: FieldSet,
    day_of_week: FieldSet,
}

struct FieldSet {
    values: Option<Vec<u32>>,
}

impl FieldSet {
    fn any() -> Self {
        Self { values: None }
    }

    fn parse(field: &str, min: u32, max: u32) -> std::result::Result<Self, String> {
        if field == "*" {
            return Ok(Self::any());
        }
        let mut values = Vec::new();
        for part in field.split(',') {
            if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo.parse().map_err(|_| format!("bad range start {part:?}"))?;
                let hi: u32 = hi.parse().map_err(|_| format!("bad range end {part:?}"))?;
                if lo > hi || lo < min || hi > max {
                    return Err(format!("range {part:?} out of bounds [{min},{max}]"));
                }
                values.extend(lo..=hi);
            } else {
                let v: u32 = part.parse().map_err(|_| format!("bad field value {part:?}"))?;
                if v < min || v > max {
                    return Err(format!("value {v} out of bounds [{min},{max}]"));
                }
                values.push(v);
            }
        }
        values.sort_unstable();
        values.dedup();
        Ok(Self { values: Some(values) })
    }

    fn matches(&self, v: u32) -> bool {
        match &self.values {
            None => true,
            Some(values) => values.contains(&v),
        }
    }
}

impl CronExpr {
    fn parse(expr: &str) -> std::result::Result<Self, String> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!("expected 5 whitespace-separated fields, got {}", fields.len()));
        }
        Ok(Self {
            minute: FieldSet::parse(fields[0], 0, 59)?,
            hour: FieldSet::parse(fields[1], 0, 23)?,
            day_of_month: FieldSet::parse(fields[2], 1, 31)?,
            month: FieldSet::parse(fields[3], 1, 12)?,
            // 0 and 7 both mean Sunday.
            day_of_week: FieldSet::parse(fields[4], 0, 7)?,
        })
    }

    fn field_matches_dow(&self, weekday_sun0: u32) -> bool {
        match &self.day_of_week.values {
            None => true,
            Some(values) => values.contains(&weekday_sun0) || (weekday_sun0 == 0 && values.contains(&7)),
        }
    }

    /// Linear minute-by-minute scan, capped at two years out, which is
    /// generous for any realistic cron schedule and keeps this dependency-free
    /// implementation simple and obviously correct.
    fn next_after(&self, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        let local_from = from.with_timezone(&tz);
        let mut candidate = (local_from + chrono::Duration::minutes(1)).with_second(0)?.with_nanosecond(0)?;
        let limit = local_from + chrono::Duration::days(730);

        while candidate < limit {
            if self.month.matches(candidate.month())
                && self.day_of_month.matches(candidate.day())
                && self.field_matches_dow(candidate.weekday().num_days_from_sunday())
                && self.hour.matches(candidate.hour())
                && self.minute.matches(candidate.minute())
            {
                return Some(candidate.with_timezone(&Utc));
            }
            candidate += chrono::Duration::minutes(1);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, 0).single().unwrap()
    }

    #[test]
    fn interval_advances_by_seconds() {
        let from = utc(2026, 1, 1, 0, 0);
        let next = compute_next_run(ScheduleType::Interval, "3600", from, Tz::UTC).unwrap();
        assert_eq!(next, Some(utc(2026, 1, 1, 1, 0)));
    }

    #[test]
    fn once_fires_only_if_future() {
        let from = utc(2026, 1, 1, 0, 0);
        let future = compute_next_run(ScheduleType::Once, "2026-01-02T00:00:00Z", from, Tz::UTC).unwrap();
        assert_eq!(future, Some(utc(2026, 1, 2, 0, 0)));

        let past = compute_next_run(ScheduleType::Once, "2025-01-01T00:00:00Z", from, Tz::UTC).unwrap();
        assert_eq!(past, None);
    }

    #[test]
    fn cron_daily_at_nine() {
        let from = utc(2026, 1, 1, 10, 0);
        let next = compute_next_run(ScheduleType::Cron, "0 9 * * *", from, Tz::UTC).unwrap();
        assert_eq!(next, Some(utc(2026, 1, 2, 9, 0)));
    }

    #[test]
    fn cron_weekday_list() {
        // Monday(1) and Friday(5) at 08:30, starting from a Wednesday.
        let from = utc(2026, 1, 7, 0, 0); // a Wednesday
        let next = compute_next_run(ScheduleType::Cron, "30 8 * * 1,5", from, Tz::UTC).unwrap();
        assert_eq!(next, Some(utc(2026, 1, 9, 8, 30))); // the following Friday
    }

    #[test]
    fn cron_rejects_malformed_expression() {
        let from = utc(2026, 1, 1, 0, 0);
        let err = compute_next_run(ScheduleType::Cron, "not a cron", from, Tz::UTC).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }

    #[test]
    fn interval_rejects_non_positive() {
        let from = utc(2026, 1, 1, 0, 0);
        let err = compute_next_run(ScheduleType::Interval, "0", from, Tz::UTC).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidSchedule { .. }));
    }
}
