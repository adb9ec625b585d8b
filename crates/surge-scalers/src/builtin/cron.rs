//! `cron` — a fixed replica count inside a recurring time window.
//!
//! The window opens at each occurrence of `start` and closes at the next
//! occurrence of `end`. The trigger is active exactly when the next `end`
//! comes before the next `start`. While active it reports `desiredReplicas`
//! against a per-replica target of 1, so the control law yields the desired
//! count directly; outside the window it reports 0.
//!
//! Expressions use the five-field form (`minute hour day-of-month month
//! day-of-week`) plus the `@hourly`, `@daily`, `@weekly`, `@monthly` and
//! `@yearly` shorthands. When both day fields are restricted a day matches if
//! either does.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Timelike, Utc};

use crate::error::{ScalerError, ScalerResult};
use crate::metric::{Measurement, MetricReading, MetricSpec, MetricTargetType};
use crate::scaler::{Scaler, ScalerConfig};

pub const TRIGGER_TYPE: &str = "cron";

/// How far ahead to search for the next occurrence.
const SEARCH_YEARS: i32 = 5;

/// Source of "now"; injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

struct Field {
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: Field = Field { min: 0, max: 59, names: &[] };
const HOUR: Field = Field { min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: Field = Field { min: 1, max: 31, names: &[] };
const MONTH: Field = Field {
    min: 1,
    max: 12,
    names: &[
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ],
};
// 7 is accepted as a second spelling of Sunday.
const DAY_OF_WEEK: Field = Field {
    min: 0,
    max: 7,
    names: &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"],
};

impl Field {
    fn value(&self, raw: &str) -> Result<u32, String> {
        if let Some(i) = self.names.iter().position(|n| n.eq_ignore_ascii_case(raw)) {
            return Ok(self.min + i as u32);
        }
        let v: u32 = raw
            .parse()
            .map_err(|_| format!("{raw:?} is not a number or name"))?;
        if v < self.min || v > self.max {
            return Err(format!("{v} is outside {}-{}", self.min, self.max));
        }
        Ok(v)
    }

    fn parse(&self, raw: &str) -> Result<u64, String> {
        let mut mask = 0u64;
        for part in raw.split(',') {
            let (range, step) = match part.split_once('/') {
                Some((range, step)) => {
                    let step = step
                        .parse::<u32>()
                        .ok()
                        .filter(|s| *s > 0 && *s <= self.max)
                        .ok_or_else(|| format!("invalid step {step:?}"))?;
                    (range, Some(step))
                }
                None => (part, None),
            };
            let (lo, hi) = if range == "*" {
                (self.min, self.max)
            } else if let Some((a, b)) = range.split_once('-') {
                (self.value(a)?, self.value(b)?)
            } else {
                let v = self.value(range)?;
                (v, if step.is_some() { self.max } else { v })
            };
            if lo > hi {
                return Err(format!("range {range:?} is reversed"));
            }
            let step = step.unwrap_or(1);
            let mut v = lo;
            while v <= hi {
                mask |= 1 << v;
                v += step;
            }
        }
        Ok(mask)
    }
}

/// A parsed five-field cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_star: bool,
    dow_star: bool,
}

impl Schedule {
    pub fn parse(expr: &str) -> Result<Self, String> {
        let expr = match expr.trim() {
            "@yearly" | "@annually" => "0 0 1 1 *",
            "@monthly" => "0 0 1 * *",
            "@weekly" => "0 0 * * 0",
            "@daily" | "@midnight" => "0 0 * * *",
            "@hourly" => "0 * * * *",
            other => other,
        };
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields.as_slice() else {
            return Err(format!("expected 5 fields, got {}", fields.len()));
        };

        let mut days_of_week = DAY_OF_WEEK.parse(dow).map_err(|e| format!("day-of-week: {e}"))?;
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week | 1) & !(1 << 7);
        }

        Ok(Self {
            minutes: MINUTE.parse(minute).map_err(|e| format!("minute: {e}"))?,
            hours: HOUR.parse(hour).map_err(|e| format!("hour: {e}"))?,
            days_of_month: DAY_OF_MONTH
                .parse(dom)
                .map_err(|e| format!("day-of-month: {e}"))?,
            months: MONTH.parse(month).map_err(|e| format!("month: {e}"))?,
            days_of_week,
            dom_star: dom.starts_with('*'),
            dow_star: dow.starts_with('*'),
        })
    }

    fn matches_day(&self, date: NaiveDate) -> bool {
        let dom = self.days_of_month & (1 << date.day()) != 0;
        let dow = self.days_of_week & (1 << date.weekday().num_days_from_sunday()) != 0;
        if self.dom_star || self.dow_star {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// First matching minute strictly after `after`, or `None` if there is
    /// none within the search horizon.
    pub fn next_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        let limit = after.year() + SEARCH_YEARS;
        let mut t = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);

        while t.year() <= limit {
            if self.months & (1 << t.month()) == 0 {
                let (y, m) = if t.month() == 12 {
                    (t.year() + 1, 1)
                } else {
                    (t.year(), t.month() + 1)
                };
                t = NaiveDate::from_ymd_opt(y, m, 1)?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if !self.matches_day(t.date()) {
                t = t.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                continue;
            }
            if self.hours & (1 << t.hour()) == 0 {
                t = t.date().and_hms_opt(t.hour(), 0, 0)? + Duration::hours(1);
                continue;
            }
            if self.minutes & (1 << t.minute()) == 0 {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

/// `UTC` (and aliases) or a fixed `±HH:MM` offset.
fn parse_timezone(raw: &str) -> Result<FixedOffset, String> {
    let raw = raw.trim();
    if raw.is_empty() || ["UTC", "Etc/UTC", "GMT", "Z"].iter().any(|z| z.eq_ignore_ascii_case(raw)) {
        return FixedOffset::east_opt(0).ok_or_else(|| "invalid offset".to_string());
    }
    let (sign, rest) = match raw.as_bytes()[0] {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return Err(format!("unsupported timezone {raw:?}; use UTC or ±HH:MM")),
    };
    let (h, m) = rest.split_once(':').unwrap_or((rest, "0"));
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(h) || !digits(m) {
        return Err(format!("invalid offset {raw:?}"));
    }
    let (Ok(h), Ok(m)) = (h.parse::<i32>(), m.parse::<i32>()) else {
        return Err(format!("invalid offset {raw:?}"));
    };
    if h > 14 || m > 59 {
        return Err(format!("invalid offset {raw:?}"));
    }
    FixedOffset::east_opt(sign * (h * 3600 + m * 60)).ok_or_else(|| format!("invalid offset {raw:?}"))
}

pub struct CronScaler {
    start: Schedule,
    end: Schedule,
    offset: FixedOffset,
    desired: f64,
    spec: MetricSpec,
    clock: Clock,
}

impl CronScaler {
    pub fn new(config: &ScalerConfig) -> ScalerResult<Self> {
        Self::with_clock(config, system_clock())
    }

    /// Required: `start`, `end`, `desiredReplicas`. Optional: `timezone`.
    pub fn with_clock(config: &ScalerConfig, clock: Clock) -> ScalerResult<Self> {
        let meta = config.metadata();
        let timezone = meta.optional_str("timezone")?.unwrap_or("UTC");
        let offset = parse_timezone(timezone).map_err(ScalerError::Config)?;
        let start_raw = meta.required_str("start")?;
        let end_raw = meta.required_str("end")?;
        if start_raw.trim() == end_raw.trim() {
            return Err(ScalerError::Config(
                "\"start\" and \"end\" must differ".to_string(),
            ));
        }
        let start = Schedule::parse(start_raw)
            .map_err(|e| ScalerError::Config(format!("start {start_raw:?}: {e}")))?;
        let end = Schedule::parse(end_raw)
            .map_err(|e| ScalerError::Config(format!("end {end_raw:?}: {e}")))?;

        let desired = meta.u64_or("desiredReplicas", 0)?;
        if desired == 0 {
            return Err(ScalerError::Config(
                "\"desiredReplicas\" must be a positive integer".to_string(),
            ));
        }

        let scaler = Self {
            start,
            end,
            offset,
            desired: desired as f64,
            spec: MetricSpec {
                name: config.metric_name(&format!("{timezone}-{start_raw}-{end_raw}")),
                target_value: 1.0,
                target_type: MetricTargetType::AverageValue,
            },
            clock,
        };
        let now = scaler.local_now();
        if scaler.start.next_after(now).is_none() {
            return Err(ScalerError::Config(format!("start {start_raw:?} never fires")));
        }
        if scaler.end.next_after(now).is_none() {
            return Err(ScalerError::Config(format!("end {end_raw:?} never fires")));
        }
        Ok(scaler)
    }

    fn local_now(&self) -> NaiveDateTime {
        (self.clock)().with_timezone(&self.offset).naive_local()
    }
}

#[async_trait]
impl Scaler for CronScaler {
    fn metric_specs(&self) -> Vec<MetricSpec> {
        vec![self.spec.clone()]
    }

    async fn measure(&self) -> ScalerResult<Measurement> {
        let now = self.local_now();
        let (Some(next_start), Some(next_end)) = (self.start.next_after(now), self.end.next_after(now))
        else {
            return Err(ScalerError::Backend(
                "cron window has no upcoming boundary".to_string(),
            ));
        };
        let active = next_end < next_start;
        let value = if active { self.desired } else { 0.0 };
        Ok(Measurement {
            active,
            readings: vec![MetricReading::new(&self.spec, value)],
        })
    }

    async fn release(&self) -> ScalerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin::test_support::config;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn fixed(t: DateTime<Utc>) -> Clock {
        Arc::new(move || t)
    }

    fn business_hours(extra: &[(&'static str, &'static str)]) -> ScalerConfig {
        let mut items = vec![
            ("start", "0 8 * * *"),
            ("end", "0 18 * * *"),
            ("desiredReplicas", "4"),
        ];
        items.extend_from_slice(extra);
        config(TRIGGER_TYPE, &items, &[])
    }

    #[test]
    fn parses_steps_ranges_lists_and_names() {
        let s = Schedule::parse("*/15 9-17 * JAN,jul MON-FRI").unwrap();
        assert_eq!(s.minutes, (1 << 0) | (1 << 15) | (1 << 30) | (1 << 45));
        assert_eq!(s.hours.count_ones(), 9);
        assert_eq!(s.months, (1 << 1) | (1 << 7));
        assert_eq!(s.days_of_week, 0b0111110);

        let s = Schedule::parse("0 0 * * 7").unwrap();
        assert_eq!(s.days_of_week, 1);

        let s = Schedule::parse("5/20 * * * *").unwrap();
        assert_eq!(s.minutes, (1 << 5) | (1 << 25) | (1 << 45));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["* * * *", "60 * * * *", "5-2 * * * *", "*/0 * * * *", "0 0 * FOO *"] {
            assert!(Schedule::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn rejects_steps_larger_than_the_field() {
        for bad in ["5/4294967295 * * * *", "*/60 * * * *", "0 */24 * * *"] {
            assert!(Schedule::parse(bad).is_err(), "{bad}");
        }
        let s = Schedule::parse("5/59 * * * *").unwrap();
        assert_eq!(s.minutes, 1 << 5);
    }

    #[test]
    fn timezone_offsets_need_unsigned_digits() {
        assert_eq!(parse_timezone("+05:30").unwrap().local_minus_utc(), 19_800);
        assert_eq!(parse_timezone("-03").unwrap().local_minus_utc(), -10_800);
        for bad in ["+-1:00", "-+1:00", "+1:-30", "+:30", "+15:00", "Mars/Olympus"] {
            assert!(parse_timezone(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn next_after_skips_to_matching_minute() {
        let s = Schedule::parse("30 8 * * *").unwrap();
        assert_eq!(s.next_after(at(2026, 10, 19, 8, 30)), Some(at(2026, 10, 20, 8, 30)));
        assert_eq!(s.next_after(at(2026, 10, 19, 7, 59)), Some(at(2026, 10, 19, 8, 30)));

        // Month and year rollover.
        let s = Schedule::parse("0 0 1 1 *").unwrap();
        assert_eq!(s.next_after(at(2026, 10, 19, 12, 0)), Some(at(2027, 1, 1, 0, 0)));

        // 2026-10-19 is a Monday; Friday is 2026-10-23.
        let s = Schedule::parse("0 9 * * FRI").unwrap();
        assert_eq!(s.next_after(at(2026, 10, 19, 0, 0)), Some(at(2026, 10, 23, 9, 0)));
    }

    #[test]
    fn restricted_day_fields_match_either() {
        // The 25th or any Monday.
        let s = Schedule::parse("0 0 25 * MON").unwrap();
        assert_eq!(s.next_after(at(2026, 10, 19, 0, 0)), Some(at(2026, 10, 25, 0, 0)));
        assert_eq!(s.next_after(at(2026, 10, 25, 0, 0)), Some(at(2026, 10, 26, 0, 0)));
    }

    #[test]
    fn impossible_date_has_no_occurrence() {
        let s = Schedule::parse("0 0 30 2 *").unwrap();
        assert_eq!(s.next_after(at(2026, 1, 1, 0, 0)), None);
    }

    #[tokio::test]
    async fn active_inside_window() {
        let clock = fixed(Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap());
        let scaler = CronScaler::with_clock(&business_hours(&[]), clock).unwrap();
        let m = scaler.measure().await.unwrap();
        assert!(m.active);
        assert_eq!(m.readings[0].value, 4.0);
        assert_eq!(m.readings[0].spec.target_value, 1.0);
        assert!(m.readings[0].name.starts_with("s0-cron-utc-0-8"));
    }

    #[tokio::test]
    async fn inactive_outside_window() {
        let clock = fixed(Utc.with_ymd_and_hms(2026, 10, 19, 20, 0, 0).unwrap());
        let scaler = CronScaler::with_clock(&business_hours(&[]), clock).unwrap();
        let m = scaler.measure().await.unwrap();
        assert!(!m.active);
        assert_eq!(m.readings[0].value, 0.0);
    }

    #[tokio::test]
    async fn timezone_offset_shifts_window() {
        // 07:00 UTC is 09:00 at +02:00.
        let clock = fixed(Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap());
        let cfg = business_hours(&[("timezone", "+02:00")]);
        let scaler = CronScaler::with_clock(&cfg, clock.clone()).unwrap();
        assert!(scaler.measure().await.unwrap().active);

        let utc = CronScaler::with_clock(&business_hours(&[]), clock).unwrap();
        assert!(!utc.measure().await.unwrap().active);
    }

    #[test]
    fn rejects_invalid_metadata() {
        let clock = fixed(Utc.with_ymd_and_hms(2026, 10, 19, 7, 0, 0).unwrap());
        let cases: [&[(&str, &str)]; 5] = [
            &[("start", "0 8 * * *"), ("end", "0 8 * * *"), ("desiredReplicas", "2")],
            &[("start", "0 8 * * *"), ("end", "0 18 * * *"), ("desiredReplicas", "0")],
            &[("start", "0 8 * * *"), ("end", "0 18 * * *")],
            &[
                ("start", "0 8 * * *"),
                ("end", "0 18 * * *"),
                ("desiredReplicas", "2"),
                ("timezone", "Europe/Nowhere"),
            ],
            &[("start", "0 0 30 2 *"), ("end", "0 18 * * *"), ("desiredReplicas", "2")],
        ];
        for items in cases {
            let err = CronScaler::with_clock(&config(TRIGGER_TYPE, items, &[]), clock.clone())
                .err()
                .unwrap();
            assert!(err.is_config(), "{items:?}: {err}");
        }
    }
}
