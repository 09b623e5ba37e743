//! Relative publication phrases ("3 days ago", "Streamed 1 hour ago").
use chrono::{DateTime, Duration, Months, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static AGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+(\w+?)s?\s+ago").expect("valid time-ago regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeAgoError {
    #[error("time unit \"{0}\" is not supported")]
    UnsupportedUnit(String),
    #[error("time phrase \"{0}\" is not supported")]
    UnsupportedFormat(String),
    #[error("{0:?} is out of range")]
    OutOfRange(TimeAgo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Unit {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "second" => Unit::Second,
            "minute" => Unit::Minute,
            "hour" => Unit::Hour,
            "day" => Unit::Day,
            "week" => Unit::Week,
            "month" => Unit::Month,
            "year" => Unit::Year,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeAgo {
    pub amount: u32,
    pub unit: Unit,
}

impl TimeAgo {
    /// The instant `self` before `now`. Months and years step by calendar months.
    pub fn before(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeAgoError> {
        let n = i64::from(self.amount);
        let fixed = |delta: Option<Duration>| delta.and_then(|d| now.checked_sub_signed(d));
        let months = |m: Option<u32>| m.and_then(|m| now.checked_sub_months(Months::new(m)));
        let at = match self.unit {
            Unit::Second => fixed(Duration::try_seconds(n)),
            Unit::Minute => fixed(Duration::try_minutes(n)),
            Unit::Hour => fixed(Duration::try_hours(n)),
            Unit::Day => fixed(Duration::try_days(n)),
            Unit::Week => fixed(Duration::try_weeks(n)),
            Unit::Month => months(Some(self.amount)),
            Unit::Year => months(self.amount.checked_mul(12)),
        };
        at.ok_or(TimeAgoError::OutOfRange(*self))
    }
}

pub fn parse(text: &str) -> Result<TimeAgo, TimeAgoError> {
    let caps = AGO
        .captures(text)
        .ok_or_else(|| TimeAgoError::UnsupportedFormat(text.to_string()))?;
    let amount: u32 = caps[1]
        .parse()
        .map_err(|_| TimeAgoError::UnsupportedFormat(text.to_string()))?;
    let unit = Unit::parse(&caps[2]).ok_or_else(|| TimeAgoError::UnsupportedUnit(caps[2].to_string()))?;
    Ok(TimeAgo { amount, unit })
}

/// Convert `text` into an absolute timestamp relative to `now`.
pub fn resolve(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, TimeAgoError> {
    parse(text)?.before(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_singular_and_plural() {
        assert_eq!(
            parse("1 day ago").unwrap(),
            TimeAgo { amount: 1, unit: Unit::Day }
        );
        assert_eq!(
            parse("3 days ago").unwrap(),
            TimeAgo { amount: 3, unit: Unit::Day }
        );
        assert_eq!(
            parse("Streamed 5 hours ago").unwrap(),
            TimeAgo { amount: 5, unit: Unit::Hour }
        );
    }

    #[test]
    fn resolves_fixed_units() {
        assert_eq!(
            resolve("2 weeks ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 17, 12, 0, 0).unwrap()
        );
        assert_eq!(
            resolve("30 minutes ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 11, 30, 0).unwrap()
        );
    }

    #[test]
    fn months_clamp_to_calendar() {
        assert_eq!(
            resolve("1 month ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
        assert_eq!(
            resolve("1 year ago", now()).unwrap(),
            Utc.with_ymd_and_hms(2023, 3, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn huge_amounts_are_errors() {
        for text in ["4000000000 days ago", "4000000000 weeks ago", "4000000000 years ago"] {
            assert!(matches!(resolve(text, now()), Err(TimeAgoError::OutOfRange(_))), "{}", text);
        }
        assert!(resolve("4000000000 seconds ago", now()).is_ok());
    }

    #[test]
    fn rejects_unknown_phrases() {
        assert_eq!(
            parse("3 fortnights ago"),
            Err(TimeAgoError::UnsupportedUnit("fortnight".into()))
        );
        assert!(matches!(
            parse("Premieres tomorrow"),
            Err(TimeAgoError::UnsupportedFormat(_))
        ));
    }
}
