//! Batch trigger expressions.
//!
//! Two forms are accepted, both evaluated in UTC:
//! - `weekly:<mon|tue|wed|thu|fri|sat|sun>@HH:MM`
//! - `every:<N><s|m|h>`

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use thiserror::Error;

/// Longest accepted `every:` interval.
const MAX_INTERVAL: Duration = Duration::days(366);

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerParseError {
    #[error("unknown trigger form '{0}', expected 'weekly:' or 'every:'")]
    UnknownForm(String),
    #[error("invalid weekday '{0}'")]
    Weekday(String),
    #[error("invalid time of day '{0}', expected HH:MM")]
    TimeOfDay(String),
    #[error("invalid interval '{0}', expected <N><s|m|h> with N > 0 and at most 366 days")]
    Interval(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Weekly { weekday: Weekday, at: NaiveTime },
    Every(Duration),
}

impl Trigger {
    /// First fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Every(interval) => now + interval,
            Self::Weekly { weekday, at } => {
                let days_ahead = (i64::from(weekday.num_days_from_monday())
                    - i64::from(now.weekday().num_days_from_monday()))
                .rem_euclid(7);
                let candidate = (now.date_naive() + Duration::days(days_ahead))
                    .and_time(at)
                    .and_utc();
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
        }
    }
}

impl FromStr for Trigger {
    type Err = TriggerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("weekly:") {
            let (day, time) = rest
                .split_once('@')
                .ok_or_else(|| TriggerParseError::TimeOfDay(rest.to_string()))?;
            let weekday = Weekday::from_str(day)
                .map_err(|_| TriggerParseError::Weekday(day.to_string()))?;
            let at = NaiveTime::parse_from_str(time, "%H:%M")
                .map_err(|_| TriggerParseError::TimeOfDay(time.to_string()))?;
            return Ok(Self::Weekly { weekday, at });
        }

        if let Some(rest) = s.strip_prefix("every:") {
            let err = || TriggerParseError::Interval(rest.to_string());
            let (split, _) = rest.char_indices().last().ok_or_else(err)?;
            let (count, unit) = rest.split_at(split);
            let count: i64 = count.parse().map_err(|_| err())?;
            if count <= 0 {
                return Err(err());
            }
            let interval = match unit {
                "s" => Duration::try_seconds(count),
                "m" => Duration::try_minutes(count),
                "h" => Duration::try_hours(count),
                _ => return Err(err()),
            }
            .filter(|interval| *interval <= MAX_INTERVAL)
            .ok_or_else(err)?;
            return Ok(Self::Every(interval));
        }

        Err(TriggerParseError::UnknownForm(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            "every:10m".parse::<Trigger>().unwrap(),
            Trigger::Every(Duration::minutes(10))
        );
        assert_eq!(
            "every:1h".parse::<Trigger>().unwrap(),
            Trigger::Every(Duration::hours(1))
        );
        let weekly = "weekly:sun@00:00".parse::<Trigger>().unwrap();
        assert!(matches!(weekly, Trigger::Weekly { weekday: Weekday::Sun, .. }));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "cron:* * *".parse::<Trigger>(),
            Err(TriggerParseError::UnknownForm(_))
        ));
        assert!(matches!(
            "every:0m".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "every:".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "every:5é".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "every:9999999999999h".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "every:367d".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "every:9000h".parse::<Trigger>(),
            Err(TriggerParseError::Interval(_))
        ));
        assert!(matches!(
            "weekly:funday@00:00".parse::<Trigger>(),
            Err(TriggerParseError::Weekday(_))
        ));
        assert!(matches!(
            "weekly:sun@25:00".parse::<Trigger>(),
            Err(TriggerParseError::TimeOfDay(_))
        ));
    }

    #[test]
    fn test_weekly_next_after() {
        let trigger = "weekly:sun@00:00".parse::<Trigger>().unwrap();
        // 2026-10-14 is a Wednesday.
        let wed = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(wed),
            Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap()
        );

        let sunday_midnight = Utc.with_ymd_and_hms(2026, 10, 18, 0, 0, 0).unwrap();
        assert_eq!(
            trigger.next_after(sunday_midnight),
            Utc.with_ymd_and_hms(2026, 10, 25, 0, 0, 0).unwrap()
        );
    }
}
