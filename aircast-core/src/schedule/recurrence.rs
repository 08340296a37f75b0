use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("unknown recurrence pattern: {0}")]
    InvalidPattern(String),
    #[error("recurrence rule has no time of day")]
    MissingTime,
    #[error("invalid time of day: {0}")]
    InvalidTime(String),
    #[error("weekly rule has no days configured")]
    NoDaysConfigured,
    #[error("invalid day of week: {0}")]
    InvalidDay(u8),
}

pub type RecurrenceResult<T> = Result<T, RecurrenceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Daily,
    Weekly,
}

impl RecurrencePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecurrencePattern::Daily => "daily",
            RecurrencePattern::Weekly => "weekly",
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecurrencePattern {
    type Err = RecurrenceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "daily" => Ok(RecurrencePattern::Daily),
            "weekly" => Ok(RecurrencePattern::Weekly),
            other => Err(RecurrenceError::InvalidPattern(other.to_string())),
        }
    }
}

/// When a broadcast template recurs.
///
/// Days of week are numbered Sunday first: 0 is Sunday, 6 is Saturday.
/// Times are wall-clock `HH:MM` strings interpreted in UTC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub pattern: RecurrencePattern,
    pub time_of_day: Option<String>,
    #[serde(default)]
    pub days_of_week: Vec<u8>,
    pub enabled: bool,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl RecurrenceRule {
    pub fn daily(time_of_day: &str) -> Self {
        Self {
            pattern: RecurrencePattern::Daily,
            time_of_day: Some(time_of_day.to_string()),
            days_of_week: Vec::new(),
            enabled: true,
            last_run_at: None,
            next_run_at: None,
        }
    }

    pub fn weekly(time_of_day: &str, days_of_week: &[u8]) -> Self {
        Self {
            pattern: RecurrencePattern::Weekly,
            time_of_day: Some(time_of_day.to_string()),
            days_of_week: days_of_week.to_vec(),
            enabled: true,
            last_run_at: None,
            next_run_at: None,
        }
    }

    /// Structural checks apply even to disabled rules; the time of day
    /// only has to parse once the rule is enabled.
    pub fn validate(&self) -> RecurrenceResult<()> {
        if self.pattern == RecurrencePattern::Weekly {
            if self.days_of_week.is_empty() {
                return Err(RecurrenceError::NoDaysConfigured);
            }
            if let Some(day) = self.days_of_week.iter().find(|day| **day > 6) {
                return Err(RecurrenceError::InvalidDay(*day));
            }
        }
        if self.enabled {
            parse_time_of_day(self.time_of_day.as_deref())?;
        }
        Ok(())
    }

    /// The first occurrence strictly after `from`.
    pub fn next_run(&self, from: DateTime<Utc>) -> RecurrenceResult<DateTime<Utc>> {
        let (hour, minute) = parse_time_of_day(self.time_of_day.as_deref())?;
        match self.pattern {
            RecurrencePattern::Daily => {
                let candidate = at_time(from, hour, minute);
                if candidate > from {
                    Ok(candidate)
                } else {
                    Ok(at_time(from + Duration::days(1), hour, minute))
                }
            }
            RecurrencePattern::Weekly => {
                if self.days_of_week.is_empty() {
                    return Err(RecurrenceError::NoDaysConfigured);
                }
                if let Some(day) = self.days_of_week.iter().find(|day| **day > 6) {
                    return Err(RecurrenceError::InvalidDay(*day));
                }
                let today = from.weekday().num_days_from_sunday() as u8;
                if self.days_of_week.contains(&today) {
                    let candidate = at_time(from, hour, minute);
                    if candidate > from {
                        return Ok(candidate);
                    }
                }
                for offset in 1..=7 {
                    let day = from + Duration::days(offset);
                    let weekday = day.weekday().num_days_from_sunday() as u8;
                    if self.days_of_week.contains(&weekday) {
                        return Ok(at_time(day, hour, minute));
                    }
                }
                Err(RecurrenceError::NoDaysConfigured)
            }
        }
    }
}

fn at_time(day: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    day.date_naive().and_hms_opt(hour, minute, 0).unwrap().and_utc()
}

fn parse_time_of_day(time_of_day: Option<&str>) -> RecurrenceResult<(u32, u32)> {
    let raw = time_of_day.ok_or(RecurrenceError::MissingTime)?;
    let mut parts = raw.split(':');
    let (Some(hour), Some(minute), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err(RecurrenceError::InvalidTime(raw.to_string()));
    };
    let hour: u32 = hour
        .parse()
        .map_err(|_| RecurrenceError::InvalidTime(raw.to_string()))?;
    let minute: u32 = minute
        .parse()
        .map_err(|_| RecurrenceError::InvalidTime(raw.to_string()))?;
    if hour > 23 || minute > 59 {
        return Err(RecurrenceError::InvalidTime(raw.to_string()));
    }
    Ok((hour, minute))
}
