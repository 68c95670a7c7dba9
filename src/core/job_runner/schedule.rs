//! Job schedules: fixed intervals and daily UTC wall-clock times.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{AutomationError, AutomationResult};
use crate::util::clock::parse_duration;

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Every `every`, drift-corrected, first fire one period after arming.
    Interval {
        /// Period between fires.
        every: Duration,
    },
    /// Once a day at `hour:minute` UTC.
    DailyAt {
        /// Hour of day, 0-23.
        hour: u32,
        /// Minute of hour, 0-59.
        minute: u32,
    },
}

impl Schedule {
    /// Fixed-interval schedule.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` for a zero period.
    pub fn every(every: Duration) -> AutomationResult<Self> {
        if every.is_zero() {
            return Err(AutomationError::Configuration("job interval must be non-zero".into()));
        }
        Ok(Self::Interval { every })
    }

    /// Daily schedule at a UTC wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` if the time is out of range.
    pub fn daily_at(hour: u32, minute: u32) -> AutomationResult<Self> {
        if hour > 23 || minute > 59 {
            return Err(AutomationError::Configuration(format!(
                "invalid time of day {hour:02}:{minute:02}"
            )));
        }
        Ok(Self::DailyAt { hour, minute })
    }

    /// Parse a schedule expression.
    ///
    /// Accepted forms: `"5m"`, `"every 30s"`, `"at 3:00am"`, `"at 12:00am"`,
    /// `"daily at 03:00 UTC"`, `"at 15:30"`, `"at 7pm"`.
    ///
    /// # Errors
    ///
    /// Returns `AutomationError::Configuration` for anything else.
    pub fn parse(expr: &str) -> AutomationResult<Self> {
        let lowered = expr.trim().to_ascii_lowercase();
        let invalid = || AutomationError::Configuration(format!("unrecognised schedule `{expr}`"));

        let rest = lowered.strip_prefix("daily").map_or(lowered.as_str(), str::trim_start);
        if let Some(time) = rest.strip_prefix("at ") {
            let time = time.trim();
            let time = time.strip_suffix("utc").map_or(time, str::trim_end);
            let (hour, minute) = parse_time_of_day(time).ok_or_else(invalid)?;
            return Self::daily_at(hour, minute);
        }
        if rest != lowered {
            // "daily" without "at"
            return Err(invalid());
        }

        let rest = rest.strip_prefix("every ").unwrap_or(rest);
        let every = parse_duration(rest).ok_or_else(invalid)?;
        Self::every(every)
    }

    /// The first calendar fire strictly after `after`.
    ///
    /// For interval schedules this is `after + every`.
    #[must_use]
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Self::Interval { every } => TimeDelta::from_std(every)
                .ok()
                .and_then(|step| after.checked_add_signed(step))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            Self::DailyAt { hour, minute } => {
                let today = after
                    .date_naive()
                    .and_hms_opt(hour, minute, 0)
                    .map(|naive| naive.and_utc());
                match today {
                    Some(candidate) if candidate > after => candidate,
                    Some(candidate) => candidate + TimeDelta::days(1),
                    // Unreachable for validated schedules; fall back to a day later.
                    None => after + TimeDelta::days(1),
                }
            }
        }
    }
}

impl FromStr for Schedule {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval { every } => write!(f, "every {every:?}"),
            Self::DailyAt { hour, minute } => write!(f, "daily at {hour:02}:{minute:02} UTC"),
        }
    }
}

/// Parse `"3:00am"`, `"3am"`, `"12:30 pm"` or 24-hour `"15:30"`.
fn parse_time_of_day(input: &str) -> Option<(u32, u32)> {
    let (clock, meridiem) = if let Some(c) = input.strip_suffix("am") {
        (c.trim_end(), Some(false))
    } else if let Some(c) = input.strip_suffix("pm") {
        (c.trim_end(), Some(true))
    } else {
        (input, None)
    };

    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if minute > 59 {
        return None;
    }

    let hour = match meridiem {
        None if hour <= 23 => hour,
        Some(pm) if (1..=12).contains(&hour) => match (pm, hour) {
            (false, 12) => 0,
            (true, 12) => 12,
            (false, h) => h,
            (true, h) => h + 12,
        },
        _ => return None,
    };
    Some((hour, minute))
}
