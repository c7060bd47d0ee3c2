use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Longest accepted interval: one leap year.
pub const MAX_INTERVAL_SECS: u64 = 366 * 24 * 60 * 60;

/// When a scheduled job fires. All wall-clock forms are evaluated in UTC.
///
/// ```toml
/// [policy.schedules.daily_retention]
/// kind = "daily"
/// hour = 2
/// minute = 0
///
/// [policy.schedules.weekly_deep_clean]
/// kind = "weekly"
/// weekday = "Sun"
/// hour = 3
///
/// [policy.schedules.disk_check]
/// kind = "interval"
/// every_secs = 60
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// Fire every `every_secs` seconds.
    Interval { every_secs: u64 },
    /// Fire once a day at `hour:minute`.
    Daily {
        hour: u8,
        #[serde(default)]
        minute: u8,
    },
    /// Fire once a week on `weekday` at `hour:minute`.
    Weekly {
        weekday: Weekday,
        hour: u8,
        #[serde(default)]
        minute: u8,
    },
}

impl TriggerSpec {
    /// Check the spec describes a reachable instant.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            TriggerSpec::Interval { every_secs } => {
                if every_secs == 0 {
                    return Err("interval must be at least 1 second".into());
                }
                if every_secs > MAX_INTERVAL_SECS {
                    return Err(format!(
                        "interval must be at most {MAX_INTERVAL_SECS} seconds, got {every_secs}"
                    ));
                }
            }
            TriggerSpec::Daily { hour, minute } | TriggerSpec::Weekly { hour, minute, .. } => {
                if hour > 23 {
                    return Err(format!("hour must be 0-23, got {hour}"));
                }
                if minute > 59 {
                    return Err(format!("minute must be 0-59, got {minute}"));
                }
            }
        }
        Ok(())
    }

    /// The first fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            TriggerSpec::Interval { every_secs } => {
                let secs = every_secs.clamp(1, MAX_INTERVAL_SECS) as i64;
                Duration::try_seconds(secs)
                    .and_then(|period| now.checked_add_signed(period))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            TriggerSpec::Daily { hour, minute } => {
                let candidate = at_time(now, hour, minute);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            TriggerSpec::Weekly {
                weekday,
                hour,
                minute,
            } => {
                let target = weekday.num_days_from_monday() as i64;
                let today = now.weekday().num_days_from_monday() as i64;
                let days_ahead = (target - today).rem_euclid(7);
                let candidate = at_time(now, hour, minute) + Duration::days(days_ahead);
                if candidate > now {
                    candidate
                } else {
                    candidate + Duration::weeks(1)
                }
            }
        }
    }
}

/// `now`'s calendar day at `hour:minute:00` UTC.
fn at_time(now: DateTime<Utc>, hour: u8, minute: u8) -> DateTime<Utc> {
    let time = NaiveTime::from_hms_opt(hour as u32, minute as u32, 0).unwrap_or(NaiveTime::MIN);
    now.date_naive().and_time(time).and_utc()
}
