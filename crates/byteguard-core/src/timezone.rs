//! Timezone utilities for local-time bucketing
//!
//! Hourly usage buckets and the daily reset are defined in local time. This
//! module detects the system timezone, parses timezone strings from user
//! input, and answers the two local-time questions the core needs.

use chrono::{DateTime, Days, Duration, LocalResult, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use std::str::FromStr;
use tracing::debug;

use crate::error::{ByteguardError, Result};

/// Configuration for timezone handling
#[derive(Debug, Clone)]
pub struct TimezoneConfig {
    /// The timezone to use for local-time operations
    pub tz: Tz,
    /// Whether the timezone is UTC
    pub is_utc: bool,
}

impl Default for TimezoneConfig {
    fn default() -> Self {
        let tz = get_local_timezone();
        Self {
            is_utc: tz == Tz::UTC,
            tz,
        }
    }
}

impl TimezoneConfig {
    /// Create a configuration for a known timezone
    pub fn new(tz: Tz) -> Self {
        Self {
            is_utc: tz == Tz::UTC,
            tz,
        }
    }

    /// Create a new timezone configuration from CLI arguments
    pub fn from_cli(timezone_str: Option<&str>, use_utc: bool) -> Result<Self> {
        if use_utc {
            return Ok(Self::new(Tz::UTC));
        }

        match timezone_str {
            Some(tz_str) => {
                let tz = Tz::from_str(tz_str).map_err(|_| {
                    ByteguardError::InvalidTimezone(format!(
                        "'{}'. Use format like 'America/New_York', 'Asia/Tokyo', or 'UTC'",
                        tz_str
                    ))
                })?;
                Ok(Self::new(tz))
            }
            None => Ok(Self::default()),
        }
    }

    /// Get the display name for the configured timezone
    pub fn display_name(&self) -> &str {
        if self.is_utc { "UTC" } else { self.tz.name() }
    }

    /// Local hour of day (0..=23) for an instant
    pub fn local_hour(&self, now: DateTime<Utc>) -> u32 {
        now.with_timezone(&self.tz).hour()
    }

    /// The first instant of the next local day after `now`
    ///
    /// When midnight does not exist locally (a DST gap), the earliest valid
    /// instant after it is used.
    pub fn next_local_midnight(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&self.tz).date_naive();
        let Some(next_date) = local_date.checked_add_days(Days::new(1)) else {
            return now + Duration::days(1);
        };
        let Some(midnight) = next_date.and_hms_opt(0, 0, 0) else {
            return now + Duration::days(1);
        };

        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            LocalResult::None => {
                // Walk forward until the wall clock exists again
                (1..=180)
                    .filter_map(|minutes| {
                        self.tz
                            .from_local_datetime(&(midnight + Duration::minutes(minutes)))
                            .earliest()
                    })
                    .next()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| now + Duration::days(1))
            }
        }
    }

    /// Time left until the next local midnight
    pub fn until_next_midnight(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.next_local_midnight(now) - now)
            .to_std()
            .unwrap_or_default()
    }
}

/// Detect the system's local timezone
///
/// This function attempts to detect the local timezone from the system.
/// If detection fails, it falls back to UTC.
pub fn get_local_timezone() -> Tz {
    if let Ok(tz_str) = std::env::var("TZ")
        && let Ok(tz) = Tz::from_str(&tz_str)
    {
        debug!("Using timezone from TZ environment variable: {}", tz_str);
        return tz;
    }

    match iana_time_zone::get_timezone() {
        Ok(tz_str) => match Tz::from_str(&tz_str) {
            Ok(tz) => {
                debug!("Using system timezone from iana-time-zone: {}", tz_str);
                tz
            }
            Err(_) => {
                debug!(
                    "Could not parse timezone from iana-time-zone: '{}', falling back to UTC",
                    tz_str
                );
                Tz::UTC
            }
        },
        Err(e) => {
            debug!(
                "Could not detect local timezone via iana-time-zone: {:?}, falling back to UTC",
                e
            );
            Tz::UTC
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timezone_config_utc() {
        let config = TimezoneConfig::from_cli(None, true).unwrap();
        assert!(config.is_utc);
        assert_eq!(config.tz, Tz::UTC);
        assert_eq!(config.display_name(), "UTC");
    }

    #[test]
    fn test_timezone_config_explicit() {
        let config = TimezoneConfig::from_cli(Some("America/New_York"), false).unwrap();
        assert!(!config.is_utc);
        assert_eq!(config.tz.name(), "America/New_York");
    }

    #[test]
    fn test_timezone_config_invalid() {
        let result = TimezoneConfig::from_cli(Some("Invalid/Timezone"), false);
        assert!(matches!(result, Err(ByteguardError::InvalidTimezone(_))));
    }

    #[test]
    fn test_local_hour() {
        let config = TimezoneConfig::new(Tz::Asia__Tokyo);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        // 23:30 UTC is 08:30 the next day in Tokyo
        assert_eq!(config.local_hour(now), 8);
        assert_eq!(TimezoneConfig::new(Tz::UTC).local_hour(now), 23);
    }

    #[test]
    fn test_next_local_midnight() {
        let config = TimezoneConfig::new(Tz::America__New_York);
        // 2024-01-15 15:00 UTC is 10:00 in New York (UTC-5)
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 15, 0, 0).unwrap();
        let midnight = config.next_local_midnight(now);
        assert_eq!(midnight, Utc.with_ymd_and_hms(2024, 1, 16, 5, 0, 0).unwrap());
        assert_eq!(
            config.until_next_midnight(now),
            std::time::Duration::from_secs(14 * 3600)
        );
    }

    #[test]
    fn test_next_local_midnight_dst_gap() {
        // Santiago skips 00:00 -> 01:00 on 2024-09-08
        let config = TimezoneConfig::new(Tz::America__Santiago);
        let now = Utc.with_ymd_and_hms(2024, 9, 7, 18, 0, 0).unwrap();
        let midnight = config.next_local_midnight(now);
        assert!(midnight > now);
        assert_eq!(midnight.with_timezone(&config.tz).hour(), 1);
    }
}
