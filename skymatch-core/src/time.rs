//! MJD-backed UTC timestamps.
//!
//! Alert detection times, skymap publication times, and freshness windows
//! all use [`UtcInstant`], a thin wrapper over a Modified Julian Date. MJD
//! keeps window arithmetic to plain f64 subtraction and matches the time
//! scale the upstream portal reports (`dateobs` strings parse straight into
//! it).

use crate::constants::{SECONDS_PER_DAY_F64, UNIX_EPOCH_MJD};
use crate::errors::{CoreError, CoreResult};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A UTC instant stored as a Modified Julian Date.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UtcInstant {
    mjd: f64,
}

impl UtcInstant {
    pub fn from_mjd(mjd: f64) -> Self {
        Self { mjd }
    }

    pub fn mjd(&self) -> f64 {
        self.mjd
    }

    /// The current system time.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self::from_mjd(UNIX_EPOCH_MJD + elapsed.as_secs_f64() / SECONDS_PER_DAY_F64)
    }

    /// Build an instant from UTC calendar components.
    ///
    /// Uses the ERFA `Cal2jd` day-count convention: the date maps to the MJD
    /// at midnight, the time components contribute the day fraction.
    pub fn from_calendar(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: f64) -> Self {
        let my = (month as i32 - 14) / 12;
        let iypmy = year + my;

        let mjd_midnight = ((1461 * (iypmy + 4800)) / 4
            + (367 * (month as i32 - 2 - 12 * my)) / 12
            - (3 * ((iypmy + 4900) / 100)) / 4
            + day as i32
            - 2432076) as f64;

        let day_fraction =
            (60.0 * (60 * hour as i32 + minute as i32) as f64 + second) / SECONDS_PER_DAY_F64;

        Self::from_mjd(mjd_midnight + day_fraction)
    }

    /// Parse an ISO-8601 UTC timestamp.
    ///
    /// Accepts `YYYY-MM-DD`, optionally followed by `Thh:mm:ss` or
    /// `hh:mm:ss` (space separator) with a fractional-second part, and an
    /// optional trailing `Z`.
    pub fn parse(s: &str) -> CoreResult<Self> {
        let s = s.trim();

        const MAX_LEN: usize = 40;
        if s.is_empty() || s.len() > MAX_LEN {
            return Err(CoreError::invalid_timestamp(format!(
                "timestamp length out of range: '{}'",
                s
            )));
        }

        let s = s.strip_suffix('Z').unwrap_or(s);

        let (date_part, time_part) = match s.find('T').or_else(|| s.find(' ')) {
            Some(pos) => (&s[..pos], Some(&s[pos + 1..])),
            None => (s, None),
        };

        let mut date_fields = date_part.split('-');
        let year: i32 = next_field(&mut date_fields, date_part, "year")?;
        let month: u8 = next_field(&mut date_fields, date_part, "month")?;
        let day: u8 = next_field(&mut date_fields, date_part, "day")?;
        if date_fields.next().is_some() {
            return Err(CoreError::invalid_timestamp(format!(
                "invalid date format: '{}'. Expected YYYY-MM-DD",
                date_part
            )));
        }

        if !(1..=12).contains(&month) {
            return Err(CoreError::invalid_timestamp(format!(
                "month out of range: {}",
                month
            )));
        }
        if !(1..=31).contains(&day) {
            return Err(CoreError::invalid_timestamp(format!(
                "day out of range: {}",
                day
            )));
        }

        let (hour, minute, second) = match time_part {
            None => (0, 0, 0.0),
            Some(t) => {
                let mut time_fields = t.split(':');
                let hour: u8 = next_field(&mut time_fields, t, "hour")?;
                let minute: u8 = next_field(&mut time_fields, t, "minute")?;
                let second: f64 = match time_fields.next() {
                    Some(sec) => sec.parse().map_err(|_| {
                        CoreError::invalid_timestamp(format!("invalid second: '{}'", sec))
                    })?,
                    None => 0.0,
                };
                if time_fields.next().is_some() {
                    return Err(CoreError::invalid_timestamp(format!(
                        "invalid time format: '{}'. Expected hh:mm:ss",
                        t
                    )));
                }
                if hour > 23 {
                    return Err(CoreError::invalid_timestamp(format!(
                        "hour out of range: {}",
                        hour
                    )));
                }
                if minute > 59 {
                    return Err(CoreError::invalid_timestamp(format!(
                        "minute out of range: {}",
                        minute
                    )));
                }
                if !(0.0..61.0).contains(&second) {
                    return Err(CoreError::invalid_timestamp(format!(
                        "second out of range: {}",
                        second
                    )));
                }
                (hour, minute, second)
            }
        };

        Ok(Self::from_calendar(year, month, day, hour, minute, second))
    }

    pub fn add_days(&self, days: f64) -> Self {
        Self::from_mjd(self.mjd + days)
    }

    pub fn add_seconds(&self, seconds: f64) -> Self {
        self.add_days(seconds / SECONDS_PER_DAY_F64)
    }

    /// Signed elapsed seconds from `earlier` to `self`.
    pub fn seconds_since(&self, earlier: &UtcInstant) -> f64 {
        (self.mjd - earlier.mjd) * SECONDS_PER_DAY_F64
    }

    /// UTC calendar components `(year, month, day, hour, minute, second)`.
    pub fn to_calendar(&self) -> (i32, u8, u8, u8, u8, f64) {
        let day_number = libm::floor(self.mjd) as i64;
        let mut day_fraction = self.mjd - day_number as f64;
        if day_fraction < 0.0 {
            day_fraction += 1.0;
        }

        // Fliegel & Van Flandern inverse, anchored at the MJD epoch.
        let jdn = day_number + 2_400_001;
        let mut l = jdn + 68_569;
        let n = 4 * l / 146_097;
        l -= (146_097 * n + 3) / 4;
        let i = 4000 * (l + 1) / 1_461_001;
        l -= 1461 * i / 4 - 31;
        let j = 80 * l / 2447;
        let day = l - 2447 * j / 80;
        l = j / 11;
        let month = j + 2 - 12 * l;
        let year = 100 * (n - 49) + i + l;

        let mut seconds_of_day = day_fraction * SECONDS_PER_DAY_F64;
        if seconds_of_day >= SECONDS_PER_DAY_F64 {
            seconds_of_day = SECONDS_PER_DAY_F64 - 1e-3;
        }
        let hour = (seconds_of_day / 3600.0) as u8;
        let minute = ((seconds_of_day - hour as f64 * 3600.0) / 60.0) as u8;
        let second = seconds_of_day - hour as f64 * 3600.0 - minute as f64 * 60.0;

        (year as i32, month as u8, day as u8, hour, minute, second)
    }
}

impl fmt::Display for UtcInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (year, month, day, hour, minute, second) = self.to_calendar();
        write!(
            f,
            "{:04}-{:02}-{:02}T{:02}:{:02}:{:06.3}Z",
            year, month, day, hour, minute, second
        )
    }
}

fn next_field<'a, T: std::str::FromStr>(
    fields: &mut impl Iterator<Item = &'a str>,
    whole: &str,
    name: &str,
) -> CoreResult<T> {
    let raw = fields.next().ok_or_else(|| {
        CoreError::invalid_timestamp(format!("missing {} in '{}'", name, whole))
    })?;
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::invalid_timestamp(format!(
            "invalid {}: '{}'",
            name, raw
        )));
    }
    raw.parse().map_err(|_| {
        CoreError::invalid_timestamp(format!("invalid {}: '{}'", name, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_epoch_mjd() {
        let t = UtcInstant::from_calendar(1970, 1, 1, 0, 0, 0.0);
        assert_eq!(t.mjd(), UNIX_EPOCH_MJD);
    }

    #[test]
    fn test_j2000_midday() {
        let t = UtcInstant::from_calendar(2000, 1, 1, 12, 0, 0.0);
        assert!((t.mjd() - 51_544.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_full_timestamp() {
        let t = UtcInstant::parse("2023-05-01T12:00:00Z").unwrap();
        let u = UtcInstant::from_calendar(2023, 5, 1, 12, 0, 0.0);
        assert!((t.mjd() - u.mjd()).abs() < 1e-12);
    }

    #[test]
    fn test_parse_space_separator_and_fraction() {
        let t = UtcInstant::parse("2023-05-01 06:30:15.5").unwrap();
        let u = UtcInstant::from_calendar(2023, 5, 1, 6, 30, 15.5);
        assert!((t.mjd() - u.mjd()).abs() < 1e-12);
    }

    #[test]
    fn test_parse_date_only() {
        let t = UtcInstant::parse("2023-05-01").unwrap();
        let u = UtcInstant::from_calendar(2023, 5, 1, 0, 0, 0.0);
        assert_eq!(t.mjd(), u.mjd());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(UtcInstant::parse("").is_err());
        assert!(UtcInstant::parse("not-a-date").is_err());
        assert!(UtcInstant::parse("2023-13-01").is_err());
        assert!(UtcInstant::parse("2023-05-32").is_err());
        assert!(UtcInstant::parse("2023-05-01T25:00:00").is_err());
        assert!(UtcInstant::parse("2023-05-01T10:61:00").is_err());
    }

    #[test]
    fn test_arithmetic() {
        let t = UtcInstant::from_mjd(60_000.0);
        assert_eq!(t.add_days(2.0).mjd(), 60_002.0);
        assert!((t.add_seconds(3600.0).mjd() - 60_000.041_666_666_664).abs() < 1e-9);

        let later = t.add_seconds(90.0);
        assert!((later.seconds_since(&t) - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_ordering() {
        let a = UtcInstant::from_mjd(60_000.0);
        let b = UtcInstant::from_mjd(60_000.5);
        assert!(a < b);
    }

    #[test]
    fn test_calendar_round_trip() {
        let t = UtcInstant::from_calendar(2024, 2, 29, 23, 59, 30.0);
        let (y, mo, d, h, mi, s) = t.to_calendar();
        assert_eq!((y, mo, d, h, mi), (2024, 2, 29, 23, 59));
        assert!((s - 30.0).abs() < 1e-3);
    }

    #[test]
    fn test_display_format() {
        let t = UtcInstant::from_calendar(2023, 5, 1, 12, 0, 0.0);
        assert_eq!(t.to_string(), "2023-05-01T12:00:00.000Z");
    }
}
