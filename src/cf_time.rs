//! Decoding CF-convention time coordinates.
//!
//! CMIP6 models use a variety of calendars, most commonly `noleap` and
//! `360_day`, so a time coordinate cannot be converted to chrono datetimes
//! in general. Instead, requested (proleptic Gregorian) timestamps are
//! *encoded* into each file's own calendar and compared numerically with
//! the file's time values. A requested date that does not exist in the
//! file's calendar is simply not covered by that file.
use std::{fmt::Display, str::FromStr, sync::OnceLock};

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

static UNITS_REGEX: OnceLock<regex::Regex> = OnceLock::new();

const SECONDS_PER_DAY: f64 = 86400.0;
const CUM_DAYS_NOLEAP: [i64; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const CUM_DAYS_ALL_LEAP: [i64; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CfTimeError {
    #[error("Could not interpret time units '{0}'")]
    BadUnits(String),
    #[error("Unsupported time unit '{0}' (only days, hours, minutes, and seconds are supported)")]
    UnsupportedUnit(String),
    #[error("Unsupported calendar '{0}'")]
    UnsupportedCalendar(String),
    #[error("Reference date {0} does not exist in the {1} calendar")]
    InvalidReference(String, Calendar),
    #[error("The mixed Julian/Gregorian 'standard' calendar is only supported for reference dates on or after 1582-10-15, got {0}")]
    MixedGregorian(String),
    #[error("Time coordinate values are not strictly increasing at index {0}")]
    NotIncreasing(usize),
}

/// The CF calendars supported for source time coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum Calendar {
    #[strum(to_string = "standard", serialize = "gregorian")]
    Standard,
    #[strum(to_string = "proleptic_gregorian")]
    ProlepticGregorian,
    #[strum(to_string = "noleap", serialize = "365_day")]
    NoLeap,
    #[strum(to_string = "all_leap", serialize = "366_day")]
    AllLeap,
    #[strum(to_string = "360_day")]
    Day360,
    #[strum(to_string = "julian")]
    Julian,
}

impl Calendar {
    pub fn days_in_month(&self, year: i32, month: u32) -> Option<u32> {
        if !(1..=12).contains(&month) {
            return None;
        }

        let n = match self {
            Calendar::Day360 => 30,
            Calendar::NoLeap => (CUM_DAYS_NOLEAP.get(month as usize).copied().unwrap_or(365)
                - CUM_DAYS_NOLEAP[month as usize - 1]) as u32,
            Calendar::AllLeap => (CUM_DAYS_ALL_LEAP.get(month as usize).copied().unwrap_or(366)
                - CUM_DAYS_ALL_LEAP[month as usize - 1]) as u32,
            Calendar::Julian => {
                if month == 2 {
                    if year.rem_euclid(4) == 0 {
                        29
                    } else {
                        28
                    }
                } else {
                    Calendar::NoLeap.days_in_month(year, month)?
                }
            }
            Calendar::Standard | Calendar::ProlepticGregorian => {
                let first = NaiveDate::from_ymd_opt(year, month, 1)?;
                let next = if month == 12 {
                    NaiveDate::from_ymd_opt(year + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(year, month + 1, 1)?
                };
                (next - first).num_days() as u32
            }
        };
        Some(n)
    }

    /// Count of days from an arbitrary (calendar-specific) epoch to the given date,
    /// or `None` if the date does not exist in this calendar.
    pub fn day_number(&self, year: i32, month: u32, day: u32) -> Option<i64> {
        if day < 1 || day > self.days_in_month(year, month)? {
            return None;
        }

        let (y, m, d) = (year as i64, month as i64, day as i64);
        let n = match self {
            Calendar::Standard | Calendar::ProlepticGregorian => {
                NaiveDate::from_ymd_opt(year, month, day)?.num_days_from_ce() as i64
            }
            Calendar::NoLeap => y * 365 + CUM_DAYS_NOLEAP[month as usize - 1] + d - 1,
            Calendar::AllLeap => y * 366 + CUM_DAYS_ALL_LEAP[month as usize - 1] + d - 1,
            Calendar::Day360 => y * 360 + (m - 1) * 30 + d - 1,
            Calendar::Julian => {
                // Julian day number for a date in the Julian calendar
                let a = (14 - m) / 12;
                let yy = y + 4800 - a;
                let mm = m + 12 * a - 3;
                d + (153 * mm + 2) / 5 + 365 * yy + yy.div_euclid(4) - 32083
            }
        };
        Some(n)
    }

    /// Inverse of [`Calendar::day_number`].
    pub fn date_from_day_number(&self, n: i64) -> Option<(i32, u32, u32)> {
        let split_year = |n: i64, year_len: i64, cum: &[i64; 12]| {
            let year = n.div_euclid(year_len);
            let doy = n.rem_euclid(year_len);
            let month = cum.iter().rposition(|&c| c <= doy).unwrap_or(0);
            (year as i32, month as u32 + 1, (doy - cum[month]) as u32 + 1)
        };

        let ymd = match self {
            Calendar::Standard | Calendar::ProlepticGregorian => {
                let date = NaiveDate::from_num_days_from_ce_opt(i32::try_from(n).ok()?)?;
                (date.year(), date.month(), date.day())
            }
            Calendar::NoLeap => split_year(n, 365, &CUM_DAYS_NOLEAP),
            Calendar::AllLeap => split_year(n, 366, &CUM_DAYS_ALL_LEAP),
            Calendar::Day360 => {
                let year = n.div_euclid(360);
                let doy = n.rem_euclid(360);
                (year as i32, (doy / 30) as u32 + 1, (doy % 30) as u32 + 1)
            }
            Calendar::Julian => {
                let c = n + 32082;
                let d = (4 * c + 3).div_euclid(1461);
                let e = c - (1461 * d).div_euclid(4);
                let m = (5 * e + 2) / 153;
                let day = e - (153 * m + 2) / 5 + 1;
                let month = m + 3 - 12 * (m / 10);
                let year = d - 4800 + m / 10;
                (year as i32, month as u32, day as u32)
            }
        };
        Some(ymd)
    }
}

/// A date and time in some (possibly non-Gregorian) calendar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalendarDateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: f64,
}

impl CalendarDateTime {
    fn seconds_of_day(&self) -> f64 {
        (self.hour * 3600 + self.minute * 60) as f64 + self.second
    }

    /// Convert to a chrono datetime, if this date exists in the proleptic Gregorian calendar.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let whole = self.second.floor();
        let nanos = ((self.second - whole) * 1e9).round() as u32;
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)?.and_hms_nano_opt(
            self.hour,
            self.minute,
            whole as u32,
            nanos.min(999_999_999),
        )
    }
}

impl From<&NaiveDateTime> for CalendarDateTime {
    fn from(t: &NaiveDateTime) -> Self {
        Self {
            year: t.year(),
            month: t.month(),
            day: t.day(),
            hour: t.hour(),
            minute: t.minute(),
            second: t.second() as f64 + t.nanosecond() as f64 * 1e-9,
        }
    }
}

impl Display for CalendarDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}_{:02}:{:02}:{:02}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second.floor() as u32
        )
    }
}

/// A decoded CF time coordinate: `values` in `<unit> since <reference>` in `calendar`.
#[derive(Debug, Clone)]
pub struct CfTimeAxis {
    unit_seconds: f64,
    calendar: Calendar,
    reference: CalendarDateTime,
    reference_day: i64,
    values: Vec<f64>,
}

impl CfTimeAxis {
    /// Build a time axis from the `units` and `calendar` attributes of a time coordinate.
    ///
    /// A missing calendar means `standard`, per the CF conventions. The values must be
    /// strictly increasing.
    pub fn new(units: &str, calendar: Option<&str>, values: Vec<f64>) -> Result<Self, CfTimeError> {
        let calendar = match calendar.map(|c| c.trim()) {
            None | Some("") => Calendar::Standard,
            Some(c) => {
                Calendar::from_str(c).map_err(|_| CfTimeError::UnsupportedCalendar(c.to_string()))?
            }
        };

        let (unit_seconds, reference) = parse_units(units)?;
        if calendar == Calendar::Standard
            && (reference.year, reference.month, reference.day) < (1582, 10, 15)
        {
            return Err(CfTimeError::MixedGregorian(reference.to_string()));
        }

        let reference_day = calendar
            .day_number(reference.year, reference.month, reference.day)
            .ok_or_else(|| CfTimeError::InvalidReference(reference.to_string(), calendar))?;

        for (i, pair) in values.windows(2).enumerate() {
            // Written this way so that NaNs are caught as well.
            if !(pair[1] > pair[0]) {
                return Err(CfTimeError::NotIncreasing(i + 1));
            }
        }
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(CfTimeError::NotIncreasing(i));
        }

        Ok(Self {
            unit_seconds,
            calendar,
            reference,
            reference_day,
            values,
        })
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Express `t` in this axis's units and calendar, or `None` if that date does not
    /// exist in the calendar (e.g. 29 Feb in a `noleap` file).
    pub fn encode(&self, t: &NaiveDateTime) -> Option<f64> {
        let cdt = CalendarDateTime::from(t);
        let day = self.calendar.day_number(cdt.year, cdt.month, cdt.day)?;
        let seconds = (day - self.reference_day) as f64 * SECONDS_PER_DAY + cdt.seconds_of_day()
            - self.reference.seconds_of_day();
        Some(seconds / self.unit_seconds)
    }

    /// Decode the value at `index` into a date in this axis's calendar.
    pub fn decode(&self, index: usize) -> Option<CalendarDateTime> {
        let seconds = self.values.get(index)? * self.unit_seconds + self.reference.seconds_of_day();
        let days = (seconds / SECONDS_PER_DAY).floor();
        let mut sod = seconds - days * SECONDS_PER_DAY;
        // Guard against values like 86399.9999999 from rounding in the multiplication
        if (SECONDS_PER_DAY - sod).abs() < 1e-6 {
            sod = 0.0;
            return self.decode_parts(days as i64 + 1, sod);
        }
        self.decode_parts(days as i64, sod)
    }

    fn decode_parts(&self, days: i64, sod: f64) -> Option<CalendarDateTime> {
        let (year, month, day) = self
            .calendar
            .date_from_day_number(self.reference_day + days)?;
        let sod = (sod * 1e6).round() / 1e6;
        let hour = (sod / 3600.0).floor() as u32;
        let minute = ((sod - hour as f64 * 3600.0) / 60.0).floor() as u32;
        let second = sod - (hour * 3600 + minute * 60) as f64;
        Some(CalendarDateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Index of the time value nearest to `t`, if it is within `tolerance_seconds` of `t`.
    pub fn nearest_index(&self, t: &NaiveDateTime, tolerance_seconds: f64) -> Option<usize> {
        let target = self.encode(t)?;
        let i = self.values.partition_point(|&v| v < target);
        let candidates = [i.checked_sub(1), Some(i)];
        let (best, diff) = candidates
            .into_iter()
            .flatten()
            .filter_map(|j| self.values.get(j).map(|v| (j, (v - target).abs())))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        if diff * self.unit_seconds <= tolerance_seconds {
            Some(best)
        } else {
            None
        }
    }

    /// First and last dates covered by this axis, for reporting.
    pub fn coverage(&self) -> Option<(CalendarDateTime, CalendarDateTime)> {
        let first = self.decode(0)?;
        let last = self.decode(self.values.len().checked_sub(1)?)?;
        Some((first, last))
    }
}

fn parse_units(units: &str) -> Result<(f64, CalendarDateTime), CfTimeError> {
    let re = UNITS_REGEX.get_or_init(|| {
        regex::Regex::new(
            r"(?i)^\s*(?<unit>[a-z]+)\s+since\s+(?<year>[+-]?\d{1,5})-(?<month>\d{1,2})-(?<day>\d{1,2})(?:[T\s]+(?<hour>\d{1,2}):(?<minute>\d{1,2})(?::(?<second>\d{1,2}(?:\.\d*)?))?)?\s*(?:Z|UTC|[+-]0{1,2}:?0{0,2})?\s*$",
        )
        .expect("Could not compile CF time units regex")
    });

    let bad = || CfTimeError::BadUnits(units.to_string());
    let caps = re.captures(units).ok_or_else(bad)?;

    let unit = caps["unit"].to_ascii_lowercase();
    let unit_seconds = match unit.as_str() {
        "days" | "day" | "d" => SECONDS_PER_DAY,
        "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
        "minutes" | "minute" | "mins" | "min" => 60.0,
        "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
        _ => return Err(CfTimeError::UnsupportedUnit(unit)),
    };

    let int_field = |name: &str| -> Result<u32, CfTimeError> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u32>().map_err(|_| bad()))
            .unwrap_or(Ok(0))
    };
    let reference = CalendarDateTime {
        year: caps["year"].parse::<i32>().map_err(|_| bad())?,
        month: int_field("month")?,
        day: int_field("day")?,
        hour: int_field("hour")?,
        minute: int_field("minute")?,
        second: caps
            .name("second")
            .map(|m| m.as_str().parse::<f64>().map_err(|_| bad()))
            .unwrap_or(Ok(0.0))?,
    };

    if reference.hour > 23 || reference.minute > 59 || reference.second >= 61.0 {
        return Err(bad());
    }

    Ok((unit_seconds, reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[rstest]
    #[case("days since 1850-01-01", 86400.0)]
    #[case("hours since 1850-01-01 00:00:00", 3600.0)]
    #[case("minutes since 2000-1-1 0:0:0", 60.0)]
    #[case("seconds since 1970-01-01T00:00:00Z", 1.0)]
    #[case("Days since 1850-01-01 00:00:00.0", 86400.0)]
    fn test_parse_units(#[case] units: &str, #[case] expected: f64) {
        let (unit_seconds, _) = parse_units(units).unwrap();
        assert_abs_diff_eq!(unit_seconds, expected);
    }

    #[test]
    fn test_bad_units() {
        assert_eq!(
            parse_units("months since 1850-01-01"),
            Err(CfTimeError::UnsupportedUnit("months".to_string()))
        );
        assert!(matches!(
            parse_units("hours after 1850-01-01"),
            Err(CfTimeError::BadUnits(_))
        ));
    }

    #[rstest]
    #[case(Calendar::ProlepticGregorian)]
    #[case(Calendar::NoLeap)]
    #[case(Calendar::AllLeap)]
    #[case(Calendar::Day360)]
    #[case(Calendar::Julian)]
    fn test_day_number_inverse(#[case] calendar: Calendar) {
        for (y, m, d) in [(1850, 1, 1), (2000, 2, 28), (2014, 12, 30), (2100, 7, 15), (1, 3, 1)] {
            let n = calendar.day_number(y, m, d).unwrap();
            assert_eq!(calendar.date_from_day_number(n), Some((y, m, d)), "{calendar}");
            let next = calendar.date_from_day_number(n + 1).unwrap();
            assert_ne!(next, (y, m, d));
        }
    }

    #[test]
    fn test_calendar_lengths() {
        assert_eq!(Calendar::NoLeap.days_in_month(2000, 2), Some(28));
        assert_eq!(Calendar::AllLeap.days_in_month(2001, 2), Some(29));
        assert_eq!(Calendar::Day360.days_in_month(2001, 1), Some(30));
        assert_eq!(Calendar::Julian.days_in_month(1900, 2), Some(29));
        assert_eq!(Calendar::ProlepticGregorian.days_in_month(1900, 2), Some(28));
        assert_eq!(Calendar::NoLeap.day_number(2000, 2, 29), None);
        assert_eq!(Calendar::Day360.day_number(2000, 1, 31), None);
    }

    #[test]
    fn test_calendar_names() {
        assert_eq!(Calendar::from_str("365_day").unwrap(), Calendar::NoLeap);
        assert_eq!(Calendar::from_str("Gregorian").unwrap(), Calendar::Standard);
        assert_eq!(Calendar::Day360.to_string(), "360_day");
    }

    #[test]
    fn test_encode_standard() {
        let axis = CfTimeAxis::new("hours since 2010-01-01 00:00:00", None, vec![0.0]).unwrap();
        assert_abs_diff_eq!(axis.encode(&dt(2010, 1, 5, 6)).unwrap(), 102.0);
    }

    #[test]
    fn test_encode_noleap() {
        let axis = CfTimeAxis::new("days since 1850-01-01", Some("noleap"), vec![0.0]).unwrap();
        // 2000-03-01 in noleap: 150 years of 365 days plus Jan and Feb
        assert_abs_diff_eq!(
            axis.encode(&dt(2000, 3, 1, 0)).unwrap(),
            150.0 * 365.0 + 59.0
        );
        assert_eq!(axis.encode(&dt(2000, 2, 29, 0)), None);
    }

    #[test]
    fn test_nearest_index() {
        let axis = CfTimeAxis::new(
            "days since 2010-01-01",
            Some("360_day"),
            vec![0.0, 0.25, 0.5, 0.75, 1.0],
        )
        .unwrap();
        assert_eq!(axis.nearest_index(&dt(2010, 1, 1, 12), 60.0), Some(2));
        assert_eq!(axis.nearest_index(&dt(2010, 1, 2, 0), 60.0), Some(4));
        assert_eq!(axis.nearest_index(&dt(2010, 1, 1, 3), 60.0), None);
        assert_eq!(axis.nearest_index(&dt(2010, 1, 1, 3), 3.0 * 3600.0), Some(0));
        assert_eq!(axis.nearest_index(&dt(2010, 1, 31, 0), 1e9), None);
    }

    #[test]
    fn test_nearest_index_mean_times() {
        // Time means are often stamped in the middle of the averaging period
        let axis = CfTimeAxis::new(
            "days since 1850-01-01",
            Some("proleptic_gregorian"),
            vec![58439.0 + 1.0 / 8.0, 58439.0 + 3.0 / 8.0],
        )
        .unwrap();
        let t = axis.decode(0).unwrap().to_naive().unwrap();
        assert_eq!(t, dt(2010, 1, 1, 3));
        assert_eq!(axis.nearest_index(&dt(2010, 1, 1, 3), 1.0), Some(0));
        assert_eq!(axis.nearest_index(&dt(2010, 1, 1, 0), 1.0), None);
    }

    #[test]
    fn test_decode_and_coverage() {
        let axis = CfTimeAxis::new(
            "hours since 2010-01-01 00:00:00",
            Some("noleap"),
            vec![0.0, 6.0, 1422.0],
        )
        .unwrap();
        let (first, last) = axis.coverage().unwrap();
        assert_eq!(first.to_string(), "2010-01-01_00:00:00");
        // 1422 hours is 59 days and 6 hours, and there is no 29 Feb in a noleap year
        assert_eq!(last.to_string(), "2010-03-01_06:00:00");
        assert_eq!(axis.decode(3), None);
    }

    #[test]
    fn test_invalid_axes() {
        assert_eq!(
            CfTimeAxis::new("days since 1850-01-01", None, vec![0.0, 1.0, 1.0]).unwrap_err(),
            CfTimeError::NotIncreasing(2)
        );
        assert!(matches!(
            CfTimeAxis::new("days since 1500-01-01", Some("standard"), vec![0.0]),
            Err(CfTimeError::MixedGregorian(_))
        ));
        assert!(matches!(
            CfTimeAxis::new("days since 1850-01-01", Some("lunar"), vec![0.0]),
            Err(CfTimeError::UnsupportedCalendar(_))
        ));
        assert!(matches!(
            CfTimeAxis::new("days since 1850-02-30", Some("noleap"), vec![0.0]),
            Err(CfTimeError::InvalidReference(..))
        ));
    }
}
