//! The requested output times and the WPS conventions for writing them.
//!
//! All times here are naive datetimes interpreted as UTC in the proleptic
//! Gregorian calendar. Source files in other calendars are handled by
//! [`crate::cf_time`].
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::{error::TimeAxisError, settings::FileNaming};

static DATETIME_REGEX: OnceLock<regex::Regex> = OnceLock::new();
static INTERVAL_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// Format of the HDATE field in intermediate records.
pub const WPS_DATE_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Generate the timestamps `start, start + interval, ...` up to and including `end`.
///
/// `end` is only included if it falls exactly on an interval boundary from `start`;
/// otherwise the last timestamp is the latest one before `end`. Returns
/// [`TimeAxisError::InvalidRange`] if `interval` is not positive or `start` is after `end`.
pub fn generate(
    start: NaiveDateTime,
    end: NaiveDateTime,
    interval: TimeDelta,
) -> Result<Vec<NaiveDateTime>, TimeAxisError> {
    if interval <= TimeDelta::zero() {
        return Err(TimeAxisError::InvalidRange(format!(
            "interval must be positive, got {} seconds",
            interval.num_seconds()
        )));
    }

    if start > end {
        return Err(TimeAxisError::InvalidRange(format!(
            "start ({start}) is after end ({end})"
        )));
    }

    let mut times = vec![];
    let mut t = start;
    while t <= end {
        times.push(t);
        t = match t.checked_add_signed(interval) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(times)
}

/// Parse a calendar timestamp given on the command line.
///
/// Accepts `YYYY-MM-DD` optionally followed by `T`, `_` or a space and an hour,
/// `HH:MM`, or `HH:MM:SS`, with an optional trailing `Z`. So `2010-01-05`,
/// `2010-01-05T06`, `2010-01-05_06:00:00` and `2010-01-05 06:30` are all valid.
pub fn parse_datetime(s: &str) -> Result<NaiveDateTime, TimeAxisError> {
    let re = DATETIME_REGEX.get_or_init(|| {
        regex::Regex::new(
            r"^(?<year>\d{4})-(?<month>\d{1,2})-(?<day>\d{1,2})(?:[T_ ](?<hour>\d{1,2})(?::(?<minute>\d{1,2})(?::(?<second>\d{1,2}))?)?)?Z?$",
        )
        .expect("Could not compile datetime regex")
    });

    let bad = || TimeAxisError::BadDateTime(s.to_string());
    let caps = re.captures(s.trim()).ok_or_else(bad)?;
    let field = |name: &str| -> Result<u32, TimeAxisError> {
        caps.name(name)
            .map(|m| m.as_str().parse::<u32>().map_err(|_| bad()))
            .unwrap_or(Ok(0))
    };

    let year = caps["year"].parse::<i32>().map_err(|_| bad())?;
    let (month, day) = (field("month")?, field("day")?);
    let (hour, minute, second) = (field("hour")?, field("minute")?, field("second")?);
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .ok_or_else(bad)
}

/// Parse an interval such as `6 hours`, `6h`, `6H`, `30min`, or `1 day`.
///
/// Negative and zero intervals parse successfully; [`generate`] rejects them.
pub fn parse_interval(s: &str) -> Result<TimeDelta, TimeAxisError> {
    let re = INTERVAL_REGEX.get_or_init(|| {
        regex::Regex::new(r"^(?<count>[+-]?\d+)\s*(?<unit>[A-Za-z]+)$")
            .expect("Could not compile interval regex")
    });

    let bad = || TimeAxisError::BadInterval(s.to_string());
    let caps = re.captures(s.trim()).ok_or_else(bad)?;
    let count = caps["count"].parse::<i64>().map_err(|_| bad())?;

    // "T" and "S" are the pandas aliases for minutes and seconds.
    let delta = match &caps["unit"] {
        "d" | "D" | "day" | "days" => TimeDelta::try_days(count),
        "h" | "H" | "hr" | "hrs" | "hour" | "hours" => TimeDelta::try_hours(count),
        "T" | "min" | "mins" | "minute" | "minutes" => TimeDelta::try_minutes(count),
        "s" | "S" | "sec" | "secs" | "second" | "seconds" => TimeDelta::try_seconds(count),
        _ => None,
    };
    delta.ok_or_else(bad)
}

/// Format a timestamp as the 19 character HDATE used inside intermediate records.
pub fn wps_hdate(t: &NaiveDateTime) -> String {
    t.format(WPS_DATE_FORMAT).to_string()
}

/// The date part of an output file name.
///
/// With [`FileNaming::Ungrib`], the date is truncated the same way `ungrib.exe` names
/// its output and `metgrid.exe` looks for its input: to the hour if `interval` is a
/// whole number of hours, to the minute if it is a whole number of minutes, and the
/// full timestamp otherwise. [`FileNaming::Full`] always gives the full timestamp.
pub fn file_date(t: &NaiveDateTime, interval: TimeDelta, naming: FileNaming) -> String {
    let secs = interval.num_seconds();
    let fmt = match naming {
        FileNaming::Full => WPS_DATE_FORMAT,
        FileNaming::Ungrib if secs % 3600 == 0 => "%Y-%m-%d_%H",
        FileNaming::Ungrib if secs % 60 == 0 => "%Y-%m-%d_%H:%M",
        FileNaming::Ungrib => WPS_DATE_FORMAT,
    };
    t.format(fmt).to_string()
}

/// Output file name for timestamp `t`: `<prefix>:<date>`.
pub fn output_file_name(
    prefix: &str,
    t: &NaiveDateTime,
    interval: TimeDelta,
    naming: FileNaming,
) -> String {
    format!("{prefix}:{}", file_date(t, interval, naming))
}
