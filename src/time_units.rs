//! Decoding CF-convention time coordinates ("days since 1850-01-01", etc.)
//! into calendar years.
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveTime, TimeDelta, Timelike};

use crate::cube::Coord;

const SECONDS_PER_DAY: f64 = 86400.0;
const NOLEAP_MONTH_STARTS: [u32; 12] = [0, 31, 59, 90, 120, 151, 181, 212, 243, 273, 304, 334];
const ALL_LEAP_MONTH_STARTS: [u32; 12] = [0, 31, 60, 91, 121, 152, 182, 213, 244, 274, 305, 335];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimeUnitsError {
    #[error("Time coordinate '{0}' has no units")]
    MissingUnits(String),
    #[error("Time units '{0}' are not of the form '<unit> since <reference date>'")]
    BadFormat(String),
    #[error("Unknown time unit '{0}'")]
    UnknownUnit(String),
    #[error("Could not parse reference date '{0}'")]
    BadReferenceDate(String),
    #[error("Calendar '{0}' is not supported")]
    UnsupportedCalendar(String),
    #[error("Time value {0} cannot be converted to a date")]
    OutOfRange(f64),
}

/// The CF calendars whose years can be computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calendar {
    /// Proleptic Gregorian. "standard" and "gregorian" are treated as this too,
    /// which only differs for dates before 1582.
    Standard,
    NoLeap,
    AllLeap,
    Day360,
}

impl Calendar {
    fn year_length(&self) -> Option<f64> {
        match self {
            Calendar::Standard => None,
            Calendar::NoLeap => Some(365.0),
            Calendar::AllLeap => Some(366.0),
            Calendar::Day360 => Some(360.0),
        }
    }
}

impl FromStr for Calendar {
    type Err = TimeUnitsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "gregorian" | "proleptic_gregorian" => Ok(Self::Standard),
            "noleap" | "365_day" => Ok(Self::NoLeap),
            "all_leap" | "366_day" => Ok(Self::AllLeap),
            "360_day" => Ok(Self::Day360),
            _ => Err(TimeUnitsError::UnsupportedCalendar(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReferenceDate {
    year: i32,
    month: u32,
    day: u32,
    second_of_day: u32,
}

impl ReferenceDate {
    fn parse(s: &str) -> Result<Self, TimeUnitsError> {
        let bad = || TimeUnitsError::BadReferenceDate(s.to_string());

        let mut tokens = s.split_whitespace();
        let first = tokens.next().ok_or_else(bad)?;
        let (date_str, time_str) = match first.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (first, tokens.next().filter(|t| t.contains(':'))),
        };

        let mut parts = date_str.splitn(3, '-');
        let year: i32 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        let month: u32 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        let day: u32 = parts.next().and_then(|v| v.parse().ok()).ok_or_else(bad)?;
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
            return Err(bad());
        }

        let second_of_day = if let Some(t) = time_str {
            let t = t.trim_end_matches('Z');
            let time = NaiveTime::parse_from_str(t, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
                .map_err(|_| bad())?;
            time.num_seconds_from_midnight()
        } else {
            0
        };

        Ok(Self { year, month, day, second_of_day })
    }

    fn day_of_year(&self, calendar: Calendar) -> f64 {
        let m = (self.month - 1) as usize;
        let doy = match calendar {
            Calendar::Day360 => (self.month - 1) * 30 + self.day - 1,
            Calendar::AllLeap => ALL_LEAP_MONTH_STARTS[m] + self.day - 1,
            Calendar::NoLeap | Calendar::Standard => NOLEAP_MONTH_STARTS[m] + self.day - 1,
        };
        doy as f64 + self.second_of_day as f64 / SECONDS_PER_DAY
    }
}

/// Parsed CF time units together with the calendar they apply to.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnits {
    seconds_per_unit: f64,
    reference: ReferenceDate,
    calendar: Calendar,
}

impl TimeUnits {
    /// Parse a units string like "days since 1850-01-01 00:00:00". A missing
    /// calendar means "standard".
    pub fn parse(units: &str, calendar: Option<&str>) -> Result<Self, TimeUnitsError> {
        let (unit, reference) = units
            .split_once(" since ")
            .ok_or_else(|| TimeUnitsError::BadFormat(units.to_string()))?;

        let seconds_per_unit = match unit.trim().to_ascii_lowercase().as_str() {
            "seconds" | "second" | "secs" | "sec" | "s" => 1.0,
            "minutes" | "minute" | "mins" | "min" => 60.0,
            "hours" | "hour" | "hrs" | "hr" | "h" => 3600.0,
            "days" | "day" | "d" => SECONDS_PER_DAY,
            other => return Err(TimeUnitsError::UnknownUnit(other.to_string())),
        };

        let reference = ReferenceDate::parse(reference.trim())?;
        let calendar = calendar.map(Calendar::from_str).transpose()?.unwrap_or(Calendar::Standard);
        Ok(Self { seconds_per_unit, reference, calendar })
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    /// The calendar year that the time value `value` falls in.
    pub fn year_of(&self, value: f64) -> Result<i32, TimeUnitsError> {
        if !value.is_finite() {
            return Err(TimeUnitsError::OutOfRange(value));
        }

        let seconds = value * self.seconds_per_unit;
        if let Some(year_length) = self.calendar.year_length() {
            let days = self.reference.day_of_year(self.calendar) + seconds / SECONDS_PER_DAY;
            let offset = (days / year_length).floor();
            return Ok(self.reference.year + offset as i32);
        }

        let r = &self.reference;
        let start = NaiveDate::from_ymd_opt(r.year, r.month, r.day)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(|| TimeUnitsError::BadReferenceDate(format!("{}-{}-{}", r.year, r.month, r.day)))?;
        let millis = ((seconds + r.second_of_day as f64) * 1000.0).round();
        let delta = TimeDelta::try_milliseconds(millis as i64)
            .ok_or(TimeUnitsError::OutOfRange(value))?;
        let datetime = start
            .checked_add_signed(delta)
            .ok_or(TimeUnitsError::OutOfRange(value))?;
        Ok(datetime.year())
    }
}

/// Decode the year of every point of a time coordinate.
pub fn decode_years(coord: &Coord) -> Result<Vec<i32>, TimeUnitsError> {
    let units = coord
        .units
        .as_deref()
        .ok_or_else(|| TimeUnitsError::MissingUnits(coord.name.clone()))?;
    let units = TimeUnits::parse(units, coord.calendar.as_deref())?;
    coord.points.iter().map(|&v| units.year_of(v)).collect()
}
