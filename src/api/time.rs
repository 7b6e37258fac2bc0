//! Timestamps, calendar days and fetch windows.

use std::fmt;
use std::ops;
use std::str::FromStr;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

//------------ Timestamp -----------------------------------------------------

/// A wrapper for UTC unix timestamps with millisecond precision, with some
/// convenient day arithmetic.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn new(millis: i64) -> Self {
        Timestamp(millis)
    }

    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_millis())
    }

    pub fn millis(self) -> i64 {
        self.0
    }

    /// The calendar day this timestamp falls on.
    pub fn day(self) -> Day {
        Day(self.time().date_naive())
    }

    pub fn minus_days(self, days: i64) -> Self {
        self - Duration::days(days)
    }

    pub fn plus_days(self, days: i64) -> Self {
        self + Duration::days(days)
    }

    /// Whether the value is within the range chrono can represent. Event
    /// normalization rejects timestamps for which this is false.
    pub fn is_representable(self) -> bool {
        DateTime::from_timestamp_millis(self.0).is_some()
    }

    pub fn to_rfc3339(self) -> String {
        self.time().to_rfc3339()
    }

    /// Out-of-range millis clamp to the epoch; normalization keeps such
    /// values out of the engine.
    fn time(self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(time: DateTime<Utc>) -> Self {
        Timestamp(time.timestamp_millis())
    }
}

impl From<Timestamp> for i64 {
    fn from(t: Timestamp) -> Self {
        t.0
    }
}

//--- Display

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//--- Add and Sub

impl ops::Add<Duration> for Timestamp {
    type Output = Self;

    fn add(self, duration: Duration) -> Self::Output {
        Timestamp(self.0 + duration.num_milliseconds())
    }
}

impl ops::Sub<Duration> for Timestamp {
    type Output = Self;

    fn sub(self, duration: Duration) -> Self::Output {
        Timestamp(self.0 - duration.num_milliseconds())
    }
}

//------------ Day -----------------------------------------------------------

/// One UTC calendar day. Snapshots are stored stamped at the start of
/// their day.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Day(NaiveDate);

impl Day {
    /// The day containing the current wall-clock instant.
    pub fn today() -> Self {
        Timestamp::now().day()
    }

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Day)
    }

    /// The timestamp of this day's midnight, i.e. its first instant.
    pub fn start(self) -> Timestamp {
        Timestamp(self.0.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
    }

    pub fn next(self) -> Day {
        Day(self.0 + Duration::days(1))
    }

    pub fn minus_days(self, days: i64) -> Day {
        Day(self.0 - Duration::days(days))
    }

    pub fn plus_days(self, days: i64) -> Day {
        Day(self.0 + Duration::days(days))
    }
}

impl FromStr for Day {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::from_str(s).map(Day)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

//------------ DayRange ------------------------------------------------------

/// A half-open range of calendar days: `start` up to but excluding `end`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DayRange {
    start: Day,
    end: Day,
}

impl DayRange {
    pub fn new(start: Day, end: Day) -> Self {
        let end = end.max(start);
        DayRange { start, end }
    }

    pub fn start(&self) -> Day {
        self.start
    }

    pub fn end(&self) -> Day {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn num_days(&self) -> i64 {
        (self.end.0 - self.start.0).num_days()
    }

    pub fn contains(&self, day: Day) -> bool {
        day >= self.start && day < self.end
    }

    /// The days of the range in ascending order.
    pub fn days(self) -> impl Iterator<Item = Day> {
        std::iter::successors(Some(self.start), |d| Some(d.next()))
            .take_while(move |d| *d < self.end)
    }
}

impl fmt::Display for DayRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

//------------ FetchWindow ---------------------------------------------------

/// The time window events are fetched for. A window without a lower bound
/// asks the source for all history it has. The upper bound is exclusive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct FetchWindow {
    pub start: Option<Timestamp>,
    pub end: Timestamp,
}

impl FetchWindow {
    pub fn bounded(start: Timestamp, end: Timestamp) -> Self {
        FetchWindow {
            start: Some(start),
            end,
        }
    }

    pub fn unbounded(end: Timestamp) -> Self {
        FetchWindow { start: None, end }
    }

    pub fn contains(&self, ts: Timestamp) -> bool {
        self.start.is_none_or(|start| ts >= start) && ts < self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.start {
            Some(start) => write!(f, "[{}, {})", start.to_rfc3339(), self.end.to_rfc3339()),
            None => write!(f, "[.., {})", self.end.to_rfc3339()),
        }
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> Day {
        Day(s.parse().unwrap())
    }

    #[test]
    fn timestamp_day_flooring() {
        let midnight = day("2023-04-05").start();
        assert_eq!(midnight.day(), day("2023-04-05"));
        assert_eq!((midnight + Duration::hours(13)).day(), day("2023-04-05"));
        assert_eq!((midnight - Duration::milliseconds(1)).day(), day("2023-04-04"));
        assert_eq!(midnight.plus_days(1).day(), day("2023-04-06"));
    }

    #[test]
    fn day_start_is_midnight() {
        let d = day("2023-04-05");
        assert_eq!(d.start().to_rfc3339(), "2023-04-05T00:00:00+00:00");
        assert_eq!(d.next().start(), d.start().plus_days(1));
    }

    #[test]
    fn day_range_iteration() {
        let range = DayRange::new(day("2023-04-05"), day("2023-04-08"));
        assert_eq!(range.num_days(), 3);
        let days: Vec<_> = range.days().collect();
        assert_eq!(days, vec![day("2023-04-05"), day("2023-04-06"), day("2023-04-07")]);

        let empty = DayRange::new(day("2023-04-05"), day("2023-04-05"));
        assert!(empty.is_empty());
        assert_eq!(empty.days().count(), 0);

        // An inverted range normalizes to empty.
        let inverted = DayRange::new(day("2023-04-08"), day("2023-04-05"));
        assert!(inverted.is_empty());
    }

    #[test]
    fn fetch_window_bounds() {
        let start = day("2023-04-05").start();
        let end = day("2023-04-10").start();

        let bounded = FetchWindow::bounded(start, end);
        assert!(bounded.contains(start));
        assert!(bounded.contains(end - Duration::milliseconds(1)));
        assert!(!bounded.contains(end));
        assert!(!bounded.contains(start - Duration::milliseconds(1)));

        let unbounded = FetchWindow::unbounded(end);
        assert!(unbounded.contains(Timestamp::new(0)));
        assert!(!unbounded.contains(end));
    }
}
