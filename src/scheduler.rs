//! # Scheduling Primitives
//!
//! Wall-clock pacing for worker loops. `wait_until_next_interval` sleeps until
//! the next natural boundary of an interval measured from local midnight, so
//! an interval of ten seconds wakes at :00, :10, :20 no matter when the call
//! started. `wait_until` sleeps until an absolute time, rolling over to the
//! next day when that time has already passed.
//!
//! Both primitives block only the calling thread. Worker loops normally use
//! the interruptible versions on [`crate::pool::WorkerContext`], which are
//! built on the calculators in this module.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike};
use std::thread;
use std::time::Duration;

use crate::constants::SECONDS_PER_DAY;
use crate::error::{CommonThreadError, Result};

/// One day
pub const DAY: Duration = Duration::from_secs(SECONDS_PER_DAY);

/// One week
pub const WEEK: Duration = Duration::from_secs(SECONDS_PER_DAY * 7);

pub fn seconds(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

pub fn hours(n: u64) -> Duration {
    Duration::from_secs(n * 3_600)
}

pub fn days(n: u64) -> Duration {
    Duration::from_secs(n * SECONDS_PER_DAY)
}

/// Offset from local midnight, including the fractional second
pub fn seconds_since_midnight<Tz: TimeZone>(at: &DateTime<Tz>) -> Duration {
    since_midnight(at.time())
}

/// Local midnight at the start of the day containing `at`
pub fn midnight(at: DateTime<Local>) -> DateTime<Local> {
    let elapsed = to_chrono(since_midnight(at.time()));
    at - elapsed
}

pub fn tomorrow(at: DateTime<Local>) -> DateTime<Local> {
    at + chrono::Duration::days(1)
}

pub fn from_now(duration: Duration) -> DateTime<Local> {
    Local::now() + to_chrono(duration)
}

pub fn ago(duration: Duration) -> DateTime<Local> {
    Local::now() - to_chrono(duration)
}

/// Today at the given local time of day
pub fn today_at(time: NaiveTime) -> Result<DateTime<Local>> {
    Local::now()
        .date_naive()
        .and_time(time)
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| {
            CommonThreadError::Schedule(format!("{time} does not exist today in the local timezone"))
        })
}

/// Today at `hour` o'clock in the morning (0-23)
pub fn am(hour: u32) -> Result<DateTime<Local>> {
    let time = NaiveTime::from_hms_opt(hour, 0, 0)
        .ok_or_else(|| CommonThreadError::Schedule(format!("invalid hour {hour}am")))?;
    today_at(time)
}

/// Today at `hour` o'clock in the afternoon (0-11)
pub fn pm(hour: u32) -> Result<DateTime<Local>> {
    if hour >= 12 {
        return Err(CommonThreadError::Schedule(format!("invalid hour {hour}pm")));
    }
    am(hour + 12)
}

/// Parse a time of day written as `HH:MM` or `HH:MM:SS`
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|e| CommonThreadError::Schedule(format!("invalid time of day '{value}': {e}")))
}

/// How long to sleep from `now` to land on the next multiple of `interval`
/// counted from local midnight
///
/// Standing exactly on a boundary waits a full interval. A zero interval never waits.
pub fn duration_until_next_interval(now: NaiveTime, interval: Duration) -> Duration {
    let interval_nanos = interval.as_nanos();
    if interval_nanos == 0 {
        return Duration::ZERO;
    }

    let remainder = since_midnight(now).as_nanos() % interval_nanos;
    let wait = interval_nanos - remainder;
    Duration::from_nanos(u64::try_from(wait).unwrap_or(u64::MAX))
}

/// The first occurrence of `target` that lies strictly after `now`, stepping a day at a time
pub fn next_occurrence(target: DateTime<Local>, now: DateTime<Local>) -> DateTime<Local> {
    let mut target = target;
    while target <= now {
        target = tomorrow(target);
    }
    target
}

/// Block until the next natural boundary of `interval`, returning that boundary
pub fn wait_until_next_interval(interval: Duration) -> DateTime<Local> {
    let now = Local::now();
    let wait = duration_until_next_interval(now.time(), interval);
    thread::sleep(wait);
    now + to_chrono(wait)
}

/// Block until `target`, or the same time tomorrow if it already passed; returns the instant waited for
pub fn wait_until(target: DateTime<Local>) -> DateTime<Local> {
    let now = Local::now();
    let target = next_occurrence(target, now);
    thread::sleep(duration_between(now, target));
    target
}

/// Non-negative gap between two instants
pub fn duration_between(from: DateTime<Local>, to: DateTime<Local>) -> Duration {
    (to - from).to_std().unwrap_or(Duration::ZERO)
}

fn since_midnight(time: NaiveTime) -> Duration {
    // Leap seconds report nanoseconds past one billion.
    let nanos = time.nanosecond().min(999_999_999);
    Duration::new(u64::from(time.num_seconds_from_midnight()), nanos)
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::zero())
}
