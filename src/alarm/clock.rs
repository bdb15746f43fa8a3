//! Wall-clock access for the cooldown.
//!
//! The alarm needs two things from a clock: the current instant, and the
//! next occurrence of a local time of day. Both go through [`Clock`] so tests
//! can pin them.

use std::sync::Mutex;

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;

    /// The first instant strictly after `now` whose local time is `at`.
    fn next_local(&self, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc>;
}

/// Next `at` in `tz` strictly after `now`.
///
/// At or past `at` today means tomorrow. If `at` falls in a DST gap the
/// first valid instant after the gap is used; in an overlap, the earlier one.
pub fn next_local_in<Tz: TimeZone>(tz: &Tz, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
    let local = now.with_timezone(tz).naive_local();
    let mut date = local.date();
    if local.time() >= at {
        date = date.succ_opt().unwrap_or(date);
    }

    let target = resolve_local(tz, date.and_time(at)).unwrap_or(now + Duration::days(1));
    if target > now {
        target
    } else {
        now + Duration::days(1)
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        // Spring-forward gap; gaps are at most an hour in practice.
        LocalResult::None => tz
            .from_local_datetime(&(naive + Duration::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc)),
    }
}

/// The host clock in the host's local time zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn next_local(&self, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
        next_local_in(&chrono::Local, now, at)
    }
}

/// A settable clock with a fixed UTC offset, for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    offset: FixedOffset,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            now: Mutex::new(now),
            offset,
        }
    }

    /// Clock set to a UTC instant, local time equal to UTC.
    ///
    /// Returns `None` for an invalid date or time.
    pub fn at_utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Option<Self> {
        let now = Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).single()?;
        Some(Self::new(now, FixedOffset::east_opt(0)?))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
            .lock()
            .map_or(DateTime::<Utc>::UNIX_EPOCH, |guard| *guard)
    }

    fn next_local(&self, now: DateTime<Utc>, at: NaiveTime) -> DateTime<Utc> {
        next_local_in(&self.offset, now, at)
    }
}
