// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Temporal types.
//!
//! Thin wrappers around [`chrono`] which pin down the exact value range the
//! wire format can express. All zoned values travel as UTC plus an offset
//! (Bolt 5 encodes date times UTC-based only).

use chrono::{
    DateTime as ChronoDateTime, Datelike, Duration as ChronoDuration, FixedOffset, NaiveDate,
    NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A date without time zone: days since the epoch on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Date(pub NaiveDate);

impl Date {
    pub(crate) fn days_since_epoch(&self) -> i64 {
        i64::from(self.0.num_days_from_ce()) - days_from_ce_of_epoch()
    }

    pub(crate) fn from_days_since_epoch(days: i64) -> Option<Self> {
        let days_from_ce = days.checked_add(days_from_ce_of_epoch())?;
        let days_from_ce = i32::try_from(days_from_ce).ok()?;
        NaiveDate::from_num_days_from_ce_opt(days_from_ce).map(Self)
    }
}

fn days_from_ce_of_epoch() -> i64 {
    i64::from(
        NaiveDate::from_ymd_opt(1970, 1, 1)
            .expect("epoch date is valid")
            .num_days_from_ce(),
    )
}

/// A wall clock time without time zone: nanoseconds since midnight.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalTime(pub NaiveTime);

impl LocalTime {
    pub(crate) fn nanos_since_midnight(&self) -> i64 {
        i64::from(self.0.num_seconds_from_midnight()) * NANOS_PER_SEC
            + i64::from(self.0.nanosecond())
    }

    pub(crate) fn from_nanos_since_midnight(nanos: i64) -> Option<Self> {
        if nanos < 0 {
            return None;
        }
        let secs = u32::try_from(nanos / NANOS_PER_SEC).ok()?;
        let nano = u32::try_from(nanos % NANOS_PER_SEC).ok()?;
        NaiveTime::from_num_seconds_from_midnight_opt(secs, nano).map(Self)
    }
}

/// A wall clock time with a UTC offset.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Time {
    pub time: NaiveTime,
    pub utc_offset_seconds: i32,
}

impl Time {
    pub(crate) fn nanos_since_midnight(&self) -> i64 {
        LocalTime(self.time).nanos_since_midnight()
    }

    pub(crate) fn from_wire(nanos: i64, utc_offset_seconds: i64) -> Option<Self> {
        let utc_offset_seconds = i32::try_from(utc_offset_seconds).ok()?;
        FixedOffset::east_opt(utc_offset_seconds)?;
        Some(Self {
            time: LocalTime::from_nanos_since_midnight(nanos)?.0,
            utc_offset_seconds,
        })
    }
}

/// A date time without time zone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalDateTime(pub NaiveDateTime);

impl LocalDateTime {
    pub(crate) fn seconds_since_epoch(&self) -> i64 {
        self.0.and_utc().timestamp()
    }

    pub(crate) fn nanosecond(&self) -> i64 {
        i64::from(self.0.nanosecond())
    }

    pub(crate) fn from_wire(seconds: i64, nanos: i64) -> Option<Self> {
        let nanos = u32::try_from(nanos).ok()?;
        ChronoDateTime::from_timestamp(seconds, nanos).map(|dt| Self(dt.naive_utc()))
    }
}

/// A date time pinned to a fixed UTC offset.
///
/// On the wire: seconds and nanoseconds since the epoch *in UTC*, plus the
/// offset in seconds.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DateTime(pub ChronoDateTime<FixedOffset>);

impl DateTime {
    pub(crate) fn utc_seconds_since_epoch(&self) -> i64 {
        self.0.timestamp()
    }

    pub(crate) fn nanosecond(&self) -> i64 {
        i64::from(self.0.nanosecond())
    }

    pub(crate) fn utc_offset_seconds(&self) -> i64 {
        i64::from(self.0.offset().local_minus_utc())
    }

    pub(crate) fn from_wire(seconds: i64, nanos: i64, utc_offset_seconds: i64) -> Option<Self> {
        let nanos = u32::try_from(nanos).ok()?;
        let offset = FixedOffset::east_opt(i32::try_from(utc_offset_seconds).ok()?)?;
        let utc = Utc.timestamp_opt(seconds, nanos).single()?;
        Some(Self(utc.with_timezone(&offset)))
    }
}

/// A date time in a named time zone the server resolved (e.g.,
/// `"Europe/Stockholm"`).
///
/// The instant is kept UTC-based; resolving the zone id to an offset
/// requires a time zone database and is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateTimeZoneId {
    pub utc_seconds_since_epoch: i64,
    pub nanosecond: u32,
    pub zone_id: String,
}

impl DateTimeZoneId {
    pub(crate) fn from_wire(seconds: i64, nanos: i64, zone_id: String) -> Option<Self> {
        Some(Self {
            utc_seconds_since_epoch: seconds,
            nanosecond: u32::try_from(nanos).ok()?,
            zone_id,
        })
    }
}

/// The server's duration type: months, days, seconds and nanoseconds are
/// kept apart because their lengths aren't interconvertible without a
/// calendar.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Duration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanoseconds: i64,
}

impl Duration {
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i64) -> Self {
        Self {
            months,
            days,
            seconds,
            nanoseconds,
        }
    }
}

impl From<ChronoDuration> for Duration {
    fn from(d: ChronoDuration) -> Self {
        let seconds = d.num_seconds();
        let nanoseconds = (d - ChronoDuration::seconds(seconds))
            .num_nanoseconds()
            .expect("sub-second remainder always fits i64 nanoseconds");
        Self {
            months: 0,
            days: 0,
            seconds,
            nanoseconds,
        }
    }
}
