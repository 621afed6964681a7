//! GPS time conversions.
//!
//! The payload clock and the GPS receiver both report time relative to the
//! GPS epoch (1980-01-06T00:00:00Z). GPS time does not track leap seconds;
//! the fixed offset below converts to UTC.

use chrono::{DateTime, Duration, Utc};

/// GPS currently leads UTC by 18 seconds (fixed for this mission).
pub const GPS_UTC_LEAP_SECONDS: i64 = 18;

/// GPS epoch as a Unix timestamp (1980-01-06T00:00:00Z).
const GPS_EPOCH_UNIX_SECONDS: i64 = 315_964_800;

/// The GPS epoch, 1980-01-06T00:00:00Z.
pub fn gps_epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(GPS_EPOCH_UNIX_SECONDS, 0).expect("GPS epoch is representable")
}

/// UTC reference instant all payload timestamps count from:
/// the GPS epoch shifted back by the leap-second offset.
pub fn reference_date() -> DateTime<Utc> {
    gps_epoch() - Duration::seconds(GPS_UTC_LEAP_SECONDS)
}

/// Convert a payload-clock timestamp (seconds + nanoseconds since the GPS
/// epoch) to UTC.
pub fn payload_timestamp(epoch_seconds: u32, nanoseconds: u32) -> DateTime<Utc> {
    reference_date()
        + Duration::seconds(epoch_seconds as i64)
        + Duration::nanoseconds(nanoseconds as i64)
}

/// Convert a GPS receiver timestamp (week number + milliseconds into the
/// week) to UTC.
pub fn gps_week_timestamp(week: u16, millis_of_week: u32) -> DateTime<Utc> {
    reference_date() + Duration::weeks(week as i64) + Duration::milliseconds(millis_of_week as i64)
}
