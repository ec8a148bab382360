//! Conversion between ZIP timestamps (local date and time, 1980 to 2107,
//! two second resolution) and `SystemTime`, interpreting them as UTC.

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use std::time::SystemTime;

pub(crate) fn to_system_time(time: zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?;
    let moment = date.and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Some(SystemTime::from(moment.and_utc()))
}

/// `None` if `time` cannot be represented in a ZIP archive.
pub(crate) fn to_zip_time(time: SystemTime) -> Option<zip::DateTime> {
    let time: DateTime<Utc> = time.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(time.year()).ok()?,
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
    )
    .ok()
}
