//! Date, timestamp and timestamptz codecs.
//!
//! Binary wire formats count from the PostgreSQL epoch 2000-01-01: date is
//! int4 days, timestamps are int8 microseconds. Binary values that fall
//! outside the representable calendar range are rejected with 22008 rather
//! than wrapping. Text output is always ISO; the DateStyle order only
//! disambiguates slash-separated input.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

use crate::errors::{sqlstate, PgError};

const PG_EPOCH_DAYS_FROM_CE: i64 = 730_120; // 2000-01-01 in days from 0001-01-01
const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Field order for ambiguous (slash-separated) date input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateOrder {
    #[default]
    Mdy,
    Dmy,
    Ymd,
}

/// Session DateStyle. Only the ISO output style is supported; the order part
/// is tracked and applied to input parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateStyle {
    pub order: DateOrder,
}

impl DateStyle {
    /// Parse a SET DateStyle argument, e.g. `ISO`, `ISO, MDY`, `iso,dmy`.
    pub fn parse(value: &str) -> Result<DateStyle, PgError> {
        let mut order = None;
        let mut iso_seen = false;
        for part in value.split(',') {
            match part.trim().to_ascii_uppercase().as_str() {
                "ISO" => iso_seen = true,
                "MDY" | "US" | "NONEURO" | "NONEUROPEAN" => order = Some(DateOrder::Mdy),
                "DMY" | "EURO" | "EUROPEAN" => order = Some(DateOrder::Dmy),
                "YMD" => order = Some(DateOrder::Ymd),
                "" => {}
                other => {
                    return Err(PgError::new(
                        sqlstate::INVALID_PARAMETER_VALUE,
                        format!("invalid value for parameter \"DateStyle\": \"{other}\""),
                    ))
                }
            }
        }
        if !iso_seen && order.is_none() {
            return Err(PgError::new(
                sqlstate::INVALID_PARAMETER_VALUE,
                format!("invalid value for parameter \"DateStyle\": \"{value}\""),
            ));
        }
        Ok(DateStyle {
            order: order.unwrap_or_default(),
        })
    }

    pub fn display(&self) -> String {
        let order = match self.order {
            DateOrder::Mdy => "MDY",
            DateOrder::Dmy => "DMY",
            DateOrder::Ymd => "YMD",
        };
        format!("ISO, {order}")
    }
}

pub fn decode_date_text(text: &str, style: &DateStyle) -> Result<NaiveDate, PgError> {
    let trimmed = text.trim();
    // ISO form is accepted regardless of DateStyle.
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(date);
    }
    if trimmed.contains('/') {
        let parts: Vec<&str> = trimmed.split('/').collect();
        if parts.len() == 3 {
            let nums: Option<Vec<i32>> = parts.iter().map(|p| p.trim().parse().ok()).collect();
            if let Some(nums) = nums {
                let (y, m, d) = match style.order {
                    DateOrder::Mdy => (nums[2], nums[0], nums[1]),
                    DateOrder::Dmy => (nums[2], nums[1], nums[0]),
                    DateOrder::Ymd => (nums[0], nums[1], nums[2]),
                };
                if let Some(date) = NaiveDate::from_ymd_opt(y, m as u32, d as u32) {
                    return Ok(date);
                }
            }
        }
    }
    Err(PgError::new(
        sqlstate::INVALID_DATETIME_FORMAT,
        format!("invalid input syntax for type date: \"{text}\""),
    ))
}

pub fn decode_timestamp_text(text: &str, style: &DateStyle) -> Result<NaiveDateTime, PgError> {
    let trimmed = text.trim();
    let (date_part, time_part) = split_date_time(trimmed);
    let date = decode_date_text(date_part, style).map_err(|_| bad_timestamp(text))?;
    let time = match time_part {
        Some(time_text) => parse_time(time_text).ok_or_else(|| bad_timestamp(text))?,
        None => NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
    };
    Ok(date.and_time(time))
}

pub fn decode_timestamptz_text(text: &str, style: &DateStyle) -> Result<DateTime<Utc>, PgError> {
    let trimmed = text.trim();
    // A trailing Z is a plain UTC marker.
    if let Some(zulu) = trimmed.strip_suffix(['Z', 'z']) {
        return decode_timestamp_text(zulu, style).map(|naive| Utc.from_utc_datetime(&naive));
    }
    // Explicit numeric offsets carry their own zone.
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(trimmed, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    // No offset at all: interpret as UTC.
    decode_timestamp_text(trimmed, style).map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn encode_date_text(date: &NaiveDate) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), date.month(), date.day())
}

pub fn encode_timestamp_text(ts: &NaiveDateTime) -> String {
    let micros = ts.and_utc().timestamp_subsec_micros();
    if micros == 0 {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.6f").to_string()
    }
}

pub fn encode_timestamptz_text(ts: &DateTime<Utc>) -> String {
    format!("{}+00", encode_timestamp_text(&ts.naive_utc()))
}

pub fn decode_date_binary(days: i32) -> Result<NaiveDate, PgError> {
    let from_ce = PG_EPOCH_DAYS_FROM_CE + i64::from(days);
    i32::try_from(from_ce)
        .ok()
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .ok_or_else(|| overflow("date"))
}

pub fn encode_date_binary(date: &NaiveDate) -> Result<i32, PgError> {
    let delta = i64::from(date.num_days_from_ce()) - PG_EPOCH_DAYS_FROM_CE;
    i32::try_from(delta).map_err(|_| overflow("date"))
}

pub fn decode_timestamp_binary(micros: i64) -> Result<NaiveDateTime, PgError> {
    let days = micros.div_euclid(MICROS_PER_DAY);
    let micros_of_day = micros.rem_euclid(MICROS_PER_DAY);
    let date = decode_date_binary(i32::try_from(days).map_err(|_| overflow("timestamp"))?)
        .map_err(|_| overflow("timestamp"))?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (micros_of_day / 1_000_000) as u32,
        ((micros_of_day % 1_000_000) * 1000) as u32,
    )
    .ok_or_else(|| overflow("timestamp"))?;
    Ok(date.and_time(time))
}

pub fn encode_timestamp_binary(ts: &NaiveDateTime) -> Result<i64, PgError> {
    let days = i64::from(ts.date().num_days_from_ce()) - PG_EPOCH_DAYS_FROM_CE;
    let micros_of_day = i64::from(ts.time().num_seconds_from_midnight()) * 1_000_000
        + i64::from(ts.time().nanosecond() / 1000);
    days.checked_mul(MICROS_PER_DAY)
        .and_then(|base| base.checked_add(micros_of_day))
        .ok_or_else(|| overflow("timestamp"))
}

pub fn decode_timestamptz_binary(micros: i64) -> Result<DateTime<Utc>, PgError> {
    decode_timestamp_binary(micros).map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn encode_timestamptz_binary(ts: &DateTime<Utc>) -> Result<i64, PgError> {
    encode_timestamp_binary(&ts.naive_utc())
}

fn split_date_time(text: &str) -> (&str, Option<&str>) {
    if let Some((date, time)) = text.split_once(' ') {
        (date, Some(time))
    } else if let Some((date, time)) = text.split_once('T') {
        (date, Some(time))
    } else {
        (text, None)
    }
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M:%S"))
        .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
        .ok()
}

fn bad_timestamp(text: &str) -> PgError {
    PgError::new(
        sqlstate::INVALID_DATETIME_FORMAT,
        format!("invalid input syntax for type timestamp: \"{text}\""),
    )
}

fn overflow(type_name: &str) -> PgError {
    PgError::new(
        sqlstate::DATETIME_FIELD_OVERFLOW,
        format!("{type_name} out of range"),
    )
}
