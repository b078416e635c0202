//! Value codec: converts between wire representations (text and binary) and
//! backend-typed values for the fixed set of supported scalar types and their
//! one-dimensional arrays.
//!
//! NULL is a framing-level concern (cell length -1); the codec only ever sees
//! non-null payloads. The codec is stateless apart from the session DateStyle
//! carried in [`CodecContext`].

mod array;
mod datetime;
mod numeric;

pub use datetime::{DateOrder, DateStyle};

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::errors::{sqlstate, PgError};

/// Type OIDs the codec understands, plus catalog helpers.
pub mod oid {
    pub const BOOL: u32 = 16;
    pub const BYTEA: u32 = 17;
    pub const INT8: u32 = 20;
    pub const INT2: u32 = 21;
    pub const INT4: u32 = 23;
    pub const TEXT: u32 = 25;
    pub const FLOAT4: u32 = 700;
    pub const FLOAT8: u32 = 701;
    pub const BPCHAR: u32 = 1042;
    pub const VARCHAR: u32 = 1043;
    pub const DATE: u32 = 1082;
    pub const TIMESTAMP: u32 = 1114;
    pub const TIMESTAMPTZ: u32 = 1184;
    pub const NUMERIC: u32 = 1700;
    pub const JSONB: u32 = 3802;

    pub const BOOL_ARRAY: u32 = 1000;
    pub const BYTEA_ARRAY: u32 = 1001;
    pub const INT2_ARRAY: u32 = 1005;
    pub const INT4_ARRAY: u32 = 1007;
    pub const TEXT_ARRAY: u32 = 1009;
    pub const VARCHAR_ARRAY: u32 = 1015;
    pub const INT8_ARRAY: u32 = 1016;
    pub const FLOAT4_ARRAY: u32 = 1021;
    pub const FLOAT8_ARRAY: u32 = 1022;
    pub const DATE_ARRAY: u32 = 1182;
    pub const TIMESTAMP_ARRAY: u32 = 1115;
    pub const TIMESTAMPTZ_ARRAY: u32 = 1185;
    pub const NUMERIC_ARRAY: u32 = 1231;
    pub const JSONB_ARRAY: u32 = 3807;

    /// Element OID of a supported array type, if `oid` names one.
    pub fn element_of(oid: u32) -> Option<u32> {
        match oid {
            BOOL_ARRAY => Some(BOOL),
            BYTEA_ARRAY => Some(BYTEA),
            INT2_ARRAY => Some(INT2),
            INT4_ARRAY => Some(INT4),
            INT8_ARRAY => Some(INT8),
            FLOAT4_ARRAY => Some(FLOAT4),
            FLOAT8_ARRAY => Some(FLOAT8),
            TEXT_ARRAY => Some(TEXT),
            VARCHAR_ARRAY => Some(VARCHAR),
            DATE_ARRAY => Some(DATE),
            TIMESTAMP_ARRAY => Some(TIMESTAMP),
            TIMESTAMPTZ_ARRAY => Some(TIMESTAMPTZ),
            NUMERIC_ARRAY => Some(NUMERIC),
            JSONB_ARRAY => Some(JSONB),
            _ => None,
        }
    }

    /// Array OID for a supported element type.
    pub fn array_of(oid: u32) -> Option<u32> {
        match oid {
            BOOL => Some(BOOL_ARRAY),
            BYTEA => Some(BYTEA_ARRAY),
            INT2 => Some(INT2_ARRAY),
            INT4 => Some(INT4_ARRAY),
            INT8 => Some(INT8_ARRAY),
            FLOAT4 => Some(FLOAT4_ARRAY),
            FLOAT8 => Some(FLOAT8_ARRAY),
            TEXT => Some(TEXT_ARRAY),
            VARCHAR => Some(VARCHAR_ARRAY),
            DATE => Some(DATE_ARRAY),
            TIMESTAMP => Some(TIMESTAMP_ARRAY),
            TIMESTAMPTZ => Some(TIMESTAMPTZ_ARRAY),
            NUMERIC => Some(NUMERIC_ARRAY),
            JSONB => Some(JSONB_ARRAY),
            _ => None,
        }
    }

    /// pg_type.typlen for RowDescription.
    pub fn type_len(oid: u32) -> i16 {
        match oid {
            BOOL => 1,
            INT2 => 2,
            INT4 | FLOAT4 | DATE => 4,
            INT8 | FLOAT8 | TIMESTAMP | TIMESTAMPTZ => 8,
            _ => -1,
        }
    }

    /// Human-readable type name for error messages.
    pub fn type_name(oid: u32) -> &'static str {
        match oid {
            BOOL => "boolean",
            BYTEA => "bytea",
            INT2 => "smallint",
            INT4 => "integer",
            INT8 => "bigint",
            TEXT => "text",
            FLOAT4 => "real",
            FLOAT8 => "double precision",
            BPCHAR => "character",
            VARCHAR => "character varying",
            DATE => "date",
            TIMESTAMP => "timestamp without time zone",
            TIMESTAMPTZ => "timestamp with time zone",
            NUMERIC => "numeric",
            JSONB => "jsonb",
            _ => match element_of(oid) {
                Some(_) => "array",
                None => "unknown",
            },
        }
    }

    pub fn is_supported(oid: u32) -> bool {
        matches!(
            oid,
            BOOL | BYTEA
                | INT2
                | INT4
                | INT8
                | TEXT
                | FLOAT4
                | FLOAT8
                | BPCHAR
                | VARCHAR
                | DATE
                | TIMESTAMP
                | TIMESTAMPTZ
                | NUMERIC
                | JSONB
        ) || element_of(oid).is_some()
    }
}

/// A decoded, backend-typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum PgValue {
    Bool(bool),
    Int2(i16),
    Int4(i32),
    Int8(i64),
    Float4(f32),
    Float8(f64),
    Numeric(Decimal),
    Text(String),
    Bytea(Vec<u8>),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Jsonb(serde_json::Value),
    /// Element OID plus cells; a cell is `None` for an embedded NULL.
    Array(u32, Vec<Option<PgValue>>),
}

/// Per-session codec state. Only DateStyle and TimeZone influence the codec;
/// both default to the adapter's startup values.
#[derive(Debug, Clone)]
pub struct CodecContext {
    pub date_style: DateStyle,
    /// IANA zone name, stored for SHOW but not applied: timestamptz values
    /// are rendered as UTC instants with a +00 suffix.
    pub timezone: String,
}

impl Default for CodecContext {
    fn default() -> Self {
        CodecContext {
            date_style: DateStyle::default(),
            timezone: "UTC".to_string(),
        }
    }
}

/// Decode a text-format wire value.
pub fn decode_text(raw: &[u8], type_oid: u32, ctx: &CodecContext) -> Result<PgValue, PgError> {
    let text = std::str::from_utf8(raw).map_err(|_| {
        PgError::new(
            sqlstate::INVALID_TEXT_REPRESENTATION,
            "value is not valid utf8",
        )
    })?;
    decode_text_str(text, type_oid, ctx)
}

fn decode_text_str(text: &str, type_oid: u32, ctx: &CodecContext) -> Result<PgValue, PgError> {
    if let Some(elem_oid) = oid::element_of(type_oid) {
        return array::decode_text(text, elem_oid, ctx);
    }
    match type_oid {
        oid::BOOL => decode_bool_text(text),
        oid::INT2 => parse_int::<i16>(text, "smallint").map(PgValue::Int2),
        oid::INT4 => parse_int::<i32>(text, "integer").map(PgValue::Int4),
        oid::INT8 => parse_int::<i64>(text, "bigint").map(PgValue::Int8),
        oid::FLOAT4 => parse_float4(text).map(PgValue::Float4),
        oid::FLOAT8 => parse_float8(text).map(PgValue::Float8),
        oid::NUMERIC => numeric::decode_text(text).map(PgValue::Numeric),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR => Ok(PgValue::Text(text.to_string())),
        oid::BYTEA => decode_bytea_text(text).map(PgValue::Bytea),
        oid::DATE => datetime::decode_date_text(text, &ctx.date_style).map(PgValue::Date),
        oid::TIMESTAMP => {
            datetime::decode_timestamp_text(text, &ctx.date_style).map(PgValue::Timestamp)
        }
        oid::TIMESTAMPTZ => {
            datetime::decode_timestamptz_text(text, &ctx.date_style).map(PgValue::TimestampTz)
        }
        oid::JSONB => serde_json::from_str(text)
            .map(PgValue::Jsonb)
            .map_err(|err| {
                PgError::new(
                    sqlstate::INVALID_TEXT_REPRESENTATION,
                    format!("invalid input syntax for type json: {err}"),
                )
            }),
        other => Err(unsupported_type(other)),
    }
}

/// Decode a binary-format wire value.
pub fn decode_binary(raw: &[u8], type_oid: u32) -> Result<PgValue, PgError> {
    if let Some(elem_oid) = oid::element_of(type_oid) {
        return array::decode_binary(raw, elem_oid);
    }
    match type_oid {
        oid::BOOL => {
            expect_len(raw, 1, "boolean")?;
            Ok(PgValue::Bool(raw[0] != 0))
        }
        oid::INT2 => {
            expect_len(raw, 2, "smallint")?;
            Ok(PgValue::Int2(i16::from_be_bytes([raw[0], raw[1]])))
        }
        oid::INT4 => {
            expect_len(raw, 4, "integer")?;
            Ok(PgValue::Int4(i32::from_be_bytes([
                raw[0], raw[1], raw[2], raw[3],
            ])))
        }
        oid::INT8 => {
            expect_len(raw, 8, "bigint")?;
            Ok(PgValue::Int8(i64::from_be_bytes(raw8(raw))))
        }
        oid::FLOAT4 => {
            expect_len(raw, 4, "real")?;
            Ok(PgValue::Float4(f32::from_bits(u32::from_be_bytes([
                raw[0], raw[1], raw[2], raw[3],
            ]))))
        }
        oid::FLOAT8 => {
            expect_len(raw, 8, "double precision")?;
            Ok(PgValue::Float8(f64::from_bits(u64::from_be_bytes(raw8(
                raw,
            )))))
        }
        oid::NUMERIC => numeric::decode_binary(raw).map(PgValue::Numeric),
        oid::TEXT | oid::VARCHAR | oid::BPCHAR => String::from_utf8(raw.to_vec())
            .map(PgValue::Text)
            .map_err(|_| {
                PgError::new(
                    sqlstate::INVALID_TEXT_REPRESENTATION,
                    "text value is not valid utf8",
                )
            }),
        oid::BYTEA => Ok(PgValue::Bytea(raw.to_vec())),
        oid::DATE => {
            expect_len(raw, 4, "date")?;
            datetime::decode_date_binary(i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
                .map(PgValue::Date)
        }
        oid::TIMESTAMP => {
            expect_len(raw, 8, "timestamp")?;
            datetime::decode_timestamp_binary(i64::from_be_bytes(raw8(raw))).map(PgValue::Timestamp)
        }
        oid::TIMESTAMPTZ => {
            expect_len(raw, 8, "timestamptz")?;
            datetime::decode_timestamptz_binary(i64::from_be_bytes(raw8(raw)))
                .map(PgValue::TimestampTz)
        }
        oid::JSONB => {
            if raw.is_empty() || raw[0] != 1 {
                return Err(PgError::new(
                    sqlstate::INVALID_TEXT_REPRESENTATION,
                    "unsupported jsonb version",
                ));
            }
            serde_json::from_slice(&raw[1..])
                .map(PgValue::Jsonb)
                .map_err(|err| {
                    PgError::new(
                        sqlstate::INVALID_TEXT_REPRESENTATION,
                        format!("invalid jsonb payload: {err}"),
                    )
                })
        }
        other => Err(unsupported_type(other)),
    }
}

/// Encode a value in text format.
pub fn encode_text(value: &PgValue, ctx: &CodecContext) -> Vec<u8> {
    match value {
        PgValue::Bool(v) => (if *v { "t" } else { "f" }).into(),
        PgValue::Int2(v) => v.to_string().into_bytes(),
        PgValue::Int4(v) => v.to_string().into_bytes(),
        PgValue::Int8(v) => v.to_string().into_bytes(),
        PgValue::Float4(v) => format_float(f64::from(*v)).into_bytes(),
        PgValue::Float8(v) => format_float(*v).into_bytes(),
        PgValue::Numeric(v) => v.to_string().into_bytes(),
        PgValue::Text(v) => v.clone().into_bytes(),
        PgValue::Bytea(v) => encode_bytea_text(v).into_bytes(),
        PgValue::Date(v) => datetime::encode_date_text(v).into_bytes(),
        PgValue::Timestamp(v) => datetime::encode_timestamp_text(v).into_bytes(),
        PgValue::TimestampTz(v) => datetime::encode_timestamptz_text(v).into_bytes(),
        PgValue::Jsonb(v) => v.to_string().into_bytes(),
        PgValue::Array(_, cells) => array::encode_text(cells, ctx).into_bytes(),
    }
}

/// Encode a value in binary format.
pub fn encode_binary(value: &PgValue) -> Result<Vec<u8>, PgError> {
    Ok(match value {
        PgValue::Bool(v) => vec![u8::from(*v)],
        PgValue::Int2(v) => v.to_be_bytes().to_vec(),
        PgValue::Int4(v) => v.to_be_bytes().to_vec(),
        PgValue::Int8(v) => v.to_be_bytes().to_vec(),
        PgValue::Float4(v) => v.to_bits().to_be_bytes().to_vec(),
        PgValue::Float8(v) => v.to_bits().to_be_bytes().to_vec(),
        PgValue::Numeric(v) => numeric::encode_binary(v),
        PgValue::Text(v) => v.as_bytes().to_vec(),
        PgValue::Bytea(v) => v.clone(),
        PgValue::Date(v) => datetime::encode_date_binary(v)?.to_be_bytes().to_vec(),
        PgValue::Timestamp(v) => datetime::encode_timestamp_binary(v)?.to_be_bytes().to_vec(),
        PgValue::TimestampTz(v) => datetime::encode_timestamptz_binary(v)?
            .to_be_bytes()
            .to_vec(),
        PgValue::Jsonb(v) => {
            let mut out = BytesMut::new();
            out.put_u8(1);
            out.put_slice(v.to_string().as_bytes());
            out.to_vec()
        }
        PgValue::Array(elem_oid, cells) => array::encode_binary(*elem_oid, cells)?,
    })
}

/// The OID a value reports for itself, used when inferring result field
/// descriptors from backend rows.
pub fn value_oid(value: &PgValue) -> u32 {
    match value {
        PgValue::Bool(_) => oid::BOOL,
        PgValue::Int2(_) => oid::INT2,
        PgValue::Int4(_) => oid::INT4,
        PgValue::Int8(_) => oid::INT8,
        PgValue::Float4(_) => oid::FLOAT4,
        PgValue::Float8(_) => oid::FLOAT8,
        PgValue::Numeric(_) => oid::NUMERIC,
        PgValue::Text(_) => oid::TEXT,
        PgValue::Bytea(_) => oid::BYTEA,
        PgValue::Date(_) => oid::DATE,
        PgValue::Timestamp(_) => oid::TIMESTAMP,
        PgValue::TimestampTz(_) => oid::TIMESTAMPTZ,
        PgValue::Jsonb(_) => oid::JSONB,
        PgValue::Array(elem, _) => oid::array_of(*elem).unwrap_or(oid::TEXT_ARRAY),
    }
}

fn raw8(raw: &[u8]) -> [u8; 8] {
    [
        raw[0], raw[1], raw[2], raw[3], raw[4], raw[5], raw[6], raw[7],
    ]
}

fn expect_len(raw: &[u8], len: usize, type_name: &str) -> Result<(), PgError> {
    if raw.len() != len {
        return Err(PgError::new(
            sqlstate::INVALID_TEXT_REPRESENTATION,
            format!(
                "incorrect binary length {} for type {type_name} (expected {len})",
                raw.len()
            ),
        ));
    }
    Ok(())
}

fn unsupported_type(type_oid: u32) -> PgError {
    PgError::new(
        sqlstate::FEATURE_NOT_SUPPORTED,
        format!("type with oid {type_oid} is not supported"),
    )
}

fn decode_bool_text(text: &str) -> Result<PgValue, PgError> {
    match text.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "yes" | "y" | "on" | "1" => Ok(PgValue::Bool(true)),
        "f" | "false" | "no" | "n" | "off" | "0" => Ok(PgValue::Bool(false)),
        _ => Err(PgError::invalid_text("boolean", text)),
    }
}

fn parse_int<T: std::str::FromStr>(text: &str, type_name: &str) -> Result<T, PgError> {
    let trimmed = text.trim();
    trimmed.parse::<T>().map_err(|_| {
        // Distinguish overflow from junk: digits-only input that fails to
        // parse can only be out of range.
        let body = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
        if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
            PgError::new(
                sqlstate::NUMERIC_VALUE_OUT_OF_RANGE,
                format!("value \"{trimmed}\" is out of range for type {type_name}"),
            )
        } else {
            PgError::invalid_text(type_name, text)
        }
    })
}

fn parse_float8(text: &str) -> Result<f64, PgError> {
    match text.trim() {
        "NaN" => Ok(f64::NAN),
        "Infinity" | "inf" => Ok(f64::INFINITY),
        "-Infinity" | "-inf" => Ok(f64::NEG_INFINITY),
        trimmed => trimmed
            .parse::<f64>()
            .map_err(|_| PgError::invalid_text("double precision", text)),
    }
}

fn parse_float4(text: &str) -> Result<f32, PgError> {
    parse_float8(text).map(|v| v as f32)
}

/// Shortest-roundtrip float rendering with PostgreSQL's special-value names.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        value.to_string()
    }
}

/// Bytea text decode: `\x` hex form plus the legacy escape form.
fn decode_bytea_text(text: &str) -> Result<Vec<u8>, PgError> {
    if let Some(hex) = text.strip_prefix("\\x") {
        let cleaned: Vec<u8> = hex.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        if cleaned.len() % 2 != 0 {
            return Err(PgError::invalid_text("bytea", text));
        }
        let mut out = Vec::with_capacity(cleaned.len() / 2);
        for pair in cleaned.chunks(2) {
            let hi = hex_nibble(pair[0]).ok_or_else(|| PgError::invalid_text("bytea", text))?;
            let lo = hex_nibble(pair[1]).ok_or_else(|| PgError::invalid_text("bytea", text))?;
            out.push((hi << 4) | lo);
        }
        return Ok(out);
    }

    // Legacy escape form: backslash escapes, octal \nnn.
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            if i + 1 < bytes.len() && bytes[i + 1] == b'\\' {
                out.push(b'\\');
                i += 2;
            } else if i + 3 < bytes.len()
                && bytes[i + 1].is_ascii_digit()
                && bytes[i + 2].is_ascii_digit()
                && bytes[i + 3].is_ascii_digit()
            {
                let value = (bytes[i + 1] - b'0') as u16 * 64
                    + (bytes[i + 2] - b'0') as u16 * 8
                    + (bytes[i + 3] - b'0') as u16;
                if value > 255 {
                    return Err(PgError::invalid_text("bytea", text));
                }
                out.push(value as u8);
                i += 4;
            } else {
                return Err(PgError::invalid_text("bytea", text));
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    Ok(out)
}

/// Bytea text encode always uses the `\x` hex form.
fn encode_bytea_text(raw: &[u8]) -> String {
    let mut out = String::with_capacity(2 + raw.len() * 2);
    out.push_str("\\x");
    for byte in raw {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn hex_nibble(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests;
