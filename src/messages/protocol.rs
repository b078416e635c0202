//! Backend response frame builders.
//!
//! Each function assembles one complete frame into a fresh `BytesMut`; the
//! caller concatenates frames and controls flushing. Layouts are bit-exact
//! PostgreSQL v3.

use bytes::{BufMut, BytesMut};

use crate::errors::PgError;
use crate::messages::constants::backend as tag;

/// Description of one result column, as carried in RowDescription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    pub name: String,
    pub type_oid: u32,
    /// pg_type.typlen: fixed size in bytes, or -1 for varlena.
    pub type_len: i16,
    /// 0 = text, 1 = binary.
    pub format: i16,
}

impl FieldDescription {
    pub fn text(name: &str, type_oid: u32, type_len: i16) -> FieldDescription {
        FieldDescription {
            name: name.to_string(),
            type_oid,
            type_len,
            format: 0,
        }
    }
}

/// AuthenticationOk.
pub fn authentication_ok() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(9);
    bytes.put_u8(tag::AUTHENTICATION);
    bytes.put_i32(8);
    bytes.put_i32(0);
    bytes
}

/// BackendKeyData carrying the cancel secret for this session.
pub fn backend_key_data(process_id: i32, secret_key: i32) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(13);
    bytes.put_u8(tag::BACKEND_KEY_DATA);
    bytes.put_i32(12);
    bytes.put_i32(process_id);
    bytes.put_i32(secret_key);
    bytes
}

/// ParameterStatus for one session parameter.
pub fn parameter_status(key: &str, value: &str) -> BytesMut {
    let len = 4 + key.len() + 1 + value.len() + 1;
    let mut bytes = BytesMut::with_capacity(1 + len);
    bytes.put_u8(tag::PARAMETER_STATUS);
    bytes.put_i32(len as i32);
    bytes.put_slice(key.as_bytes());
    bytes.put_u8(0);
    bytes.put_slice(value.as_bytes());
    bytes.put_u8(0);
    bytes
}

/// ReadyForQuery with the given transaction status byte.
pub fn ready_for_query(status: u8) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(6);
    bytes.put_u8(tag::READY_FOR_QUERY);
    bytes.put_i32(5);
    bytes.put_u8(status);
    bytes
}

/// CommandComplete with the given tag text.
pub fn command_complete(command_tag: &str) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(command_tag.len() + 6);
    bytes.put_u8(tag::COMMAND_COMPLETE);
    bytes.put_i32(4 + command_tag.len() as i32 + 1);
    bytes.put_slice(command_tag.as_bytes());
    bytes.put_u8(0);
    bytes
}

pub fn empty_query_response() -> BytesMut {
    tag_only(tag::EMPTY_QUERY_RESPONSE)
}

pub fn parse_complete() -> BytesMut {
    tag_only(tag::PARSE_COMPLETE)
}

pub fn bind_complete() -> BytesMut {
    tag_only(tag::BIND_COMPLETE)
}

pub fn close_complete() -> BytesMut {
    tag_only(tag::CLOSE_COMPLETE)
}

pub fn no_data() -> BytesMut {
    tag_only(tag::NO_DATA)
}

pub fn portal_suspended() -> BytesMut {
    tag_only(tag::PORTAL_SUSPENDED)
}

pub fn copy_done() -> BytesMut {
    tag_only(tag::COPY_DONE)
}

fn tag_only(code: u8) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(code);
    bytes.put_i32(4);
    bytes
}

/// ParameterDescription listing inferred parameter type OIDs.
pub fn parameter_description(oids: &[u32]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(7 + oids.len() * 4);
    bytes.put_u8(tag::PARAMETER_DESCRIPTION);
    bytes.put_i32(4 + 2 + oids.len() as i32 * 4);
    bytes.put_i16(oids.len() as i16);
    for oid in oids {
        bytes.put_u32(*oid);
    }
    bytes
}

/// RowDescription for the given fields.
pub fn row_description(fields: &[FieldDescription]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i16(fields.len() as i16);
    for field in fields {
        body.put_slice(field.name.as_bytes());
        body.put_u8(0);
        // Not backed by a catalog table.
        body.put_i32(0);
        body.put_i16(0);
        body.put_u32(field.type_oid);
        body.put_i16(field.type_len);
        // Type modifier: none.
        body.put_i32(-1);
        body.put_i16(field.format);
    }

    let mut bytes = BytesMut::with_capacity(body.len() + 5);
    bytes.put_u8(tag::ROW_DESCRIPTION);
    bytes.put_i32(body.len() as i32 + 4);
    bytes.put(body);
    bytes
}

/// DataRow; `None` cells become the NULL length marker (-1).
pub fn data_row(values: &[Option<Vec<u8>>]) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_i16(values.len() as i16);
    for value in values {
        match value {
            Some(value) => {
                body.put_i32(value.len() as i32);
                body.put_slice(value);
            }
            None => body.put_i32(-1),
        }
    }

    let mut bytes = BytesMut::with_capacity(body.len() + 5);
    bytes.put_u8(tag::DATA_ROW);
    bytes.put_i32(body.len() as i32 + 4);
    bytes.put(body);
    bytes
}

/// ErrorResponse from a [`PgError`]. Field order: severity, non-localized
/// severity, SQLSTATE, message, then the optional detail/hint/position.
pub fn error_response(error: &PgError) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(b'S');
    body.put_slice(error.severity.as_str().as_bytes());
    body.put_u8(0);
    body.put_u8(b'V');
    body.put_slice(error.severity.as_str().as_bytes());
    body.put_u8(0);
    body.put_u8(b'C');
    body.put_slice(error.sqlstate.as_bytes());
    body.put_u8(0);
    body.put_u8(b'M');
    body.put_slice(error.message.as_bytes());
    body.put_u8(0);
    if let Some(detail) = &error.detail {
        body.put_u8(b'D');
        body.put_slice(detail.as_bytes());
        body.put_u8(0);
    }
    if let Some(hint) = &error.hint {
        body.put_u8(b'H');
        body.put_slice(hint.as_bytes());
        body.put_u8(0);
    }
    if let Some(position) = error.position {
        body.put_u8(b'P');
        body.put_slice(position.to_string().as_bytes());
        body.put_u8(0);
    }
    body.put_u8(0);

    let mut bytes = BytesMut::with_capacity(body.len() + 5);
    bytes.put_u8(tag::ERROR_RESPONSE);
    bytes.put_i32(body.len() as i32 + 4);
    bytes.put(body);
    bytes
}

/// NoticeResponse with severity NOTICE and the given message.
pub fn notice_response(sqlstate: &str, message: &str) -> BytesMut {
    let mut body = BytesMut::new();
    body.put_u8(b'S');
    body.put_slice(b"NOTICE\0");
    body.put_u8(b'V');
    body.put_slice(b"NOTICE\0");
    body.put_u8(b'C');
    body.put_slice(sqlstate.as_bytes());
    body.put_u8(0);
    body.put_u8(b'M');
    body.put_slice(message.as_bytes());
    body.put_u8(0);
    body.put_u8(0);

    let mut bytes = BytesMut::with_capacity(body.len() + 5);
    bytes.put_u8(tag::NOTICE_RESPONSE);
    bytes.put_i32(body.len() as i32 + 4);
    bytes.put(body);
    bytes
}

/// CopyInResponse declaring the overall format and per-column format codes.
pub fn copy_in_response(binary: bool, column_formats: &[i16]) -> BytesMut {
    copy_response(tag::COPY_IN_RESPONSE, binary, column_formats)
}

/// CopyOutResponse declaring the overall format and per-column format codes.
pub fn copy_out_response(binary: bool, column_formats: &[i16]) -> BytesMut {
    copy_response(tag::COPY_OUT_RESPONSE, binary, column_formats)
}

fn copy_response(code: u8, binary: bool, column_formats: &[i16]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(8 + column_formats.len() * 2);
    bytes.put_u8(code);
    bytes.put_i32(4 + 1 + 2 + column_formats.len() as i32 * 2);
    bytes.put_u8(u8::from(binary));
    bytes.put_i16(column_formats.len() as i16);
    for format in column_formats {
        bytes.put_i16(*format);
    }
    bytes
}

/// CopyData wrapping one slice of the outgoing copy stream.
pub fn copy_data(data: &[u8]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(data.len() + 5);
    bytes.put_u8(tag::COPY_DATA);
    bytes.put_i32(4 + data.len() as i32);
    bytes.put_slice(data);
    bytes
}
