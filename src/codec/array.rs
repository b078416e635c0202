//! One-dimensional array codec.
//!
//! Text form is the `{a,b,NULL}` literal syntax with double-quote quoting
//! and backslash escapes. Binary form is ndim/hasnull/elemoid followed by a
//! single dimension header and length-prefixed element payloads. Only one
//! dimension is supported; multidimensional input is rejected.

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::{sqlstate, PgError};

use super::{
    decode_binary as decode_elem_binary, decode_text_str, encode_binary as encode_elem_binary,
    encode_text as encode_elem_text, CodecContext, PgValue,
};

pub fn decode_text(text: &str, elem_oid: u32, ctx: &CodecContext) -> Result<PgValue, PgError> {
    let trimmed = text.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| bad_literal(text))?;

    let mut cells = Vec::new();
    let mut chars = inner.chars().peekable();
    loop {
        // Skip leading whitespace of the element.
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        match chars.peek() {
            None => break,
            Some('{') => {
                return Err(PgError::new(
                    sqlstate::FEATURE_NOT_SUPPORTED,
                    "multidimensional arrays are not supported",
                ))
            }
            Some('"') => {
                chars.next();
                let mut value = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some(escaped) => value.push(escaped),
                            None => return Err(bad_literal(text)),
                        },
                        Some('"') => break,
                        Some(c) => value.push(c),
                        None => return Err(bad_literal(text)),
                    }
                }
                cells.push(Some(decode_text_str(&value, elem_oid, ctx)?));
                // Consume up to and including the next comma.
                while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
                    chars.next();
                }
                match chars.next() {
                    Some(',') => {}
                    None => break,
                    Some(_) => return Err(bad_literal(text)),
                }
            }
            Some(_) => {
                let mut value = String::new();
                let mut done = false;
                for c in chars.by_ref() {
                    if c == ',' {
                        done = true;
                        break;
                    }
                    value.push(c);
                }
                let value = value.trim_end();
                if value.eq_ignore_ascii_case("null") {
                    cells.push(None);
                } else if value.is_empty() {
                    return Err(bad_literal(text));
                } else {
                    cells.push(Some(decode_text_str(value, elem_oid, ctx)?));
                }
                if !done {
                    break;
                }
            }
        }
    }

    Ok(PgValue::Array(elem_oid, cells))
}

pub fn encode_text(cells: &[Option<PgValue>], ctx: &CodecContext) -> String {
    let mut out = String::from("{");
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        match cell {
            None => out.push_str("NULL"),
            Some(value) => {
                let rendered = String::from_utf8(encode_elem_text(value, ctx))
                    .unwrap_or_default();
                if needs_quoting(&rendered) {
                    out.push('"');
                    for c in rendered.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                } else {
                    out.push_str(&rendered);
                }
            }
        }
    }
    out.push('}');
    out
}

fn needs_quoting(rendered: &str) -> bool {
    rendered.is_empty()
        || rendered.eq_ignore_ascii_case("null")
        || rendered
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace())
}

pub fn decode_binary(raw: &[u8], expected_elem_oid: u32) -> Result<PgValue, PgError> {
    let mut buf = raw;
    if buf.remaining() < 12 {
        return Err(malformed("array header is truncated"));
    }
    let ndim = buf.get_i32();
    let _has_null = buf.get_i32();
    let elem_oid = buf.get_u32();
    if elem_oid != expected_elem_oid {
        return Err(malformed("array element type does not match"));
    }
    if ndim == 0 {
        return Ok(PgValue::Array(elem_oid, Vec::new()));
    }
    if ndim != 1 {
        return Err(PgError::new(
            sqlstate::FEATURE_NOT_SUPPORTED,
            "multidimensional arrays are not supported",
        ));
    }
    if buf.remaining() < 8 {
        return Err(malformed("array dimension header is truncated"));
    }
    let count = buf.get_i32();
    let _lower_bound = buf.get_i32();
    if count < 0 {
        return Err(malformed("negative array length"));
    }

    let mut cells = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if buf.remaining() < 4 {
            return Err(malformed("array element is truncated"));
        }
        let len = buf.get_i32();
        if len == -1 {
            cells.push(None);
            continue;
        }
        if len < 0 || buf.remaining() < len as usize {
            return Err(malformed("array element is truncated"));
        }
        let (elem_raw, rest) = buf.split_at(len as usize);
        cells.push(Some(decode_elem_binary(elem_raw, elem_oid)?));
        buf = rest;
    }
    if buf.has_remaining() {
        return Err(malformed("array payload has trailing bytes"));
    }
    Ok(PgValue::Array(elem_oid, cells))
}

pub fn encode_binary(elem_oid: u32, cells: &[Option<PgValue>]) -> Result<Vec<u8>, PgError> {
    let mut out = BytesMut::new();
    let has_null = cells.iter().any(Option::is_none);
    out.put_i32(1); // ndim
    out.put_i32(i32::from(has_null));
    out.put_u32(elem_oid);
    out.put_i32(cells.len() as i32);
    out.put_i32(1); // lower bound
    for cell in cells {
        match cell {
            None => out.put_i32(-1),
            Some(value) => {
                let encoded = encode_elem_binary(value)?;
                out.put_i32(encoded.len() as i32);
                out.put_slice(&encoded);
            }
        }
    }
    Ok(out.to_vec())
}

fn bad_literal(text: &str) -> PgError {
    PgError::new(
        sqlstate::INVALID_TEXT_REPRESENTATION,
        format!("malformed array literal: \"{text}\""),
    )
}

fn malformed(what: &str) -> PgError {
    PgError::new(sqlstate::INVALID_TEXT_REPRESENTATION, what.to_string())
}
