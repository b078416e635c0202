//! Frontend message decoding.
//!
//! The frontend union is a flat tagged enum discriminated by the frame tag
//! byte; the session engine drives a single `match` over it. Payload parse
//! failures are protocol violations (`08P01`) and get a regular
//! ErrorResponse, unlike framing failures which kill the connection.

use bytes::{Buf, Bytes, BytesMut};

use crate::errors::{sqlstate, PgError};
use crate::messages::constants::frontend as tag;

/// One decoded frontend message.
#[derive(Debug, Clone, PartialEq)]
pub enum FrontendMessage {
    Query {
        sql: String,
    },
    Parse {
        name: String,
        sql: String,
        param_type_oids: Vec<u32>,
    },
    Bind(BindPayload),
    Describe {
        kind: u8,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Close {
        kind: u8,
        name: String,
    },
    Flush,
    Sync,
    Terminate,
    CopyData {
        data: Bytes,
    },
    CopyDone,
    CopyFail {
        message: String,
    },
    /// PasswordMessage; only meaningful during the (external) auth handshake.
    Password {
        data: Bytes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindPayload {
    pub portal: String,
    pub statement: String,
    pub param_formats: Vec<i16>,
    /// One entry per parameter; `None` is the NULL marker (wire length -1).
    pub params: Vec<Option<Vec<u8>>>,
    pub result_formats: Vec<i16>,
}

impl FrontendMessage {
    /// Decode a complete frame as returned by the framer (tag at index 0).
    pub fn decode(mut frame: BytesMut) -> Result<FrontendMessage, PgError> {
        let code = frame[0];
        frame.advance(5);
        let mut payload = frame.freeze();
        let r = &mut payload;

        match code {
            tag::QUERY => Ok(FrontendMessage::Query {
                sql: read_cstr(r)?,
            }),
            tag::PARSE => {
                let name = read_cstr(r)?;
                let sql = read_cstr(r)?;
                let n = read_i16(r)?;
                if n < 0 {
                    return Err(malformed("Parse", "negative parameter type count"));
                }
                let mut param_type_oids = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    param_type_oids.push(read_i32(r)? as u32);
                }
                Ok(FrontendMessage::Parse {
                    name,
                    sql,
                    param_type_oids,
                })
            }
            tag::BIND => {
                let portal = read_cstr(r)?;
                let statement = read_cstr(r)?;
                let n_formats = read_i16(r)?;
                if n_formats < 0 {
                    return Err(malformed("Bind", "negative format count"));
                }
                let mut param_formats = Vec::with_capacity(n_formats as usize);
                for _ in 0..n_formats {
                    param_formats.push(read_i16(r)?);
                }
                let n_params = read_i16(r)?;
                if n_params < 0 {
                    return Err(malformed("Bind", "negative parameter count"));
                }
                let mut params = Vec::with_capacity(n_params as usize);
                for _ in 0..n_params {
                    let len = read_i32(r)?;
                    if len == -1 {
                        params.push(None);
                    } else if len < 0 {
                        return Err(malformed("Bind", "negative parameter length"));
                    } else {
                        params.push(Some(read_bytes(r, len as usize)?));
                    }
                }
                let n_result_formats = read_i16(r)?;
                if n_result_formats < 0 {
                    return Err(malformed("Bind", "negative result format count"));
                }
                let mut result_formats = Vec::with_capacity(n_result_formats as usize);
                for _ in 0..n_result_formats {
                    result_formats.push(read_i16(r)?);
                }
                Ok(FrontendMessage::Bind(BindPayload {
                    portal,
                    statement,
                    param_formats,
                    params,
                    result_formats,
                }))
            }
            tag::DESCRIBE => {
                let kind = read_u8(r)?;
                let name = read_cstr(r)?;
                Ok(FrontendMessage::Describe { kind, name })
            }
            tag::EXECUTE => {
                let portal = read_cstr(r)?;
                let max_rows = read_i32(r)?;
                Ok(FrontendMessage::Execute { portal, max_rows })
            }
            tag::CLOSE => {
                let kind = read_u8(r)?;
                let name = read_cstr(r)?;
                Ok(FrontendMessage::Close { kind, name })
            }
            tag::FLUSH => Ok(FrontendMessage::Flush),
            tag::SYNC => Ok(FrontendMessage::Sync),
            tag::TERMINATE => Ok(FrontendMessage::Terminate),
            tag::COPY_DATA => Ok(FrontendMessage::CopyData { data: payload }),
            tag::COPY_DONE => Ok(FrontendMessage::CopyDone),
            tag::COPY_FAIL => Ok(FrontendMessage::CopyFail {
                message: read_cstr(r).unwrap_or_default(),
            }),
            tag::PASSWORD => Ok(FrontendMessage::Password { data: payload }),
            other => Err(PgError::new(
                sqlstate::PROTOCOL_VIOLATION,
                format!("unknown frontend message type {:?}", other as char),
            )),
        }
    }

    /// Tag name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Query { .. } => "Query",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind(_) => "Bind",
            FrontendMessage::Describe { .. } => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::Close { .. } => "Close",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::CopyData { .. } => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail { .. } => "CopyFail",
            FrontendMessage::Password { .. } => "PasswordMessage",
        }
    }
}

fn malformed(message: &str, what: &str) -> PgError {
    PgError::new(
        sqlstate::PROTOCOL_VIOLATION,
        format!("malformed {message} message: {what}"),
    )
}

fn read_u8(buf: &mut Bytes) -> Result<u8, PgError> {
    if buf.remaining() < 1 {
        return Err(truncated());
    }
    Ok(buf.get_u8())
}

fn read_i16(buf: &mut Bytes) -> Result<i16, PgError> {
    if buf.remaining() < 2 {
        return Err(truncated());
    }
    Ok(buf.get_i16())
}

fn read_i32(buf: &mut Bytes) -> Result<i32, PgError> {
    if buf.remaining() < 4 {
        return Err(truncated());
    }
    Ok(buf.get_i32())
}

fn read_bytes(buf: &mut Bytes, len: usize) -> Result<Vec<u8>, PgError> {
    if buf.remaining() < len {
        return Err(truncated());
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// NUL-terminated UTF-8 string.
fn read_cstr(buf: &mut Bytes) -> Result<String, PgError> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| PgError::protocol("string field is not nul-terminated"))?;
    let raw = buf.split_to(end);
    buf.advance(1);
    String::from_utf8(raw.to_vec())
        .map_err(|_| PgError::protocol("string field is not valid utf8"))
}

fn truncated() -> PgError {
    PgError::protocol("message payload is truncated")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    fn frame(code: u8, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u8(code);
        buf.put_i32(4 + payload.len() as i32);
        buf.put_slice(payload);
        buf
    }

    #[test]
    fn decodes_query() {
        let msg = FrontendMessage::decode(frame(b'Q', b"SELECT 1\0")).unwrap();
        assert_eq!(
            msg,
            FrontendMessage::Query {
                sql: "SELECT 1".to_string()
            }
        );
    }

    #[test]
    fn decodes_parse_with_type_hints() {
        let mut payload = BytesMut::new();
        payload.put_slice(b"s1\0");
        payload.put_slice(b"SELECT $1\0");
        payload.put_i16(1);
        payload.put_i32(23);
        let msg = FrontendMessage::decode(frame(b'P', &payload)).unwrap();
        assert_eq!(
            msg,
            FrontendMessage::Parse {
                name: "s1".to_string(),
                sql: "SELECT $1".to_string(),
                param_type_oids: vec![23],
            }
        );
    }

    #[test]
    fn decodes_bind_with_null_parameter() {
        let mut payload = BytesMut::new();
        payload.put_slice(b"\0\0"); // unnamed portal, unnamed statement
        payload.put_i16(1);
        payload.put_i16(0); // text format
        payload.put_i16(2);
        payload.put_i32(2);
        payload.put_slice(b"42");
        payload.put_i32(-1); // NULL
        payload.put_i16(0);
        let msg = FrontendMessage::decode(frame(b'B', &payload)).unwrap();
        let FrontendMessage::Bind(bind) = msg else {
            panic!("expected Bind");
        };
        assert_eq!(bind.params, vec![Some(b"42".to_vec()), None]);
        assert_eq!(bind.param_formats, vec![0]);
        assert!(bind.result_formats.is_empty());
    }

    #[test]
    fn decodes_execute_with_row_limit() {
        let mut payload = BytesMut::new();
        payload.put_slice(b"c1\0");
        payload.put_i32(50);
        let msg = FrontendMessage::decode(frame(b'E', &payload)).unwrap();
        assert_eq!(
            msg,
            FrontendMessage::Execute {
                portal: "c1".to_string(),
                max_rows: 50
            }
        );
    }

    #[test]
    fn unknown_tag_is_protocol_violation() {
        let err = FrontendMessage::decode(frame(b'z', b"")).unwrap_err();
        assert_eq!(err.sqlstate, "08P01");
    }

    #[test]
    fn truncated_payload_is_protocol_violation() {
        let mut payload = BytesMut::new();
        payload.put_slice(b"s1\0SELECT $1\0");
        payload.put_i16(3); // claims three oids, carries none
        let err = FrontendMessage::decode(frame(b'P', &payload)).unwrap_err();
        assert_eq!(err.sqlstate, "08P01");
    }
}
