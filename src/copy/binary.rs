//! BINARY framing for COPY.
//!
//! Stream layout: 11-byte signature `PGCOPY\n\xff\r\n\0`, int32 flags, int32
//! header-extension length (skipped), then records of int16 column count
//! followed by `count` (int32 length, bytes) fields. A column count of -1
//! terminates the stream. Length -1 marks a NULL field.

use bytes::{Buf, BytesMut};

use crate::errors::{sqlstate, PgError};

const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xff\r\n\0";
/// Flag bit 16: OIDs included per record. Not supported here.
const FLAG_HAS_OIDS: i32 = 1 << 16;

/// One extracted record: raw field payloads before type decoding.
pub type RawBinaryRow = Vec<Option<Vec<u8>>>;

#[derive(Debug, PartialEq, Eq)]
enum State {
    Header,
    Records,
    Terminated,
}

#[derive(Debug)]
pub struct BinaryParser {
    buf: BytesMut,
    state: State,
}

impl BinaryParser {
    pub fn new() -> BinaryParser {
        BinaryParser {
            buf: BytesMut::new(),
            state: State::Header,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if self.state != State::Terminated {
            self.buf.extend_from_slice(data);
        }
    }

    pub fn terminated(&self) -> bool {
        self.state == State::Terminated
    }

    pub fn finish(&self) -> Result<(), PgError> {
        if self.state != State::Terminated {
            return Err(PgError::new(
                sqlstate::BAD_COPY_FILE_FORMAT,
                "COPY binary stream ended without the -1 terminator",
            ));
        }
        Ok(())
    }

    /// Extract the next record, or `None` until more data arrives or the
    /// stream has terminated.
    pub fn next_row(&mut self) -> Result<Option<RawBinaryRow>, PgError> {
        if self.state == State::Header {
            if !self.try_parse_header()? {
                return Ok(None);
            }
        }
        if self.state == State::Terminated {
            return Ok(None);
        }

        // Peek a complete record before consuming anything: CopyData frames
        // can split a record at any point.
        let bytes = self.buf.as_ref();
        if bytes.len() < 2 {
            return Ok(None);
        }
        let field_count = i16::from_be_bytes([bytes[0], bytes[1]]);
        if field_count == -1 {
            self.buf.advance(2);
            self.state = State::Terminated;
            return Ok(None);
        }
        if field_count < 0 {
            return Err(bad_format("invalid COPY record field count"));
        }

        let mut pos = 2;
        let mut lens = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            if bytes.len() < pos + 4 {
                return Ok(None);
            }
            let len = i32::from_be_bytes([
                bytes[pos],
                bytes[pos + 1],
                bytes[pos + 2],
                bytes[pos + 3],
            ]);
            pos += 4;
            if len == -1 {
                lens.push(None);
            } else if len < 0 {
                return Err(bad_format("invalid COPY field length"));
            } else {
                if bytes.len() < pos + len as usize {
                    return Ok(None);
                }
                lens.push(Some(len as usize));
                pos += len as usize;
            }
        }

        // The whole record is buffered; consume it.
        self.buf.advance(2);
        let mut row = Vec::with_capacity(field_count as usize);
        for len in lens {
            self.buf.advance(4);
            match len {
                None => row.push(None),
                Some(len) => {
                    let payload = self.buf.split_to(len);
                    row.push(Some(payload.to_vec()));
                }
            }
        }
        Ok(Some(row))
    }

    fn try_parse_header(&mut self) -> Result<bool, PgError> {
        if self.buf.len() < 19 {
            return Ok(false);
        }
        if &self.buf[..11] != SIGNATURE {
            return Err(bad_format("invalid COPY binary signature"));
        }
        let flags = i32::from_be_bytes([self.buf[11], self.buf[12], self.buf[13], self.buf[14]]);
        if flags & FLAG_HAS_OIDS != 0 {
            return Err(bad_format("COPY binary streams with OIDs are not supported"));
        }
        let extension_len =
            i32::from_be_bytes([self.buf[15], self.buf[16], self.buf[17], self.buf[18]]);
        if extension_len < 0 {
            return Err(bad_format("invalid COPY header extension length"));
        }
        let total = 19 + extension_len as usize;
        if self.buf.len() < total {
            return Ok(false);
        }
        self.buf.advance(total);
        self.state = State::Records;
        Ok(true)
    }
}

impl Default for BinaryParser {
    fn default() -> Self {
        BinaryParser::new()
    }
}

/// Header frame for an outgoing binary COPY stream.
pub fn encode_header() -> Vec<u8> {
    let mut out = Vec::with_capacity(19);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&0i32.to_be_bytes());
    out.extend_from_slice(&0i32.to_be_bytes());
    out
}

/// One outgoing record.
pub fn encode_record(fields: &[Option<Vec<u8>>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(fields.len() as i16).to_be_bytes());
    for field in fields {
        match field {
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
            Some(payload) => {
                out.extend_from_slice(&(payload.len() as i32).to_be_bytes());
                out.extend_from_slice(payload);
            }
        }
    }
    out
}

/// Stream terminator record.
pub fn encode_trailer() -> Vec<u8> {
    (-1i16).to_be_bytes().to_vec()
}

fn bad_format(message: &str) -> PgError {
    PgError::new(sqlstate::BAD_COPY_FILE_FORMAT, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(records: &[&[Option<Vec<u8>>]]) -> Vec<u8> {
        let mut out = encode_header();
        for record in records {
            out.extend_from_slice(&encode_record(record));
        }
        out.extend_from_slice(&encode_trailer());
        out
    }

    #[test]
    fn parses_records_and_terminator() {
        let data = stream(&[
            &[Some(vec![0, 0, 0, 1]), None],
            &[Some(vec![0, 0, 0, 2]), Some(b"Two".to_vec())],
        ]);
        let mut parser = BinaryParser::new();
        parser.feed(&data);

        let row = parser.next_row().unwrap().unwrap();
        assert_eq!(row, vec![Some(vec![0, 0, 0, 1]), None]);
        let row = parser.next_row().unwrap().unwrap();
        assert_eq!(row[1], Some(b"Two".to_vec()));
        assert!(parser.next_row().unwrap().is_none());
        assert!(parser.terminated());
        parser.finish().unwrap();
    }

    #[test]
    fn waits_for_split_records() {
        let data = stream(&[&[Some(b"abcd".to_vec())]]);
        let mut parser = BinaryParser::new();
        // Feed a byte at a time; no partial record may ever surface.
        let mut rows = Vec::new();
        for &b in &data {
            parser.feed(&[b]);
            while let Some(row) = parser.next_row().unwrap() {
                rows.push(row);
            }
        }
        assert_eq!(rows, vec![vec![Some(b"abcd".to_vec())]]);
        assert!(parser.terminated());
    }

    #[test]
    fn rejects_bad_signature() {
        let mut parser = BinaryParser::new();
        parser.feed(b"NOTPGCOPY\0\0\0\0\0\0\0\0\0\0");
        assert_eq!(parser.next_row().unwrap_err().sqlstate, "22P04");
    }

    #[test]
    fn rejects_oid_flag() {
        let mut data = Vec::new();
        data.extend_from_slice(SIGNATURE);
        data.extend_from_slice(&FLAG_HAS_OIDS.to_be_bytes());
        data.extend_from_slice(&0i32.to_be_bytes());
        let mut parser = BinaryParser::new();
        parser.feed(&data);
        assert!(parser.next_row().is_err());
    }

    #[test]
    fn skips_header_extension() {
        let mut data = Vec::new();
        data.extend_from_slice(SIGNATURE);
        data.extend_from_slice(&0i32.to_be_bytes());
        data.extend_from_slice(&4i32.to_be_bytes());
        data.extend_from_slice(&[9, 9, 9, 9]);
        data.extend_from_slice(&encode_record(&[None]));
        data.extend_from_slice(&encode_trailer());
        let mut parser = BinaryParser::new();
        parser.feed(&data);
        assert_eq!(parser.next_row().unwrap().unwrap(), vec![None]);
    }

    #[test]
    fn missing_terminator_fails_finish() {
        let mut data = encode_header();
        data.extend_from_slice(&encode_record(&[None]));
        let mut parser = BinaryParser::new();
        parser.feed(&data);
        parser.next_row().unwrap();
        assert_eq!(parser.finish().unwrap_err().sqlstate, "22P04");
    }
}
