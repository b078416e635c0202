//! TEXT and CSV framings for COPY.
//!
//! Both parsers are incremental: CopyData frames may slice the stream at any
//! byte boundary, so bytes are buffered and complete rows extracted as they
//! become available. Output fields are raw text; the engine decodes them
//! against the column types.

use bytes::{Buf, BytesMut};

use crate::errors::{sqlstate, PgError};

use super::CopyOptions;

/// One extracted field before type decoding.
pub type RawRow = Vec<Option<String>>;

/// Incremental parser for the TEXT framing: tab-separated columns,
/// newline-terminated rows, backslash escapes, `\N` for NULL and a `\.`
/// end-of-data line.
#[derive(Debug)]
pub struct TextParser {
    buf: BytesMut,
    delimiter: u8,
    null_marker: String,
    terminated: bool,
}

impl TextParser {
    pub fn new(options: &CopyOptions) -> TextParser {
        TextParser {
            buf: BytesMut::new(),
            delimiter: options.delimiter,
            null_marker: options.null_marker.clone(),
            terminated: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if !self.terminated {
            self.buf.extend_from_slice(data);
        }
    }

    /// Extract the next complete row, or `None` until more data arrives.
    pub fn next_row(&mut self) -> Result<Option<RawRow>, PgError> {
        loop {
            if self.terminated {
                return Ok(None);
            }
            let Some(newline) = self.buf.iter().position(|b| *b == b'\n') else {
                return Ok(None);
            };
            let mut line = self.buf.split_to(newline);
            self.buf.advance(1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.as_ref() == b"\\." {
                self.terminated = true;
                return Ok(None);
            }
            return self.parse_line(&line).map(Some);
        }
    }

    /// True once the `\.` end-of-data marker has been seen.
    pub fn terminated(&self) -> bool {
        self.terminated
    }

    /// Called on CopyDone: leftover bytes that never formed a row are a
    /// format error (unterminated last line).
    pub fn finish(&self) -> Result<(), PgError> {
        if !self.terminated && !self.buf.is_empty() {
            return Err(PgError::new(
                sqlstate::BAD_COPY_FILE_FORMAT,
                "last line of COPY data is not newline-terminated",
            ));
        }
        Ok(())
    }

    fn parse_line(&self, line: &[u8]) -> Result<RawRow, PgError> {
        let mut fields = Vec::new();
        let mut raw = Vec::new(); // unescaped bytes of the current field
        let mut verbatim = Vec::new(); // pre-unescape bytes, for the null check
        let mut i = 0;

        while i <= line.len() {
            if i == line.len() || line[i] == self.delimiter {
                // The null marker is matched against the raw field text,
                // before escape processing.
                if verbatim == self.null_marker.as_bytes() {
                    fields.push(None);
                } else {
                    let text = String::from_utf8(std::mem::take(&mut raw)).map_err(|_| {
                        PgError::new(
                            sqlstate::BAD_COPY_FILE_FORMAT,
                            "COPY field is not valid utf8",
                        )
                    })?;
                    fields.push(Some(text));
                }
                raw.clear();
                verbatim.clear();
                i += 1;
                continue;
            }
            if line[i] == b'\\' {
                if i + 1 >= line.len() {
                    return Err(bad_format("trailing backslash in COPY data"));
                }
                verbatim.push(line[i]);
                verbatim.push(line[i + 1]);
                let escaped = line[i + 1];
                i += 2;
                match escaped {
                    b'b' => raw.push(8),
                    b'f' => raw.push(12),
                    b'n' => raw.push(b'\n'),
                    b'r' => raw.push(b'\r'),
                    b't' => raw.push(b'\t'),
                    b'v' => raw.push(11),
                    b'\\' => raw.push(b'\\'),
                    b'x' => {
                        let mut value: u32 = 0;
                        let mut digits = 0;
                        while digits < 2
                            && i < line.len()
                            && line[i].is_ascii_hexdigit()
                        {
                            verbatim.push(line[i]);
                            value = value * 16 + hex_value(line[i]);
                            i += 1;
                            digits += 1;
                        }
                        if digits == 0 {
                            return Err(bad_format("invalid \\x escape in COPY data"));
                        }
                        raw.push(value as u8);
                    }
                    b'0'..=b'7' => {
                        let mut value: u32 = u32::from(escaped - b'0');
                        let mut digits = 1;
                        while digits < 3 && i < line.len() && (b'0'..=b'7').contains(&line[i]) {
                            verbatim.push(line[i]);
                            value = value * 8 + u32::from(line[i] - b'0');
                            i += 1;
                            digits += 1;
                        }
                        raw.push((value & 0xff) as u8);
                    }
                    other => raw.push(other),
                }
                continue;
            }
            verbatim.push(line[i]);
            raw.push(line[i]);
            i += 1;
        }
        Ok(fields)
    }
}

fn hex_value(b: u8) -> u32 {
    match b {
        b'0'..=b'9' => u32::from(b - b'0'),
        b'a'..=b'f' => u32::from(b - b'a' + 10),
        _ => u32::from(b - b'A' + 10),
    }
}

/// Incremental parser for the CSV framing. Quoted fields may contain the
/// delimiter and raw newlines, so row extraction is quote-aware.
#[derive(Debug)]
pub struct CsvParser {
    buf: BytesMut,
    delimiter: u8,
    quote: u8,
    escape: u8,
    null_marker: String,
    skip_header: bool,
    terminated: bool,
}

impl CsvParser {
    pub fn new(options: &CopyOptions) -> CsvParser {
        CsvParser {
            buf: BytesMut::new(),
            delimiter: options.delimiter,
            quote: options.quote,
            escape: options.escape,
            null_marker: options.null_marker.clone(),
            skip_header: options.header,
            terminated: false,
        }
    }

    pub fn feed(&mut self, data: &[u8]) {
        if !self.terminated {
            self.buf.extend_from_slice(data);
        }
    }

    pub fn terminated(&self) -> bool {
        self.terminated
    }

    pub fn finish(&self) -> Result<(), PgError> {
        if !self.terminated && !self.buf.is_empty() {
            return Err(PgError::new(
                sqlstate::BAD_COPY_FILE_FORMAT,
                "unterminated CSV data at end of COPY stream",
            ));
        }
        Ok(())
    }

    pub fn next_row(&mut self) -> Result<Option<RawRow>, PgError> {
        loop {
            if self.terminated {
                return Ok(None);
            }
            let Some(row_end) = self.find_row_end()? else {
                return Ok(None);
            };
            let mut line = self.buf.split_to(row_end);
            self.buf.advance(1); // the newline
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            if line.as_ref() == b"\\." {
                self.terminated = true;
                return Ok(None);
            }
            if self.skip_header {
                self.skip_header = false;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            return self.parse_line(&line).map(Some);
        }
    }

    /// Offset of the newline ending the next row, ignoring newlines inside
    /// quoted fields. `None` until a full row is buffered.
    fn find_row_end(&self) -> Result<Option<usize>, PgError> {
        let mut in_quotes = false;
        let mut i = 0;
        let bytes = self.buf.as_ref();
        while i < bytes.len() {
            let b = bytes[i];
            if in_quotes {
                if b == self.escape && self.escape != self.quote && i + 1 < bytes.len() {
                    i += 2;
                    continue;
                }
                if b == self.quote {
                    if self.escape == self.quote && i + 1 < bytes.len() && bytes[i + 1] == self.quote
                    {
                        i += 2;
                        continue;
                    }
                    in_quotes = false;
                }
            } else if b == self.quote {
                in_quotes = true;
            } else if b == b'\n' {
                return Ok(Some(i));
            }
            i += 1;
        }
        Ok(None)
    }

    fn parse_line(&self, line: &[u8]) -> Result<RawRow, PgError> {
        let mut fields = Vec::new();
        let mut current = Vec::new();
        let mut quoted = false;
        let mut in_quotes = false;
        let mut i = 0;

        loop {
            if i >= line.len() {
                if in_quotes {
                    return Err(bad_format("unterminated CSV quoted field"));
                }
                push_csv_field(&mut fields, current, quoted, &self.null_marker)?;
                break;
            }
            let b = line[i];
            if in_quotes {
                if b == self.escape && self.escape != self.quote {
                    if i + 1 >= line.len() {
                        return Err(bad_format("dangling CSV escape character"));
                    }
                    current.push(line[i + 1]);
                    i += 2;
                } else if b == self.quote {
                    if self.escape == self.quote
                        && i + 1 < line.len()
                        && line[i + 1] == self.quote
                    {
                        current.push(self.quote);
                        i += 2;
                    } else {
                        in_quotes = false;
                        i += 1;
                    }
                } else {
                    current.push(b);
                    i += 1;
                }
            } else if b == self.quote && current.is_empty() && !quoted {
                in_quotes = true;
                quoted = true;
                i += 1;
            } else if b == self.delimiter {
                push_csv_field(&mut fields, std::mem::take(&mut current), quoted, &self.null_marker)?;
                quoted = false;
                i += 1;
            } else {
                current.push(b);
                i += 1;
            }
        }
        Ok(fields)
    }
}

fn push_csv_field(
    fields: &mut Vec<Option<String>>,
    raw: Vec<u8>,
    quoted: bool,
    null_marker: &str,
) -> Result<(), PgError> {
    // Only unquoted fields can be NULL, per the CSV rules.
    if !quoted && raw == null_marker.as_bytes() {
        fields.push(None);
        return Ok(());
    }
    let text = String::from_utf8(raw).map_err(|_| {
        PgError::new(
            sqlstate::BAD_COPY_FILE_FORMAT,
            "CSV field is not valid utf8",
        )
    })?;
    fields.push(Some(text));
    Ok(())
}

fn bad_format(message: &str) -> PgError {
    PgError::new(sqlstate::BAD_COPY_FILE_FORMAT, message)
}

/// Encode one row in the TEXT framing.
pub fn encode_text_row(cells: &[Option<String>], options: &CopyOptions) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(options.delimiter);
        }
        match cell {
            None => out.extend_from_slice(options.null_marker.as_bytes()),
            Some(text) => {
                for &b in text.as_bytes() {
                    match b {
                        b'\\' => out.extend_from_slice(b"\\\\"),
                        b'\n' => out.extend_from_slice(b"\\n"),
                        b'\r' => out.extend_from_slice(b"\\r"),
                        8 => out.extend_from_slice(b"\\b"),
                        12 => out.extend_from_slice(b"\\f"),
                        11 => out.extend_from_slice(b"\\v"),
                        b if b == options.delimiter => {
                            out.push(b'\\');
                            out.push(b);
                        }
                        b => out.push(b),
                    }
                }
            }
        }
    }
    out.push(b'\n');
    out
}

/// Encode one row in the CSV framing.
pub fn encode_csv_row(cells: &[Option<String>], options: &CopyOptions) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, cell) in cells.iter().enumerate() {
        if i > 0 {
            out.push(options.delimiter);
        }
        match cell {
            None => out.extend_from_slice(options.null_marker.as_bytes()),
            Some(text) => {
                let bytes = text.as_bytes();
                let must_quote = bytes.iter().any(|&b| {
                    b == options.delimiter || b == options.quote || b == b'\n' || b == b'\r'
                }) || text.as_bytes() == options.null_marker.as_bytes();
                if must_quote {
                    out.push(options.quote);
                    for &b in bytes {
                        if b == options.quote || (b == options.escape && options.escape != options.quote) {
                            out.push(options.escape);
                        }
                        out.push(b);
                    }
                    out.push(options.quote);
                } else {
                    out.extend_from_slice(bytes);
                }
            }
        }
    }
    out.push(b'\n');
    out
}
