//! COPY sub-protocol engine.
//!
//! Parses COPY statements, drives COPY-in row extraction and commit policy,
//! and encodes COPY-out streams. The session engine owns the socket; this
//! module owns everything between raw CopyData payloads and backend rows.
//!
//! Commit policy: in atomic mode every row commits as one unit and the
//! per-transaction mutation ceiling is enforced up front. In partitioned
//! non-atomic mode rows commit in chunks sized to stay under the ceiling;
//! rows committed before a late failure stay committed.

pub mod binary;
pub mod text;

use bytes::BytesMut;

use crate::backend::{BackendConnection, ColumnInfo, ResultSet, TableMetadata};
use crate::codec::{self, CodecContext, PgValue};
use crate::errors::{sqlstate, PgError};
use crate::messages::constants::{FORMAT_BINARY, FORMAT_TEXT};

use binary::BinaryParser;
use text::{CsvParser, TextParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyFormat {
    Text,
    Csv,
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    FromStdin,
    ToStdout,
}

/// Format options after defaults are applied.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub format: CopyFormat,
    pub delimiter: u8,
    pub null_marker: String,
    pub quote: u8,
    pub escape: u8,
    pub header: bool,
}

impl CopyOptions {
    pub fn defaults_for(format: CopyFormat) -> CopyOptions {
        match format {
            CopyFormat::Csv => CopyOptions {
                format,
                delimiter: b',',
                null_marker: String::new(),
                quote: b'"',
                escape: b'"',
                header: false,
            },
            _ => CopyOptions {
                format,
                delimiter: b'\t',
                null_marker: "\\N".to_string(),
                quote: b'"',
                escape: b'"',
                header: false,
            },
        }
    }
}

/// A parsed COPY statement.
#[derive(Debug, Clone)]
pub struct CopySpec {
    pub table: String,
    pub columns: Vec<String>,
    pub direction: CopyDirection,
    pub options: CopyOptions,
}

/// Parse a COPY statement (comment-free text).
pub fn parse_copy(bare: &str) -> Result<CopySpec, PgError> {
    let mut tokens = tokenize(bare)?;
    tokens.reverse(); // pop() from the front

    expect_keyword(&mut tokens, "COPY")?;
    let table = match tokens.pop() {
        Some(Token::Ident(name)) => name,
        _ => return Err(syntax("expected table name after COPY")),
    };
    // Qualified name: public.t
    let table = if matches!(tokens.last(), Some(Token::Punct('.'))) {
        tokens.pop();
        match tokens.pop() {
            Some(Token::Ident(rest)) => {
                if table != "public" {
                    return Err(PgError::new(
                        sqlstate::INVALID_PARAMETER_VALUE,
                        format!("schema \"{table}\" does not exist"),
                    ));
                }
                rest
            }
            _ => return Err(syntax("expected identifier after '.'")),
        }
    } else {
        table
    };

    let mut columns = Vec::new();
    if matches!(tokens.last(), Some(Token::Punct('('))) {
        tokens.pop();
        loop {
            match tokens.pop() {
                Some(Token::Ident(column)) => columns.push(column),
                _ => return Err(syntax("expected column name in COPY column list")),
            }
            match tokens.pop() {
                Some(Token::Punct(',')) => continue,
                Some(Token::Punct(')')) => break,
                _ => return Err(syntax("unterminated COPY column list")),
            }
        }
    }

    let direction = match tokens.pop() {
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("FROM") => match tokens.pop() {
            Some(Token::Ident(source)) if source.eq_ignore_ascii_case("STDIN") => {
                CopyDirection::FromStdin
            }
            _ => return Err(copy_target_unsupported()),
        },
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case("TO") => match tokens.pop() {
            Some(Token::Ident(target)) if target.eq_ignore_ascii_case("STDOUT") => {
                CopyDirection::ToStdout
            }
            _ => return Err(copy_target_unsupported()),
        },
        _ => return Err(copy_target_unsupported()),
    };

    let options = parse_options(&mut tokens)?;
    Ok(CopySpec {
        table,
        columns,
        direction,
        options,
    })
}

fn parse_options(tokens: &mut Vec<Token>) -> Result<CopyOptions, PgError> {
    // Optional WITH keyword before either option syntax.
    if matches!(tokens.last(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case("WITH")) {
        tokens.pop();
    }

    let mut format: Option<CopyFormat> = None;
    let mut delimiter: Option<u8> = None;
    let mut null_marker: Option<String> = None;
    let mut quote: Option<u8> = None;
    let mut escape: Option<u8> = None;
    let mut header: Option<bool> = None;

    if matches!(tokens.last(), Some(Token::Punct('('))) {
        // New-style parenthesised option list.
        tokens.pop();
        loop {
            let name = match tokens.pop() {
                Some(Token::Ident(name)) => name.to_ascii_uppercase(),
                Some(Token::Punct(')')) => break,
                _ => return Err(syntax("expected COPY option name")),
            };
            match name.as_str() {
                "FORMAT" => format = Some(parse_format(tokens)?),
                "DELIMITER" => delimiter = Some(parse_char_option(tokens, "DELIMITER")?),
                "NULL" => null_marker = Some(parse_string_option(tokens, "NULL")?),
                "QUOTE" => quote = Some(parse_char_option(tokens, "QUOTE")?),
                "ESCAPE" => escape = Some(parse_char_option(tokens, "ESCAPE")?),
                "HEADER" => header = Some(parse_bool_option(tokens)),
                other => {
                    return Err(PgError::new(
                        sqlstate::SYNTAX_ERROR,
                        format!("option \"{other}\" not recognized"),
                    ))
                }
            }
            match tokens.pop() {
                Some(Token::Punct(',')) => continue,
                Some(Token::Punct(')')) => break,
                _ => return Err(syntax("unterminated COPY option list")),
            }
        }
    } else {
        // Legacy keyword options.
        while let Some(token) = tokens.pop() {
            let word = match token {
                Token::Ident(word) => word.to_ascii_uppercase(),
                Token::Punct(';') => break,
                _ => return Err(syntax("unexpected token in COPY options")),
            };
            match word.as_str() {
                "BINARY" => format = Some(CopyFormat::Binary),
                "CSV" => format = Some(CopyFormat::Csv),
                "DELIMITER" => {
                    skip_as(tokens);
                    delimiter = Some(parse_char_option(tokens, "DELIMITER")?);
                }
                "NULL" => {
                    skip_as(tokens);
                    null_marker = Some(parse_string_option(tokens, "NULL")?);
                }
                "QUOTE" => {
                    skip_as(tokens);
                    quote = Some(parse_char_option(tokens, "QUOTE")?);
                }
                "ESCAPE" => {
                    skip_as(tokens);
                    escape = Some(parse_char_option(tokens, "ESCAPE")?);
                }
                "HEADER" => header = Some(true),
                "WITH" => {}
                other => {
                    return Err(PgError::new(
                        sqlstate::SYNTAX_ERROR,
                        format!("option \"{other}\" not recognized"),
                    ))
                }
            }
        }
    }

    let format = format.unwrap_or(CopyFormat::Text);
    let mut options = CopyOptions::defaults_for(format);
    if let Some(delimiter) = delimiter {
        if format == CopyFormat::Binary {
            return Err(binary_option_conflict("DELIMITER"));
        }
        options.delimiter = delimiter;
    }
    if let Some(null_marker) = null_marker {
        if format == CopyFormat::Binary {
            return Err(binary_option_conflict("NULL"));
        }
        options.null_marker = null_marker;
    }
    if let Some(quote) = quote {
        if format != CopyFormat::Csv {
            return Err(csv_only_option("QUOTE"));
        }
        options.quote = quote;
    }
    if let Some(escape) = escape {
        if format != CopyFormat::Csv {
            return Err(csv_only_option("ESCAPE"));
        }
        options.escape = escape;
    }
    if let Some(header) = header {
        if format == CopyFormat::Binary {
            return Err(binary_option_conflict("HEADER"));
        }
        options.header = header;
    }
    Ok(options)
}

fn parse_format(tokens: &mut Vec<Token>) -> Result<CopyFormat, PgError> {
    let word = match tokens.pop() {
        Some(Token::Ident(word)) => word.to_ascii_lowercase(),
        Some(Token::StringLit(word)) => word.to_ascii_lowercase(),
        _ => return Err(syntax("expected COPY format name")),
    };
    match word.as_str() {
        "text" => Ok(CopyFormat::Text),
        "csv" => Ok(CopyFormat::Csv),
        "binary" => Ok(CopyFormat::Binary),
        other => Err(PgError::new(
            sqlstate::SYNTAX_ERROR,
            format!("COPY format \"{other}\" not recognized"),
        )),
    }
}

fn parse_string_option(tokens: &mut Vec<Token>, name: &str) -> Result<String, PgError> {
    match tokens.pop() {
        Some(Token::StringLit(value)) => Ok(value),
        _ => Err(syntax(&format!("expected string value for {name}"))),
    }
}

fn parse_char_option(tokens: &mut Vec<Token>, name: &str) -> Result<u8, PgError> {
    let value = parse_string_option(tokens, name)?;
    if value.len() != 1 {
        return Err(PgError::new(
            sqlstate::INVALID_PARAMETER_VALUE,
            format!("COPY {name} must be a single one-byte character"),
        ));
    }
    Ok(value.as_bytes()[0])
}

fn parse_bool_option(tokens: &mut Vec<Token>) -> bool {
    match tokens.last() {
        Some(Token::Ident(word)) => {
            let lower = word.to_ascii_lowercase();
            match lower.as_str() {
                "true" | "on" | "1" => {
                    tokens.pop();
                    true
                }
                "false" | "off" | "0" => {
                    tokens.pop();
                    false
                }
                _ => true,
            }
        }
        _ => true,
    }
}

fn skip_as(tokens: &mut Vec<Token>) {
    if matches!(tokens.last(), Some(Token::Ident(w)) if w.eq_ignore_ascii_case("AS")) {
        tokens.pop();
    }
}

fn expect_keyword(tokens: &mut Vec<Token>, keyword: &str) -> Result<(), PgError> {
    match tokens.pop() {
        Some(Token::Ident(word)) if word.eq_ignore_ascii_case(keyword) => Ok(()),
        _ => Err(syntax(&format!("expected {keyword}"))),
    }
}

fn syntax(message: &str) -> PgError {
    PgError::new(sqlstate::SYNTAX_ERROR, message.to_string())
}

fn copy_target_unsupported() -> PgError {
    PgError::new(
        sqlstate::FEATURE_NOT_SUPPORTED,
        "COPY only supports FROM STDIN and TO STDOUT",
    )
}

fn binary_option_conflict(option: &str) -> PgError {
    PgError::new(
        sqlstate::SYNTAX_ERROR,
        format!("cannot specify {option} in BINARY mode"),
    )
}

fn csv_only_option(option: &str) -> PgError {
    PgError::new(
        sqlstate::SYNTAX_ERROR,
        format!("COPY {option} available only in CSV mode"),
    )
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    StringLit(String),
    Punct(char),
}

fn tokenize(sql: &str) -> Result<Vec<Token>, PgError> {
    let bytes = sql.as_bytes();
    let len = bytes.len();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < len {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
        } else if b == b'\'' {
            let mut value = String::new();
            i += 1;
            loop {
                if i >= len {
                    return Err(syntax("unterminated string in COPY statement"));
                }
                if bytes[i] == b'\'' {
                    if i + 1 < len && bytes[i + 1] == b'\'' {
                        value.push('\'');
                        i += 2;
                    } else {
                        i += 1;
                        break;
                    }
                } else if bytes[i] == b'\\' && i + 1 < len {
                    // E'\t'-style escapes appear in driver-generated COPY.
                    let escaped = bytes[i + 1];
                    value.push(match escaped {
                        b'n' => '\n',
                        b'r' => '\r',
                        b't' => '\t',
                        b'\\' => '\\',
                        b'\'' => '\'',
                        other => other as char,
                    });
                    i += 2;
                } else {
                    value.push(bytes[i] as char);
                    i += 1;
                }
            }
            tokens.push(Token::StringLit(value));
        } else if b == b'"' {
            let mut value = String::new();
            i += 1;
            loop {
                if i >= len {
                    return Err(syntax("unterminated identifier in COPY statement"));
                }
                if bytes[i] == b'"' {
                    if i + 1 < len && bytes[i + 1] == b'"' {
                        value.push('"');
                        i += 2;
                    } else {
                        i += 1;
                        break;
                    }
                } else {
                    value.push(bytes[i] as char);
                    i += 1;
                }
            }
            tokens.push(Token::Ident(value));
        } else if b.is_ascii_alphanumeric() || b == b'_' {
            let start = i;
            while i < len && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            // Unquoted identifiers fold to lowercase, keywords compare
            // case-insensitively anyway.
            tokens.push(Token::Ident(sql[start..i].to_ascii_lowercase()));
        } else {
            tokens.push(Token::Punct(b as char));
            i += 1;
        }
    }
    Ok(tokens)
}

/// Incremental row source for any of the three framings.
#[derive(Debug)]
enum RowParser {
    Text(TextParser),
    Csv(CsvParser),
    Binary(BinaryParser),
}

/// COPY-in engine state: parses the incoming stream, decodes rows and
/// applies the commit policy.
pub struct CopyInEngine {
    pub spec: CopySpec,
    columns: Vec<ColumnInfo>,
    parser: RowParser,
    ctx: CodecContext,
    pending: Vec<Vec<Option<PgValue>>>,
    total_rows: u64,
    committed_rows: u64,
    mutations_per_row: u64,
    mutation_limit: u64,
    atomic: bool,
    rows_per_chunk: usize,
    error: Option<PgError>,
}

impl CopyInEngine {
    pub fn new(
        spec: CopySpec,
        meta: &TableMetadata,
        ctx: CodecContext,
        mutation_limit: u64,
        atomic: bool,
    ) -> Result<CopyInEngine, PgError> {
        let columns = resolve_columns(&spec, meta)?;
        let mutations_per_row = columns.len() as u64 + meta.indexed_columns;
        let rows_per_chunk = if mutations_per_row == 0 {
            1
        } else {
            (mutation_limit / mutations_per_row).max(1) as usize
        };
        let parser = match spec.options.format {
            CopyFormat::Text => RowParser::Text(TextParser::new(&spec.options)),
            CopyFormat::Csv => RowParser::Csv(CsvParser::new(&spec.options)),
            CopyFormat::Binary => RowParser::Binary(BinaryParser::new()),
        };
        Ok(CopyInEngine {
            spec,
            columns,
            parser,
            ctx,
            pending: Vec::new(),
            total_rows: 0,
            committed_rows: 0,
            mutations_per_row,
            mutation_limit,
            atomic,
            rows_per_chunk,
            error: None,
        })
    }

    /// Format codes for the CopyInResponse.
    pub fn column_formats(&self) -> Vec<i16> {
        let format = if self.spec.options.format == CopyFormat::Binary {
            FORMAT_BINARY
        } else {
            FORMAT_TEXT
        };
        vec![format; self.columns.len()]
    }

    pub fn is_binary(&self) -> bool {
        self.spec.options.format == CopyFormat::Binary
    }

    /// True once a row error has put the engine into the drain substate;
    /// remaining CopyData is discarded until CopyDone/CopyFail.
    pub fn draining(&self) -> bool {
        self.error.is_some()
    }

    /// Consume one CopyData payload.
    pub fn feed(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        match &mut self.parser {
            RowParser::Text(parser) => parser.feed(data),
            RowParser::Csv(parser) => parser.feed(data),
            RowParser::Binary(parser) => parser.feed(data),
        }
        if let Err(error) = self.extract_rows() {
            self.error = Some(error);
        }
    }

    fn extract_rows(&mut self) -> Result<(), PgError> {
        loop {
            let decoded = match &mut self.parser {
                RowParser::Text(parser) => match parser.next_row()? {
                    None => break,
                    Some(fields) => self.decode_text_row(fields)?,
                },
                RowParser::Csv(parser) => match parser.next_row()? {
                    None => break,
                    Some(fields) => self.decode_text_row(fields)?,
                },
                RowParser::Binary(parser) => match parser.next_row()? {
                    None => break,
                    Some(fields) => self.decode_binary_row(fields)?,
                },
            };
            self.pending.push(decoded);
            self.total_rows += 1;
            if self.atomic && self.total_mutations() > self.mutation_limit {
                return Err(PgError::new(
                    sqlstate::PROGRAM_LIMIT_EXCEEDED,
                    format!(
                        "COPY would exceed the limit of {} mutations per transaction",
                        self.mutation_limit
                    ),
                )
                .with_hint(
                    "Execute `SET spanner.autocommit_dml_mode='partitioned_non_atomic'` \
                     before executing a large COPY operation",
                ));
            }
        }
        Ok(())
    }

    fn total_mutations(&self) -> u64 {
        self.total_rows * self.mutations_per_row
    }

    fn decode_text_row(&self, fields: Vec<Option<String>>) -> Result<Vec<Option<PgValue>>, PgError> {
        self.check_width(fields.len())?;
        fields
            .into_iter()
            .zip(self.columns.iter())
            .map(|(field, column)| match field {
                None => Ok(None),
                Some(text) => codec::decode_text(text.as_bytes(), column.type_oid, &self.ctx)
                    .map(Some),
            })
            .collect()
    }

    fn decode_binary_row(
        &self,
        fields: Vec<Option<Vec<u8>>>,
    ) -> Result<Vec<Option<PgValue>>, PgError> {
        self.check_width(fields.len())?;
        fields
            .into_iter()
            .zip(self.columns.iter())
            .map(|(field, column)| match field {
                None => Ok(None),
                Some(raw) => codec::decode_binary(&raw, column.type_oid).map(Some),
            })
            .collect()
    }

    fn check_width(&self, actual: usize) -> Result<(), PgError> {
        if actual != self.columns.len() {
            return Err(PgError::new(
                sqlstate::BAD_COPY_FILE_FORMAT,
                format!(
                    "row field count {actual} does not match column count {}",
                    self.columns.len()
                ),
            ));
        }
        Ok(())
    }

    /// Commit full chunks in partitioned mode. Called after each feed.
    pub async fn commit_ready_chunks(
        &mut self,
        backend: &mut dyn BackendConnection,
    ) -> Result<(), PgError> {
        if self.atomic || self.error.is_some() {
            return Ok(());
        }
        while self.pending.len() >= self.rows_per_chunk {
            let chunk: Vec<_> = self.pending.drain(..self.rows_per_chunk).collect();
            self.commit_chunk(backend, chunk).await?;
        }
        Ok(())
    }

    async fn commit_chunk(
        &mut self,
        backend: &mut dyn BackendConnection,
        chunk: Vec<Vec<Option<PgValue>>>,
    ) -> Result<(), PgError> {
        let count = chunk.len() as u64;
        let column_names: Vec<String> =
            self.columns.iter().map(|c| c.name.clone()).collect();
        log::debug!(
            "COPY committing chunk of {count} rows into {}",
            self.spec.table
        );
        match backend.copy_rows(&self.spec.table, &column_names, chunk).await {
            Ok(_) => {
                self.committed_rows += count;
                Ok(())
            }
            Err(error) => {
                let mut pg: PgError = error.into();
                if self.committed_rows > 0 {
                    pg = pg.with_detail(format!(
                        "{} rows were already committed before the failure",
                        self.committed_rows
                    ));
                }
                self.error = Some(pg.clone());
                Err(pg)
            }
        }
    }

    /// Handle CopyDone: validate stream completeness, commit the remainder
    /// and return the total row count for the `COPY n` tag.
    pub async fn finish(
        mut self,
        backend: &mut dyn BackendConnection,
    ) -> Result<u64, PgError> {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        let finish_result = match &self.parser {
            RowParser::Text(parser) => parser.finish(),
            RowParser::Csv(parser) => parser.finish(),
            RowParser::Binary(parser) => parser.finish(),
        };
        finish_result?;

        let remainder: Vec<_> = std::mem::take(&mut self.pending);
        if !remainder.is_empty() {
            self.commit_chunk(backend, remainder).await?;
        }
        Ok(self.total_rows)
    }

    /// Handle CopyFail: drop everything pending. Rows already committed in
    /// partitioned mode stay committed, as documented.
    pub fn fail(self, client_message: &str) -> PgError {
        let mut error = PgError::new(
            sqlstate::QUERY_CANCELED,
            format!("COPY from stdin failed: {client_message}"),
        );
        if self.committed_rows > 0 {
            error = error.with_detail(format!(
                "{} rows were committed before the client aborted the copy",
                self.committed_rows
            ));
        }
        error
    }

    /// The first error captured while parsing, for the drain substate.
    pub fn take_error(&mut self) -> Option<PgError> {
        self.error.take()
    }

    pub fn rows_received(&self) -> u64 {
        self.total_rows
    }
}

/// Encode a result set as an outgoing COPY stream: one CopyData frame per
/// row for text framings, header/records/trailer frames for binary.
pub fn encode_copy_out(
    result: &ResultSet,
    options: &CopyOptions,
    ctx: &CodecContext,
) -> Result<Vec<BytesMut>, PgError> {
    let mut frames = Vec::new();
    match options.format {
        CopyFormat::Binary => {
            frames.push(crate::messages::copy_data(&binary::encode_header()));
            for row in &result.rows {
                let mut fields = Vec::with_capacity(row.len());
                for cell in row {
                    match cell {
                        None => fields.push(None),
                        Some(value) => fields.push(Some(codec::encode_binary(value)?)),
                    }
                }
                frames.push(crate::messages::copy_data(&binary::encode_record(&fields)));
            }
            frames.push(crate::messages::copy_data(&binary::encode_trailer()));
        }
        CopyFormat::Text | CopyFormat::Csv => {
            if options.header && options.format == CopyFormat::Csv {
                let names: Vec<Option<String>> = result
                    .columns
                    .iter()
                    .map(|c| Some(c.name.clone()))
                    .collect();
                frames.push(crate::messages::copy_data(&text::encode_csv_row(
                    &names, options,
                )));
            }
            for row in &result.rows {
                let cells: Vec<Option<String>> = row
                    .iter()
                    .map(|cell| {
                        cell.as_ref().map(|value| {
                            String::from_utf8_lossy(&codec::encode_text(value, ctx)).to_string()
                        })
                    })
                    .collect();
                let encoded = match options.format {
                    CopyFormat::Csv => text::encode_csv_row(&cells, options),
                    _ => text::encode_text_row(&cells, options),
                };
                frames.push(crate::messages::copy_data(&encoded));
            }
        }
    }
    Ok(frames)
}

fn resolve_columns(spec: &CopySpec, meta: &TableMetadata) -> Result<Vec<ColumnInfo>, PgError> {
    if spec.columns.is_empty() {
        return Ok(meta.columns.clone());
    }
    let mut out = Vec::with_capacity(spec.columns.len());
    for name in &spec.columns {
        let column = meta
            .columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                PgError::new(
                    "42703",
                    format!(
                        "column \"{name}\" of relation \"{}\" does not exist",
                        spec.table
                    ),
                )
            })?;
        out.push(column.clone());
    }
    Ok(out)
}

/// The SELECT the backend runs for a COPY TO STDOUT.
pub fn copy_out_query(spec: &CopySpec) -> String {
    if spec.columns.is_empty() {
        format!("SELECT * FROM {}", spec.table)
    } else {
        format!("SELECT {} FROM {}", spec.columns.join(", "), spec.table)
    }
}

#[cfg(test)]
mod tests;
