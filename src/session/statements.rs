//! Statement execution shared by the simple and extended paths: transaction
//! control, session parameters, SQL-level prepared statements, local
//! intercepts, plain execution, and the COPY sub-protocol drivers.

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backend::{BackendOutcome, ResultSet};
use crate::codec::{self, oid, PgValue};
use crate::copy::{self, CopyInEngine, CopySpec};
use crate::errors::{sqlstate, Error, PgError};
use crate::messages::{
    command_complete, copy_in_response, copy_out_response, data_row, empty_query_response,
    notice_response, read_message, row_description, write_all_flush, FieldDescription,
    FrontendMessage,
};
use crate::sql::{self, intercept, Classified, StatementKind};

use super::parameters::{parse_reset, parse_set, parse_show, SetTarget};
use super::{ProtocolState, PreparedStatement, Session};

/// What a shared statement produced: rendered frames, or a COPY hand-off the
/// caller must drive against the socket.
pub(crate) enum StatementOutcome {
    Frames(BytesMut),
    CopyIn(CopySpec),
    CopyOut(CopySpec),
}

impl<S, T> Session<S, T>
where
    S: AsyncRead + Unpin,
    T: AsyncWrite + Unpin,
{
    /// Create (or replace, for the anonymous slot) a prepared statement.
    /// Shared by protocol Parse and the SQL PREPARE statement.
    pub(crate) fn create_statement(
        &mut self,
        name: String,
        sql: String,
        type_hints: Vec<u32>,
    ) -> Result<Arc<PreparedStatement>, PgError> {
        if !name.is_empty() && self.statements.contains_key(&name) {
            return Err(PgError::new(
                "42P05",
                format!("prepared statement \"{name}\" already exists"),
            ));
        }
        if sql::has_multiple_statements(&sql) {
            return Err(PgError::new(
                sqlstate::SYNTAX_ERROR,
                "cannot insert multiple commands into a prepared statement",
            ));
        }
        for hint in &type_hints {
            if *hint != 0 && !oid::is_supported(*hint) {
                return Err(PgError::new(
                    sqlstate::UNDEFINED_OBJECT,
                    format!("type with OID {hint} does not exist"),
                ));
            }
        }

        let classified = sql::classify(&sql);
        let declared = sql::parameter_count(&sql) as usize;
        let count = declared.max(type_hints.len());
        let param_types: Vec<u32> = (0..count)
            .map(|i| match type_hints.get(i) {
                Some(&hint) if hint != 0 => hint,
                _ => oid::TEXT,
            })
            .collect();

        let kind = classified.kind;
        let rewritten = sql::rewrite::rewrite(&sql, &classified, &self.config.rewrite);

        let statement = Arc::new(PreparedStatement {
            name: name.clone(),
            sql,
            bare: classified.bare,
            rewritten,
            kind,
            type_hints,
            param_types,
        });
        self.statements.insert(name, Arc::clone(&statement));
        Ok(statement)
    }

    /// Execute one statement of a kind both modes treat identically and
    /// render its complete response. The caller has already dispatched any
    /// pending batch.
    pub(crate) async fn run_shared_statement(
        &mut self,
        sql: &str,
        classified: &Classified,
    ) -> Result<StatementOutcome, PgError> {
        self.check_cancel()?;
        let bare = classified.bare.trim().to_string();
        match classified.kind {
            StatementKind::Empty => Ok(StatementOutcome::Frames(empty_query_response())),
            StatementKind::LocalIntercept => {
                let canned = intercept::lookup(&classified.bare)
                    .expect("classified LocalIntercept without catalogue entry");
                Ok(StatementOutcome::Frames(render_canned(canned)))
            }
            StatementKind::Set => self.run_set(&bare).await.map(StatementOutcome::Frames),
            StatementKind::Show => self.run_show(&bare).map(StatementOutcome::Frames),
            StatementKind::Reset => self.run_reset(&bare).await.map(StatementOutcome::Frames),
            StatementKind::Begin
            | StatementKind::Commit
            | StatementKind::Rollback
            | StatementKind::RollbackTo
            | StatementKind::Savepoint
            | StatementKind::Release => self
                .run_transaction_control(sql, classified)
                .await
                .map(StatementOutcome::Frames),
            StatementKind::Prepare => self.run_prepare(sql).map(StatementOutcome::Frames),
            StatementKind::ExecutePrepared => self
                .run_execute_prepared(&bare)
                .await
                .map(StatementOutcome::Frames),
            StatementKind::Deallocate => {
                self.run_deallocate(&bare).map(StatementOutcome::Frames)
            }
            StatementKind::Copy => {
                let spec = copy::parse_copy(&classified.bare)?;
                match spec.direction {
                    copy::CopyDirection::FromStdin => Ok(StatementOutcome::CopyIn(spec)),
                    copy::CopyDirection::ToStdout => Ok(StatementOutcome::CopyOut(spec)),
                }
            }
            StatementKind::Select
            | StatementKind::Dml
            | StatementKind::Ddl
            | StatementKind::Unknown => {
                let rewritten = sql::rewrite::rewrite(sql, classified, &self.config.rewrite);
                let frames = self
                    .execute_to_frames(&rewritten, &classified.bare, &[])
                    .await?;
                Ok(StatementOutcome::Frames(frames))
            }
        }
    }

    /// Run a statement on the backend and render RowDescription/DataRow/
    /// CommandComplete in text format.
    pub(crate) async fn execute_to_frames(
        &mut self,
        rewritten: &str,
        bare: &str,
        params: &[Option<PgValue>],
    ) -> Result<BytesMut, PgError> {
        let outcome = self.backend.execute(rewritten, params).await?;
        match outcome {
            BackendOutcome::Rows(result) => {
                let ctx = self.params.codec_context();
                let mut frames = render_row_description(&result, &[]);
                let count = result.rows.len();
                for row in &result.rows {
                    frames.put(render_data_row(row, &[], &ctx)?);
                }
                frames.put(command_complete(&format!("SELECT {count}")));
                Ok(frames)
            }
            BackendOutcome::Count(rows, kind) => Ok(command_complete(&kind.tag(rows))),
            BackendOutcome::Done => Ok(command_complete(&utility_tag(bare))),
        }
    }

    async fn run_set(&mut self, bare: &str) -> Result<BytesMut, PgError> {
        let SetTarget { name, value } = parse_set(bare)?;
        let status = self.params.set(&name, &value)?;
        // Backend-owned knobs are forwarded after local validation.
        if name.starts_with("spanner.") {
            self.backend
                .set_parameter(&name, &value)
                .await
                .map_err(PgError::from)?;
        }
        let mut frames = BytesMut::new();
        if let Some(status) = status {
            frames.put(status);
        }
        frames.put(command_complete("SET"));
        Ok(frames)
    }

    /// Materialise a SHOW statement as a result set, shared by both modes.
    pub(crate) fn show_result(&self, bare: &str) -> Result<ResultSet, PgError> {
        use crate::backend::ColumnInfo;
        let name = parse_show(bare)?;
        if name.eq_ignore_ascii_case("all") {
            let mut rows: Vec<(String, String)> = self
                .params
                .all()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            rows.sort();
            return Ok(ResultSet {
                columns: vec![
                    ColumnInfo {
                        name: "name".to_string(),
                        type_oid: oid::TEXT,
                    },
                    ColumnInfo {
                        name: "setting".to_string(),
                        type_oid: oid::TEXT,
                    },
                ],
                rows: rows
                    .into_iter()
                    .map(|(name, setting)| {
                        vec![
                            Some(PgValue::Text(name)),
                            Some(PgValue::Text(setting)),
                        ]
                    })
                    .collect(),
            });
        }

        let value = self.params.get(&name).cloned().ok_or_else(|| {
            PgError::new(
                sqlstate::UNDEFINED_OBJECT,
                format!("unrecognized configuration parameter \"{name}\""),
            )
        })?;
        Ok(ResultSet {
            columns: vec![ColumnInfo {
                name,
                type_oid: oid::TEXT,
            }],
            rows: vec![vec![Some(PgValue::Text(value))]],
        })
    }

    fn run_show(&mut self, bare: &str) -> Result<BytesMut, PgError> {
        let result = self.show_result(bare)?;
        let ctx = self.params.codec_context();
        let mut frames = render_row_description(&result, &[]);
        let count = result.rows.len();
        for row in &result.rows {
            frames.put(render_data_row(row, &[], &ctx)?);
        }
        if count == 1 {
            frames.put(command_complete("SHOW"));
        } else {
            frames.put(command_complete(&format!("SHOW {count}")));
        }
        Ok(frames)
    }

    async fn run_reset(&mut self, bare: &str) -> Result<BytesMut, PgError> {
        let name = parse_reset(bare)?;
        let mut frames = BytesMut::new();
        if name.eq_ignore_ascii_case("all") {
            frames.put(self.params.reset_all());
        } else if let Some(status) = self.params.reset(&name)? {
            frames.put(status);
        }
        frames.put(command_complete("RESET"));
        Ok(frames)
    }

    async fn run_transaction_control(
        &mut self,
        sql: &str,
        classified: &Classified,
    ) -> Result<BytesMut, PgError> {
        use super::TxState;
        let mut frames = BytesMut::new();
        let tag = match classified.kind {
            StatementKind::Begin => {
                if self.tx.in_block() {
                    frames.put(notice_response(
                        sqlstate::ACTIVE_SQL_TRANSACTION,
                        "there is already a transaction in progress",
                    ));
                } else {
                    let bare_upper = classified.bare.to_ascii_uppercase();
                    if bare_upper.contains("READ ONLY") {
                        let staleness = self.params.readonly_staleness();
                        self.backend.begin_read_only(staleness).await?;
                    } else {
                        self.backend.begin().await?;
                    }
                    self.tx = TxState::InTransaction;
                }
                "BEGIN"
            }
            StatementKind::Commit => {
                let tag = match self.tx {
                    TxState::InTransaction => {
                        self.backend.commit().await?;
                        "COMMIT"
                    }
                    TxState::Failed => {
                        self.backend.rollback().await?;
                        "ROLLBACK"
                    }
                    TxState::Idle => {
                        frames.put(notice_response(
                            sqlstate::NO_ACTIVE_SQL_TRANSACTION,
                            "there is no transaction in progress",
                        ));
                        "COMMIT"
                    }
                };
                self.tx = TxState::Idle;
                self.close_transaction_portals();
                tag
            }
            StatementKind::Rollback => {
                if self.tx.in_block() {
                    self.backend.rollback().await?;
                } else {
                    frames.put(notice_response(
                        sqlstate::NO_ACTIVE_SQL_TRANSACTION,
                        "there is no transaction in progress",
                    ));
                }
                self.tx = TxState::Idle;
                self.close_transaction_portals();
                "ROLLBACK"
            }
            StatementKind::Savepoint | StatementKind::Release => {
                if !self.tx.in_block() {
                    return Err(PgError::new(
                        sqlstate::NO_ACTIVE_SQL_TRANSACTION,
                        format!(
                            "{} can only be used in transaction blocks",
                            if classified.kind == StatementKind::Savepoint {
                                "SAVEPOINT"
                            } else {
                                "RELEASE SAVEPOINT"
                            }
                        ),
                    ));
                }
                self.backend.execute(sql, &[]).await?;
                if classified.kind == StatementKind::Savepoint {
                    "SAVEPOINT"
                } else {
                    "RELEASE"
                }
            }
            StatementKind::RollbackTo => {
                if !self.tx.in_block() {
                    return Err(PgError::new(
                        sqlstate::NO_ACTIVE_SQL_TRANSACTION,
                        "ROLLBACK TO SAVEPOINT can only be used in transaction blocks",
                    ));
                }
                self.backend.execute(sql, &[]).await?;
                // Rolling back to a savepoint clears the failed flag.
                if self.tx == TxState::Failed {
                    self.tx = TxState::InTransaction;
                }
                "ROLLBACK"
            }
            _ => unreachable!("not a transaction-control statement"),
        };
        frames.put(command_complete(tag));
        Ok(frames)
    }

    fn run_prepare(&mut self, sql: &str) -> Result<BytesMut, PgError> {
        let (name, type_hints, body) = parse_prepare(sql)?;
        self.create_statement(name, body, type_hints)?;
        Ok(command_complete("PREPARE"))
    }

    async fn run_execute_prepared(&mut self, bare: &str) -> Result<BytesMut, PgError> {
        let (name, args) = parse_execute(bare)?;
        let statement = self
            .statements
            .get(&name)
            .cloned()
            .ok_or_else(|| statement_not_found(&name))?;
        if args.len() != statement.param_types.len() {
            return Err(PgError::new(
                sqlstate::SYNTAX_ERROR,
                format!(
                    "wrong number of parameters for prepared statement \"{name}\": expected {}, got {}",
                    statement.param_types.len(),
                    args.len()
                ),
            ));
        }
        let ctx = self.params.codec_context();
        let mut params = Vec::with_capacity(args.len());
        for (arg, type_oid) in args.into_iter().zip(statement.param_types.iter()) {
            match arg {
                None => params.push(None),
                Some(text) => {
                    params.push(Some(codec::decode_text(text.as_bytes(), *type_oid, &ctx)?))
                }
            }
        }
        self.execute_to_frames(&statement.rewritten, &statement.bare, &params)
            .await
    }

    fn run_deallocate(&mut self, bare: &str) -> Result<BytesMut, PgError> {
        let name = parse_deallocate(bare)?;
        if name.eq_ignore_ascii_case("all") {
            self.statements.clear();
        } else {
            if self.statements.remove(&name).is_none() {
                return Err(statement_not_found(&name));
            }
        }
        Ok(command_complete("DEALLOCATE"))
    }

    /// Drive a COPY ... FROM STDIN exchange. Returns the row count on
    /// success; protocol-level failures (disconnects) surface as [`Error`].
    pub(crate) async fn run_copy_in(
        &mut self,
        spec: CopySpec,
    ) -> Result<Result<u64, PgError>, Error> {
        let meta = match self.backend.table_metadata(&spec.table).await {
            Ok(meta) => meta,
            Err(err) => return Ok(Err(err.into())),
        };
        let atomic =
            self.params.dml_mode() == super::parameters::DmlMode::Transactional
                || self.tx.in_block();
        let ctx = self.params.codec_context();
        let mut engine = match CopyInEngine::new(
            spec,
            &meta,
            ctx,
            self.config.copy_commit_limit,
            atomic,
        ) {
            Ok(engine) => engine,
            Err(err) => return Ok(Err(err)),
        };

        let response = copy_in_response(engine.is_binary(), &engine.column_formats());
        write_all_flush(&mut self.write, &response).await?;
        self.state = ProtocolState::CopyIn;
        debug!(
            "session {} entered copy-in for {}",
            self.key.process_id, engine.spec.table
        );

        let result = loop {
            let frame = read_message(&mut self.read, self.config.max_message_size).await?;
            let message = match FrontendMessage::decode(frame) {
                Ok(message) => message,
                Err(pg) => break Err(pg),
            };
            match message {
                FrontendMessage::CopyData { data } => {
                    if self.cancel.take() {
                        if let Err(abort_err) = self.backend.abort().await {
                            debug!("backend abort after cancel failed: {abort_err}");
                        }
                        break Err(PgError::new(
                            sqlstate::QUERY_CANCELED,
                            "COPY canceled due to user request",
                        ));
                    }
                    engine.feed(&data);
                    if !engine.draining() {
                        // Chunk-commit errors put the engine into the drain
                        // substate; the error surfaces at CopyDone.
                        let _ = engine.commit_ready_chunks(self.backend.as_mut()).await;
                    }
                }
                FrontendMessage::CopyDone => {
                    break engine.finish(self.backend.as_mut()).await;
                }
                FrontendMessage::CopyFail { message } => {
                    break Err(engine.fail(&message));
                }
                FrontendMessage::Terminate => {
                    self.state = ProtocolState::Terminated;
                    return Err(Error::ClientDisconnected);
                }
                // Flush and Sync are legal noise during copy-in.
                FrontendMessage::Flush | FrontendMessage::Sync => {}
                other => {
                    warn!(
                        "session {} got {} during COPY FROM STDIN",
                        self.key.process_id,
                        other.name()
                    );
                    break Err(PgError::protocol(format!(
                        "unexpected message type {} during COPY from stdin",
                        other.name()
                    )));
                }
            }
        };
        self.state = ProtocolState::Busy;
        Ok(result)
    }

    /// Drive a COPY ... TO STDOUT exchange: stream the whole result and
    /// return the row count for the CommandComplete tag.
    pub(crate) async fn run_copy_out(
        &mut self,
        spec: CopySpec,
    ) -> Result<Result<u64, PgError>, Error> {
        let query = copy::copy_out_query(&spec);
        let result = match self.backend.execute(&query, &[]).await {
            Ok(BackendOutcome::Rows(result)) => result,
            Ok(_) => {
                return Ok(Err(PgError::new(
                    sqlstate::PROTOCOL_VIOLATION,
                    "backend returned no result set for COPY TO STDOUT",
                )))
            }
            Err(err) => return Ok(Err(err.into())),
        };

        let binary = spec.options.format == copy::CopyFormat::Binary;
        let format_code = i16::from(binary);
        let formats = vec![format_code; result.columns.len()];
        let ctx = self.params.codec_context();
        let frames = match copy::encode_copy_out(&result, &spec.options, &ctx) {
            Ok(frames) => frames,
            Err(err) => return Ok(Err(err)),
        };

        self.state = ProtocolState::CopyOut;
        let mut out = BytesMut::new();
        out.put(copy_out_response(binary, &formats));
        for frame in frames {
            out.put(frame);
            if out.len() >= self.config.flush_threshold {
                write_all_flush(&mut self.write, &out).await?;
                out.clear();
            }
        }
        out.put(crate::messages::copy_done());
        write_all_flush(&mut self.write, &out).await?;
        self.state = ProtocolState::Busy;
        Ok(Ok(result.rows.len() as u64))
    }
}

/// CommandComplete tag for utility statements the backend reports no count
/// for: the leading keyword, plus the object word for CREATE/DROP/ALTER.
pub(crate) fn utility_tag(bare: &str) -> String {
    let mut words = bare.trim().split_whitespace();
    let first = words.next().unwrap_or("OK").to_ascii_uppercase();
    match first.as_str() {
        "CREATE" | "DROP" | "ALTER" => match words.next() {
            Some(second) => format!("{first} {}", second.to_ascii_uppercase()),
            None => first,
        },
        _ => first,
    }
}

/// Render a canned intercept result as a complete response.
fn render_canned(canned: &intercept::CannedResult) -> BytesMut {
    let fields: Vec<FieldDescription> = canned
        .fields
        .iter()
        .map(|(name, type_oid)| FieldDescription::text(name, *type_oid, oid::type_len(*type_oid)))
        .collect();
    let mut frames = row_description(&fields);
    for row in &canned.rows {
        let cells: Vec<Option<Vec<u8>>> = row
            .iter()
            .map(|cell| cell.as_ref().map(|text| text.clone().into_bytes()))
            .collect();
        frames.put(data_row(&cells));
    }
    frames.put(command_complete(&format!("SELECT {}", canned.rows.len())));
    frames
}

/// RowDescription for a backend result, honouring per-column formats.
pub(crate) fn render_row_description(result: &ResultSet, formats: &[i16]) -> BytesMut {
    let fields: Vec<FieldDescription> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, column)| FieldDescription {
            name: column.name.clone(),
            type_oid: column.type_oid,
            type_len: oid::type_len(column.type_oid),
            format: format_at(formats, i),
        })
        .collect();
    row_description(&fields)
}

/// DataRow for one backend row, honouring per-column formats.
pub(crate) fn render_data_row(
    row: &[Option<PgValue>],
    formats: &[i16],
    ctx: &codec::CodecContext,
) -> Result<BytesMut, PgError> {
    let mut cells = Vec::with_capacity(row.len());
    for (i, cell) in row.iter().enumerate() {
        match cell {
            None => cells.push(None),
            Some(value) => {
                let encoded = if format_at(formats, i) == 1 {
                    codec::encode_binary(value)?
                } else {
                    codec::encode_text(value, ctx)
                };
                cells.push(Some(encoded));
            }
        }
    }
    Ok(data_row(&cells))
}

/// Result format code for column `i` per the Bind rules: no codes means all
/// text, a single code applies to every column.
pub(crate) fn format_at(formats: &[i16], i: usize) -> i16 {
    match formats.len() {
        0 => 0,
        1 => formats[0],
        _ => formats.get(i).copied().unwrap_or(0),
    }
}

pub(crate) fn statement_not_found(name: &str) -> PgError {
    PgError::new(
        sqlstate::INVALID_SQL_STATEMENT_NAME,
        format!("prepared statement \"{name}\" does not exist"),
    )
}

/// Parse `PREPARE name [(type, ...)] AS body` from the original text.
fn parse_prepare(sql: &str) -> Result<(String, Vec<u32>, String), PgError> {
    let stripped = sql::strip_comments(sql);
    let trimmed = stripped.trim();
    let rest = trimmed
        .get(7..) // past PREPARE
        .ok_or_else(|| prepare_syntax())?
        .trim_start();

    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .ok_or_else(prepare_syntax)?;
    let name = rest[..name_end].to_string();
    if name.is_empty() {
        return Err(prepare_syntax());
    }
    let mut rest = rest[name_end..].trim_start();

    let mut type_hints = Vec::new();
    if rest.starts_with('(') {
        let close = rest.find(')').ok_or_else(prepare_syntax)?;
        for type_name in rest[1..close].split(',') {
            type_hints.push(type_oid_from_name(type_name.trim())?);
        }
        rest = rest[close + 1..].trim_start();
    }

    let as_keyword = rest.get(..2).map(|w| w.eq_ignore_ascii_case("as"));
    if as_keyword != Some(true) {
        return Err(prepare_syntax());
    }
    let body = rest[2..].trim().to_string();
    if body.is_empty() {
        return Err(prepare_syntax());
    }
    Ok((name, type_hints, body))
}

fn prepare_syntax() -> PgError {
    PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in PREPARE statement")
}

/// Parse `EXECUTE name [(arg, ...)]`; args are literals or NULL.
fn parse_execute(bare: &str) -> Result<(String, Vec<Option<String>>), PgError> {
    let trimmed = bare.trim().trim_end_matches(';').trim_end();
    let rest = trimmed.get(7..).ok_or_else(execute_syntax)?.trim_start();
    let name_end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let name = rest[..name_end].to_string();
    if name.is_empty() {
        return Err(execute_syntax());
    }
    let rest = rest[name_end..].trim();

    let mut args = Vec::new();
    if !rest.is_empty() {
        let inner = rest
            .strip_prefix('(')
            .and_then(|r| r.strip_suffix(')'))
            .ok_or_else(execute_syntax)?;
        for piece in split_top_level(inner) {
            let piece = piece.trim();
            if piece.eq_ignore_ascii_case("null") {
                args.push(None);
            } else if piece.starts_with('\'') && piece.ends_with('\'') && piece.len() >= 2 {
                args.push(Some(piece[1..piece.len() - 1].replace("''", "'")));
            } else if piece.is_empty() {
                return Err(execute_syntax());
            } else {
                args.push(Some(piece.to_string()));
            }
        }
    }
    Ok((name, args))
}

fn execute_syntax() -> PgError {
    PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in EXECUTE statement")
}

/// Parse `DEALLOCATE [PREPARE] name|ALL`.
fn parse_deallocate(bare: &str) -> Result<String, PgError> {
    let mut words = bare.trim().trim_end_matches(';').split_whitespace();
    words.next(); // DEALLOCATE
    let mut name = words.next().ok_or_else(|| {
        PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in DEALLOCATE statement")
    })?;
    if name.eq_ignore_ascii_case("prepare") {
        name = words.next().ok_or_else(|| {
            PgError::new(sqlstate::SYNTAX_ERROR, "syntax error in DEALLOCATE statement")
        })?;
    }
    Ok(name.trim_matches('"').to_string())
}

/// Split a literal list on top-level commas (quotes respected).
fn split_top_level(text: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut in_string = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if in_string {
            current.push(c);
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    current.push(chars.next().unwrap());
                } else {
                    in_string = false;
                }
            }
        } else if c == '\'' {
            in_string = true;
            current.push(c);
        } else if c == ',' {
            pieces.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() || !pieces.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// SQL type name to OID for PREPARE type lists.
fn type_oid_from_name(name: &str) -> Result<u32, PgError> {
    let normalised = name.to_ascii_lowercase();
    let oid = match normalised.as_str() {
        "bool" | "boolean" => oid::BOOL,
        "smallint" | "int2" => oid::INT2,
        "int" | "integer" | "int4" => oid::INT4,
        "bigint" | "int8" => oid::INT8,
        "real" | "float4" => oid::FLOAT4,
        "double precision" | "float8" => oid::FLOAT8,
        "numeric" | "decimal" => oid::NUMERIC,
        "text" => oid::TEXT,
        "varchar" | "character varying" => oid::VARCHAR,
        "char" | "character" | "bpchar" => oid::BPCHAR,
        "bytea" => oid::BYTEA,
        "date" => oid::DATE,
        "timestamp" | "timestamp without time zone" => oid::TIMESTAMP,
        "timestamptz" | "timestamp with time zone" => oid::TIMESTAMPTZ,
        "jsonb" => oid::JSONB,
        other => {
            return Err(PgError::new(
                sqlstate::UNDEFINED_OBJECT,
                format!("type \"{other}\" does not exist"),
            ))
        }
    };
    Ok(oid)
}
