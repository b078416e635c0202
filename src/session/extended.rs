//! Extended-query pipeline: Parse, Bind, Describe, Execute, Close, Flush,
//! Sync.
//!
//! Responses accumulate in the pending-result queue and reach the socket
//! only on Flush or Sync. After an error the group is suppressed: incoming
//! extended requests are ignored until the next Sync, which emits exactly
//! one ReadyForQuery in the session's transaction state.

use std::sync::Arc;

use bytes::BufMut;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backend::BackendOutcome;
use crate::codec::{self, oid};
use crate::errors::{sqlstate, Error, PgError};
use crate::messages::constants::{TARGET_PORTAL, TARGET_STATEMENT};
use crate::messages::{
    bind_complete, close_complete, command_complete, empty_query_response, no_data,
    parameter_description, parse_complete, portal_suspended, row_description, BindPayload,
    FieldDescription,
};
use crate::sql::{classify::dml_verb, intercept, StatementKind};

use super::statements::{
    format_at, render_data_row, render_row_description, statement_not_found, utility_tag,
    StatementOutcome,
};
use super::{Portal, PreparedStatement, Session};

impl<S, T> Session<S, T>
where
    S: AsyncRead + Unpin,
    T: AsyncWrite + Unpin,
{
    pub(crate) async fn handle_parse(
        &mut self,
        name: String,
        sql: String,
        param_type_oids: Vec<u32>,
    ) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        debug!("session {} parse {name:?}: {sql}", self.key.process_id);
        match self.create_statement(name, sql, param_type_oids) {
            Ok(_) => {
                self.queue.push_frame(parse_complete());
                Ok(())
            }
            Err(pg) => self.fail_group(pg).await,
        }
    }

    pub(crate) async fn handle_bind(&mut self, bind: BindPayload) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        let Some(statement) = self.statements.get(&bind.statement).cloned() else {
            return self.fail_group(statement_not_found(&bind.statement)).await;
        };

        let expected = statement.param_types.len();
        if bind.params.len() != expected {
            return self
                .fail_group(PgError::protocol(format!(
                    "bind message supplies {} parameters, but prepared statement \"{}\" requires {}",
                    bind.params.len(),
                    statement.name,
                    expected
                )))
                .await;
        }
        for format in bind.param_formats.iter().chain(bind.result_formats.iter()) {
            if *format != 0 && *format != 1 {
                return self
                    .fail_group(PgError::protocol(format!(
                        "invalid format code {format}"
                    )))
                    .await;
            }
        }
        if bind.param_formats.len() > 1 && bind.param_formats.len() != bind.params.len() {
            return self
                .fail_group(PgError::protocol(
                    "parameter format count does not match parameter count",
                ))
                .await;
        }

        let ctx = self.params.codec_context();
        let mut params = Vec::with_capacity(bind.params.len());
        for (i, raw) in bind.params.iter().enumerate() {
            let value = match raw {
                None => None,
                Some(raw) => {
                    let format = match bind.param_formats.len() {
                        0 => 0,
                        1 => bind.param_formats[0],
                        _ => bind.param_formats[i],
                    };
                    let type_oid = statement.param_types[i];
                    let decoded = if format == 1 {
                        codec::decode_binary(raw, type_oid)
                    } else {
                        codec::decode_text(raw, type_oid, &ctx)
                    };
                    match decoded {
                        Ok(value) => Some(value),
                        Err(pg) => return self.fail_group(pg.with_position(0)).await,
                    }
                }
            };
            params.push(value);
        }

        self.portals.insert(
            bind.portal,
            Portal {
                statement,
                params,
                result_formats: bind.result_formats,
                result: None,
                cursor: 0,
                drained: false,
            },
        );
        self.queue.push_frame(bind_complete());
        Ok(())
    }

    pub(crate) async fn handle_describe(&mut self, kind: u8, name: &str) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        match kind {
            TARGET_STATEMENT => {
                let Some(statement) = self.statements.get(name).cloned() else {
                    return self.fail_group(statement_not_found(name)).await;
                };
                self.queue
                    .push_frame(parameter_description(&statement.param_types));
                match self.describe_fields(&statement, &[]).await {
                    Ok(Some(frame)) => self.queue.push_frame(frame),
                    Ok(None) => self.queue.push_frame(no_data()),
                    Err(pg) => return self.fail_group(pg).await,
                }
                Ok(())
            }
            TARGET_PORTAL => {
                let Some(portal) = self.portals.get(name) else {
                    return self.fail_group(portal_not_found(name)).await;
                };
                let statement = Arc::clone(&portal.statement);
                let formats = portal.result_formats.clone();
                match self.describe_fields(&statement, &formats).await {
                    Ok(Some(frame)) => self.queue.push_frame(frame),
                    Ok(None) => self.queue.push_frame(no_data()),
                    Err(pg) => return self.fail_group(pg).await,
                }
                Ok(())
            }
            other => {
                self.fail_group(PgError::protocol(format!(
                    "invalid DESCRIBE message subtype {:?}",
                    other as char
                )))
                .await
            }
        }
    }

    /// RowDescription for a statement, or `None` when it returns no rows.
    async fn describe_fields(
        &mut self,
        statement: &PreparedStatement,
        formats: &[i16],
    ) -> Result<Option<bytes::BytesMut>, PgError> {
        match statement.kind {
            StatementKind::LocalIntercept => {
                let canned = intercept::lookup(&statement.bare)
                    .expect("intercept statement lost its catalogue entry");
                let fields: Vec<FieldDescription> = canned
                    .fields
                    .iter()
                    .enumerate()
                    .map(|(i, (name, type_oid))| FieldDescription {
                        name: (*name).to_string(),
                        type_oid: *type_oid,
                        type_len: oid::type_len(*type_oid),
                        format: format_at(formats, i),
                    })
                    .collect();
                Ok(Some(row_description(&fields)))
            }
            StatementKind::Show => Ok(Some(row_description(&[FieldDescription::text(
                "setting",
                oid::TEXT,
                -1,
            )]))),
            StatementKind::Select | StatementKind::Unknown => {
                match self.backend.describe(&statement.rewritten).await? {
                    None => Ok(None),
                    Some(columns) => {
                        let result = crate::backend::ResultSet {
                            columns,
                            rows: Vec::new(),
                        };
                        Ok(Some(render_row_description(&result, formats)))
                    }
                }
            }
            _ => Ok(None),
        }
    }

    pub(crate) async fn handle_execute(
        &mut self,
        portal_name: &str,
        max_rows: i32,
    ) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        if let Err(pg) = self.check_cancel() {
            if let Err(abort_err) = self.backend.abort().await {
                debug!("backend abort after cancel failed: {abort_err}");
            }
            return self.fail_group(pg).await;
        }
        let Some(mut portal) = self.portals.remove(portal_name) else {
            return self.fail_group(portal_not_found(portal_name)).await;
        };

        let kind = portal.statement.kind;
        let result = match kind {
            StatementKind::Empty => {
                self.queue.push_frame(empty_query_response());
                Ok(())
            }
            StatementKind::Dml => self.execute_dml_portal(&mut portal).await,
            StatementKind::Select
            | StatementKind::Unknown
            | StatementKind::LocalIntercept
            | StatementKind::Show => self.execute_row_portal(&mut portal, max_rows).await,
            StatementKind::Copy => {
                // COPY takes over the stream; everything queued so far must
                // be on the wire first.
                match self.dispatch_batch().await {
                    Ok(()) => {
                        self.drain_queue().await?;
                        return self.execute_copy_portal(&portal).await;
                    }
                    Err(_) => Ok(()),
                }
            }
            _ => {
                // Session statements, transaction control, DDL and SQL-level
                // prepared statements share the simple-path executors.
                match self.dispatch_batch().await {
                    Ok(()) => {
                        let sql = portal.statement.sql.clone();
                        let classified = crate::sql::Classified {
                            kind,
                            bare: portal.statement.bare.clone(),
                        };
                        match self.run_shared_statement(&sql, &classified).await {
                            Ok(StatementOutcome::Frames(frames)) => {
                                self.queue.push_frame(frames);
                                portal.drained = true;
                                Ok(())
                            }
                            Ok(_) => unreachable!("COPY is classified before dispatch"),
                            Err(pg) => Err(pg),
                        }
                    }
                    Err(_) => Ok(()),
                }
            }
        };

        self.portals.insert(portal_name.to_string(), portal);
        match result {
            Ok(()) => Ok(()),
            Err(pg) => self.fail_group(pg).await,
        }
    }

    /// DML execution: parameterless statements queue into the batch, bound
    /// ones flush it and run individually. Either way the response lands in
    /// the queue at this statement's position.
    async fn execute_dml_portal(&mut self, portal: &mut Portal) -> Result<(), PgError> {
        let verb = dml_verb(&portal.statement.bare);
        if portal.params.is_empty() {
            let slot = self.queue.push_slot();
            let full = self
                .batch
                .push(portal.statement.rewritten.clone(), verb, slot);
            if full {
                // Ceiling reached; errors are already distributed to slots.
                let _ = self.dispatch_batch().await;
            }
            return Ok(());
        }

        self.dispatch_batch().await?;
        let outcome = self
            .backend
            .execute(&portal.statement.rewritten, &portal.params)
            .await?;
        match outcome {
            BackendOutcome::Count(rows, _) => {
                self.queue.push_frame(command_complete(&verb.tag(rows)));
            }
            BackendOutcome::Rows(result) => {
                // DML with a RETURNING clause: rows then the DML tag.
                let ctx = self.params.codec_context();
                let count = result.rows.len() as u64;
                let mut frames = bytes::BytesMut::new();
                for row in &result.rows {
                    frames.put(render_data_row(row, &portal.result_formats, &ctx)?);
                }
                frames.put(command_complete(&verb.tag(count)));
                self.queue.push_frame(frames);
            }
            BackendOutcome::Done => {
                self.queue.push_frame(command_complete(&verb.tag(0)));
            }
        }
        Ok(())
    }

    /// Row-returning execution with portal suspension.
    async fn execute_row_portal(
        &mut self,
        portal: &mut Portal,
        max_rows: i32,
    ) -> Result<(), PgError> {
        if portal.drained {
            self.queue.push_frame(command_complete("SELECT 0"));
            return Ok(());
        }

        if portal.result.is_none() {
            // First execution: results are required, so the batch goes now.
            self.dispatch_batch().await?;
            let result = match portal.statement.kind {
                StatementKind::LocalIntercept => {
                    let canned = intercept::lookup(&portal.statement.bare)
                        .expect("intercept statement lost its catalogue entry");
                    canned_to_result(canned)
                }
                StatementKind::Show => self.show_result(&portal.statement.bare)?,
                _ => {
                    match self
                        .backend
                        .execute(&portal.statement.rewritten, &portal.params)
                        .await?
                    {
                        BackendOutcome::Rows(result) => result,
                        BackendOutcome::Count(rows, verb) => {
                            self.queue.push_frame(command_complete(&verb.tag(rows)));
                            portal.drained = true;
                            return Ok(());
                        }
                        BackendOutcome::Done => {
                            self.queue
                                .push_frame(command_complete(&utility_tag(&portal.statement.bare)));
                            portal.drained = true;
                            return Ok(());
                        }
                    }
                }
            };
            portal.result = Some(result);
            portal.cursor = 0;
        }

        let result = portal.result.as_ref().expect("portal result just set");
        let total = result.rows.len();
        let end = if max_rows > 0 {
            (portal.cursor + max_rows as usize).min(total)
        } else {
            total
        };

        let ctx = self.params.codec_context();
        let mut frames = bytes::BytesMut::new();
        for row in &result.rows[portal.cursor..end] {
            frames.put(render_data_row(row, &portal.result_formats, &ctx)?);
        }
        portal.cursor = end;

        if portal.cursor >= total {
            let tag = if portal.statement.kind == StatementKind::Show {
                "SHOW".to_string()
            } else {
                format!("SELECT {total}")
            };
            frames.put(command_complete(&tag));
            portal.drained = true;
        } else {
            frames.put(portal_suspended());
        }
        self.queue.push_frame(frames);
        Ok(())
    }

    /// COPY via the extended protocol: the response frames bypass the queue
    /// because the sub-protocol owns the socket until it completes.
    async fn execute_copy_portal(&mut self, portal: &Portal) -> Result<(), Error> {
        let spec = match crate::copy::parse_copy(&portal.statement.bare) {
            Ok(spec) => spec,
            Err(pg) => return self.fail_group(pg).await,
        };
        let result = match spec.direction {
            crate::copy::CopyDirection::FromStdin => self.run_copy_in(spec).await?,
            crate::copy::CopyDirection::ToStdout => self.run_copy_out(spec).await?,
        };
        match result {
            Ok(rows) => {
                self.queue
                    .push_frame(command_complete(&format!("COPY {rows}")));
                Ok(())
            }
            Err(pg) => self.fail_group(pg).await,
        }
    }

    pub(crate) async fn handle_close(&mut self, kind: u8, name: &str) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        match kind {
            TARGET_STATEMENT => {
                // Existing portals keep their statement alive via the Arc.
                self.statements.remove(name);
            }
            TARGET_PORTAL => {
                self.portals.remove(name);
            }
            other => {
                return self
                    .fail_group(PgError::protocol(format!(
                        "invalid CLOSE message subtype {:?}",
                        other as char
                    )))
                    .await
            }
        }
        self.queue.push_frame(close_complete());
        Ok(())
    }

    /// Flush: emit pending responses without ending the group.
    pub(crate) async fn handle_flush(&mut self) -> Result<(), Error> {
        if !self.suppress {
            let _ = self.dispatch_batch().await;
        }
        self.drain_queue().await
    }

    /// Sync: end the group. Exactly one ReadyForQuery, carrying the current
    /// transaction state; the unnamed portal dies here.
    pub(crate) async fn handle_sync(&mut self) -> Result<(), Error> {
        if self.suppress {
            self.batch.discard(&mut self.queue);
        } else {
            let _ = self.dispatch_batch().await;
        }
        self.drain_queue().await?;
        self.portals.remove("");
        self.suppress = false;
        self.write_ready_for_query().await
    }
}

fn portal_not_found(name: &str) -> PgError {
    PgError::new(
        sqlstate::INVALID_CURSOR_NAME,
        format!("portal \"{name}\" does not exist"),
    )
}

fn canned_to_result(canned: &intercept::CannedResult) -> crate::backend::ResultSet {
    crate::backend::ResultSet {
        columns: canned
            .fields
            .iter()
            .map(|(name, type_oid)| crate::backend::ColumnInfo {
                name: (*name).to_string(),
                type_oid: *type_oid,
            })
            .collect(),
        rows: canned
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|cell| {
                        cell.as_ref()
                            .map(|text| codec::PgValue::Text(text.clone()))
                    })
                    .collect()
            })
            .collect(),
    }
}
