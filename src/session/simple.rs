//! Simple-query mode.
//!
//! One Query frame is one request group: the string may hold several
//! semicolon-separated statements, executed as a single implicit transaction
//! when no explicit block is open. Responses are written directly; exactly
//! one ReadyForQuery ends the group.

use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::errors::{Error, PgError};
use crate::messages::{command_complete, empty_query_response, error_response};
use crate::sql::{self, Classified, StatementKind};

use super::statements::StatementOutcome;
use super::transaction::TxState;
use super::Session;

impl<S, T> Session<S, T>
where
    S: AsyncRead + Unpin,
    T: AsyncWrite + Unpin,
{
    pub(crate) async fn handle_query(&mut self, sql_text: &str) -> Result<(), Error> {
        debug!("session {} query: {sql_text}", self.key.process_id);
        let statements = sql::split_statements(sql_text);
        if statements.is_empty() {
            self.write_frames(empty_query_response()).await?;
            return self.write_ready_for_query().await;
        }

        let multi = statements.len() > 1;
        // A multi-statement string outside an explicit block runs as one
        // implicit transaction: all or nothing at end-of-string.
        let mut implicit_tx = multi && !self.tx.in_block();
        if implicit_tx {
            if let Err(err) = self.backend.begin().await {
                let pg: PgError = err.into();
                self.write_frames(error_response(&pg)).await?;
                return self.write_ready_for_query().await;
            }
        }

        let mut failed = false;
        for (index, statement) in statements.iter().enumerate() {
            let classified = sql::classify(statement);
            if multi && classified.kind == StatementKind::Empty {
                continue;
            }

            // Failed-transaction gate: only transaction-ending statements
            // run; everything else reports 25P02 without changing state.
            if self.tx == TxState::Failed && !classified.kind.allowed_while_failed() {
                self.write_frames(error_response(&PgError::in_failed_transaction()))
                    .await?;
                failed = true;
                break;
            }

            // BEGIN inside an implicit transaction promotes it to explicit.
            if implicit_tx && classified.kind == StatementKind::Begin {
                implicit_tx = false;
                self.tx = TxState::InTransaction;
                self.write_frames(command_complete("BEGIN")).await?;
                continue;
            }
            if implicit_tx && classified.kind.is_transaction_control() {
                // COMMIT/ROLLBACK close the implicit transaction early.
                implicit_tx = false;
                self.tx = TxState::InTransaction;
            }

            match self.run_simple_statement(statement, &classified).await? {
                Ok(()) => {}
                Err(pg) => {
                    debug!(
                        "session {} statement {index} failed: {pg}",
                        self.key.process_id
                    );
                    if implicit_tx {
                        if let Err(rollback_err) = self.backend.rollback().await {
                            debug!("implicit rollback failed: {rollback_err}");
                        }
                        implicit_tx = false;
                    } else {
                        self.tx.on_error();
                    }
                    self.write_frames(error_response(&pg)).await?;
                    failed = true;
                    break;
                }
            }
        }

        if implicit_tx {
            if let Err(err) = self.backend.commit().await {
                if !failed {
                    let pg: PgError = err.into();
                    self.write_frames(error_response(&pg)).await?;
                }
            }
        }
        self.write_ready_for_query().await
    }

    /// Run one statement of a simple-query string and write its responses.
    /// The outer Result is connection state; the inner is the statement's.
    async fn run_simple_statement(
        &mut self,
        statement: &str,
        classified: &Classified,
    ) -> Result<Result<(), PgError>, Error> {
        let outcome = match self.run_shared_statement(statement, classified).await {
            Ok(outcome) => outcome,
            Err(pg) => return Ok(Err(pg)),
        };
        match outcome {
            StatementOutcome::Frames(frames) => {
                self.write_frames(frames).await?;
                Ok(Ok(()))
            }
            StatementOutcome::CopyIn(spec) => match self.run_copy_in(spec).await? {
                Ok(rows) => {
                    self.write_frames(command_complete(&format!("COPY {rows}")))
                        .await?;
                    Ok(Ok(()))
                }
                Err(pg) => Ok(Err(pg)),
            },
            StatementOutcome::CopyOut(spec) => match self.run_copy_out(spec).await? {
                Ok(rows) => {
                    self.write_frames(command_complete(&format!("COPY {rows}")))
                        .await?;
                    Ok(Ok(()))
                }
                Err(pg) => Ok(Err(pg)),
            },
        }
    }
}
