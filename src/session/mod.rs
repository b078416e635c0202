//! Per-session protocol engine.
//!
//! One logical task owns one client session: all protocol state lives here
//! and is never shared. The session consumes decoded frontend frames, drives
//! the extended-query pipeline and the transaction machine, batches DML
//! toward the backend and streams results back in the formats the client
//! negotiated.

pub mod batch;
pub mod extended;
pub mod parameters;
pub mod registry;
pub mod response;
pub mod simple;
pub mod statements;
pub mod transaction;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use bytes::{BufMut, BytesMut};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::backend::{BackendConnection, ResultSet};
use crate::codec::PgValue;
use crate::config::Config;
use crate::errors::{sqlstate, Error, PgError, Severity};
use crate::messages::{
    authentication_ok, backend_key_data, error_response, read_message, ready_for_query,
    write_all_flush, FrontendMessage,
};
use crate::sql::StatementKind;

use batch::DmlBatch;
use parameters::SessionParameters;
use registry::{CancelFlag, SessionKey};
use response::ResponseQueue;
use transaction::TxState;

/// Protocol-level state, as distinct from the transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProtocolState {
    Ready,
    Busy,
    CopyIn,
    CopyOut,
    Terminated,
}

/// A named prepared statement. Immutable once parsed; the anonymous slot is
/// replaced wholesale by the next unnamed Parse.
#[derive(Debug)]
pub struct PreparedStatement {
    pub name: String,
    pub sql: String,
    /// Comment-free text classification was based on.
    pub bare: String,
    /// Text actually sent to the backend (after rewrites).
    pub rewritten: String,
    pub kind: StatementKind,
    /// Client-supplied parameter type OIDs, unmodified.
    pub type_hints: Vec<u32>,
    /// Effective parameter types, one per `$N` position.
    pub param_types: Vec<u32>,
}

/// A statement bound to parameter values and result formats.
#[derive(Debug)]
pub struct Portal {
    pub statement: Arc<PreparedStatement>,
    pub params: Vec<Option<PgValue>>,
    pub result_formats: Vec<i16>,
    /// Materialised rows once the first Execute has run.
    pub result: Option<ResultSet>,
    /// Next row to deliver from `result`.
    pub cursor: usize,
    /// Rows are exhausted and CommandComplete has been sent.
    pub drained: bool,
}

/// Per-connection protocol engine. Generic over the stream halves so tests
/// drive it through in-memory duplex pipes.
pub struct Session<S, T> {
    read: S,
    write: T,
    backend: Box<dyn BackendConnection>,
    config: Config,
    params: SessionParameters,
    key: SessionKey,
    cancel: CancelFlag,
    state: ProtocolState,
    tx: TxState,
    statements: AHashMap<String, Arc<PreparedStatement>>,
    portals: AHashMap<String, Portal>,
    queue: ResponseQueue,
    batch: DmlBatch,
    /// True between an extended-mode error and the next Sync: incoming
    /// extended requests are ignored and produce no responses.
    suppress: bool,
    request_counter: u64,
}

impl<S, T> Session<S, T>
where
    S: AsyncRead + Unpin,
    T: AsyncWrite + Unpin,
{
    /// Build a session over an authenticated stream. `startup_params` are
    /// the client's StartupMessage parameters; `process_id` is assigned by
    /// the listener.
    pub fn new(
        read: S,
        write: T,
        backend: Box<dyn BackendConnection>,
        config: Config,
        startup_params: &HashMap<String, String>,
        process_id: i32,
    ) -> Session<S, T> {
        let mut params = SessionParameters::new(config.accept_unknown_parameters);
        params.apply_startup(startup_params);
        let key = SessionKey::generate(process_id);
        let batch = DmlBatch::new(config.max_batch_size);
        Session {
            read,
            write,
            backend,
            config,
            params,
            key,
            cancel: CancelFlag::default(),
            state: ProtocolState::Ready,
            tx: TxState::Idle,
            statements: AHashMap::new(),
            portals: AHashMap::new(),
            queue: ResponseQueue::new(),
            batch,
            suppress: false,
            request_counter: 0,
        }
    }

    /// The cancel key to report to the listener for CancelRequest routing.
    pub fn session_key(&self) -> SessionKey {
        self.key
    }

    /// Run the session to completion: emit the post-auth burst, then consume
    /// frames until Terminate or disconnect.
    pub async fn run(mut self) -> Result<(), Error> {
        self.cancel = registry::register(self.key);
        let result = self.run_inner().await;
        registry::unregister(&self.key);
        match &result {
            Ok(()) => debug!(
                "session {} finished in state {:?} after {} requests",
                self.key.process_id, self.state, self.request_counter
            ),
            Err(err) if err.is_disconnect() => {
                debug!("session {} client disconnected", self.key.process_id)
            }
            Err(err) => error!("session {} failed: {err}", self.key.process_id),
        }
        result
    }

    async fn run_inner(&mut self) -> Result<(), Error> {
        self.send_startup_burst().await?;
        info!(
            "session {} ready (application_name={:?})",
            self.key.process_id,
            self.params.application_name()
        );

        loop {
            let frame = match self.read_frame_idle().await {
                Ok(frame) => frame,
                Err(Error::ClientDisconnected) => {
                    self.state = ProtocolState::Terminated;
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            let message = match FrontendMessage::decode(frame) {
                Ok(message) => message,
                Err(mut pg) => {
                    // Unknown tag or malformed payload: once the message
                    // boundary can no longer be trusted the connection is
                    // unsalvageable, so the violation is fatal.
                    warn!("session {}: {pg}", self.key.process_id);
                    pg.severity = Severity::Fatal;
                    let frame = error_response(&pg);
                    let _ = write_all_flush(&mut self.write, &frame).await;
                    return Err(Error::Fatal(pg));
                }
            };

            self.request_counter += 1;
            match message {
                FrontendMessage::Terminate => {
                    self.state = ProtocolState::Terminated;
                    return Ok(());
                }
                FrontendMessage::Query { sql } => {
                    self.state = ProtocolState::Busy;
                    self.handle_query(&sql).await?;
                    self.state = ProtocolState::Ready;
                }
                FrontendMessage::Parse {
                    name,
                    sql,
                    param_type_oids,
                } => {
                    self.state = ProtocolState::Busy;
                    self.handle_parse(name, sql, param_type_oids).await?;
                }
                FrontendMessage::Bind(bind) => {
                    self.state = ProtocolState::Busy;
                    self.handle_bind(bind).await?
                }
                FrontendMessage::Describe { kind, name } => {
                    self.state = ProtocolState::Busy;
                    self.handle_describe(kind, &name).await?
                }
                FrontendMessage::Execute { portal, max_rows } => {
                    self.state = ProtocolState::Busy;
                    self.handle_execute(&portal, max_rows).await?
                }
                FrontendMessage::Close { kind, name } => self.handle_close(kind, &name).await?,
                FrontendMessage::Flush => self.handle_flush().await?,
                FrontendMessage::Sync => {
                    self.handle_sync().await?;
                    self.state = ProtocolState::Ready;
                }
                // Copy frames outside COPY mode are dropped to stay in sync,
                // the way the server drops them.
                FrontendMessage::CopyData { .. }
                | FrontendMessage::CopyDone
                | FrontendMessage::CopyFail { .. } => {
                    debug!(
                        "session {} dropping stray copy frame",
                        self.key.process_id
                    );
                }
                FrontendMessage::Password { .. } => {
                    self.fail_group(PgError::protocol(
                        "unexpected PasswordMessage outside authentication",
                    ))
                    .await?;
                }
            }
        }
    }

    /// AuthenticationOk, the negotiated ParameterStatus set, BackendKeyData
    /// and the first ReadyForQuery.
    async fn send_startup_burst(&mut self) -> Result<(), Error> {
        let mut out = BytesMut::new();
        out.put(authentication_ok());
        out.put(self.params.startup_messages());
        out.put(backend_key_data(self.key.process_id, self.key.secret_key));
        out.put(ready_for_query(self.tx.status_byte()));
        write_all_flush(&mut self.write, &out).await
    }

    /// Read the next frame, applying the idle-in-transaction deadline while
    /// a transaction block is open.
    async fn read_frame_idle(&mut self) -> Result<BytesMut, Error> {
        let timeout_secs = self.config.idle_in_transaction_timeout_secs;
        if timeout_secs == 0 || !self.tx.in_block() {
            return read_message(&mut self.read, self.config.max_message_size).await;
        }
        let deadline = Duration::from_secs(timeout_secs);
        match tokio::time::timeout(
            deadline,
            read_message(&mut self.read, self.config.max_message_size),
        )
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(
                    "session {} idle in transaction for {timeout_secs}s, failing transaction",
                    self.key.process_id
                );
                if let Err(err) = self.backend.rollback().await {
                    warn!("rollback after idle timeout failed: {err}");
                }
                self.tx = TxState::Failed;
                let synthetic = PgError::new(
                    sqlstate::IN_FAILED_SQL_TRANSACTION,
                    "terminating transaction: idle-in-transaction timeout exceeded",
                );
                let frame = error_response(&synthetic);
                write_all_flush(&mut self.write, &frame).await?;
                // The block is failed; wait for the client without a timer.
                read_message(&mut self.read, self.config.max_message_size).await
            }
        }
    }

    /// Report an error on the extended path: dispatch what was already
    /// accepted, queue the ErrorResponse, then suppress until Sync. A second
    /// error inside a suppressed group is swallowed.
    pub(crate) async fn fail_group(&mut self, error: PgError) -> Result<(), Error> {
        if self.suppress {
            return Ok(());
        }
        // Previously accepted DML still executes; its responses precede the
        // error in the queue.
        if !self.batch.is_empty() {
            if let Err(batch_error) = self.dispatch_batch().await {
                debug!("batch failed while failing group: {batch_error}");
                // The batch error is already queued in its slot and the
                // group is now suppressed; drop the later error.
                return Ok(());
            }
        }
        let fatal = error.severity == Severity::Fatal;
        self.queue.push_frame(error_response(&error));
        self.suppress = true;
        self.tx.on_error();
        if fatal {
            self.drain_queue().await?;
            return Err(Error::Fatal(error));
        }
        Ok(())
    }

    /// Dispatch the pending DML batch and flip state on failure.
    pub(crate) async fn dispatch_batch(&mut self) -> Result<(), PgError> {
        match self.batch.dispatch(self.backend.as_mut(), &mut self.queue).await {
            Ok(()) => Ok(()),
            Err(error) => {
                self.suppress = true;
                self.tx.on_error();
                Err(error)
            }
        }
    }

    /// Write everything queued so far and flush.
    pub(crate) async fn drain_queue(&mut self) -> Result<(), Error> {
        let mut out = BytesMut::new();
        self.queue.drain_into(&mut out);
        if !out.is_empty() {
            write_all_flush(&mut self.write, &out).await?;
        }
        Ok(())
    }

    /// Write one rendered response directly (simple-query path).
    pub(crate) async fn write_frames(&mut self, frames: BytesMut) -> Result<(), Error> {
        write_all_flush(&mut self.write, &frames).await
    }

    pub(crate) async fn write_ready_for_query(&mut self) -> Result<(), Error> {
        let frame = ready_for_query(self.tx.status_byte());
        write_all_flush(&mut self.write, &frame).await
    }

    /// Poll the out-of-band cancel flag at a safe point.
    pub(crate) fn check_cancel(&mut self) -> Result<(), PgError> {
        if self.cancel.take() {
            Err(PgError::new(
                sqlstate::QUERY_CANCELED,
                "canceling statement due to user request",
            ))
        } else {
            Ok(())
        }
    }

    /// Portals do not survive the end of a transaction block.
    pub(crate) fn close_transaction_portals(&mut self) {
        self.portals.clear();
    }
}
