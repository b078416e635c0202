//! Backend driver contract.
//!
//! The session engine talks to the backing SQL service exclusively through
//! [`BackendConnection`]. A connection is owned 1:1 by a session for the
//! session's lifetime. Errors carry an SQLSTATE and message that pass to the
//! wire verbatim.

pub mod mock;

use async_trait::async_trait;

use crate::codec::PgValue;

/// Error surfaced by the backend driver.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{sqlstate}: {message}")]
pub struct BackendError {
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
}

impl BackendError {
    pub fn new(sqlstate: &str, message: impl Into<String>) -> BackendError {
        BackendError {
            sqlstate: sqlstate.to_string(),
            message: message.into(),
            detail: None,
        }
    }
}

impl From<BackendError> for crate::errors::PgError {
    /// SQLSTATE and message pass through to the client verbatim.
    fn from(error: BackendError) -> Self {
        let mut pg = crate::errors::PgError::new(&error.sqlstate, error.message);
        pg.detail = error.detail;
        pg
    }
}

/// One result column: name plus type OID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub type_oid: u32,
}

/// A fully materialised result set.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Option<PgValue>>>,
}

/// What kind of statement produced an update count, for CommandComplete tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Insert,
    Update,
    Delete,
    Ddl,
    Other,
}

impl CommandKind {
    /// The CommandComplete tag for this command with the given row count.
    pub fn tag(&self, rows: u64) -> String {
        match self {
            CommandKind::Insert => format!("INSERT 0 {rows}"),
            CommandKind::Update => format!("UPDATE {rows}"),
            CommandKind::Delete => format!("DELETE {rows}"),
            CommandKind::Ddl | CommandKind::Other => "OK".to_string(),
        }
    }
}

/// Outcome of a single statement execution.
#[derive(Debug, Clone)]
pub enum BackendOutcome {
    Rows(ResultSet),
    Count(u64, CommandKind),
    /// Statements with no result and no count (DDL, session statements).
    Done,
}

/// Outcome of a batch: per-statement update counts, or a failure that names
/// how many leading statements succeeded.
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Complete(Vec<u64>),
    Failed {
        /// Update counts for statements that committed before the failure.
        completed: Vec<u64>,
        error: BackendError,
    },
}

/// Column metadata for COPY: names, OIDs and how many columns carry a
/// secondary index (each indexed column doubles its mutation cost).
#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub indexed_columns: u64,
}

/// Read-only staleness bound for `begin_read_only`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Staleness {
    #[default]
    Strong,
    /// Maximum staleness in seconds.
    MaxStaleness(u64),
    /// Exact staleness in seconds.
    ExactStaleness(u64),
}

/// Driver contract consumed by the session engine.
#[async_trait]
pub trait BackendConnection: Send {
    /// Execute one statement with bound parameters.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
    ) -> Result<BackendOutcome, BackendError>;

    /// Execute a contiguous run of DML statements as one unit.
    async fn execute_batch(&mut self, statements: &[String]) -> Result<BatchOutcome, BackendError>;

    /// Result columns a statement would produce, or `None` for statements
    /// with no result set. Used to answer Describe without executing.
    async fn describe(&mut self, sql: &str) -> Result<Option<Vec<ColumnInfo>>, BackendError>;

    async fn begin(&mut self) -> Result<(), BackendError>;

    async fn begin_read_only(&mut self, staleness: Staleness) -> Result<(), BackendError>;

    async fn commit(&mut self) -> Result<(), BackendError>;

    async fn rollback(&mut self) -> Result<(), BackendError>;

    /// Abort whatever is in flight; used by cancellation. Must be safe to
    /// call when nothing is running.
    async fn abort(&mut self) -> Result<(), BackendError>;

    /// True while a backend transaction is open.
    fn in_transaction(&self) -> bool;

    async fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), BackendError>;

    async fn get_parameter(&mut self, name: &str) -> Result<Option<String>, BackendError>;

    /// Bulk-insert rows for COPY. One call is one commit unit when the
    /// session is not inside an explicit transaction.
    async fn copy_rows(
        &mut self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Option<PgValue>>>,
    ) -> Result<u64, BackendError>;

    /// Column and index metadata for a table, used by COPY.
    async fn table_metadata(&mut self, table: &str) -> Result<TableMetadata, BackendError>;
}
