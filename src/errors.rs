//! Errors.
//!
//! Two layers: [`Error`] covers everything that can take a session down
//! (socket failures, framing violations, shutdown), while [`PgError`] is the
//! client-visible shape that maps one-to-one onto an ErrorResponse frame.
//! Framing errors never become a [`PgError`]; a connection that cannot be
//! framed cannot be answered.

use std::io;

/// SQLSTATE codes emitted by the adapter itself. Backend SQLSTATEs pass
/// through verbatim and are not restricted to this set.
pub mod sqlstate {
    pub const PROTOCOL_VIOLATION: &str = "08P01";
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    pub const INVALID_TEXT_REPRESENTATION: &str = "22P02";
    pub const NUMERIC_VALUE_OUT_OF_RANGE: &str = "22003";
    pub const INVALID_DATETIME_FORMAT: &str = "22007";
    pub const DATETIME_FIELD_OVERFLOW: &str = "22008";
    pub const INVALID_PARAMETER_VALUE: &str = "22023";
    pub const BAD_COPY_FILE_FORMAT: &str = "22P04";
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";
    pub const INVALID_CURSOR_NAME: &str = "34000";
    pub const ACTIVE_SQL_TRANSACTION: &str = "25001";
    pub const NO_ACTIVE_SQL_TRANSACTION: &str = "25P01";
    pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";
    pub const UNDEFINED_OBJECT: &str = "42704";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const QUERY_CANCELED: &str = "57014";
    pub const PROGRAM_LIMIT_EXCEEDED: &str = "54000";
    pub const CONNECTION_FAILURE: &str = "08006";
}

/// Severity field of an ErrorResponse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

/// A client-visible error, carried until the session is ready to emit the
/// ErrorResponse frame for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgError {
    pub severity: Severity,
    pub sqlstate: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// 1-based byte position into the original query text.
    pub position: Option<u32>,
}

impl PgError {
    pub fn new(sqlstate: &str, message: impl Into<String>) -> PgError {
        PgError {
            severity: Severity::Error,
            sqlstate: sqlstate.to_string(),
            message: message.into(),
            detail: None,
            hint: None,
            position: None,
        }
    }

    pub fn fatal(sqlstate: &str, message: impl Into<String>) -> PgError {
        PgError {
            severity: Severity::Fatal,
            ..PgError::new(sqlstate, message)
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> PgError {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> PgError {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_position(mut self, position: u32) -> PgError {
        self.position = Some(position);
        self
    }

    /// Shorthand for decode failures of parameter and COPY values.
    pub fn invalid_text(type_name: &str, value: &str) -> PgError {
        PgError::new(
            sqlstate::INVALID_TEXT_REPRESENTATION,
            format!("invalid input syntax for type {type_name}: \"{value}\""),
        )
    }

    pub fn protocol(message: impl Into<String>) -> PgError {
        PgError::new(sqlstate::PROTOCOL_VIOLATION, message)
    }

    pub fn in_failed_transaction() -> PgError {
        PgError::new(
            sqlstate::IN_FAILED_SQL_TRANSACTION,
            "current transaction is aborted, commands ignored until end of transaction block",
        )
    }
}

impl std::fmt::Display for PgError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}: {} ({})",
            self.severity.as_str(),
            self.message,
            self.sqlstate
        )
    }
}

impl std::error::Error for PgError {}

/// Frame-level violations. These terminate the session without an
/// ErrorResponse; the stream is no longer in a state where one can be read.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("message length {0} is below the protocol minimum of 4")]
    LenBelowMinimum(i32),
    #[error("message length {len} exceeds the maximum of {max}")]
    TooLarge { len: i32, max: i32 },
    #[error("unexpected end of stream while reading a frame")]
    UnexpectedEof,
    #[error("startup message length {0} is out of range")]
    BadStartupLen(i32),
}

/// Various errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read from socket")]
    SocketRead(#[source] io::Error),
    #[error("failed to write to socket")]
    SocketWrite(#[source] io::Error),
    #[error("failed to flush socket")]
    SocketFlush(#[source] io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Client disconnected cleanly (Terminate or EOF between frames).
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("shutting down")]
    ShuttingDown,
    /// A fatal client-visible error after which the session cannot continue.
    /// The ErrorResponse has already been written when this surfaces.
    #[error("fatal: {0}")]
    Fatal(PgError),
}

impl Error {
    /// True when the error is a quiet end-of-session rather than a defect
    /// worth logging at error level.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ClientDisconnected)
    }
}
