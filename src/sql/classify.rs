//! Statement classification.
//!
//! The category is decided by the first significant keyword after whitespace
//! and comments. Classification never parses the full statement; the backend
//! remains the source of truth for syntax.

use crate::sql::comments::strip_comments;

/// Statement categories the session engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    /// INSERT, UPDATE, DELETE, MERGE.
    Dml,
    Ddl,
    Copy,
    Begin,
    Commit,
    Rollback,
    Savepoint,
    Release,
    RollbackTo,
    Set,
    Reset,
    Show,
    Prepare,
    ExecutePrepared,
    Deallocate,
    /// Answered from the local-intercept catalogue without a backend call.
    LocalIntercept,
    Empty,
    Unknown,
}

impl StatementKind {
    /// True for the transaction-control family.
    pub fn is_transaction_control(&self) -> bool {
        matches!(
            self,
            StatementKind::Begin
                | StatementKind::Commit
                | StatementKind::Rollback
                | StatementKind::RollbackTo
                | StatementKind::Savepoint
                | StatementKind::Release
        )
    }

    /// Statements that may produce a result set.
    pub fn returns_rows(&self) -> bool {
        matches!(
            self,
            StatementKind::Select | StatementKind::Show | StatementKind::LocalIntercept
        )
    }

    /// Statements allowed in a failed transaction block.
    pub fn allowed_while_failed(&self) -> bool {
        matches!(
            self,
            StatementKind::Commit | StatementKind::Rollback | StatementKind::RollbackTo
        )
    }
}

/// A classified statement: the kind plus the comment-free text the decision
/// was made on.
#[derive(Debug, Clone)]
pub struct Classified {
    pub kind: StatementKind,
    pub bare: String,
}

/// Which DML verb a statement starts with, for CommandComplete tags.
pub fn dml_verb(bare: &str) -> crate::backend::CommandKind {
    use crate::backend::CommandKind;
    let first = bare
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    match first.as_str() {
        "INSERT" => CommandKind::Insert,
        "UPDATE" | "MERGE" => CommandKind::Update,
        "DELETE" => CommandKind::Delete,
        _ => CommandKind::Other,
    }
}

/// Classify one statement.
pub fn classify(sql: &str) -> Classified {
    let bare = strip_comments(sql);
    let trimmed = bare.trim();
    if trimmed.is_empty() || trimmed == ";" {
        return Classified {
            kind: StatementKind::Empty,
            bare,
        };
    }

    let mut words = trimmed
        .split(|c: char| c.is_whitespace() || c == ';' || c == '(')
        .filter(|w| !w.is_empty());
    let first = words.next().unwrap_or("").to_ascii_uppercase();
    let second = words.next().map(|w| w.to_ascii_uppercase());

    let mut kind = match first.as_str() {
        "SELECT" | "WITH" | "VALUES" | "TABLE" => StatementKind::Select,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" => StatementKind::Dml,
        "CREATE" | "DROP" | "ALTER" | "TRUNCATE" | "GRANT" | "REVOKE" | "ANALYZE" => {
            StatementKind::Ddl
        }
        "COPY" => StatementKind::Copy,
        "BEGIN" | "START" => StatementKind::Begin,
        "COMMIT" | "END" => StatementKind::Commit,
        "ROLLBACK" | "ABORT" => match second.as_deref() {
            Some("TO") => StatementKind::RollbackTo,
            _ => StatementKind::Rollback,
        },
        "SAVEPOINT" => StatementKind::Savepoint,
        "RELEASE" => StatementKind::Release,
        "SET" => StatementKind::Set,
        "RESET" => StatementKind::Reset,
        "SHOW" => StatementKind::Show,
        "PREPARE" => StatementKind::Prepare,
        "EXECUTE" => StatementKind::ExecutePrepared,
        "DEALLOCATE" => StatementKind::Deallocate,
        _ => StatementKind::Unknown,
    };

    // Fixed set of driver-introspection queries answered without a backend
    // round trip.
    if matches!(kind, StatementKind::Select | StatementKind::Unknown)
        && crate::sql::intercept::lookup(&bare).is_some()
    {
        kind = StatementKind::LocalIntercept;
    }

    Classified { kind, bare }
}
