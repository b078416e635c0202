//! In-memory backend used by the test suite.
//!
//! Responses can be scripted per call; anything unscripted gets a reasonable
//! default derived from the first keyword. Every call is recorded so tests
//! can assert on what actually reached the backend and in which order. The
//! state sits behind a shared handle so a test can keep a clone while the
//! session owns the other.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::codec::PgValue;

use super::{
    BackendConnection, BackendError, BackendOutcome, BatchOutcome, ColumnInfo, CommandKind,
    ResultSet, Staleness, TableMetadata,
};

#[derive(Debug)]
enum Scripted {
    Outcome(BackendOutcome),
    Error(BackendError),
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<Scripted>,
    batch_script: VecDeque<BatchOutcome>,
    tables: HashMap<String, TableMetadata>,
    parameters: HashMap<String, String>,
    describe_results: HashMap<String, Vec<ColumnInfo>>,
    in_tx: bool,
    executed: Vec<String>,
    batches: Vec<Vec<String>>,
    copy_chunks: Vec<usize>,
    copied_rows: Vec<Vec<Option<PgValue>>>,
    tx_log: Vec<&'static str>,
    fail_next_copy: Option<BackendError>,
}

/// Scriptable, recording backend double. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl MockBackend {
    pub fn new() -> MockBackend {
        MockBackend::default()
    }

    /// Script a result set for the next unscripted `execute` call.
    pub fn push_rows(&self, columns: &[(&str, u32)], rows: Vec<Vec<Option<PgValue>>>) {
        let result = ResultSet {
            columns: column_infos(columns),
            rows,
        };
        self.state
            .lock()
            .script
            .push_back(Scripted::Outcome(BackendOutcome::Rows(result)));
    }

    pub fn push_count(&self, rows: u64, kind: CommandKind) {
        self.state
            .lock()
            .script
            .push_back(Scripted::Outcome(BackendOutcome::Count(rows, kind)));
    }

    pub fn push_error(&self, sqlstate: &str, message: &str) {
        self.state
            .lock()
            .script
            .push_back(Scripted::Error(BackendError::new(sqlstate, message)));
    }

    pub fn push_batch(&self, outcome: BatchOutcome) {
        self.state.lock().batch_script.push_back(outcome);
    }

    /// Register the columns `describe` reports for a statement.
    pub fn set_describe(&self, sql: &str, columns: &[(&str, u32)]) {
        self.state
            .lock()
            .describe_results
            .insert(sql.to_string(), column_infos(columns));
    }

    /// Register a table for COPY metadata lookups.
    pub fn set_table(&self, name: &str, columns: &[(&str, u32)], indexed_columns: u64) {
        self.state.lock().tables.insert(
            name.to_string(),
            TableMetadata {
                table: name.to_string(),
                columns: column_infos(columns),
                indexed_columns,
            },
        );
    }

    pub fn set_fail_next_copy(&self, error: BackendError) {
        self.state.lock().fail_next_copy = Some(error);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn batches(&self) -> Vec<Vec<String>> {
        self.state.lock().batches.clone()
    }

    pub fn copy_chunks(&self) -> Vec<usize> {
        self.state.lock().copy_chunks.clone()
    }

    pub fn copied_rows(&self) -> Vec<Vec<Option<PgValue>>> {
        self.state.lock().copied_rows.clone()
    }

    pub fn tx_log(&self) -> Vec<&'static str> {
        self.state.lock().tx_log.clone()
    }

    pub fn parameter(&self, name: &str) -> Option<String> {
        self.state.lock().parameters.get(name).cloned()
    }

    fn default_outcome(sql: &str) -> BackendOutcome {
        let first = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        match first.as_str() {
            "SELECT" | "WITH" | "VALUES" => BackendOutcome::Rows(ResultSet::default()),
            "INSERT" => BackendOutcome::Count(1, CommandKind::Insert),
            "UPDATE" => BackendOutcome::Count(0, CommandKind::Update),
            "DELETE" => BackendOutcome::Count(0, CommandKind::Delete),
            _ => BackendOutcome::Done,
        }
    }
}

fn column_infos(columns: &[(&str, u32)]) -> Vec<ColumnInfo> {
    columns
        .iter()
        .map(|(name, type_oid)| ColumnInfo {
            name: (*name).to_string(),
            type_oid: *type_oid,
        })
        .collect()
}

#[async_trait]
impl BackendConnection for MockBackend {
    async fn execute(
        &mut self,
        sql: &str,
        _params: &[Option<PgValue>],
    ) -> Result<BackendOutcome, BackendError> {
        let mut state = self.state.lock();
        state.executed.push(sql.to_string());
        match state.script.pop_front() {
            Some(Scripted::Outcome(outcome)) => Ok(outcome),
            Some(Scripted::Error(error)) => Err(error),
            None => Ok(Self::default_outcome(sql)),
        }
    }

    async fn execute_batch(&mut self, statements: &[String]) -> Result<BatchOutcome, BackendError> {
        let mut state = self.state.lock();
        state.batches.push(statements.to_vec());
        match state.batch_script.pop_front() {
            Some(outcome) => Ok(outcome),
            None => Ok(BatchOutcome::Complete(vec![1; statements.len()])),
        }
    }

    async fn describe(&mut self, sql: &str) -> Result<Option<Vec<ColumnInfo>>, BackendError> {
        let state = self.state.lock();
        if let Some(columns) = state.describe_results.get(sql) {
            return Ok(Some(columns.clone()));
        }
        let first = sql
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_uppercase();
        if matches!(first.as_str(), "SELECT" | "WITH" | "VALUES") {
            // Unregistered queries describe as a single text column.
            Ok(Some(vec![ColumnInfo {
                name: "?column?".to_string(),
                type_oid: crate::codec::oid::TEXT,
            }]))
        } else {
            Ok(None)
        }
    }

    async fn begin(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.in_tx = true;
        state.tx_log.push("begin");
        Ok(())
    }

    async fn begin_read_only(&mut self, _staleness: Staleness) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.in_tx = true;
        state.tx_log.push("begin_read_only");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.in_tx = false;
        state.tx_log.push("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.in_tx = false;
        state.tx_log.push("rollback");
        Ok(())
    }

    async fn abort(&mut self) -> Result<(), BackendError> {
        let mut state = self.state.lock();
        state.in_tx = false;
        state.tx_log.push("abort");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.state.lock().in_tx
    }

    async fn set_parameter(&mut self, name: &str, value: &str) -> Result<(), BackendError> {
        self.state
            .lock()
            .parameters
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn get_parameter(&mut self, name: &str) -> Result<Option<String>, BackendError> {
        Ok(self.state.lock().parameters.get(name).cloned())
    }

    async fn copy_rows(
        &mut self,
        _table: &str,
        _columns: &[String],
        rows: Vec<Vec<Option<PgValue>>>,
    ) -> Result<u64, BackendError> {
        let mut state = self.state.lock();
        if let Some(error) = state.fail_next_copy.take() {
            return Err(error);
        }
        let count = rows.len() as u64;
        state.copy_chunks.push(rows.len());
        state.copied_rows.extend(rows);
        Ok(count)
    }

    async fn table_metadata(&mut self, table: &str) -> Result<TableMetadata, BackendError> {
        self.state.lock().tables.get(table).cloned().ok_or_else(|| {
            BackendError::new("42P01", format!("relation \"{table}\" does not exist"))
        })
    }
}
