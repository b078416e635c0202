//! DML batching.
//!
//! Within one extended-query group the engine accumulates parameterless DML
//! and forwards it to the backend as a single batch when a flush trigger
//! fires: a statement needing results arrives, a Flush/Sync arrives, or the
//! size ceiling is reached. The aggregate update counts come back and are
//! distributed onto the queued response slots in statement order.

use crate::backend::{BackendConnection, BatchOutcome, CommandKind};
use crate::errors::PgError;
use crate::messages::{command_complete, error_response};
use crate::session::response::{ResponseQueue, SlotId};

#[derive(Debug)]
struct QueuedDml {
    sql: String,
    kind: CommandKind,
    slot: SlotId,
}

#[derive(Debug)]
pub struct DmlBatch {
    queued: Vec<QueuedDml>,
    ceiling: usize,
}

impl DmlBatch {
    pub fn new(ceiling: usize) -> DmlBatch {
        DmlBatch {
            queued: Vec::new(),
            ceiling,
        }
    }

    /// Queue a statement. Returns true when the ceiling is reached and the
    /// caller must dispatch before accepting more work.
    pub fn push(&mut self, sql: String, kind: CommandKind, slot: SlotId) -> bool {
        self.queued.push(QueuedDml { sql, kind, slot });
        self.queued.len() >= self.ceiling
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queued.len()
    }

    /// Drop everything without dispatching; used when an earlier error has
    /// already suppressed the group.
    pub fn discard(&mut self, queue: &mut ResponseQueue) {
        for stmt in self.queued.drain(..) {
            queue.drop_slot(stmt.slot);
        }
    }

    /// Send the batch to the backend and distribute results onto the
    /// reserved slots, in statement order. On failure at position k the
    /// leading statements keep their CommandComplete (when the backend
    /// reports partial success), position k resolves to ErrorResponse and
    /// the tail produces nothing at the wire level.
    pub async fn dispatch(
        &mut self,
        backend: &mut dyn BackendConnection,
        queue: &mut ResponseQueue,
    ) -> Result<(), PgError> {
        if self.queued.is_empty() {
            return Ok(());
        }
        let queued: Vec<QueuedDml> = self.queued.drain(..).collect();
        let statements: Vec<String> = queued.iter().map(|q| q.sql.clone()).collect();
        log::debug!("dispatching DML batch of {}", statements.len());

        match backend.execute_batch(&statements).await {
            Ok(BatchOutcome::Complete(counts)) => {
                for (i, stmt) in queued.iter().enumerate() {
                    let rows = counts.get(i).copied().unwrap_or(0);
                    queue.resolve_slot(stmt.slot, command_complete(&stmt.kind.tag(rows)));
                }
                Ok(())
            }
            Ok(BatchOutcome::Failed { completed, error }) => {
                let failed_at = completed.len();
                for (i, stmt) in queued.iter().enumerate() {
                    if i < failed_at {
                        queue.resolve_slot(
                            stmt.slot,
                            command_complete(&stmt.kind.tag(completed[i])),
                        );
                    } else if i == failed_at {
                        let pg: PgError = error.clone().into();
                        queue.resolve_slot(stmt.slot, error_response(&pg));
                    } else {
                        queue.drop_slot(stmt.slot);
                    }
                }
                Err(error.into())
            }
            Err(error) => {
                // No partial-success report: the failure lands on the first
                // statement and the rest are silently discarded.
                let pg: PgError = error.into();
                let mut slots = queued.iter();
                if let Some(first) = slots.next() {
                    queue.resolve_slot(first.slot, error_response(&pg));
                }
                for stmt in slots {
                    queue.drop_slot(stmt.slot);
                }
                Err(pg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::backend::BackendError;
    use bytes::BytesMut;

    fn drained(queue: &mut ResponseQueue) -> Vec<u8> {
        let mut out = BytesMut::new();
        queue.drain_into(&mut out);
        out.to_vec()
    }

    fn tags(bytes: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        let mut pos = 0;
        while pos + 5 <= bytes.len() {
            let len = i32::from_be_bytes([
                bytes[pos + 1],
                bytes[pos + 2],
                bytes[pos + 3],
                bytes[pos + 4],
            ]) as usize;
            let body = &bytes[pos + 5..pos + 1 + len];
            if bytes[pos] == b'C' {
                out.push(String::from_utf8_lossy(&body[..body.len() - 1]).to_string());
            } else {
                out.push(format!("<{}>", bytes[pos] as char));
            }
            pos += 1 + len;
        }
        out
    }

    #[tokio::test]
    async fn distributes_counts_in_statement_order() {
        let mut backend = MockBackend::new();
        backend.push_batch(BatchOutcome::Complete(vec![3, 0, 7]));
        let mut queue = ResponseQueue::new();
        let mut batch = DmlBatch::new(10);

        for (sql, kind) in [
            ("INSERT INTO t VALUES (1)", CommandKind::Insert),
            ("UPDATE t SET a = 1", CommandKind::Update),
            ("DELETE FROM t", CommandKind::Delete),
        ] {
            let slot = queue.push_slot();
            batch.push(sql.to_string(), kind, slot);
        }

        batch.dispatch(&mut backend, &mut queue).await.unwrap();
        let bytes = drained(&mut queue);
        assert_eq!(tags(&bytes), vec!["INSERT 0 3", "UPDATE 0", "DELETE 7"]);
        let batches = backend.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test]
    async fn partial_failure_reports_prefix_then_error() {
        let mut backend = MockBackend::new();
        backend.push_batch(BatchOutcome::Failed {
            completed: vec![1],
            error: BackendError::new("23505", "duplicate key"),
        });
        let mut queue = ResponseQueue::new();
        let mut batch = DmlBatch::new(10);
        for sql in ["INSERT 1", "INSERT 2", "INSERT 3"] {
            let slot = queue.push_slot();
            batch.push(sql.to_string(), CommandKind::Insert, slot);
        }

        let err = batch.dispatch(&mut backend, &mut queue).await.unwrap_err();
        assert_eq!(err.sqlstate, "23505");

        let bytes = drained(&mut queue);
        let rendered = tags(&bytes);
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0], "INSERT 0 1");
        assert_eq!(rendered[1], "<E>");
    }

    #[tokio::test]
    async fn ceiling_reports_full() {
        let mut queue = ResponseQueue::new();
        let mut batch = DmlBatch::new(2);
        let slot = queue.push_slot();
        assert!(!batch.push("INSERT 1".to_string(), CommandKind::Insert, slot));
        let slot = queue.push_slot();
        assert!(batch.push("INSERT 2".to_string(), CommandKind::Insert, slot));
    }
}
