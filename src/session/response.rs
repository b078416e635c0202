//! Pending-result queue.
//!
//! Extended-protocol responses are produced before the client asks for them
//! and must survive across several incoming frames, so the queue is an
//! explicit data structure rather than stack-based control flow. Most
//! entries are fully rendered frames; DML statements queued into a backend
//! batch leave a slot that is resolved when the batch executes. The queue is
//! drained strictly in order on Flush or Sync.

use std::collections::VecDeque;

use bytes::{BufMut, BytesMut};

/// Identifier of an unresolved batch result slot.
pub type SlotId = u64;

#[derive(Debug)]
enum Entry {
    Frame(BytesMut),
    Slot(SlotId),
}

#[derive(Debug, Default)]
pub struct ResponseQueue {
    entries: VecDeque<Entry>,
    next_slot: SlotId,
}

impl ResponseQueue {
    pub fn new() -> ResponseQueue {
        ResponseQueue::default()
    }

    /// Queue a rendered frame (or several concatenated frames).
    pub fn push_frame(&mut self, frame: BytesMut) {
        self.entries.push_back(Entry::Frame(frame));
    }

    /// Reserve a slot whose frame is produced later by the batch dispatcher.
    pub fn push_slot(&mut self) -> SlotId {
        let id = self.next_slot;
        self.next_slot += 1;
        self.entries.push_back(Entry::Slot(id));
        id
    }

    /// Resolve a previously reserved slot with its rendered response.
    /// Resolving an unknown slot is a no-op (the slot may have been dropped
    /// by an error that cleared the queue).
    pub fn resolve_slot(&mut self, id: SlotId, frame: BytesMut) {
        for entry in self.entries.iter_mut() {
            if matches!(entry, Entry::Slot(slot) if *slot == id) {
                *entry = Entry::Frame(frame);
                return;
            }
        }
    }

    /// Drop a slot entirely: the statement it belonged to produces no
    /// response at the wire level (failed-batch tail positions).
    pub fn drop_slot(&mut self, id: SlotId) {
        self.entries
            .retain(|entry| !matches!(entry, Entry::Slot(slot) if *slot == id));
    }

    /// Drain everything into one write buffer, strictly in order. Any slot
    /// still unresolved is a bug in the dispatch ordering; it is skipped.
    pub fn drain_into(&mut self, out: &mut BytesMut) {
        while let Some(entry) = self.entries.pop_front() {
            match entry {
                Entry::Frame(frame) => out.put(frame),
                Entry::Slot(slot) => {
                    log::error!("response slot {slot} drained while unresolved");
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{bind_complete, command_complete, parse_complete};

    fn drained(queue: &mut ResponseQueue) -> Vec<u8> {
        let mut out = BytesMut::new();
        queue.drain_into(&mut out);
        out.to_vec()
    }

    #[test]
    fn frames_drain_in_push_order() {
        let mut queue = ResponseQueue::new();
        queue.push_frame(parse_complete());
        queue.push_frame(bind_complete());
        let bytes = drained(&mut queue);
        assert_eq!(bytes[0], b'1');
        assert_eq!(bytes[5], b'2');
        assert!(queue.is_empty());
    }

    #[test]
    fn slots_resolve_in_place() {
        let mut queue = ResponseQueue::new();
        queue.push_frame(parse_complete());
        let slot = queue.push_slot();
        queue.push_frame(bind_complete());
        queue.resolve_slot(slot, command_complete("INSERT 0 1"));

        let bytes = drained(&mut queue);
        assert_eq!(bytes[0], b'1');
        assert_eq!(bytes[5], b'C');
        assert_eq!(bytes[bytes.len() - 5], b'2');
    }

    #[test]
    fn dropped_slots_vanish() {
        let mut queue = ResponseQueue::new();
        let slot = queue.push_slot();
        queue.push_frame(parse_complete());
        queue.drop_slot(slot);
        let bytes = drained(&mut queue);
        assert_eq!(bytes[0], b'1');
    }
}
