//! Operation log: pending queue plus confirmed log.

use crate::operation::Operation;
use std::collections::VecDeque;

/// The operation log of one client.
///
/// The log maintains two ordered sequences:
/// - The **pending queue**: locally created operations awaiting an
///   authority sequence, ordered by `local_seq`.
/// - The **confirmed log**: operations with an assigned `seq`, ordered by
///   `seq` and gap-free in the happy path.
///
/// # Invariants
///
/// - Pending entries have unique `id`s and unique `local_seq` values
/// - No pending entry carries a `seq`; every confirmed entry has `seq > 0`
/// - No `id` is simultaneously pending and confirmed
#[derive(Debug, Default)]
pub struct OpLog {
    /// Pending operations in `local_seq` order.
    pending: VecDeque<Operation>,
    /// Confirmed operations in `seq` order.
    confirmed: Vec<Operation>,
}

impl OpLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a freshly created pending operation.
    ///
    /// The caller guarantees `local_seq` monotonicity; the queue preserves
    /// creation order.
    pub fn append_pending(&mut self, op: Operation) {
        debug_assert!(op.is_pending(), "pending operations carry no seq");
        debug_assert!(
            self.pending
                .back()
                .map(|last| last.local_seq < op.local_seq)
                .unwrap_or(true),
            "pending queue must stay ordered by local_seq"
        );
        self.pending.push_back(op);
    }

    /// Returns true if an operation with this id is pending.
    pub fn contains_pending(&self, id: &str) -> bool {
        self.pending.iter().any(|op| op.id == id)
    }

    /// Returns the pending operation with this id, if any.
    pub fn find_pending(&self, id: &str) -> Option<&Operation> {
        self.pending.iter().find(|op| op.id == id)
    }

    /// Confirms a pending operation at the given authority sequence.
    ///
    /// Removes the operation from the pending queue, stamps `seq`, and
    /// appends it to the confirmed log. Returns the confirmed operation,
    /// or `None` if no pending entry matched.
    pub fn confirm(&mut self, id: &str, seq: u64) -> Option<Operation> {
        let pos = self.pending.iter().position(|op| op.id == id)?;
        let op = self.pending.remove(pos)?.with_seq(seq);
        self.append_confirmed(op.clone());
        Some(op)
    }

    /// Appends a confirmed operation.
    ///
    /// Duplicate ids overwrite the previous entry, making confirmation
    /// idempotent under redelivery.
    pub fn append_confirmed(&mut self, op: Operation) {
        debug_assert!(op.seq > 0, "confirmed operations carry a seq");
        if let Some(existing) = self.confirmed.iter_mut().find(|c| c.id == op.id) {
            *existing = op;
        } else {
            self.confirmed.push(op);
        }
    }

    /// Iterates pending operations in `local_seq` order.
    pub fn pending(&self) -> impl Iterator<Item = &Operation> {
        self.pending.iter()
    }

    /// Returns the number of pending operations.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns the confirmed log in `seq` order.
    pub fn confirmed(&self) -> &[Operation] {
        &self.confirmed
    }

    /// Returns the highest confirmed `seq`, or 0 when empty.
    pub fn last_confirmed_seq(&self) -> u64 {
        self.confirmed.iter().map(|op| op.seq).max().unwrap_or(0)
    }

    /// Returns true if both the pending queue and confirmed log are empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.confirmed.is_empty()
    }
}
