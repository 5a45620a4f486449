//! The failure ledger.
//!
//! An ordered collection of messages that failed during the current batch.
//! Entries accumulate in completion order and are consumed by the
//! reconciliation pass with a snapshot-then-replace cycle, so the ledger is
//! never mutated while it is being iterated.

use std::sync::Mutex;

use crate::types::Message;

/// Ordered record of failed deliveries for one batch.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: Mutex<Vec<Message>>,
}

impl FailureLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a failed message in completion order.
    pub fn record(&self, message: Message) {
        self.entries.lock().unwrap().push(message);
    }

    /// Returns the number of recorded failures.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Returns true when no failures are recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Returns a copy of the current entries.
    pub fn entries(&self) -> Vec<Message> {
        self.entries.lock().unwrap().clone()
    }

    /// Takes the current entries, leaving the ledger empty.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.entries.lock().unwrap())
    }

    /// Atomically replaces the ledger contents with the residual entries.
    pub fn replace(&self, residual: Vec<Message>) {
        *self.entries.lock().unwrap() = residual;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::test_message;

    #[test]
    fn test_record_preserves_order() {
        let ledger = FailureLedger::new();
        ledger.record(test_message("a@example.com"));
        ledger.record(test_message("b@example.com"));

        let entries = ledger.entries();
        assert_eq!(entries[0].recipient().email, "a@example.com");
        assert_eq!(entries[1].recipient().email, "b@example.com");
    }

    #[test]
    fn test_take_then_replace() {
        let ledger = FailureLedger::new();
        ledger.record(test_message("a@example.com"));
        ledger.record(test_message("b@example.com"));

        let snapshot = ledger.take();
        assert_eq!(snapshot.len(), 2);
        assert!(ledger.is_empty());

        ledger.replace(vec![snapshot[1].clone()]);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.entries()[0].recipient().email, "b@example.com");
    }
}
