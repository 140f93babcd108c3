//! Delta detection branch
//!
//! The branch point of the entity state machine: decide whether a
//! fetched batch warrants the persist/publish leg at all.

use crate::source::Batch;

/// Returns true iff the batch contains any record.
///
/// Intentionally coarse: this does not compare record ids against the
/// checkpoint, it only detects whether the upstream returned anything
/// for this run. A non-empty but entirely already-seen batch therefore
/// re-persists and re-appends; the warehouse is at-least-once by
/// design and downstream reconciliation owns deduplication.
pub fn has_new(batch: &Batch) -> bool {
    !batch.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_batch_short_circuits() {
        assert!(!has_new(&vec![]));
    }

    #[test]
    fn test_any_record_continues() {
        assert!(has_new(&vec![json!({"id": 1})]));
    }

    #[test]
    fn test_already_seen_records_still_continue() {
        // Records older than any checkpoint still count: the detector
        // only answers "did the upstream return anything".
        let batch = vec![json!({"id": 1}), json!({"id": 2})];
        assert!(has_new(&batch));
    }
}
