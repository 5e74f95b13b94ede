//! Append-only evidence trail.
//!
//! Every state transition appends a human-readable evidence item keyed
//! by job. The in-memory ring keeps the most recent [`EVIDENCE_RING_CAP`]
//! items with O(1) eviction; the persistence port mirrors the full
//! unbounded history.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ids::JobId;

/// In-memory evidence ring capacity.
pub const EVIDENCE_RING_CAP: usize = 500;

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EvidenceItem {
    /// Unique evidence id.
    pub id: String,
    /// Timestamp, milliseconds since epoch.
    pub at_ms: u64,
    /// The job this evidence belongs to.
    pub job_id: JobId,
    /// Evidence kind (`award`, `upfront`, `submit`, `auto_verify`,
    /// `review`, `changes`, `settlement`, `offer`, `counter`,
    /// `offer_response`, `negotiation`, `negotiation_end`, ...).
    pub kind: String,
    /// Human-readable one-liner.
    pub detail: String,
    /// Structured context for observers.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl EvidenceItem {
    /// Creates an evidence item with a fresh id.
    #[must_use]
    pub fn new(
        job_id: JobId,
        kind: impl Into<String>,
        detail: impl Into<String>,
        payload: Value,
        at_ms: u64,
    ) -> Self {
        Self {
            id: format!("ev_{}", Uuid::new_v4()),
            at_ms,
            job_id,
            kind: kind.into(),
            detail: detail.into(),
            payload,
        }
    }
}

/// Bounded most-recent-first evidence ring.
#[derive(Debug, Default)]
pub struct EvidenceRing {
    // Newest items sit at the front so a snapshot is a plain iteration.
    items: VecDeque<EvidenceItem>,
}

impl EvidenceRing {
    /// Creates an empty ring.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: VecDeque::with_capacity(EVIDENCE_RING_CAP),
        }
    }

    /// Appends an item, evicting the oldest entry at capacity.
    pub fn push(&mut self, item: EvidenceItem) {
        if self.items.len() == EVIDENCE_RING_CAP {
            self.items.pop_back();
        }
        self.items.push_front(item);
    }

    /// Most-recent-first snapshot of the ring.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EvidenceItem> {
        self.items.iter().cloned().collect()
    }

    /// Items currently retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ring holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates most-recent-first.
    pub fn iter(&self) -> impl Iterator<Item = &EvidenceItem> {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn item(n: u64) -> EvidenceItem {
        EvidenceItem::new(
            JobId::from("job_1"),
            "settlement",
            format!("entry {n}"),
            json!({ "n": n }),
            n,
        )
    }

    #[test]
    fn test_ring_keeps_most_recent_first() {
        let mut ring = EvidenceRing::new();
        for n in 0..3 {
            ring.push(item(n));
        }
        let snapshot = ring.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[0].at_ms, 2);
        assert_eq!(snapshot[2].at_ms, 0);
    }

    #[test]
    fn test_ring_evicts_at_capacity() {
        let mut ring = EvidenceRing::new();
        for n in 0..(EVIDENCE_RING_CAP as u64 + 10) {
            ring.push(item(n));
        }
        assert_eq!(ring.len(), EVIDENCE_RING_CAP);
        let snapshot = ring.snapshot();
        // The oldest ten entries were evicted.
        assert_eq!(snapshot.last().map(|i| i.at_ms), Some(10));
    }

    #[test]
    fn test_item_ids_are_unique() {
        assert_ne!(item(0).id, item(0).id);
    }
}
