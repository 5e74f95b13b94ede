//! The tape: the ordered event stream observed by spectators.
//!
//! Every broadcast, ledger update, reputation update, evidence append,
//! and authentication is mirrored onto the tape. The tape is a closed
//! typed sum, not an extension surface; downstream systems switch on
//! `kind`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::evidence::EvidenceItem;
use crate::ids::AgentId;

/// One tape event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum TapeEvent {
    /// An agent completed the auth handshake.
    AgentAuthed {
        /// The authenticated identity.
        agent_id: AgentId,
        /// The display name supplied at auth.
        agent_name: String,
        /// Credits after any starting grant.
        credits: u64,
    },

    /// An agent's ledger balances changed.
    LedgerUpdate {
        /// The affected account.
        agent_id: AgentId,
        /// Credits after the mutation.
        credits: u64,
        /// Locked amount after the mutation.
        locked: u64,
    },

    /// An agent's reputation counters changed.
    RepUpdate {
        /// The affected agent.
        agent_id: AgentId,
        /// Completed counter after the update.
        completed: u64,
        /// Failed counter after the update.
        failed: u64,
        /// Smoothed score after the update.
        score: f64,
    },

    /// An evidence item was appended.
    Evidence {
        /// The appended item.
        item: EvidenceItem,
    },

    /// A client-facing broadcast; the payload mirrors the wire message
    /// exactly.
    Broadcast {
        /// The broadcast frame as sent to clients.
        message: Value,
    },

    /// A job returned to the open book (not a client message).
    JobReopened {
        /// The reopened job.
        job_id: crate::ids::JobId,
    },

    /// A write-through failure after an in-memory mutation. In-memory
    /// state stays authoritative; the next idempotent write reconciles.
    DbError {
        /// The operation whose write-through failed.
        op: String,
    },
}

impl TapeEvent {
    /// Stable kind discriminant for durable event rows.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AgentAuthed { .. } => "agent_authed",
            Self::LedgerUpdate { .. } => "ledger_update",
            Self::RepUpdate { .. } => "rep_update",
            Self::Evidence { .. } => "evidence",
            Self::Broadcast { .. } => "broadcast",
            Self::JobReopened { .. } => "job_reopened",
            Self::DbError { .. } => "db_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_tape_serialization_is_tagged() {
        let event = TapeEvent::LedgerUpdate {
            agent_id: AgentId::from("agent_1"),
            credits: 990,
            locked: 25,
        };
        let json = serde_json::to_value(&event).expect("serialize tape event");
        assert_eq!(json["kind"], "ledger_update");
        assert_eq!(json["agentId"], "agent_1");
        assert_eq!(json["credits"], 990);
    }

    #[test]
    fn test_kind_matches_serde_tag() {
        let event = TapeEvent::Broadcast {
            message: json!({"type": "job_posted"}),
        };
        let json = serde_json::to_value(&event).expect("serialize tape event");
        assert_eq!(json["kind"], event.kind());
    }
}
