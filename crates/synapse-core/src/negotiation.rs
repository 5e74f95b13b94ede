//! Bounded-round price/terms negotiation.
//!
//! At most one negotiation is active per job. The document lives inside
//! the job payload so persistence of a round is a single job update.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, BidId};
use crate::terms::Terms;

/// Which side authored a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationRole {
    /// The job's requester.
    Boss,
    /// The candidate worker.
    Worker,
}

/// Negotiation lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationStatus {
    /// Awaiting the next counter or decision.
    Pending,
    /// Worker accepted; the award path ran with the agreed price.
    Accept,
    /// Worker rejected; the job stays open.
    Reject,
    /// The round ceiling closed the negotiation.
    MaxRounds,
}

/// One round in the negotiation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct NegotiationEntry {
    /// 1-based round number.
    pub round: u32,
    /// Author of this counter.
    pub from_role: NegotiationRole,
    /// Price proposed this round.
    pub price: u64,
    /// Terms proposed this round.
    pub terms: Terms,
    /// Optional free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Timestamp of the counter, milliseconds since epoch.
    pub at_ms: u64,
}

/// The active (or concluded) negotiation on a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Negotiation {
    /// The candidate worker the negotiation is bound to.
    pub worker_id: AgentId,
    /// The bid that originated the negotiation.
    pub bid_id: BidId,
    /// Price on the originating bid.
    pub bid_price: u64,
    /// Current proposed price.
    pub price: u64,
    /// Current proposed terms.
    pub terms: Terms,
    /// Lifecycle status.
    pub status: NegotiationStatus,
    /// 1-based, strictly increasing round counter.
    pub round: u32,
    /// Chronological counter history.
    pub history: Vec<NegotiationEntry>,
}

impl Negotiation {
    /// Opens a negotiation at round 1 with the requester's counter.
    #[must_use]
    pub fn open(
        worker_id: AgentId,
        bid_id: BidId,
        bid_price: u64,
        price: u64,
        terms: Terms,
        notes: Option<String>,
        at_ms: u64,
    ) -> Self {
        Self {
            worker_id,
            bid_id,
            bid_price,
            price,
            terms,
            status: NegotiationStatus::Pending,
            round: 1,
            history: vec![NegotiationEntry {
                round: 1,
                from_role: NegotiationRole::Boss,
                price,
                terms,
                notes,
                at_ms,
            }],
        }
    }

    /// Records the next counter, bumping the round.
    pub fn push_round(
        &mut self,
        from_role: NegotiationRole,
        price: u64,
        terms: Terms,
        notes: Option<String>,
        at_ms: u64,
    ) {
        self.round += 1;
        self.price = price;
        self.terms = terms;
        self.history.push(NegotiationEntry {
            round: self.round,
            from_role,
            price,
            terms,
            notes,
            at_ms,
        });
    }

    /// Whether another counter would exceed the round ceiling.
    #[must_use]
    pub fn at_round_ceiling(&self, max_rounds: u32) -> bool {
        self.round >= max_rounds
    }

    /// Whether the negotiation still accepts counters and decisions.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == NegotiationStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms() -> Terms {
        Terms {
            upfront_pct: 0.2,
            deadline_seconds: 8.0,
            max_revisions: 1,
        }
    }

    #[test]
    fn test_rounds_increase_strictly() {
        let mut neg = Negotiation::open(
            AgentId::from("agent_w"),
            BidId::from("bid_1"),
            80,
            70,
            terms(),
            None,
            1,
        );
        assert_eq!(neg.round, 1);
        assert_eq!(neg.history.len(), 1);

        neg.push_round(NegotiationRole::Worker, 75, terms(), Some("meet me".into()), 2);
        assert_eq!(neg.round, 2);
        assert_eq!(neg.price, 75);
        assert_eq!(neg.history.len(), 2);
        assert!(neg.history.windows(2).all(|w| w[0].round < w[1].round));
    }

    #[test]
    fn test_round_ceiling() {
        let mut neg = Negotiation::open(
            AgentId::from("agent_w"),
            BidId::from("bid_1"),
            80,
            70,
            terms(),
            None,
            1,
        );
        assert!(!neg.at_round_ceiling(2));
        neg.push_round(NegotiationRole::Worker, 75, terms(), None, 2);
        assert!(neg.at_round_ceiling(2));
    }

    #[test]
    fn test_wire_shape() {
        let neg = Negotiation::open(
            AgentId::from("agent_w"),
            BidId::from("bid_1"),
            80,
            70,
            terms(),
            None,
            1,
        );
        let json = serde_json::to_value(&neg).expect("serialize negotiation");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["history"][0]["fromRole"], "boss");
        assert_eq!(json["workerId"], "agent_w");
    }
}
