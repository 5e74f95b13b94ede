//! Process-owned entity graph.
//!
//! Every entity lives in a map keyed by its opaque id; relations are id
//! references, never owning pointers. Iteration over "bids of a job"
//! goes through a secondary index maintained on insert. All mutating
//! access happens under the exchange's single write lock, so the graph
//! itself carries no interior locking.

use std::collections::HashMap;

use serde::Serialize;
use synapse_core::{
    AgentId, Bid, BidId, EvidenceRing, ExchangeError, Job, JobId, LedgerAccount, Reputation,
};

/// A registered agent identity.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    /// Stable identity.
    pub id: AgentId,
    /// Display name from the last auth (or system ensure).
    pub name: String,
    /// SPKI DER public key, base64; absent for synthetic identities.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    /// First-seen timestamp, milliseconds since epoch.
    pub created_at_ms: u64,
}

/// The shared in-memory projection of the market.
#[derive(Debug, Default)]
pub struct ExchangeState {
    /// Agent registry keyed by identity.
    pub agents: HashMap<AgentId, AgentRecord>,
    /// Ledger accounts keyed by identity.
    pub ledger: HashMap<AgentId, LedgerAccount>,
    /// Reputation rows keyed by identity.
    pub reputation: HashMap<AgentId, Reputation>,
    /// Jobs keyed by id.
    pub jobs: HashMap<JobId, Job>,
    /// Bids keyed by id.
    pub bids: HashMap<BidId, Bid>,
    /// Insertion-ordered bid index per job.
    pub bids_by_job: HashMap<JobId, Vec<BidId>>,
    /// Bounded evidence ring.
    pub evidence: EvidenceRing,
}

impl ExchangeState {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a job or fails `job_not_found`.
    pub fn job(&self, job_id: &JobId) -> Result<&Job, ExchangeError> {
        self.jobs.get(job_id).ok_or_else(|| ExchangeError::JobNotFound {
            job_id: job_id.clone(),
        })
    }

    /// Mutable job lookup or `job_not_found`.
    pub fn job_mut(&mut self, job_id: &JobId) -> Result<&mut Job, ExchangeError> {
        self.jobs
            .get_mut(job_id)
            .ok_or_else(|| ExchangeError::JobNotFound {
                job_id: job_id.clone(),
            })
    }

    /// Ledger account lookup or `no_ledger_account`.
    pub fn account(&self, agent_id: &AgentId) -> Result<&LedgerAccount, ExchangeError> {
        self.ledger
            .get(agent_id)
            .ok_or_else(|| ExchangeError::NoLedgerAccount {
                agent_id: agent_id.clone(),
            })
    }

    /// Mutable account lookup or `ledger_missing` (internal paths only:
    /// the existence check already happened).
    pub fn account_mut(&mut self, agent_id: &AgentId) -> Result<&mut LedgerAccount, ExchangeError> {
        self.ledger
            .get_mut(agent_id)
            .ok_or_else(|| ExchangeError::LedgerMissing {
                agent_id: agent_id.clone(),
            })
    }

    /// The agent's reputation, default-initialized if missing.
    pub fn reputation_mut(&mut self, agent_id: &AgentId) -> &mut Reputation {
        self.reputation.entry(agent_id.clone()).or_default()
    }

    /// Inserts a bid and maintains the per-job index.
    pub fn insert_bid(&mut self, bid: Bid) {
        self.bids_by_job
            .entry(bid.job_id.clone())
            .or_default()
            .push(bid.id.clone());
        self.bids.insert(bid.id.clone(), bid);
    }

    /// Bids on a job in insertion order.
    #[must_use]
    pub fn bids_for_job(&self, job_id: &JobId) -> Vec<&Bid> {
        self.bids_by_job
            .get(job_id)
            .map(|ids| ids.iter().filter_map(|id| self.bids.get(id)).collect())
            .unwrap_or_default()
    }

    /// Whether `bidder` holds at least one bid on `job_id`.
    #[must_use]
    pub fn has_bid(&self, job_id: &JobId, bidder: &AgentId) -> bool {
        self.bids_for_job(job_id)
            .iter()
            .any(|bid| &bid.bidder_id == bidder)
    }

    /// The earliest bid by `bidder` on `job_id`, if any.
    #[must_use]
    pub fn first_bid_by(&self, job_id: &JobId, bidder: &AgentId) -> Option<&Bid> {
        self.bids_for_job(job_id)
            .into_iter()
            .find(|bid| &bid.bidder_id == bidder)
    }
}

#[cfg(test)]
mod tests {
    use synapse_core::bid::RepSnapshot;

    use super::*;

    fn bid(id: &str, job: &str, bidder: &str, price: u64) -> Bid {
        Bid {
            id: BidId::from(id),
            job_id: JobId::from(job),
            bidder_id: AgentId::from(bidder),
            price,
            eta_seconds: 2,
            created_at_ms: 0,
            pitch: None,
            terms: None,
            rep: RepSnapshot {
                completed: 0,
                failed: 0,
                score: 0.5,
            },
        }
    }

    #[test]
    fn test_bid_index_preserves_insertion_order() {
        let mut state = ExchangeState::new();
        state.insert_bid(bid("bid_1", "job_1", "agent_a", 10));
        state.insert_bid(bid("bid_2", "job_1", "agent_b", 8));
        state.insert_bid(bid("bid_3", "job_2", "agent_a", 5));

        let bids = state.bids_for_job(&JobId::from("job_1"));
        assert_eq!(bids.len(), 2);
        assert_eq!(bids[0].id, BidId::from("bid_1"));
        assert_eq!(bids[1].id, BidId::from("bid_2"));
    }

    #[test]
    fn test_has_bid_and_first_bid() {
        let mut state = ExchangeState::new();
        state.insert_bid(bid("bid_1", "job_1", "agent_a", 10));
        state.insert_bid(bid("bid_2", "job_1", "agent_a", 8));

        let job = JobId::from("job_1");
        assert!(state.has_bid(&job, &AgentId::from("agent_a")));
        assert!(!state.has_bid(&job, &AgentId::from("agent_b")));
        assert_eq!(
            state.first_bid_by(&job, &AgentId::from("agent_a")).map(|b| b.price),
            Some(10)
        );
    }

    #[test]
    fn test_missing_lookups_fail_with_taxonomy_codes() {
        let state = ExchangeState::new();
        assert_eq!(
            state.job(&JobId::from("job_x")).expect_err("missing job").code(),
            "job_not_found"
        );
        assert_eq!(
            state
                .account(&AgentId::from("agent_x"))
                .expect_err("missing account")
                .code(),
            "no_ledger_account"
        );
    }
}
