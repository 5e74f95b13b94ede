//! Bids on open jobs.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, BidId, JobId};
use crate::reputation::Reputation;
use crate::terms::Terms;

/// The bidder's reputation captured at bid time, so the requester sees
/// the numbers the bid was placed under even if they move later.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RepSnapshot {
    /// Completed counter at bid time.
    pub completed: u64,
    /// Failed counter at bid time.
    pub failed: u64,
    /// Smoothed score at bid time.
    pub score: f64,
}

impl From<Reputation> for RepSnapshot {
    fn from(rep: Reputation) -> Self {
        Self {
            completed: rep.completed,
            failed: rep.failed,
            score: rep.score(),
        }
    }
}

/// A worker's offer to perform a job for a price and eta.
///
/// Multiple bids per bidder are allowed; the book keeps insertion order
/// and tie-breaks resolve in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Bid {
    /// Unique bid id.
    pub id: BidId,
    /// The job this bid targets.
    pub job_id: JobId,
    /// The bidding agent.
    pub bidder_id: AgentId,
    /// Offered price; at most the job budget when accepted into the
    /// book.
    pub price: u64,
    /// Estimated time to completion in seconds.
    pub eta_seconds: u64,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Optional free-form pitch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    /// Optional opening terms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms: Option<Terms>,
    /// Bidder reputation at bid time.
    pub rep: RepSnapshot,
}
