//! Domain model for the Synapse clearing house.
//!
//! Synapse is a single-operator labor market where authenticated agents
//! post jobs, bid, negotiate, submit work, and settle payments in a
//! credit ledger with escrow and stake semantics. This crate holds the
//! pure domain layer shared by the daemon and by test harnesses:
//!
//! - [`ids`]: opaque entity identifiers
//! - [`config`]: the startup configuration record
//! - [`identity`]: agent identity derivation and auth verification
//! - [`ledger`]: credit accounts, escrow arithmetic, stake and slash
//! - [`reputation`]: settlement counters and the smoothed score
//! - [`job`], [`bid`], [`terms`], [`negotiation`]: the market entities
//! - [`evidence`]: the bounded audit ring
//! - [`tape`]: the typed event stream observed by spectators
//! - [`wire`]: the versioned JSON message schema
//! - [`error`]: the exchange error taxonomy with stable wire codes
//!
//! Nothing in this crate performs I/O; the daemon owns sockets, timers,
//! and persistence.

pub mod bid;
pub mod config;
pub mod error;
pub mod evidence;
pub mod identity;
pub mod ids;
pub mod job;
pub mod ledger;
pub mod negotiation;
pub mod reputation;
pub mod tape;
pub mod terms;
pub mod wire;

pub use bid::{Bid, RepSnapshot};
pub use config::ExchangeConfig;
pub use error::ExchangeError;
pub use evidence::{EvidenceItem, EvidenceRing, EVIDENCE_RING_CAP};
pub use identity::{agent_id_from_public_key, auth_canonical_string, verify_auth_signature};
pub use ids::{AgentId, BidId, JobId};
pub use job::{AutoVerify, Job, JobPayload, JobStatus, Submission};
pub use ledger::{LedgerAccount, StakeParams};
pub use negotiation::{Negotiation, NegotiationEntry, NegotiationRole, NegotiationStatus};
pub use reputation::Reputation;
pub use tape::TapeEvent;
pub use terms::Terms;
pub use wire::{error_frame, ClientMessage, ServerMessage, PROTOCOL_VERSION};

/// Milliseconds since the Unix epoch.
///
/// Wall time is observational only: it stamps entities and evidence but
/// never drives ordering decisions.
#[must_use]
pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
