//! Exchange error taxonomy.
//!
//! Every client-surfaced failure maps to a stable on-wire code carried in
//! an `error{message}` frame. Codes never change once shipped; new
//! failures get new codes. Client-surfaced errors are fail-fast: they are
//! raised before any state is written.

use thiserror::Error;

use crate::ids::{AgentId, JobId};

/// Business-rule and protocol violations surfaced to the offending
/// session.
///
/// The [`Display`](std::fmt::Display) form is for logs; the wire frame
/// carries [`ExchangeError::code`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ExchangeError {
    /// Malformed envelope or a payload that failed closed-schema
    /// validation.
    #[error("invalid message: {reason}")]
    InvalidMessage {
        /// What the validator rejected.
        reason: String,
    },

    /// Envelope carried an unrecognized `type` tag.
    #[error("unknown message type: {ty}")]
    UnknownType {
        /// The offending tag.
        ty: String,
    },

    /// A non-`auth` message arrived before the handshake completed.
    #[error("session is not authenticated")]
    NotAuthenticated,

    /// Echoed nonce did not match the challenge nonce for this session.
    #[error("auth nonce mismatch")]
    BadNonce,

    /// Empty or unusable agent name in the auth payload.
    #[error("bad agent name")]
    BadAgentName,

    /// Ed25519 signature did not verify against the supplied key.
    #[error("auth signature verification failed")]
    SignatureVerificationFailed,

    /// Persistence failed during the auth handshake; session state was
    /// rolled back so the client may retry.
    #[error("persistence failed during auth")]
    DbErrorAuth,

    /// The acting agent has no ledger account.
    #[error("no ledger account for {agent_id}")]
    NoLedgerAccount {
        /// The agent without an account.
        agent_id: AgentId,
    },

    /// Spendable credits are below the required amount.
    #[error("insufficient credits: need {needed}, spendable {spendable}")]
    InsufficientCredits {
        /// Amount the operation required.
        needed: u64,
        /// Spendable credits at the time of the check.
        spendable: u64,
    },

    /// The worker side of an award has no ledger account.
    #[error("worker has no ledger account: {agent_id}")]
    WorkerNoLedgerAccount {
        /// The worker without an account.
        agent_id: AgentId,
    },

    /// The worker cannot cover the computed stake.
    #[error("worker cannot cover stake: need {needed}, spendable {spendable}")]
    WorkerInsufficientStake {
        /// Stake the award required.
        needed: u64,
        /// Worker spendable credits at the time of the check.
        spendable: u64,
    },

    /// No job with the given id.
    #[error("job not found: {job_id}")]
    JobNotFound {
        /// The missing job.
        job_id: JobId,
    },

    /// The operation requires status `open`.
    #[error("job {job_id} is not open")]
    JobNotOpen {
        /// The job in the wrong state.
        job_id: JobId,
    },

    /// The operation requires status `awarded`.
    #[error("job {job_id} is not awarded")]
    JobNotAwarded {
        /// The job in the wrong state.
        job_id: JobId,
    },

    /// The operation requires status `in_review`.
    #[error("job {job_id} is not in review")]
    JobNotInReview {
        /// The job in the wrong state.
        job_id: JobId,
    },

    /// The job has no assigned worker where one is required.
    #[error("job {job_id} has no assigned worker")]
    JobMissingWorker {
        /// The job missing a worker.
        job_id: JobId,
    },

    /// Only the job's requester may perform this operation.
    #[error("caller is not the owner of job {job_id}")]
    NotJobOwner {
        /// The job being acted on.
        job_id: JobId,
    },

    /// Only the assigned worker may perform this operation.
    #[error("caller is not the assigned worker for job {job_id}")]
    NotAssignedWorker {
        /// The job being acted on.
        job_id: JobId,
    },

    /// Award or counter-offer targets a worker without a bid on the job.
    #[error("worker {agent_id} has no bid on job {job_id}")]
    WorkerHasNoBid {
        /// The targeted worker.
        agent_id: AgentId,
        /// The job being acted on.
        job_id: JobId,
    },

    /// Bid price exceeds the job budget.
    #[error("bid price {price} exceeds budget {budget}")]
    BidOverBudget {
        /// Offered price.
        price: u64,
        /// Job budget.
        budget: u64,
    },

    /// Negotiated price exceeds the job budget at acceptance.
    #[error("agreed price {price} exceeds budget {budget}")]
    AgreedPriceOverBudget {
        /// Agreed price.
        price: u64,
        /// Job budget.
        budget: u64,
    },

    /// Another worker already has the active negotiation on this job.
    #[error("negotiation already in progress on job {job_id}")]
    NegotiationInProgress {
        /// The contested job.
        job_id: JobId,
    },

    /// The round counter would exceed the configured maximum.
    #[error("negotiation exceeded the maximum round count")]
    NegotiationMaxRounds,

    /// Decision or counter arrived with no active offer on the job.
    #[error("no active offer on job {job_id}")]
    NoActiveOffer {
        /// The job without an offer.
        job_id: JobId,
    },

    /// The caller is not the worker the active offer targets.
    #[error("caller is not the target of the active offer")]
    NotOfferTarget,

    /// The negotiation exists but is no longer pending.
    #[error("negotiation is not pending")]
    NegotiationNotPending,

    /// The acting session does not match the job's requester.
    #[error("caller is not the requester")]
    BadRequester,

    /// Requester counter-offer price exceeds the budget.
    #[error("offer price {price} exceeds budget {budget}")]
    OfferOverBudget {
        /// Offered price.
        price: u64,
        /// Job budget.
        budget: u64,
    },

    /// Worker counter price exceeds the budget.
    #[error("counter price {price} exceeds budget {budget}")]
    CounterOverBudget {
        /// Countered price.
        price: u64,
        /// Job budget.
        budget: u64,
    },

    /// A ledger row that must exist is missing (internal inconsistency).
    #[error("ledger row missing for {agent_id}")]
    LedgerMissing {
        /// The agent whose row is missing.
        agent_id: AgentId,
    },
}

impl ExchangeError {
    /// Stable on-wire code for `error{message}` frames.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidMessage { .. } => "invalid_message",
            Self::UnknownType { .. } => "unknown_type",
            Self::NotAuthenticated => "not_authenticated",
            Self::BadNonce => "bad_nonce",
            Self::BadAgentName => "bad_agent_name",
            Self::SignatureVerificationFailed => "signature_verification_failed",
            Self::DbErrorAuth => "db_error_auth",
            Self::NoLedgerAccount { .. } => "no_ledger_account",
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::WorkerNoLedgerAccount { .. } => "worker_no_ledger_account",
            Self::WorkerInsufficientStake { .. } => "worker_insufficient_stake",
            Self::JobNotFound { .. } => "job_not_found",
            Self::JobNotOpen { .. } => "job_not_open",
            Self::JobNotAwarded { .. } => "job_not_awarded",
            Self::JobNotInReview { .. } => "job_not_in_review",
            Self::JobMissingWorker { .. } => "job_missing_worker",
            Self::NotJobOwner { .. } => "not_job_owner",
            Self::NotAssignedWorker { .. } => "not_assigned_worker",
            Self::WorkerHasNoBid { .. } => "worker_has_no_bid",
            Self::BidOverBudget { .. } => "bid_over_budget",
            Self::AgreedPriceOverBudget { .. } => "agreed_price_over_budget",
            Self::NegotiationInProgress { .. } => "negotiation_in_progress",
            Self::NegotiationMaxRounds => "negotiation_max_rounds",
            Self::NoActiveOffer { .. } => "no_active_offer",
            Self::NotOfferTarget => "not_offer_target",
            Self::NegotiationNotPending => "negotiation_not_pending",
            Self::BadRequester => "bad_requester",
            Self::OfferOverBudget { .. } => "offer_over_budget",
            Self::CounterOverBudget { .. } => "counter_over_budget",
            Self::LedgerMissing { .. } => "ledger_missing",
        }
    }
}
