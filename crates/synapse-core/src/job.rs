//! Jobs and the contract lifecycle.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::DEFAULT_TIMEOUT_SECONDS;
use crate::ids::{AgentId, JobId};
use crate::negotiation::Negotiation;
use crate::terms::Terms;

/// Default job kind when the poster names none.
pub const DEFAULT_JOB_KIND: &str = "simple";

/// Job lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepting bids and negotiations.
    Open,
    /// Escrow locked, worker assigned, deadline armed.
    Awarded,
    /// Work submitted, awaiting the requester's review.
    InReview,
    /// Settled successfully. Terminal.
    Completed,
    /// Withdrawn before award. Terminal.
    Cancelled,
    /// Settled as a failure; eligible for reopen.
    Failed,
}

impl JobStatus {
    /// Returns the wire representation of this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Awarded => "awarded",
            Self::InReview => "in_review",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }

    /// Whether the job's ledger-affecting fields are frozen forever.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    /// Checks whether a transition to `target` is allowed by the state
    /// machine.
    #[must_use]
    pub const fn can_transition_to(&self, target: &Self) -> bool {
        matches!(
            (self, target),
            (Self::Open, Self::Awarded | Self::Cancelled)
                | (Self::Awarded, Self::InReview | Self::Completed | Self::Failed)
                | (Self::InReview, Self::Completed | Self::Failed | Self::Awarded)
                | (Self::Failed, Self::Open)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored work submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Submission {
    /// Submission timestamp, milliseconds since epoch.
    pub at_ms: u64,
    /// The submitting worker.
    pub by: AgentId,
    /// The submitted result, verbatim.
    pub result: String,
}

/// Advisory outcome of the external evaluator on a `coding` submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AutoVerify {
    /// Whether the evaluator accepted the submission.
    pub ok: bool,
    /// Failure reason when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Free-form job payload with typed sub-documents for every known key.
///
/// Unknown keys are preserved verbatim in `extra` for forward
/// compatibility: a payload round-trips through the exchange unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    /// Contract deadline override in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Terms agreed through negotiation, fixed before escrow locks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_terms: Option<Terms>,
    /// Price agreed through negotiation; replaces the budget as the
    /// locked amount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_price: Option<u64>,
    /// The job's negotiation document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub negotiation: Option<Negotiation>,
    /// Most recent submission.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_submission: Option<Submission>,
    /// Most recent evaluator outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_verify: Option<AutoVerify>,
    /// Keyword the default evaluator looks for in `coding` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_keyword: Option<String>,
    /// GitHub linkage details owned by the ingress collaborator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<Value>,
    /// Unknown keys, preserved verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A unit of work with a budget, progressing through [`JobStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Job {
    /// Unique job id.
    pub id: JobId,
    /// Non-empty title.
    pub title: String,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Positive budget in credits.
    pub budget: u64,
    /// The posting agent.
    pub requester_id: AgentId,
    /// Creation timestamp, milliseconds since epoch.
    pub created_at_ms: u64,
    /// Lifecycle status.
    pub status: JobStatus,
    /// Assigned worker; set iff the job is awarded, in review, or
    /// failed after an award.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<AgentId>,
    /// Job kind; `"coding"` submissions run the evaluator.
    pub kind: String,
    /// Extensible payload.
    #[serde(default)]
    pub payload: JobPayload,
    /// Requester credits reserved for this contract.
    pub locked_budget: u64,
    /// Worker credits reserved against walkaway.
    pub locked_stake: u64,
    /// Non-refundable upfront already paid to the worker.
    pub paid_upfront: u64,
    /// Award timestamp for the active contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awarded_at_ms: Option<u64>,
}

impl Job {
    /// Creates an open job with empty escrow fields.
    #[must_use]
    pub fn new(
        id: JobId,
        title: String,
        description: Option<String>,
        budget: u64,
        requester_id: AgentId,
        kind: String,
        payload: JobPayload,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            title,
            description,
            budget,
            requester_id,
            created_at_ms,
            status: JobStatus::Open,
            worker_id: None,
            kind,
            payload,
            locked_budget: 0,
            locked_stake: 0,
            paid_upfront: 0,
            awarded_at_ms: None,
        }
    }

    /// Effective contract deadline in seconds: the payload override
    /// when finite and positive, then the accepted terms' deadline,
    /// then the exchange default.
    #[must_use]
    pub fn timeout_seconds(&self) -> f64 {
        if let Some(secs) = self.payload.timeout_seconds {
            if secs.is_finite() && secs > 0.0 {
                return secs;
            }
        }
        if let Some(terms) = self.payload.accepted_terms {
            if terms.deadline_seconds.is_finite() && terms.deadline_seconds > 0.0 {
                return terms.deadline_seconds;
            }
        }
        DEFAULT_TIMEOUT_SECONDS
    }

    /// The price escrow locks at award: the negotiated price when one
    /// was accepted, the budget otherwise.
    #[must_use]
    pub fn agreed_price(&self) -> u64 {
        self.payload.accepted_price.unwrap_or(self.budget)
    }
}
