//! Advisory submission evaluator port.
//!
//! Submissions on `coding` jobs are handed to an evaluator whose
//! outcome is recorded as `auto_verify` evidence. The outcome is
//! advisory only: settlement always waits for the requester's review.
//!
//! The shipped implementation is pure and deterministic: it checks the
//! job's `requiredKeyword` payload entry against the submitted result.
//! Sandboxed code execution stays an external collaborator behind this
//! trait.

use synapse_core::Job;

/// Evaluator verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalOutcome {
    /// Whether the evaluator accepted the submission.
    pub ok: bool,
    /// Failure reason when `ok` is false.
    pub reason: Option<String>,
}

impl EvalOutcome {
    /// A passing outcome.
    #[must_use]
    pub const fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    /// A failing outcome with a reason.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// The evaluator port for `coding` submissions.
pub trait Evaluator: Send + Sync {
    /// Evaluates a submitted result against the job.
    fn evaluate(&self, job: &Job, result: &str) -> EvalOutcome;
}

/// Deterministic keyword evaluator.
///
/// Passes when the job payload names no `requiredKeyword`, or when the
/// submitted result contains it.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeywordEvaluator;

impl Evaluator for KeywordEvaluator {
    fn evaluate(&self, job: &Job, result: &str) -> EvalOutcome {
        match job.payload.required_keyword.as_deref() {
            None => EvalOutcome::pass(),
            Some(keyword) if result.contains(keyword) => EvalOutcome::pass(),
            Some(keyword) => EvalOutcome::fail(format!("missing required keyword {keyword:?}")),
        }
    }
}
