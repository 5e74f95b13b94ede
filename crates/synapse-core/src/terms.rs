//! Contract terms: upfront percentage, deadline, revision budget.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Maximum allowed `max_revisions` value.
pub const MAX_REVISIONS_CAP: u32 = 10;

/// Validation failures for a terms document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TermsError {
    /// `upfrontPct` outside `[0, 1]`.
    #[error("upfrontPct must be within [0, 1]")]
    UpfrontOutOfRange,

    /// `deadlineSeconds` not strictly positive.
    #[error("deadlineSeconds must be positive")]
    NonPositiveDeadline,

    /// `maxRevisions` above the cap.
    #[error("maxRevisions must be at most {MAX_REVISIONS_CAP}")]
    TooManyRevisions,
}

/// Negotiable contract terms. Optional on a bid; required on any
/// counter-offer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Terms {
    /// Portion of the price paid non-refundably at award, in `[0, 1]`.
    pub upfront_pct: f64,
    /// Contract deadline in seconds, strictly positive.
    pub deadline_seconds: f64,
    /// Number of `changes` review rounds the worker accepts, `[0, 10]`.
    pub max_revisions: u32,
}

impl Terms {
    /// Validates the ranges of all three fields.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`TermsError`] constraint.
    pub fn validate(&self) -> Result<(), TermsError> {
        if !(0.0..=1.0).contains(&self.upfront_pct) || self.upfront_pct.is_nan() {
            return Err(TermsError::UpfrontOutOfRange);
        }
        if self.deadline_seconds <= 0.0 || self.deadline_seconds.is_nan() {
            return Err(TermsError::NonPositiveDeadline);
        }
        if self.max_revisions > MAX_REVISIONS_CAP {
            return Err(TermsError::TooManyRevisions);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_terms() {
        let terms = Terms {
            upfront_pct: 0.2,
            deadline_seconds: 8.0,
            max_revisions: 1,
        };
        assert!(terms.validate().is_ok());
    }

    #[test]
    fn test_range_violations() {
        let mut terms = Terms {
            upfront_pct: 1.2,
            deadline_seconds: 8.0,
            max_revisions: 1,
        };
        assert_eq!(terms.validate(), Err(TermsError::UpfrontOutOfRange));

        terms.upfront_pct = 0.2;
        terms.deadline_seconds = 0.0;
        assert_eq!(terms.validate(), Err(TermsError::NonPositiveDeadline));

        terms.deadline_seconds = 5.0;
        terms.max_revisions = 11;
        assert_eq!(terms.validate(), Err(TermsError::TooManyRevisions));
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let terms = Terms {
            upfront_pct: 0.2,
            deadline_seconds: 8.0,
            max_revisions: 1,
        };
        let json = serde_json::to_value(terms).expect("serialize terms");
        assert!(json.get("upfrontPct").is_some());
        assert!(json.get("deadlineSeconds").is_some());
        assert!(json.get("maxRevisions").is_some());
    }
}
