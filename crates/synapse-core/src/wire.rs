//! Versioned JSON wire protocol.
//!
//! Every frame is a UTF-8 JSON object carrying `v` (protocol version)
//! and a string `type`. Inbound payloads are validated against a closed
//! schema per type: the envelope fields are peeled off first, then the
//! remainder must decode with no unknown fields. Malformed envelopes
//! fail `invalid_message`; unrecognized tags fail `unknown_type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bid::Bid;
use crate::error::ExchangeError;
use crate::ids::{AgentId, JobId};
use crate::job::{Job, JobPayload};
use crate::negotiation::NegotiationRole;
use crate::terms::Terms;

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Preview length for `job_submitted` broadcasts.
pub const SUBMISSION_PREVIEW_CHARS: usize = 120;

// ---------------------------------------------------------------------------
// Inbound payloads
// ---------------------------------------------------------------------------

/// `auth` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AuthMsg {
    /// Display name for the agent.
    pub agent_name: String,
    /// SPKI DER public key, base64.
    pub public_key: String,
    /// Echo of the challenge nonce.
    pub nonce: String,
    /// Detached Ed25519 signature over the canonical auth string,
    /// base64.
    pub signature: String,
}

/// `post_job` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PostJobMsg {
    /// Non-empty job title.
    pub title: String,
    /// Optional description.
    #[serde(default)]
    pub description: Option<String>,
    /// Positive budget.
    pub budget: u64,
    /// Job kind; defaults to `"simple"`.
    #[serde(default)]
    pub kind: Option<String>,
    /// Optional initial payload.
    #[serde(default)]
    pub payload: Option<JobPayload>,
}

/// `bid` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BidMsg {
    /// Target job.
    pub job_id: JobId,
    /// Positive offered price.
    pub price: u64,
    /// Positive estimated seconds to completion.
    pub eta_seconds: u64,
    /// Optional pitch.
    #[serde(default)]
    pub pitch: Option<String>,
    /// Optional opening terms.
    #[serde(default)]
    pub terms: Option<Terms>,
}

/// `award` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct AwardMsg {
    /// The job to award.
    pub job_id: JobId,
    /// The chosen worker; must hold a bid on the job.
    pub worker_id: AgentId,
}

/// `counter_offer` payload (requester to worker).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct CounterOfferMsg {
    /// The job under negotiation.
    pub job_id: JobId,
    /// The targeted worker.
    pub worker_id: AgentId,
    /// Proposed price, at most the budget.
    pub price: u64,
    /// Full terms; required on every counter-offer.
    pub terms: Terms,
    /// Optional notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// `worker_counter` payload (worker to requester).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct WorkerCounterMsg {
    /// The job under negotiation.
    pub job_id: JobId,
    /// Proposed price, at most the budget.
    pub price: u64,
    /// Full terms; required on every counter.
    pub terms: Terms,
    /// Optional notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Worker verdict on the active offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferDecision {
    /// Accept the current price and terms; triggers the award path.
    Accept,
    /// Reject and close the negotiation.
    Reject,
}

impl OfferDecision {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

/// `offer_decision` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct OfferDecisionMsg {
    /// The job under negotiation.
    pub job_id: JobId,
    /// Accept or reject.
    pub decision: OfferDecision,
    /// Optional notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// `submit` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct SubmitMsg {
    /// The awarded job.
    pub job_id: JobId,
    /// The work product, verbatim.
    pub result: String,
}

/// Requester verdict on a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    /// Settle successfully.
    Accept,
    /// Settle as failure and reopen.
    Reject,
    /// Send back for another revision; deadline re-arms.
    Changes,
}

impl ReviewDecision {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Changes => "changes",
        }
    }
}

/// `review` payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ReviewMsg {
    /// The job in review.
    pub job_id: JobId,
    /// The verdict.
    pub decision: ReviewDecision,
    /// Optional notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// A validated inbound client message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Auth handshake reply.
    Auth(AuthMsg),
    /// Post a new job.
    PostJob(PostJobMsg),
    /// Bid on an open job.
    Bid(BidMsg),
    /// Award a job directly.
    Award(AwardMsg),
    /// Open or continue a negotiation (requester side).
    CounterOffer(CounterOfferMsg),
    /// Continue a negotiation (worker side).
    WorkerCounter(WorkerCounterMsg),
    /// Accept or reject the active offer.
    OfferDecision(OfferDecisionMsg),
    /// Submit work on an awarded job.
    Submit(SubmitMsg),
    /// Review a submission.
    Review(ReviewMsg),
}

impl ClientMessage {
    /// Parses and validates one inbound frame.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::InvalidMessage`] for malformed JSON, a missing
    /// or wrong `v`, a missing `type`, unknown fields, or out-of-range
    /// values; [`ExchangeError::UnknownType`] for an unrecognized tag.
    pub fn parse(text: &str) -> Result<Self, ExchangeError> {
        let value: Value = serde_json::from_str(text).map_err(|e| {
            ExchangeError::InvalidMessage {
                reason: format!("not a JSON object: {e}"),
            }
        })?;
        let Value::Object(mut fields) = value else {
            return Err(ExchangeError::InvalidMessage {
                reason: "frame must be a JSON object".into(),
            });
        };

        match fields.remove("v") {
            Some(Value::Number(v)) if v.as_u64() == Some(u64::from(PROTOCOL_VERSION)) => {}
            Some(other) => {
                return Err(ExchangeError::InvalidMessage {
                    reason: format!("unsupported protocol version: {other}"),
                })
            }
            None => {
                return Err(ExchangeError::InvalidMessage {
                    reason: "missing protocol version".into(),
                })
            }
        }

        let ty = match fields.remove("type") {
            Some(Value::String(ty)) => ty,
            _ => {
                return Err(ExchangeError::InvalidMessage {
                    reason: "missing message type".into(),
                })
            }
        };

        let payload = Value::Object(fields);
        let message = match ty.as_str() {
            "auth" => Self::Auth(decode(payload)?),
            "post_job" => Self::PostJob(decode(payload)?),
            "bid" => Self::Bid(decode(payload)?),
            "award" => Self::Award(decode(payload)?),
            "counter_offer" => Self::CounterOffer(decode(payload)?),
            "worker_counter" => Self::WorkerCounter(decode(payload)?),
            "offer_decision" => Self::OfferDecision(decode(payload)?),
            "submit" => Self::Submit(decode(payload)?),
            "review" => Self::Review(decode(payload)?),
            _ => return Err(ExchangeError::UnknownType { ty }),
        };

        message.validate()?;
        Ok(message)
    }

    /// Range checks the schema cannot express.
    fn validate(&self) -> Result<(), ExchangeError> {
        let invalid = |reason: &str| ExchangeError::InvalidMessage {
            reason: reason.into(),
        };
        match self {
            Self::PostJob(msg) => {
                if msg.title.trim().is_empty() {
                    return Err(invalid("title must be non-empty"));
                }
                if msg.budget == 0 {
                    return Err(invalid("budget must be positive"));
                }
            }
            Self::Bid(msg) => {
                if msg.price == 0 {
                    return Err(invalid("price must be positive"));
                }
                if msg.eta_seconds == 0 {
                    return Err(invalid("etaSeconds must be positive"));
                }
                if let Some(terms) = &msg.terms {
                    terms.validate().map_err(|e| invalid(&e.to_string()))?;
                }
            }
            Self::CounterOffer(msg) => {
                if msg.price == 0 {
                    return Err(invalid("price must be positive"));
                }
                msg.terms
                    .validate()
                    .map_err(|e| invalid(&e.to_string()))?;
            }
            Self::WorkerCounter(msg) => {
                if msg.price == 0 {
                    return Err(invalid("price must be positive"));
                }
                msg.terms
                    .validate()
                    .map_err(|e| invalid(&e.to_string()))?;
            }
            Self::Auth(_)
            | Self::Award(_)
            | Self::OfferDecision(_)
            | Self::Submit(_)
            | Self::Review(_) => {}
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(payload: Value) -> Result<T, ExchangeError> {
    serde_json::from_value(payload).map_err(|e| ExchangeError::InvalidMessage {
        reason: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Outbound frames
// ---------------------------------------------------------------------------

/// Server-to-client frames. [`ServerMessage::to_frame`] injects the
/// protocol version; the serialized form is the exact broadcast payload
/// mirrored on the tape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Handshake challenge.
    Challenge {
        /// Base64 nonce the client must echo and sign over.
        nonce: String,
        /// Server wall time, milliseconds since epoch.
        server_time_ms: u64,
    },
    /// Successful authentication.
    Authed {
        /// The stable agent identity.
        agent_id: AgentId,
        /// Credits after any starting grant.
        credits: u64,
    },
    /// A client-surfaced failure; `message` is a stable taxonomy code.
    Error {
        /// The taxonomy code.
        message: String,
    },
    /// A job entered the book.
    JobPosted {
        /// The posted job.
        job: Job,
    },
    /// A job snapshot after a non-broadcast-specific mutation.
    JobUpdated {
        /// The updated job.
        job: Job,
    },
    /// A bid entered the book.
    BidPosted {
        /// The posted bid.
        bid: Bid,
    },
    /// Escrow locked and a worker assigned.
    JobAwarded {
        /// The awarded job.
        job_id: JobId,
        /// The assigned worker.
        worker_id: AgentId,
        /// Amount locked from the requester.
        budget_locked: u64,
    },
    /// The requester opened a negotiation (directed to the worker).
    OfferMade {
        /// The job under negotiation.
        job_id: JobId,
        /// The targeted worker.
        worker_id: AgentId,
        /// Offered price.
        price: u64,
        /// Offered terms.
        terms: Terms,
        /// Round number of this offer.
        round: u32,
        /// Optional notes.
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Any counter in a negotiation.
    CounterMade {
        /// The job under negotiation.
        job_id: JobId,
        /// Author role of the counter.
        from_role: NegotiationRole,
        /// Countered price.
        price: u64,
        /// Countered terms.
        terms: Terms,
        /// Round number of this counter.
        round: u32,
        /// Optional notes.
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// The worker accepted or rejected the active offer.
    OfferResponse {
        /// The job under negotiation.
        job_id: JobId,
        /// The deciding worker.
        worker_id: AgentId,
        /// The verdict.
        decision: OfferDecision,
        /// Final round count.
        round: u32,
    },
    /// The negotiation closed.
    NegotiationEnded {
        /// The job the negotiation was on.
        job_id: JobId,
        /// `accept`, `rejected`, or `max_rounds`.
        reason: String,
        /// Final round count.
        round: u32,
    },
    /// Work was submitted.
    JobSubmitted {
        /// The submitted job.
        job_id: JobId,
        /// The submitting worker.
        worker_id: AgentId,
        /// Size of the result in bytes.
        bytes: u64,
        /// First [`SUBMISSION_PREVIEW_CHARS`] characters of the result.
        preview: String,
    },
    /// The requester reviewed a submission.
    JobReviewed {
        /// The reviewed job.
        job_id: JobId,
        /// The verdict.
        decision: ReviewDecision,
        /// Optional notes.
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    /// Settlement success.
    JobCompleted {
        /// The completed job.
        job_id: JobId,
        /// The paid worker.
        worker_id: AgentId,
        /// Total paid over the contract (upfront + remainder).
        paid: u64,
    },
    /// Settlement failure.
    JobFailed {
        /// The failed job.
        job_id: JobId,
        /// Failure reason (`rejected`, `timeout`, ...).
        reason: String,
    },
    /// Directed balance push to one agent's sessions.
    LedgerUpdate {
        /// Credits after the mutation.
        credits: u64,
        /// Locked amount after the mutation.
        locked: u64,
    },
}

impl ServerMessage {
    /// Renders the frame as wire JSON with the protocol version
    /// injected.
    #[must_use]
    pub fn to_frame(&self) -> String {
        self.to_value().to_string()
    }

    /// Renders the frame as a JSON value with the protocol version
    /// injected; this is the exact payload mirrored on the tape.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| {
            // Serialization of these closed types cannot fail; an error
            // here is a schema bug worth surfacing loudly downstream.
            Value::Object(Map::new())
        });
        if let Value::Object(fields) = &mut value {
            fields.insert("v".into(), Value::from(PROTOCOL_VERSION));
        }
        value
    }

    /// Builds a truncated submission preview.
    #[must_use]
    pub fn submission_preview(result: &str) -> String {
        result.chars().take(SUBMISSION_PREVIEW_CHARS).collect()
    }
}

/// Builds an `error` frame for an [`ExchangeError`].
#[must_use]
pub fn error_frame(err: &ExchangeError) -> ServerMessage {
    ServerMessage::Error {
        message: err.code().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_valid_bid() {
        let frame = json!({
            "v": 1,
            "type": "bid",
            "jobId": "job_1",
            "price": 10,
            "etaSeconds": 2
        })
        .to_string();
        let msg = ClientMessage::parse(&frame).expect("parse bid");
        let ClientMessage::Bid(bid) = msg else {
            panic!("expected bid message");
        };
        assert_eq!(bid.price, 10);
        assert_eq!(bid.job_id, JobId::from("job_1"));
        assert!(bid.terms.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let frame = json!({
            "v": 1,
            "type": "bid",
            "jobId": "job_1",
            "price": 10,
            "etaSeconds": 2,
            "sneaky": true
        })
        .to_string();
        let err = ClientMessage::parse(&frame).expect_err("unknown field");
        assert_eq!(err.code(), "invalid_message");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let frame = json!({"v": 1, "type": "teleport"}).to_string();
        let err = ClientMessage::parse(&frame).expect_err("unknown type");
        assert_eq!(err.code(), "unknown_type");
    }

    #[test]
    fn test_missing_or_wrong_version_rejected() {
        let missing = json!({"type": "submit", "jobId": "j", "result": "r"}).to_string();
        assert_eq!(
            ClientMessage::parse(&missing).expect_err("missing v").code(),
            "invalid_message"
        );
        let wrong = json!({"v": 2, "type": "submit", "jobId": "j", "result": "r"}).to_string();
        assert_eq!(
            ClientMessage::parse(&wrong).expect_err("wrong v").code(),
            "invalid_message"
        );
    }

    #[test]
    fn test_zero_budget_rejected() {
        let frame = json!({
            "v": 1,
            "type": "post_job",
            "title": "t",
            "budget": 0
        })
        .to_string();
        let err = ClientMessage::parse(&frame).expect_err("zero budget");
        assert_eq!(err.code(), "invalid_message");
    }

    #[test]
    fn test_counter_offer_requires_full_terms() {
        let frame = json!({
            "v": 1,
            "type": "counter_offer",
            "jobId": "job_1",
            "workerId": "agent_w",
            "price": 70
        })
        .to_string();
        let err = ClientMessage::parse(&frame).expect_err("missing terms");
        assert_eq!(err.code(), "invalid_message");
    }

    #[test]
    fn test_frame_injects_version_and_tag() {
        let frame = ServerMessage::Challenge {
            nonce: "abc".into(),
            server_time_ms: 42,
        }
        .to_value();
        assert_eq!(frame["v"], 1);
        assert_eq!(frame["type"], "challenge");
        assert_eq!(frame["serverTimeMs"], 42);
    }

    #[test]
    fn test_error_frame_uses_taxonomy_code() {
        let frame = error_frame(&ExchangeError::NotAuthenticated).to_value();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["message"], "not_authenticated");
    }

    #[test]
    fn test_submission_preview_truncates_at_chars() {
        let long = "x".repeat(400);
        assert_eq!(ServerMessage::submission_preview(&long).len(), 120);
        assert_eq!(ServerMessage::submission_preview("done"), "done");
    }

    #[test]
    fn test_accepted_entity_roundtrips_through_schema() {
        // A bid broadcast must round-trip back through the wire schema
        // unchanged.
        let bid = Bid {
            id: crate::ids::BidId::from("bid_1"),
            job_id: JobId::from("job_1"),
            bidder_id: AgentId::from("agent_w"),
            price: 10,
            eta_seconds: 2,
            created_at_ms: 7,
            pitch: Some("fast".into()),
            terms: None,
            rep: crate::bid::RepSnapshot {
                completed: 0,
                failed: 0,
                score: 0.5,
            },
        };
        let frame = ServerMessage::BidPosted { bid: bid.clone() }.to_value();
        let back: Bid = serde_json::from_value(frame["bid"].clone()).expect("roundtrip bid");
        assert_eq!(back, bid);
    }
}
