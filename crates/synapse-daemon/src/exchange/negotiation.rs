//! Negotiation rounds: counter-offers, worker counters, decisions.
//!
//! At most one negotiation is active per job, bound to the worker the
//! requester's opening counter targeted. Rounds are bounded by the
//! configured ceiling; exceeding it closes the negotiation. Acceptance
//! runs the direct-award path with the agreed price; award-time
//! failures surface to the accepting worker only.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use synapse_core::negotiation::{Negotiation, NegotiationRole, NegotiationStatus};
use synapse_core::wire::{CounterOfferMsg, OfferDecision, OfferDecisionMsg, WorkerCounterMsg};
use synapse_core::{now_ms, AgentId, ExchangeError, JobId, JobStatus, ServerMessage};

use crate::exchange::Exchange;
use crate::state::ExchangeState;

impl Exchange {
    /// Requester counter-offer: opens the negotiation on the first
    /// call, continues it on later calls.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, `bad_requester`,
    /// `worker_has_no_bid`, `offer_over_budget`,
    /// `negotiation_in_progress`, or `negotiation_max_rounds`.
    pub fn counter_offer(
        &self,
        caller: &AgentId,
        msg: &CounterOfferMsg,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: msg.job_id.clone(),
            });
        }
        if &job.requester_id != caller {
            return Err(ExchangeError::BadRequester);
        }
        if msg.price > job.budget {
            return Err(ExchangeError::OfferOverBudget {
                price: msg.price,
                budget: job.budget,
            });
        }
        if !state.has_bid(&msg.job_id, &msg.worker_id) {
            return Err(ExchangeError::WorkerHasNoBid {
                agent_id: msg.worker_id.clone(),
                job_id: msg.job_id.clone(),
            });
        }

        let max_rounds = self.config.negotiation_max_rounds;
        let existing = state
            .job(&msg.job_id)?
            .payload
            .negotiation
            .clone();

        if let Some(neg) = existing {
            if neg.is_pending() {
                if neg.worker_id != msg.worker_id {
                    return Err(ExchangeError::NegotiationInProgress {
                        job_id: msg.job_id.clone(),
                    });
                }
                if neg.at_round_ceiling(max_rounds) {
                    return Err(self.close_max_rounds(&mut state, &msg.job_id));
                }
                let round = {
                    let job = state.job_mut(&msg.job_id)?;
                    let Some(neg) = job.payload.negotiation.as_mut() else {
                        return Err(ExchangeError::NoActiveOffer {
                            job_id: msg.job_id.clone(),
                        });
                    };
                    neg.push_round(
                        NegotiationRole::Boss,
                        msg.price,
                        msg.terms,
                        msg.notes.clone(),
                        now_ms(),
                    );
                    let round = neg.round;
                    let job = job.clone();
                    self.persist_job("counter_offer", &job);
                    round
                };
                self.broadcast_msg(&ServerMessage::CounterMade {
                    job_id: msg.job_id.clone(),
                    from_role: NegotiationRole::Boss,
                    price: msg.price,
                    terms: msg.terms,
                    round,
                    notes: msg.notes.clone(),
                });
                self.add_evidence(
                    &mut state,
                    &msg.job_id,
                    "counter",
                    format!("requester countered at {} (round {round})", msg.price),
                    json!({ "fromRole": "boss", "price": msg.price, "round": round }),
                );
                return Ok(());
            }
            // A concluded negotiation does not block a fresh one.
        }

        let Some(bid) = state.first_bid_by(&msg.job_id, &msg.worker_id).cloned() else {
            return Err(ExchangeError::WorkerHasNoBid {
                agent_id: msg.worker_id.clone(),
                job_id: msg.job_id.clone(),
            });
        };
        let negotiation = Negotiation::open(
            msg.worker_id.clone(),
            bid.id.clone(),
            bid.price,
            msg.price,
            msg.terms,
            msg.notes.clone(),
            now_ms(),
        );
        {
            let job = state.job_mut(&msg.job_id)?;
            job.payload.negotiation = Some(negotiation);
            let job = job.clone();
            self.persist_job("counter_offer", &job);
        }

        self.broadcast_msg(&ServerMessage::CounterMade {
            job_id: msg.job_id.clone(),
            from_role: NegotiationRole::Boss,
            price: msg.price,
            terms: msg.terms,
            round: 1,
            notes: msg.notes.clone(),
        });
        self.send_directed(
            &msg.worker_id,
            &ServerMessage::OfferMade {
                job_id: msg.job_id.clone(),
                worker_id: msg.worker_id.clone(),
                price: msg.price,
                terms: msg.terms,
                round: 1,
                notes: msg.notes.clone(),
            },
        );
        self.add_evidence(
            &mut state,
            &msg.job_id,
            "negotiation",
            format!("negotiation opened with {} from bid {}", msg.worker_id, bid.id),
            json!({
                "workerId": msg.worker_id.as_str(),
                "bidId": bid.id.as_str(),
                "bidPrice": bid.price,
            }),
        );
        self.add_evidence(
            &mut state,
            &msg.job_id,
            "offer",
            format!("offered {} to {}", msg.price, msg.worker_id),
            json!({ "workerId": msg.worker_id.as_str(), "price": msg.price }),
        );
        info!(job_id = %msg.job_id, worker_id = %msg.worker_id, price = msg.price, "negotiation opened");
        Ok(())
    }

    /// Worker counter in an active negotiation.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, `no_active_offer`,
    /// `negotiation_not_pending`, `not_offer_target`,
    /// `counter_over_budget`, or `negotiation_max_rounds`.
    pub fn worker_counter(
        &self,
        caller: &AgentId,
        msg: &WorkerCounterMsg,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: msg.job_id.clone(),
            });
        }
        let Some(neg) = job.payload.negotiation.clone() else {
            return Err(ExchangeError::NoActiveOffer {
                job_id: msg.job_id.clone(),
            });
        };
        if !neg.is_pending() {
            return Err(ExchangeError::NegotiationNotPending);
        }
        if &neg.worker_id != caller {
            return Err(ExchangeError::NotOfferTarget);
        }
        if msg.price > job.budget {
            return Err(ExchangeError::CounterOverBudget {
                price: msg.price,
                budget: job.budget,
            });
        }
        if neg.at_round_ceiling(self.config.negotiation_max_rounds) {
            return Err(self.close_max_rounds(&mut state, &msg.job_id));
        }

        let round = {
            let job = state.job_mut(&msg.job_id)?;
            let Some(neg) = job.payload.negotiation.as_mut() else {
                return Err(ExchangeError::NoActiveOffer {
                    job_id: msg.job_id.clone(),
                });
            };
            neg.push_round(
                NegotiationRole::Worker,
                msg.price,
                msg.terms,
                msg.notes.clone(),
                now_ms(),
            );
            let round = neg.round;
            let job = job.clone();
            self.persist_job("worker_counter", &job);
            round
        };
        self.broadcast_msg(&ServerMessage::CounterMade {
            job_id: msg.job_id.clone(),
            from_role: NegotiationRole::Worker,
            price: msg.price,
            terms: msg.terms,
            round,
            notes: msg.notes.clone(),
        });
        self.add_evidence(
            &mut state,
            &msg.job_id,
            "counter",
            format!("worker countered at {} (round {round})", msg.price),
            json!({ "fromRole": "worker", "price": msg.price, "round": round }),
        );
        Ok(())
    }

    /// Worker decision on the active offer. Acceptance runs the award
    /// path with the agreed price; failures there are returned to the
    /// accepting worker only.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, `no_active_offer`,
    /// `negotiation_not_pending`, `not_offer_target`,
    /// `agreed_price_over_budget`, or any award-path failure.
    pub fn offer_decision(
        self: &Arc<Self>,
        caller: &AgentId,
        msg: &OfferDecisionMsg,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: msg.job_id.clone(),
            });
        }
        let budget = job.budget;
        let Some(neg) = job.payload.negotiation.clone() else {
            return Err(ExchangeError::NoActiveOffer {
                job_id: msg.job_id.clone(),
            });
        };
        if !neg.is_pending() {
            return Err(ExchangeError::NegotiationNotPending);
        }
        if &neg.worker_id != caller {
            return Err(ExchangeError::NotOfferTarget);
        }

        match msg.decision {
            OfferDecision::Reject => {
                {
                    let job = state.job_mut(&msg.job_id)?;
                    if let Some(neg) = job.payload.negotiation.as_mut() {
                        neg.status = NegotiationStatus::Reject;
                    }
                    let job = job.clone();
                    self.persist_job("offer_decision", &job);
                }
                self.finish_negotiation(&mut state, &msg.job_id, caller, msg.decision, neg.round, "rejected");
                info!(job_id = %msg.job_id, worker_id = %caller, "offer rejected");
                Ok(())
            }
            OfferDecision::Accept => {
                if neg.price > budget {
                    return Err(ExchangeError::AgreedPriceOverBudget {
                        price: neg.price,
                        budget,
                    });
                }
                // Stage the contract before escrow locks so the award
                // path sees the agreed price and terms.
                {
                    let job = state.job_mut(&msg.job_id)?;
                    job.payload.accepted_terms = Some(neg.terms);
                    job.payload.accepted_price = Some(neg.price);
                    if let Some(neg) = job.payload.negotiation.as_mut() {
                        neg.status = NegotiationStatus::Accept;
                    }
                }

                if let Err(error) = self.perform_award(&mut state, &msg.job_id, caller) {
                    // Unwind the staging; the negotiation stays open.
                    let job = state.job_mut(&msg.job_id)?;
                    job.payload.accepted_terms = None;
                    job.payload.accepted_price = None;
                    if let Some(neg) = job.payload.negotiation.as_mut() {
                        neg.status = NegotiationStatus::Pending;
                    }
                    return Err(error);
                }

                self.finish_negotiation(&mut state, &msg.job_id, caller, msg.decision, neg.round, "accept");
                info!(job_id = %msg.job_id, worker_id = %caller, price = neg.price, "offer accepted");
                Ok(())
            }
        }
    }

    /// Shared decision fanout: `offer_response`, `negotiation_ended`,
    /// and the matching evidence.
    fn finish_negotiation(
        &self,
        state: &mut ExchangeState,
        job_id: &JobId,
        worker_id: &AgentId,
        decision: OfferDecision,
        round: u32,
        reason: &str,
    ) {
        self.broadcast_msg(&ServerMessage::OfferResponse {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            decision,
            round,
        });
        self.broadcast_msg(&ServerMessage::NegotiationEnded {
            job_id: job_id.clone(),
            reason: reason.to_string(),
            round,
        });
        self.add_evidence(
            state,
            job_id,
            "offer_response",
            format!("worker {} {}", worker_id, decision.as_str()),
            json!({ "workerId": worker_id.as_str(), "decision": decision.as_str(), "round": round }),
        );
        self.add_evidence(
            state,
            job_id,
            "negotiation_end",
            format!("negotiation ended: {reason} after round {round}"),
            json!({ "reason": reason, "round": round }),
        );
    }

    /// Closes a negotiation at the round ceiling and returns the error
    /// the offending counter receives.
    fn close_max_rounds(&self, state: &mut ExchangeState, job_id: &JobId) -> ExchangeError {
        let mut round = 0;
        if let Ok(job) = state.job_mut(job_id) {
            if let Some(neg) = job.payload.negotiation.as_mut() {
                neg.status = NegotiationStatus::MaxRounds;
                round = neg.round;
            }
            let job = job.clone();
            self.persist_job("negotiation_end", &job);
        }
        self.broadcast_msg(&ServerMessage::NegotiationEnded {
            job_id: job_id.clone(),
            reason: "max_rounds".to_string(),
            round,
        });
        self.add_evidence(
            state,
            job_id,
            "negotiation_end",
            format!("negotiation hit the round ceiling at round {round}"),
            json!({ "reason": "max_rounds", "round": round }),
        );
        info!(job_id = %job_id, round, "negotiation closed at round ceiling");
        ExchangeError::NegotiationMaxRounds
    }
}
