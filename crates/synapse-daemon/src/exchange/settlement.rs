//! Escrow, stake, settlement, and reopen.
//!
//! The award path locks requester escrow and worker stake, pays any
//! agreed upfront, and arms the deadline. Settlement releases or moves
//! every reservation exactly once: success pays the remainder and
//! returns the stake, failure refunds the remainder and slashes the
//! stake. Reopen releases whatever is still outstanding and puts the
//! job back on the book.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, info};

use synapse_core::ledger::{compute_slash, compute_stake, compute_upfront, LedgerViolation};
use synapse_core::{now_ms, AgentId, ExchangeError, Job, JobId, JobStatus, ServerMessage, TapeEvent};

use crate::exchange::Exchange;
use crate::state::ExchangeState;

/// Maps a ledger invariant violation on an internal path to the
/// internal-inconsistency wire code. Violations are structurally
/// impossible after the pre-checks; hitting one aborts the handler with
/// no further mutation.
fn ledger_guard(
    agent_id: &AgentId,
    result: Result<(), LedgerViolation>,
) -> Result<(), ExchangeError> {
    result.map_err(|violation| {
        error!(agent_id = %agent_id, %violation, "ledger invariant violated, aborting handler");
        ExchangeError::LedgerMissing {
            agent_id: agent_id.clone(),
        }
    })
}

impl Exchange {
    /// The award path shared by direct awards, negotiation acceptance,
    /// and the system control API.
    ///
    /// Locks the agreed price from the requester, computes and locks
    /// the worker stake, pays any agreed upfront, broadcasts, and arms
    /// the deadline. The caller has already validated status and
    /// authorization.
    ///
    /// # Errors
    ///
    /// `no_ledger_account`, `insufficient_credits`,
    /// `worker_no_ledger_account`, or `worker_insufficient_stake`.
    pub(crate) fn perform_award(
        self: &Arc<Self>,
        state: &mut ExchangeState,
        job_id: &JobId,
        worker_id: &AgentId,
    ) -> Result<(), ExchangeError> {
        let job = state.job(job_id)?;
        let requester_id = job.requester_id.clone();
        let budget = job.budget;
        let price = job.agreed_price();
        let upfront_pct = job
            .payload
            .accepted_terms
            .map_or(0.0, |terms| terms.upfront_pct);

        // Fail-fast balance checks; nothing below can violate them.
        let requester_spendable = state
            .ledger
            .get(&requester_id)
            .ok_or_else(|| ExchangeError::NoLedgerAccount {
                agent_id: requester_id.clone(),
            })?
            .spendable();
        if requester_spendable < price {
            return Err(ExchangeError::InsufficientCredits {
                needed: price,
                spendable: requester_spendable,
            });
        }

        let worker_score = state
            .reputation
            .get(worker_id)
            .copied()
            .unwrap_or_default()
            .score();
        let stake = compute_stake(budget, worker_score, self.stake_params);
        let worker_spendable = state
            .ledger
            .get(worker_id)
            .ok_or_else(|| ExchangeError::WorkerNoLedgerAccount {
                agent_id: worker_id.clone(),
            })?
            .spendable();
        if worker_spendable < stake {
            return Err(ExchangeError::WorkerInsufficientStake {
                needed: stake,
                spendable: worker_spendable,
            });
        }

        ledger_guard(&requester_id, state.account_mut(&requester_id)?.lock(price))?;
        ledger_guard(worker_id, state.account_mut(worker_id)?.lock(stake))?;

        {
            let job = state.job_mut(job_id)?;
            debug_assert!(job.status.can_transition_to(&JobStatus::Awarded));
            job.status = JobStatus::Awarded;
            job.worker_id = Some(worker_id.clone());
            job.awarded_at_ms = Some(now_ms());
            job.locked_budget = price;
            job.locked_stake = stake;
            job.paid_upfront = 0;
        }

        self.publish_ledger(state, &requester_id);
        self.publish_ledger(state, worker_id);
        self.broadcast_msg(&ServerMessage::JobAwarded {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            budget_locked: price,
        });
        self.add_evidence(
            state,
            job_id,
            "award",
            format!("awarded to {worker_id} for {price} (stake {stake})"),
            json!({
                "workerId": worker_id.as_str(),
                "price": price,
                "stake": stake,
            }),
        );

        // Agreed upfront transfers immediately and is non-refundable.
        let upfront = compute_upfront(price, upfront_pct);
        if upfront > 0 {
            ledger_guard(
                &requester_id,
                state.account_mut(&requester_id)?.pay_from_locked(upfront),
            )?;
            state.account_mut(worker_id)?.deposit(upfront);
            state.job_mut(job_id)?.paid_upfront = upfront;

            self.publish_ledger(state, &requester_id);
            self.publish_ledger(state, worker_id);
            self.add_evidence(
                state,
                job_id,
                "upfront",
                format!("paid {upfront} upfront to {worker_id}"),
                json!({ "workerId": worker_id.as_str(), "upfront": upfront }),
            );
        }

        let job = state.job(job_id)?.clone();
        self.persist_job("award", &job);
        self.arm_deadline_for(&job);
        info!(job_id = %job_id, worker_id = %worker_id, price, stake, upfront, "job awarded");
        Ok(())
    }

    /// Arms the contract deadline for an awarded job.
    pub(crate) fn arm_deadline_for(self: &Arc<Self>, job: &Job) {
        let Some(worker_id) = job.worker_id.clone() else {
            return;
        };
        let delay = Duration::from_secs_f64(job.timeout_seconds());
        let exchange = Arc::clone(self);
        let job_id = job.id.clone();
        let timer_job_id = job_id.clone();
        self.scheduler.arm(job_id, delay, async move {
            exchange.on_deadline(&timer_job_id, &worker_id);
        });
    }

    /// Deadline fire callback. Re-checks the contract before mutating:
    /// a submission or competing transition may have won the race.
    pub(crate) fn on_deadline(&self, job_id: &JobId, intended_worker: &AgentId) {
        let mut state = self.state_write();
        let Ok(job) = state.job(job_id) else {
            self.scheduler.disarm(job_id);
            return;
        };
        if job.status != JobStatus::Awarded || job.worker_id.as_ref() != Some(intended_worker) {
            debug!(job_id = %job_id, "deadline fired after a competing transition, no-op");
            self.scheduler.disarm(job_id);
            return;
        }

        info!(job_id = %job_id, worker_id = %intended_worker, "contract deadline expired");
        if let Err(error) = self.settle_failure(&mut state, job_id, "timeout") {
            error!(job_id = %job_id, %error, "timeout settlement failed");
            return;
        }
        if let Err(error) = self.reopen_job(&mut state, job_id) {
            error!(job_id = %job_id, %error, "reopen after timeout failed");
        }
    }

    /// Settlement success: pay the remainder, return the stake, credit
    /// the worker's reputation.
    ///
    /// # Errors
    ///
    /// `job_not_found` or `job_missing_worker`; internal violations map
    /// to `ledger_missing`.
    pub(crate) fn settle_success(
        &self,
        state: &mut ExchangeState,
        job_id: &JobId,
        via: &str,
    ) -> Result<(), ExchangeError> {
        let job = state.job(job_id)?;
        let worker_id = job.worker_id.clone().ok_or_else(|| ExchangeError::JobMissingWorker {
            job_id: job_id.clone(),
        })?;
        let requester_id = job.requester_id.clone();
        let locked_budget = job.locked_budget;
        let stake = job.locked_stake;
        let remainder = locked_budget.saturating_sub(job.paid_upfront);

        ledger_guard(
            &requester_id,
            state.account_mut(&requester_id)?.pay_from_locked(remainder),
        )?;
        state.account_mut(&worker_id)?.deposit(remainder);
        ledger_guard(&worker_id, state.account_mut(&worker_id)?.release(stake))?;
        state.reputation_mut(&worker_id).record_completed();

        {
            let job = state.job_mut(job_id)?;
            debug_assert!(job.status.can_transition_to(&JobStatus::Completed));
            job.status = JobStatus::Completed;
        }
        self.scheduler.disarm(job_id);

        let job = state.job(job_id)?.clone();
        self.persist_job("settlement", &job);
        self.publish_ledger(state, &requester_id);
        self.publish_ledger(state, &worker_id);
        self.publish_reputation(state, &worker_id);
        self.broadcast_msg(&ServerMessage::JobCompleted {
            job_id: job_id.clone(),
            worker_id: worker_id.clone(),
            paid: locked_budget,
        });
        self.add_evidence(
            state,
            job_id,
            "settlement",
            format!("completed via {via}, paid {locked_budget} to {worker_id}"),
            json!({
                "outcome": "completed",
                "via": via,
                "paid": locked_budget,
                "stakeReturned": stake,
            }),
        );
        info!(job_id = %job_id, worker_id = %worker_id, paid = locked_budget, "contract completed");
        Ok(())
    }

    /// Settlement failure: refund the outstanding remainder, slash the
    /// stake toward the requester, debit the worker's reputation. The
    /// upfront already paid stays with the worker.
    ///
    /// # Errors
    ///
    /// `job_not_found` or `job_missing_worker`; internal violations map
    /// to `ledger_missing`.
    pub(crate) fn settle_failure(
        &self,
        state: &mut ExchangeState,
        job_id: &JobId,
        reason: &str,
    ) -> Result<(), ExchangeError> {
        let job = state.job(job_id)?;
        let worker_id = job.worker_id.clone().ok_or_else(|| ExchangeError::JobMissingWorker {
            job_id: job_id.clone(),
        })?;
        let requester_id = job.requester_id.clone();
        let stake = job.locked_stake;
        let upfront_kept = job.paid_upfront;
        let refund = job.locked_budget.saturating_sub(upfront_kept);

        ledger_guard(&requester_id, state.account_mut(&requester_id)?.release(refund))?;

        let mut slash = 0;
        if stake > 0 {
            slash = compute_slash(stake, self.stake_params);
            {
                let worker_account = state.account_mut(&worker_id)?;
                ledger_guard(&worker_id, worker_account.release(stake))?;
                ledger_guard(&worker_id, worker_account.debit(slash))?;
            }
            state.account_mut(&requester_id)?.deposit(slash);
        }
        state.reputation_mut(&worker_id).record_failed();

        {
            let job = state.job_mut(job_id)?;
            debug_assert!(job.status.can_transition_to(&JobStatus::Failed));
            job.status = JobStatus::Failed;
            // The reservations are fully unwound; reopen must not
            // release them again.
            job.locked_budget = 0;
            job.locked_stake = 0;
        }
        self.scheduler.disarm(job_id);

        let job = state.job(job_id)?.clone();
        self.persist_job("settlement", &job);
        self.publish_ledger(state, &requester_id);
        self.publish_ledger(state, &worker_id);
        self.publish_reputation(state, &worker_id);
        self.broadcast_msg(&ServerMessage::JobFailed {
            job_id: job_id.clone(),
            reason: reason.to_string(),
        });
        self.add_evidence(
            state,
            job_id,
            "settlement",
            format!("failed ({reason}); refunded {refund}, slashed {slash}"),
            json!({
                "outcome": "failed",
                "reason": reason,
                "refund": refund,
                "slash": slash,
                "upfrontKept": upfront_kept,
            }),
        );
        info!(job_id = %job_id, worker_id = %worker_id, reason, refund, slash, "contract failed");
        Ok(())
    }

    /// Returns a job to the open book: cancels the timer, releases any
    /// outstanding reservations, clears the contract fields, and
    /// broadcasts a fresh snapshot. Terminal jobs are left untouched.
    ///
    /// # Errors
    ///
    /// `job_not_found`; internal violations map to `ledger_missing`.
    pub(crate) fn reopen_job(
        &self,
        state: &mut ExchangeState,
        job_id: &JobId,
    ) -> Result<(), ExchangeError> {
        let job = state.job(job_id)?;
        match job.status {
            JobStatus::Completed | JobStatus::Cancelled => {
                debug!(job_id = %job_id, status = %job.status, "reopen on terminal job, no-op");
                return Ok(());
            }
            JobStatus::Open => return Ok(()),
            JobStatus::Awarded | JobStatus::InReview | JobStatus::Failed => {}
        }
        let requester_id = job.requester_id.clone();
        let worker_id = job.worker_id.clone();
        let outstanding = job.locked_budget.saturating_sub(job.paid_upfront);
        let stake = job.locked_stake;

        self.scheduler.disarm(job_id);
        if outstanding > 0 {
            ledger_guard(
                &requester_id,
                state.account_mut(&requester_id)?.release(outstanding),
            )?;
        }
        if stake > 0 {
            if let Some(worker_id) = &worker_id {
                ledger_guard(worker_id, state.account_mut(worker_id)?.release(stake))?;
            }
        }

        {
            let job = state.job_mut(job_id)?;
            job.status = JobStatus::Open;
            job.worker_id = None;
            job.locked_budget = 0;
            job.locked_stake = 0;
            job.awarded_at_ms = None;
        }

        let job = state.job(job_id)?.clone();
        self.persist_job("reopen", &job);
        if outstanding > 0 {
            self.publish_ledger(state, &requester_id);
        }
        if stake > 0 {
            if let Some(worker_id) = &worker_id {
                self.publish_ledger(state, worker_id);
            }
        }
        self.broadcast_msg(&ServerMessage::JobUpdated { job });
        self.emit_tape(TapeEvent::JobReopened {
            job_id: job_id.clone(),
        });
        info!(job_id = %job_id, "job reopened");
        Ok(())
    }
}
