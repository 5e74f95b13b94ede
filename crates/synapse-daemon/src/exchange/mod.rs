//! The exchange: the authoritative state machine over the market graph.
//!
//! Every handler executes atomically from its first read to its last
//! write: all mutations happen under one process-wide write lock, with
//! no suspension points inside the critical section. Persistence is
//! issued write-through after the in-memory effect; broadcasts follow
//! the transition that produced them.

pub mod negotiation;
pub mod settlement;

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::info;

use synapse_core::wire::{AuthMsg, AwardMsg, BidMsg, PostJobMsg, ReviewMsg, SubmitMsg};
use synapse_core::{
    agent_id_from_public_key, auth_canonical_string, now_ms, verify_auth_signature, AgentId,
    AutoVerify, Bid, BidId, ExchangeConfig, ExchangeError, Job, JobId, JobPayload, JobStatus,
    LedgerAccount, RepSnapshot, ServerMessage, StakeParams, Submission, TapeEvent,
    PROTOCOL_VERSION,
};

use crate::evaluator::Evaluator;
use crate::github::GithubLinks;
use crate::persistence::{Snapshot, SnapshotAgent, Store};
use crate::scheduler::DeadlineScheduler;
use crate::session::{SessionId, SessionRegistry};
use crate::state::{AgentRecord, ExchangeState};

/// Tape channel capacity; a lagging observer skips, it never blocks the
/// exchange.
const TAPE_CHANNEL_CAPACITY: usize = 1024;

/// The clearing house service.
pub struct Exchange {
    pub(crate) config: ExchangeConfig,
    pub(crate) stake_params: StakeParams,
    pub(crate) state: RwLock<ExchangeState>,
    /// Live session registry for directed sends and broadcasts.
    pub sessions: SessionRegistry,
    pub(crate) tape: broadcast::Sender<TapeEvent>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) scheduler: DeadlineScheduler,
    pub(crate) evaluator: Box<dyn Evaluator>,
    pub(crate) links: GithubLinks,
}

impl Exchange {
    /// Builds the exchange with its collaborators.
    #[must_use]
    pub fn new(
        config: ExchangeConfig,
        store: Option<Arc<dyn Store>>,
        evaluator: Box<dyn Evaluator>,
    ) -> Arc<Self> {
        let (tape, _) = broadcast::channel(TAPE_CHANNEL_CAPACITY);
        let stake_params = StakeParams {
            stake_pct: config.worker_stake_pct,
            slash_pct: config.worker_slash_pct,
        };
        Arc::new(Self {
            config,
            stake_params,
            state: RwLock::new(ExchangeState::new()),
            sessions: SessionRegistry::new(),
            tape,
            store,
            scheduler: DeadlineScheduler::new(),
            evaluator,
            links: GithubLinks::new(),
        })
    }

    /// The startup configuration record.
    #[must_use]
    pub fn config(&self) -> &ExchangeConfig {
        &self.config
    }

    /// Subscribes to the tape stream.
    #[must_use]
    pub fn subscribe_tape(&self) -> broadcast::Receiver<TapeEvent> {
        self.tape.subscribe()
    }

    // Lock poisoning indicates a panic in another handler. Handlers
    // fail before they write (client errors) or guard every internal
    // mutation, so the graph a recovered guard exposes is consistent.
    pub(crate) fn state_read(&self) -> RwLockReadGuard<'_, ExchangeState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state_write(&self) -> RwLockWriteGuard<'_, ExchangeState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------
    // Authentication
    // -----------------------------------------------------------------

    /// Verifies an `auth` reply against the session's challenge nonce
    /// and binds the derived identity to the session.
    ///
    /// New identities receive the configured starting credit grant. The
    /// identity, ledger, and reputation rows are persisted as one
    /// attempt; a write-through failure rolls back everything this call
    /// created and fails `db_error_auth` so the client may retry.
    ///
    /// # Errors
    ///
    /// `bad_agent_name`, `bad_nonce`, `signature_verification_failed`,
    /// or `db_error_auth`.
    pub fn authenticate(
        &self,
        session_id: SessionId,
        msg: &AuthMsg,
        challenge_nonce: &str,
    ) -> Result<ServerMessage, ExchangeError> {
        if msg.agent_name.trim().is_empty() {
            return Err(ExchangeError::BadAgentName);
        }
        if msg.nonce != challenge_nonce {
            return Err(ExchangeError::BadNonce);
        }
        let canonical = auth_canonical_string(
            PROTOCOL_VERSION,
            &msg.nonce,
            &msg.agent_name,
            &msg.public_key,
        );
        if !verify_auth_signature(&msg.public_key, &msg.signature, &canonical) {
            return Err(ExchangeError::SignatureVerificationFailed);
        }

        let agent_id = agent_id_from_public_key(&msg.public_key);
        let mut state = self.state_write();

        let created_agent = !state.agents.contains_key(&agent_id);
        if created_agent {
            state.agents.insert(
                agent_id.clone(),
                AgentRecord {
                    id: agent_id.clone(),
                    name: msg.agent_name.clone(),
                    public_key: Some(msg.public_key.clone()),
                    created_at_ms: now_ms(),
                },
            );
        }
        let created_ledger = !state.ledger.contains_key(&agent_id);
        if created_ledger {
            state.ledger.insert(
                agent_id.clone(),
                LedgerAccount::with_credits(self.config.start_credits),
            );
        }
        let created_rep = !state.reputation.contains_key(&agent_id);
        state.reputation.entry(agent_id.clone()).or_default();

        if let Err(error) = self.persist_identity(&state, &agent_id) {
            tracing::warn!(agent_id = %agent_id, %error, "auth persistence failed, rolling back");
            if created_agent {
                state.agents.remove(&agent_id);
            }
            if created_ledger {
                state.ledger.remove(&agent_id);
            }
            if created_rep {
                state.reputation.remove(&agent_id);
            }
            return Err(ExchangeError::DbErrorAuth);
        }

        let credits = state
            .ledger
            .get(&agent_id)
            .map(|account| account.credits)
            .unwrap_or_default();

        self.sessions.bind_agent(session_id, agent_id.clone());
        self.emit_tape(TapeEvent::AgentAuthed {
            agent_id: agent_id.clone(),
            agent_name: msg.agent_name.clone(),
            credits,
        });
        info!(agent_id = %agent_id, agent_name = %msg.agent_name, "agent authenticated");

        Ok(ServerMessage::Authed { agent_id, credits })
    }

    fn persist_identity(
        &self,
        state: &ExchangeState,
        agent_id: &AgentId,
    ) -> Result<(), crate::persistence::StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        if let Some(agent) = state.agents.get(agent_id) {
            store.insert_agent(agent)?;
        }
        if let Some(account) = state.ledger.get(agent_id) {
            store.upsert_ledger(agent_id, account)?;
        }
        if let Some(rep) = state.reputation.get(agent_id) {
            store.upsert_reputation(agent_id, rep)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Posting and bidding
    // -----------------------------------------------------------------

    /// Posts a job on behalf of `requester`.
    ///
    /// # Errors
    ///
    /// `no_ledger_account` or `insufficient_credits`.
    pub fn post_job(&self, requester: &AgentId, msg: PostJobMsg) -> Result<Job, ExchangeError> {
        let mut state = self.state_write();
        self.create_job_in(
            &mut state,
            requester,
            msg.title,
            msg.description,
            msg.budget,
            msg.kind,
            msg.payload,
        )
    }

    /// Shared job-creation path for `post_job` and the system control
    /// API. The caller holds the write lock.
    pub(crate) fn create_job_in(
        &self,
        state: &mut ExchangeState,
        requester: &AgentId,
        title: String,
        description: Option<String>,
        budget: u64,
        kind: Option<String>,
        payload: Option<JobPayload>,
    ) -> Result<Job, ExchangeError> {
        let account = state.account(requester)?;
        let spendable = account.spendable();
        if spendable < budget {
            return Err(ExchangeError::InsufficientCredits {
                needed: budget,
                spendable,
            });
        }

        let job = Job::new(
            JobId::generate(),
            title,
            description,
            budget,
            requester.clone(),
            kind.unwrap_or_else(|| synapse_core::job::DEFAULT_JOB_KIND.to_string()),
            payload.unwrap_or_default(),
            now_ms(),
        );
        state.jobs.insert(job.id.clone(), job.clone());
        self.persist_job("post_job", &job);
        self.broadcast_msg(&ServerMessage::JobPosted { job: job.clone() });
        info!(job_id = %job.id, requester = %requester, budget, "job posted");
        Ok(job)
    }

    /// Records a bid on an open job.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, or `bid_over_budget`.
    pub fn place_bid(&self, bidder: &AgentId, msg: BidMsg) -> Result<Bid, ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: msg.job_id.clone(),
            });
        }
        if msg.price > job.budget {
            return Err(ExchangeError::BidOverBudget {
                price: msg.price,
                budget: job.budget,
            });
        }

        let rep = RepSnapshot::from(state.reputation.get(bidder).copied().unwrap_or_default());
        let bid = Bid {
            id: BidId::generate(),
            job_id: msg.job_id,
            bidder_id: bidder.clone(),
            price: msg.price,
            eta_seconds: msg.eta_seconds,
            created_at_ms: now_ms(),
            pitch: msg.pitch,
            terms: msg.terms,
            rep,
        };
        state.insert_bid(bid.clone());
        if let Some(store) = &self.store {
            if let Err(error) = store.insert_bid(&bid) {
                self.report_db_error("bid", &error);
            }
        }
        self.broadcast_msg(&ServerMessage::BidPosted { bid: bid.clone() });
        Ok(bid)
    }

    // -----------------------------------------------------------------
    // Award, submission, review
    // -----------------------------------------------------------------

    /// Direct award by the requester while the job is open.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, `not_job_owner`,
    /// `worker_has_no_bid`, or any escrow failure from the award path.
    pub fn award_job(
        self: &Arc<Self>,
        caller: &AgentId,
        msg: &AwardMsg,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: msg.job_id.clone(),
            });
        }
        if &job.requester_id != caller {
            return Err(ExchangeError::NotJobOwner {
                job_id: msg.job_id.clone(),
            });
        }
        if !state.has_bid(&msg.job_id, &msg.worker_id) {
            return Err(ExchangeError::WorkerHasNoBid {
                agent_id: msg.worker_id.clone(),
                job_id: msg.job_id.clone(),
            });
        }
        self.perform_award(&mut state, &msg.job_id, &msg.worker_id)
    }

    /// Work submission by the assigned worker.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_awarded`, or `not_assigned_worker`.
    pub fn submit_work(&self, worker: &AgentId, msg: SubmitMsg) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job_mut(&msg.job_id)?;
        if job.status != JobStatus::Awarded {
            return Err(ExchangeError::JobNotAwarded {
                job_id: msg.job_id.clone(),
            });
        }
        if job.worker_id.as_ref() != Some(worker) {
            return Err(ExchangeError::NotAssignedWorker {
                job_id: msg.job_id.clone(),
            });
        }

        self.scheduler.disarm(&msg.job_id);
        job.status = JobStatus::InReview;
        job.payload.last_submission = Some(Submission {
            at_ms: now_ms(),
            by: worker.clone(),
            result: msg.result.clone(),
        });
        let job_kind = job.kind.clone();
        let job_snapshot = job.clone();

        self.persist_job("submit", &job_snapshot);
        self.broadcast_msg(&ServerMessage::JobSubmitted {
            job_id: msg.job_id.clone(),
            worker_id: worker.clone(),
            bytes: msg.result.len() as u64,
            preview: ServerMessage::submission_preview(&msg.result),
        });
        self.add_evidence(
            &mut state,
            &msg.job_id,
            "submit",
            format!("worker {worker} submitted {} bytes", msg.result.len()),
            serde_json::json!({
                "workerId": worker.as_str(),
                "bytes": msg.result.len(),
            }),
        );

        // Advisory auto-verification; settlement still waits for review.
        if job_kind == "coding" {
            let outcome = self.evaluator.evaluate(&job_snapshot, &msg.result);
            let verdict = AutoVerify {
                ok: outcome.ok,
                reason: outcome.reason.clone(),
            };
            let payload = serde_json::to_value(&verdict).unwrap_or_default();
            if let Ok(job) = state.job_mut(&msg.job_id) {
                job.payload.auto_verify = Some(verdict);
                let job = job.clone();
                self.persist_job("auto_verify", &job);
            }
            self.add_evidence(
                &mut state,
                &msg.job_id,
                "auto_verify",
                if outcome.ok {
                    "auto-verify passed".to_string()
                } else {
                    format!(
                        "auto-verify failed: {}",
                        outcome.reason.as_deref().unwrap_or("unspecified")
                    )
                },
                payload,
            );
        }
        Ok(())
    }

    /// Requester review of a submission.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_in_review`, `not_job_owner`, or
    /// `job_missing_worker`.
    pub fn review(self: &Arc<Self>, caller: &AgentId, msg: &ReviewMsg) -> Result<(), ExchangeError> {
        use synapse_core::wire::ReviewDecision;

        let mut state = self.state_write();
        let job = state.job(&msg.job_id)?;
        if job.status != JobStatus::InReview {
            return Err(ExchangeError::JobNotInReview {
                job_id: msg.job_id.clone(),
            });
        }
        if &job.requester_id != caller {
            return Err(ExchangeError::NotJobOwner {
                job_id: msg.job_id.clone(),
            });
        }
        if job.worker_id.is_none() {
            return Err(ExchangeError::JobMissingWorker {
                job_id: msg.job_id.clone(),
            });
        }

        self.broadcast_msg(&ServerMessage::JobReviewed {
            job_id: msg.job_id.clone(),
            decision: msg.decision,
            notes: msg.notes.clone(),
        });
        self.add_evidence(
            &mut state,
            &msg.job_id,
            "review",
            format!("requester decided {}", msg.decision.as_str()),
            serde_json::json!({
                "decision": msg.decision.as_str(),
                "notes": msg.notes,
            }),
        );

        match msg.decision {
            ReviewDecision::Accept => self.settle_success(&mut state, &msg.job_id, "review_accept"),
            ReviewDecision::Reject => {
                self.settle_failure(&mut state, &msg.job_id, "rejected")?;
                // The market continues: a rejected job goes straight
                // back on the book.
                self.reopen_job(&mut state, &msg.job_id)
            }
            ReviewDecision::Changes => {
                let job = state.job_mut(&msg.job_id)?;
                job.status = JobStatus::Awarded;
                let job = job.clone();
                self.persist_job("review_changes", &job);
                self.add_evidence(
                    &mut state,
                    &msg.job_id,
                    "changes",
                    "requester asked for changes, deadline re-armed".to_string(),
                    serde_json::json!({ "notes": msg.notes }),
                );
                self.arm_deadline_for(&job);
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// The agent's ledger account, if one exists.
    #[must_use]
    pub fn account_of(&self, agent_id: &AgentId) -> Option<LedgerAccount> {
        self.state_read().ledger.get(agent_id).copied()
    }

    /// The agent's reputation, if one exists.
    #[must_use]
    pub fn reputation_of(&self, agent_id: &AgentId) -> Option<synapse_core::Reputation> {
        self.state_read().reputation.get(agent_id).copied()
    }

    /// A point-in-time copy of a job.
    #[must_use]
    pub fn job_of(&self, job_id: &JobId) -> Option<Job> {
        self.state_read().jobs.get(job_id).cloned()
    }

    /// Most-recent-first copy of the evidence ring.
    #[must_use]
    pub fn evidence_of(&self, job_id: &JobId) -> Vec<synapse_core::EvidenceItem> {
        self.state_read()
            .evidence
            .iter()
            .filter(|item| &item.job_id == job_id)
            .cloned()
            .collect()
    }

    /// Whether a deadline timer is currently armed for the job.
    #[must_use]
    pub fn deadline_armed(&self, job_id: &JobId) -> bool {
        self.scheduler.is_armed(job_id)
    }

    /// Sum of all credits across accounts (conservation checks).
    #[must_use]
    pub fn total_credits(&self) -> u64 {
        self.state_read()
            .ledger
            .values()
            .map(|account| account.credits)
            .sum()
    }

    // -----------------------------------------------------------------
    // Snapshot
    // -----------------------------------------------------------------

    /// Observer snapshot: from the store when persistence is enabled,
    /// from the in-memory projection otherwise.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        if let Some(store) = &self.store {
            match store.snapshot() {
                Ok(snapshot) => return snapshot,
                Err(error) => {
                    tracing::warn!(%error, "store snapshot failed, serving in-memory projection");
                }
            }
        }
        self.memory_snapshot()
    }

    fn memory_snapshot(&self) -> Snapshot {
        let state = self.state_read();
        let mut agents: Vec<SnapshotAgent> = state
            .agents
            .values()
            .map(|agent| {
                let account = state.ledger.get(&agent.id).copied().unwrap_or_default();
                let rep = state.reputation.get(&agent.id).copied().unwrap_or_default();
                SnapshotAgent {
                    id: agent.id.clone(),
                    name: agent.name.clone(),
                    credits: account.credits,
                    locked: account.locked,
                    completed: rep.completed,
                    failed: rep.failed,
                    score: rep.score(),
                }
            })
            .collect();
        agents.sort_by(|a, b| a.id.cmp(&b.id));

        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));

        let mut bids: Vec<Bid> = state.bids.values().cloned().collect();
        bids.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));

        Snapshot {
            agents,
            jobs,
            bids,
            evidence: state.evidence.snapshot(),
        }
    }
}
