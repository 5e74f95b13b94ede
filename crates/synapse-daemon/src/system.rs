//! System control API.
//!
//! In-process entry point for ingress adapters (GitHub ingress, demo
//! endpoints). Every call shares the state machine, ledger invariants,
//! and event fanout with the client wire paths; the only difference is
//! that session authentication is bypassed and synthetic identities are
//! allowed.

use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use synapse_core::{now_ms, AgentId, ExchangeError, JobId, JobPayload, JobStatus, LedgerAccount, Submission};

use crate::exchange::Exchange;
use crate::state::AgentRecord;

impl Exchange {
    /// Idempotently creates an identity with a chosen starting grant
    /// (0 is valid for synthetic identities). Returns the account's
    /// credits.
    pub fn system_ensure_account(
        &self,
        agent_id: &AgentId,
        agent_name: &str,
        public_key: Option<String>,
        starting_credits: Option<u64>,
    ) -> u64 {
        let mut state = self.state_write();
        if !state.agents.contains_key(agent_id) {
            state.agents.insert(
                agent_id.clone(),
                AgentRecord {
                    id: agent_id.clone(),
                    name: agent_name.to_string(),
                    public_key,
                    created_at_ms: now_ms(),
                },
            );
            if let Some(store) = &self.store {
                if let Some(agent) = state.agents.get(agent_id) {
                    if let Err(error) = store.insert_agent(agent) {
                        self.report_db_error("ensure_account", &error);
                    }
                }
            }
        }

        let created = !state.ledger.contains_key(agent_id);
        if created {
            let grant = starting_credits.unwrap_or(self.config.start_credits);
            state
                .ledger
                .insert(agent_id.clone(), LedgerAccount::with_credits(grant));
            state.reputation.entry(agent_id.clone()).or_default();
            self.publish_ledger(&state, agent_id);
            self.publish_reputation(&state, agent_id);
            info!(agent_id = %agent_id, grant, "system account created");
        }

        state
            .ledger
            .get(agent_id)
            .map(|account| account.credits)
            .unwrap_or_default()
    }

    /// Creates a job on behalf of `requester`, same rules as
    /// `post_job`.
    ///
    /// # Errors
    ///
    /// `invalid_message` for a non-positive budget or empty title,
    /// `no_ledger_account`, or `insufficient_credits`.
    pub fn system_create_job(
        &self,
        requester: &AgentId,
        title: &str,
        description: Option<String>,
        budget: u64,
        kind: &str,
        payload: Option<JobPayload>,
    ) -> Result<JobId, ExchangeError> {
        if title.trim().is_empty() {
            return Err(ExchangeError::InvalidMessage {
                reason: "title must be non-empty".into(),
            });
        }
        if budget == 0 {
            return Err(ExchangeError::InvalidMessage {
                reason: "budget must be positive".into(),
            });
        }
        let mut state = self.state_write();
        let job = self.create_job_in(
            &mut state,
            requester,
            title.to_string(),
            description,
            budget,
            Some(kind.to_string()),
            payload,
        )?;
        Ok(job.id)
    }

    /// Direct award without a negotiation. Unlike the wire path, no bid
    /// is required: ingress adapters award to identities they manage.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_open`, or any award-path failure.
    pub fn system_award_job(
        self: &Arc<Self>,
        job_id: &JobId,
        worker_id: &AgentId,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(job_id)?;
        if job.status != JobStatus::Open {
            return Err(ExchangeError::JobNotOpen {
                job_id: job_id.clone(),
            });
        }
        self.perform_award(&mut state, job_id, worker_id)
    }

    /// Settlement success from `awarded` or `in_review`.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_awarded` for any other status, or
    /// `not_assigned_worker` on a worker mismatch.
    pub fn system_complete_job(
        &self,
        job_id: &JobId,
        worker_id: &AgentId,
        result: Option<String>,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(job_id)?;
        if !matches!(job.status, JobStatus::Awarded | JobStatus::InReview) {
            return Err(ExchangeError::JobNotAwarded {
                job_id: job_id.clone(),
            });
        }
        if job.worker_id.as_ref() != Some(worker_id) {
            return Err(ExchangeError::NotAssignedWorker {
                job_id: job_id.clone(),
            });
        }
        if let Some(result) = result {
            let job = state.job_mut(job_id)?;
            job.payload.last_submission = Some(Submission {
                at_ms: now_ms(),
                by: worker_id.clone(),
                result,
            });
        }
        self.settle_success(&mut state, job_id, "system")
    }

    /// Settlement failure from `awarded` or `in_review`.
    ///
    /// # Errors
    ///
    /// `job_not_found`, `job_not_awarded` for any other status, or
    /// `not_assigned_worker` on a worker mismatch.
    pub fn system_fail_job(
        &self,
        job_id: &JobId,
        worker_id: &AgentId,
        reason: &str,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        let job = state.job(job_id)?;
        if !matches!(job.status, JobStatus::Awarded | JobStatus::InReview) {
            return Err(ExchangeError::JobNotAwarded {
                job_id: job_id.clone(),
            });
        }
        if job.worker_id.as_ref() != Some(worker_id) {
            return Err(ExchangeError::NotAssignedWorker {
                job_id: job_id.clone(),
            });
        }
        self.settle_failure(&mut state, job_id, reason)
    }

    /// Returns a job to the open book. See the reopen semantics on the
    /// settlement path.
    ///
    /// # Errors
    ///
    /// `job_not_found`.
    pub fn system_reopen_job(&self, job_id: &JobId) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        self.reopen_job(&mut state, job_id)
    }

    /// Attaches an evidence item to a job.
    ///
    /// # Errors
    ///
    /// `job_not_found`.
    pub fn system_add_evidence(
        &self,
        job_id: &JobId,
        kind: &str,
        detail: &str,
        payload: Option<Value>,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state_write();
        state.job(job_id)?;
        self.add_evidence(
            &mut state,
            job_id,
            kind,
            detail.to_string(),
            payload.unwrap_or(Value::Null),
        );
        Ok(())
    }

    /// Links a GitHub issue to a job (persisted when the store is
    /// enabled, in-memory otherwise).
    pub fn system_link_issue(&self, owner: &str, repo: &str, number: u64, job_id: &JobId) {
        self.links.link_issue(owner, repo, number, job_id.clone());
        if let Some(store) = &self.store {
            if let Err(error) = store.link_issue(owner, repo, number, job_id) {
                self.report_db_error("link_issue", &error);
            }
        }
    }

    /// Links a GitHub PR to a job.
    pub fn system_link_pr(&self, owner: &str, repo: &str, number: u64, job_id: &JobId) {
        self.links.link_pr(owner, repo, number, job_id.clone());
        if let Some(store) = &self.store {
            if let Err(error) = store.link_pr(owner, repo, number, job_id) {
                self.report_db_error("link_pr", &error);
            }
        }
    }

    /// Resolves a GitHub issue link, preferring the durable mapping.
    #[must_use]
    pub fn system_job_id_by_issue(&self, owner: &str, repo: &str, number: u64) -> Option<JobId> {
        if let Some(store) = &self.store {
            match store.job_by_issue(owner, repo, number) {
                Ok(Some(job_id)) => return Some(job_id),
                Ok(None) => {}
                Err(error) => self.report_db_error("job_by_issue", &error),
            }
        }
        self.links.job_by_issue(owner, repo, number)
    }

    /// Resolves a GitHub PR link, preferring the durable mapping.
    #[must_use]
    pub fn system_job_id_by_pr(&self, owner: &str, repo: &str, number: u64) -> Option<JobId> {
        if let Some(store) = &self.store {
            match store.job_by_pr(owner, repo, number) {
                Ok(Some(job_id)) => return Some(job_id),
                Ok(None) => {}
                Err(error) => self.report_db_error("job_by_pr", &error),
            }
        }
        self.links.job_by_pr(owner, repo, number)
    }

    /// Seeds a one-shot deadline-miss scenario: two synthetic accounts,
    /// a one-second contract, and an immediate award. The timer does
    /// the rest.
    ///
    /// # Errors
    ///
    /// Any job-creation or award-path failure.
    pub fn demo_timeout(self: &Arc<Self>) -> Result<JobId, ExchangeError> {
        let requester = AgentId::from_string("agent_demo_requester");
        let worker = AgentId::from_string("agent_demo_worker");
        self.system_ensure_account(&requester, "demo-requester", None, None);
        self.system_ensure_account(&worker, "demo-worker", None, None);

        let payload = JobPayload {
            timeout_seconds: Some(1.0),
            ..JobPayload::default()
        };
        let job_id = self.system_create_job(
            &requester,
            "Deadline demo",
            Some("seeded by the demo endpoint; nobody will submit".into()),
            20,
            "simple",
            Some(payload),
        )?;
        self.system_award_job(&job_id, &worker)?;
        info!(job_id = %job_id, "seeded demo timeout scenario");
        Ok(job_id)
    }
}
