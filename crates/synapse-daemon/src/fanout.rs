//! Evidence append and event fanout.
//!
//! Everything observable leaves the exchange through here: broadcasts
//! to authed sessions, directed frames to one agent, tape events for
//! spectators, and the durable event mirror. Tape ordering follows
//! transition ordering because every emission happens inside the
//! handler that produced it.

use std::fmt::Display;

use serde_json::Value;
use tracing::warn;

use synapse_core::{now_ms, AgentId, EvidenceItem, Job, JobId, ServerMessage, TapeEvent};

use crate::exchange::Exchange;
use crate::state::ExchangeState;

impl Exchange {
    /// Emits one tape event: durable mirror first, then the broadcast
    /// channel. A failed mirror only logs; recursing into
    /// `report_db_error` from here would loop.
    pub(crate) fn emit_tape(&self, event: TapeEvent) {
        if let Some(store) = &self.store {
            match serde_json::to_value(&event) {
                Ok(payload) => {
                    if let Err(error) = store.append_event(event.kind(), &payload) {
                        warn!(kind = event.kind(), %error, "event mirror write failed");
                    }
                }
                Err(error) => {
                    warn!(kind = event.kind(), %error, "event serialization failed");
                }
            }
        }
        // No receivers is fine; spectators come and go.
        let _ = self.tape.send(event);
    }

    /// Records a write-through failure: in-memory state stays
    /// authoritative and the next idempotent write reconciles.
    pub(crate) fn report_db_error(&self, op: &str, error: &impl Display) {
        warn!(op, %error, "write-through failed, in-memory state stays authoritative");
        self.emit_tape(TapeEvent::DbError { op: op.to_string() });
    }

    /// Sends a frame to every authed session and mirrors it on the
    /// tape.
    pub(crate) fn broadcast_msg(&self, msg: &ServerMessage) {
        self.sessions.broadcast(&msg.to_frame());
        self.emit_tape(TapeEvent::Broadcast {
            message: msg.to_value(),
        });
    }

    /// Sends a frame to one agent's sessions and mirrors it on the
    /// tape.
    pub(crate) fn send_directed(&self, agent_id: &AgentId, msg: &ServerMessage) {
        self.sessions.send_to_agent(agent_id, &msg.to_frame());
        self.emit_tape(TapeEvent::Broadcast {
            message: msg.to_value(),
        });
    }

    /// Pushes the agent's balances to its live sessions, mirrors the
    /// tape event, and writes the ledger row through.
    pub(crate) fn publish_ledger(&self, state: &ExchangeState, agent_id: &AgentId) {
        let Some(account) = state.ledger.get(agent_id) else {
            return;
        };
        let msg = ServerMessage::LedgerUpdate {
            credits: account.credits,
            locked: account.locked,
        };
        self.sessions.send_to_agent(agent_id, &msg.to_frame());
        self.emit_tape(TapeEvent::LedgerUpdate {
            agent_id: agent_id.clone(),
            credits: account.credits,
            locked: account.locked,
        });
        if let Some(store) = &self.store {
            if let Err(error) = store.upsert_ledger(agent_id, account) {
                self.report_db_error("ledger", &error);
            }
        }
    }

    /// Mirrors a reputation change on the tape and writes it through.
    pub(crate) fn publish_reputation(&self, state: &ExchangeState, agent_id: &AgentId) {
        let Some(rep) = state.reputation.get(agent_id) else {
            return;
        };
        self.emit_tape(TapeEvent::RepUpdate {
            agent_id: agent_id.clone(),
            completed: rep.completed,
            failed: rep.failed,
            score: rep.score(),
        });
        if let Some(store) = &self.store {
            if let Err(error) = store.upsert_reputation(agent_id, rep) {
                self.report_db_error("reputation", &error);
            }
        }
    }

    /// Appends evidence to the ring, writes it through, and mirrors it
    /// on the tape.
    pub(crate) fn add_evidence(
        &self,
        state: &mut ExchangeState,
        job_id: &JobId,
        kind: &str,
        detail: String,
        payload: Value,
    ) {
        let item = EvidenceItem::new(job_id.clone(), kind, detail, payload, now_ms());
        state.evidence.push(item.clone());
        if let Some(store) = &self.store {
            if let Err(error) = store.insert_evidence(&item) {
                self.report_db_error("evidence", &error);
            }
        }
        self.emit_tape(TapeEvent::Evidence { item });
    }

    /// Writes the canonical job row through.
    pub(crate) fn persist_job(&self, op: &str, job: &Job) {
        if let Some(store) = &self.store {
            if let Err(error) = store.upsert_job(job) {
                self.report_db_error(op, &error);
            }
        }
    }
}
