//! Message routing for authenticated sessions.
//!
//! Dispatch is by the envelope's `type` tag; the payload was already
//! validated against its closed schema by [`ClientMessage::parse`].
//! Handler failures surface as `error{message}` frames to the offending
//! session only; they never mutate state.

use std::sync::Arc;

use tracing::debug;

use synapse_core::{error_frame, AgentId, ClientMessage};

use crate::exchange::Exchange;
use crate::session::SessionId;

/// Routes one validated message from an authenticated session.
pub fn dispatch(
    exchange: &Arc<Exchange>,
    session_id: SessionId,
    agent_id: &AgentId,
    message: ClientMessage,
) {
    let result = match message {
        // The server loop resolves auth before routing; a repeated
        // `auth` is handled there as well.
        ClientMessage::Auth(_) => Ok(()),
        ClientMessage::PostJob(msg) => exchange.post_job(agent_id, msg).map(|_| ()),
        ClientMessage::Bid(msg) => exchange.place_bid(agent_id, msg).map(|_| ()),
        ClientMessage::Award(msg) => exchange.award_job(agent_id, &msg),
        ClientMessage::CounterOffer(msg) => exchange.counter_offer(agent_id, &msg),
        ClientMessage::WorkerCounter(msg) => exchange.worker_counter(agent_id, &msg),
        ClientMessage::OfferDecision(msg) => exchange.offer_decision(agent_id, &msg),
        ClientMessage::Submit(msg) => exchange.submit_work(agent_id, msg),
        ClientMessage::Review(msg) => exchange.review(agent_id, &msg),
    };

    if let Err(error) = result {
        debug!(session_id, agent_id = %agent_id, code = error.code(), %error, "operation rejected");
        exchange
            .sessions
            .send_to(session_id, &error_frame(&error).to_frame());
    }
}
