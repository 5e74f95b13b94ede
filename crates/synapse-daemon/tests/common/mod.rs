//! Shared helpers for the integration suites.

// Each integration binary links this module and uses a subset of it.
#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde_json::Value;
use tokio::sync::broadcast;

use synapse_core::wire::{AuthMsg, BidMsg, PostJobMsg};
use synapse_core::{
    auth_canonical_string, AgentId, ExchangeConfig, JobId, JobPayload, TapeEvent, Terms,
    PROTOCOL_VERSION,
};
use synapse_daemon::evaluator::KeywordEvaluator;
use synapse_daemon::persistence::Store;
use synapse_daemon::Exchange;

/// Fixed 12-byte SPKI header for an Ed25519 public key.
pub const SPKI_HEADER: [u8; 12] = [
    0x30, 0x2a, 0x30, 0x05, 0x06, 0x03, 0x2b, 0x65, 0x70, 0x03, 0x21, 0x00,
];

/// Builds an exchange with default configuration and no store.
pub fn exchange() -> Arc<Exchange> {
    exchange_with(ExchangeConfig::default(), None)
}

/// Builds an exchange with explicit configuration and an optional
/// store.
pub fn exchange_with(config: ExchangeConfig, store: Option<Arc<dyn Store>>) -> Arc<Exchange> {
    Exchange::new(config, store, Box::new(KeywordEvaluator))
}

/// Creates an agent with the default starting grant and returns its id.
pub fn agent(exchange: &Exchange, name: &str) -> AgentId {
    let id = AgentId::from_string(format!("agent_{name}"));
    exchange.system_ensure_account(&id, name, None, None);
    id
}

/// Posts a job and returns it.
pub fn post_job(exchange: &Exchange, requester: &AgentId, budget: u64) -> JobId {
    post_job_with(exchange, requester, budget, None)
}

/// Posts a job with a payload and returns its id.
pub fn post_job_with(
    exchange: &Exchange,
    requester: &AgentId,
    budget: u64,
    payload: Option<JobPayload>,
) -> JobId {
    exchange
        .post_job(
            requester,
            PostJobMsg {
                title: "t".into(),
                description: None,
                budget,
                kind: None,
                payload,
            },
        )
        .expect("post job")
        .id
}

/// Places a bid and returns nothing of interest.
pub fn place_bid(
    exchange: &Exchange,
    bidder: &AgentId,
    job_id: &JobId,
    price: u64,
    terms: Option<Terms>,
) {
    exchange
        .place_bid(
            bidder,
            BidMsg {
                job_id: job_id.clone(),
                price,
                eta_seconds: 2,
                pitch: None,
                terms,
            },
        )
        .expect("place bid");
}

/// Drains everything currently buffered on a tape receiver.
pub fn drain_tape(tape: &mut broadcast::Receiver<TapeEvent>) -> Vec<TapeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = tape.try_recv() {
        events.push(event);
    }
    events
}

/// Extracts the broadcast frames of one wire `type` from drained tape
/// events.
pub fn broadcasts_of(events: &[TapeEvent], ty: &str) -> Vec<Value> {
    events
        .iter()
        .filter_map(|event| match event {
            TapeEvent::Broadcast { message } if message["type"] == ty => Some(message.clone()),
            _ => None,
        })
        .collect()
}

/// A signing identity for auth-path tests.
pub struct TestKey {
    signing: SigningKey,
    /// Base64 SPKI DER public key as the client would supply it.
    pub public_key_b64: String,
}

impl TestKey {
    /// Generates a fresh Ed25519 identity.
    pub fn generate() -> Self {
        let signing = SigningKey::generate(&mut OsRng);
        let mut der = SPKI_HEADER.to_vec();
        der.extend_from_slice(signing.verifying_key().as_bytes());
        Self {
            public_key_b64: BASE64.encode(der),
            signing,
        }
    }

    /// Builds a valid `auth` payload for a challenge nonce.
    pub fn auth_msg(&self, agent_name: &str, nonce: &str) -> AuthMsg {
        let canonical = auth_canonical_string(
            PROTOCOL_VERSION,
            nonce,
            agent_name,
            &self.public_key_b64,
        );
        let signature = BASE64.encode(self.signing.sign(canonical.as_bytes()).to_bytes());
        AuthMsg {
            agent_name: agent_name.to_string(),
            public_key: self.public_key_b64.clone(),
            nonce: nonce.to_string(),
            signature,
        }
    }
}
