//! Exchange WebSocket server.
//!
//! Each connection gets a session, an immediate `challenge`, and a
//! serialized read loop: one frame is fully handled before the next is
//! read, which gives per-connection arrival ordering for free. Outbound
//! frames go through an unbounded channel to a writer task so handlers
//! never block on a slow socket.
//!
//! A connection that has not completed the auth handshake within the
//! deadline is closed; half-authed sessions are never retained.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use synapse_core::config::AUTH_HANDSHAKE_TIMEOUT_SECONDS;
use synapse_core::identity::generate_nonce;
use synapse_core::{error_frame, now_ms, ClientMessage, ExchangeError, ServerMessage};

use crate::exchange::Exchange;
use crate::protocol::dispatch;
use crate::session::SessionId;

/// Builds the exchange router: `GET /ws` upgrades to the agent
/// protocol channel.
pub fn router(exchange: Arc<Exchange>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .with_state(exchange)
}

async fn ws_handler(
    State(exchange): State<Arc<Exchange>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(exchange, socket))
}

/// Runs one connection to completion.
async fn handle_connection(exchange: Arc<Exchange>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let session_id = exchange.sessions.register(tx);
    debug!(session_id, "connection opened");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    let nonce = generate_nonce();
    exchange.sessions.send_to(
        session_id,
        &ServerMessage::Challenge {
            nonce: nonce.clone(),
            server_time_ms: now_ms(),
        }
        .to_frame(),
    );

    let auth_deadline =
        tokio::time::Instant::now() + Duration::from_secs(AUTH_HANDSHAKE_TIMEOUT_SECONDS);
    loop {
        let authed = exchange.sessions.agent_of(session_id).is_some();
        let next = if authed {
            stream.next().await
        } else {
            match tokio::time::timeout_at(auth_deadline, stream.next()).await {
                Ok(next) => next,
                Err(_) => {
                    info!(session_id, "auth handshake timed out, closing");
                    break;
                }
            }
        };
        let Some(Ok(message)) = next else {
            break;
        };
        match message {
            Message::Text(text) => handle_frame(&exchange, session_id, &nonce, &text),
            Message::Binary(_) => {
                let error = ExchangeError::InvalidMessage {
                    reason: "frames must be JSON text".into(),
                };
                exchange
                    .sessions
                    .send_to(session_id, &error_frame(&error).to_frame());
            }
            Message::Close(_) => break,
            // Transport-level keepalives are answered by the stack.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    exchange.sessions.unregister(session_id);
    writer.abort();
    debug!(session_id, "connection closed");
}

/// Handles one inbound frame: parse, resolve authentication, route.
fn handle_frame(exchange: &Arc<Exchange>, session_id: SessionId, nonce: &str, text: &str) {
    let message = match ClientMessage::parse(text) {
        Ok(message) => message,
        Err(error) => {
            debug!(session_id, code = error.code(), "rejected inbound frame");
            exchange
                .sessions
                .send_to(session_id, &error_frame(&error).to_frame());
            return;
        }
    };

    if let ClientMessage::Auth(auth) = &message {
        match exchange.authenticate(session_id, auth, nonce) {
            Ok(reply) => exchange.sessions.send_to(session_id, &reply.to_frame()),
            Err(error) => exchange
                .sessions
                .send_to(session_id, &error_frame(&error).to_frame()),
        }
        return;
    }

    match exchange.sessions.agent_of(session_id) {
        Some(agent_id) => dispatch::dispatch(exchange, session_id, &agent_id, message),
        None => {
            exchange.sessions.send_to(
                session_id,
                &error_frame(&ExchangeError::NotAuthenticated).to_frame(),
            );
        }
    }
}
