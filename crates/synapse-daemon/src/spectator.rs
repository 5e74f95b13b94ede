//! Spectator surface: the observer stream and demo endpoints.
//!
//! Observers subscribe once and receive a full snapshot followed by
//! every tape event in order. A lagging observer skips events rather
//! than slowing the exchange. The demo endpoint seeds a one-shot
//! deadline-miss scenario for spectators to watch.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::exchange::Exchange;

/// Builds the spectator router: `GET /observer` upgrades to the tape
/// stream, `POST /api/demo/timeout` seeds the deadline-miss demo.
pub fn router(exchange: Arc<Exchange>) -> Router {
    Router::new()
        .route("/observer", get(observer_handler))
        .route("/api/demo/timeout", post(demo_timeout_handler))
        .with_state(exchange)
}

async fn observer_handler(
    State(exchange): State<Arc<Exchange>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_observer(exchange, socket))
}

/// Streams the snapshot, then every tape event, until the observer
/// disconnects.
async fn handle_observer(exchange: Arc<Exchange>, mut socket: WebSocket) {
    // Subscribe before the snapshot so no event in between is lost.
    let mut tape = exchange.subscribe_tape();
    let snapshot = json!({ "type": "snapshot", "data": exchange.snapshot() });
    if socket.send(Message::Text(snapshot.to_string())).await.is_err() {
        return;
    }
    debug!("observer subscribed");

    loop {
        tokio::select! {
            event = tape.recv() => match event {
                Ok(event) => {
                    let frame = json!({ "type": "event", "data": event });
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "observer lagged behind the tape");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Observers only listen; anything else is ignored.
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("observer disconnected");
}

async fn demo_timeout_handler(State(exchange): State<Arc<Exchange>>) -> Json<Value> {
    match exchange.demo_timeout() {
        Ok(job_id) => Json(json!({ "ok": true, "jobId": job_id })),
        Err(error) => Json(json!({ "ok": false, "error": error.code() })),
    }
}
