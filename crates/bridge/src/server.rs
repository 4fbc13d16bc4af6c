//! HTTP control plane: `POST /command` forwards to the peer and waits for the
//! correlated reply, `GET /ping` answers liveness probes.

use crate::channel::PeerSender;
use crate::pending::{PendingTable, Settlement};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use browsermux_core::{BridgeSettings, Message};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PEER_DISCONNECTED_ERROR: &str = "Peer disconnected";
pub const DUPLICATE_ID_ERROR: &str = "Duplicate request id";

#[derive(Clone)]
pub struct BridgeState {
    pub pending: Arc<PendingTable>,
    pub peer: PeerSender,
    pub settings: Arc<BridgeSettings>,
    peer_connected: Arc<AtomicBool>,
}

impl BridgeState {
    pub fn new(pending: Arc<PendingTable>, peer: PeerSender, settings: BridgeSettings) -> Self {
        Self {
            pending,
            peer,
            settings: Arc::new(settings),
            peer_connected: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_peer_connected(&self) -> bool {
        self.peer_connected.load(Ordering::SeqCst)
    }

    pub fn mark_peer_disconnected(&self) {
        self.peer_connected.store(false, Ordering::SeqCst);
    }
}

pub fn router(state: BridgeState) -> Router {
    Router::new()
        .route("/command", post(handle_command).fallback(handle_not_found))
        .route("/ping", get(handle_ping).fallback(handle_not_found))
        .fallback(handle_not_found)
        .with_state(state)
}

fn reply(status: StatusCode, message: Message) -> Response {
    (status, Json(message)).into_response()
}

async fn handle_command(State(state): State<BridgeState>, body: Bytes) -> Response {
    let mut message: Message = match serde_json::from_slice(&body) {
        Ok(m) => m,
        Err(e) => {
            debug!(error = %e, "Rejecting malformed command body");
            return reply(
                StatusCode::BAD_REQUEST,
                Message::failure("", format!("Invalid JSON body: {}", e)),
            );
        }
    };

    let command = match message.command.as_deref().map(str::trim) {
        Some(c) if !c.is_empty() => c.to_string(),
        _ => {
            return reply(
                StatusCode::BAD_REQUEST,
                Message::failure(message.id, "Missing command"),
            );
        }
    };

    if !state.is_peer_connected() {
        return reply(
            StatusCode::SERVICE_UNAVAILABLE,
            Message::failure(message.id, PEER_DISCONNECTED_ERROR),
        );
    }

    if !message.has_id() {
        message.id = uuid::Uuid::new_v4().to_string();
    }
    let id = message.id.clone();
    let deadline = state.settings.command_timeout(&command);

    let Some(pending) = state.pending.register(&id, deadline) else {
        warn!(id = %id, "Rejecting request with an id that is already pending");
        return reply(
            StatusCode::BAD_REQUEST,
            Message::failure(id, DUPLICATE_ID_ERROR),
        );
    };

    if let Err(e) = state.peer.send(message) {
        warn!(id = %id, error = %e, "Could not forward command to peer");
        state.pending.cancel(&id);
        return reply(
            StatusCode::SERVICE_UNAVAILABLE,
            Message::failure(id, PEER_DISCONNECTED_ERROR),
        );
    }
    debug!(id = %id, command = %command, deadline_secs = deadline.as_secs(), "Forwarded command");

    match pending.wait().await {
        Settlement::Reply(m) => reply(StatusCode::OK, m),
        Settlement::Expired(m) => {
            info!(id = %id, command = %command, "Command timed out");
            reply(StatusCode::GATEWAY_TIMEOUT, m)
        }
    }
}

async fn handle_ping() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn handle_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Not found" })),
    )
        .into_response()
}
