// src/api/ws/mod.rs
// Duplex push channel: one WebSocket per peer, fanned into the PushRegistry
// keyed by principal. Connect-time auth is mandatory; anything else closes
// with AUTH_FAILED_CLOSE_CODE before the peer is ever registered.

pub mod client_message;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::domain::DomainError;
use crate::push::{Peer, PushEvent, AUTH_FAILED_CLOSE_CODE};
use crate::state::AppState;

use client_message::WsClientMessage;

const PING_INTERVAL_SECS: u64 = 30;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    match state.session_service.validate(&token).await {
        Ok((claims, _session)) => {
            ws.on_upgrade(move |socket| handle_socket(socket, state, claims.sub))
        }
        Err(e) => {
            warn!(error = %e, "websocket connect rejected: invalid session");
            ws.on_upgrade(|socket| reject_socket(socket))
        }
    }
}

async fn reject_socket(socket: WebSocket) {
    let (mut sender, _receiver) = socket.split();
    let _ = sender
        .send(WsMessage::Close(Some(axum::extract::ws::CloseFrame {
            code: AUTH_FAILED_CLOSE_CODE,
            reason: "invalid or expired session".into(),
        })))
        .await;
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, principal_id: String) {
    let (sender, mut receiver) = socket.split();
    let peer = Peer::new(sender);
    state.push_registry.attach(&principal_id, peer.clone());
    info!(principal_id, "peer attached");

    let keepalive = {
        let peer = peer.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
            loop {
                interval.tick().await;
                if peer.send(&PushEvent::Ping).await.is_err() {
                    break;
                }
            }
        })
    };

    while let Some(Ok(msg)) = receiver.next().await {
        let WsMessage::Text(text) = msg else { continue };
        let parsed: Result<WsClientMessage, _> = serde_json::from_str(&text);
        match parsed {
            Ok(WsClientMessage::SendMessage { conversation_id, content }) => {
                dispatch_send_message(&state, &principal_id, &conversation_id, &content).await;
            }
            Ok(WsClientMessage::StopGeneration { conversation_id }) => {
                state.orchestrator.stop_generation(&conversation_id);
            }
            Err(e) => {
                warn!(error = %e, "malformed client message, ignoring");
            }
        }
    }

    keepalive.abort();
    state.push_registry.detach(&principal_id, peer.id());
    info!(principal_id, "peer detached");
}

async fn dispatch_send_message(state: &Arc<AppState>, principal_id: &str, conversation_id: &str, content: &str) {
    let outcome = state
        .orchestrator
        .process_message(conversation_id, principal_id, content)
        .await;

    // process_message pushes chat_token/chat_complete/rate_limit_* events
    // itself along the way. Errors it raises without having already pushed
    // a wire event (conflict, unexpected internal failures) still need a
    // chat_error so the client isn't left waiting silently.
    if let Err(err) = outcome {
        match err {
            DomainError::RateLimit { .. } => {}
            other => {
                state
                    .push_registry
                    .send_to_principal(
                        principal_id,
                        PushEvent::ChatError {
                            error: other.to_string(),
                            details: None,
                        },
                    )
                    .await;
            }
        }
    }
}
