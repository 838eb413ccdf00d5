// =============================================================================
// WebSocket Handler — external broadcast worker per bus subscriber
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>&topic=<topic>` and receive a
// forwarded copy of every event published to that topic on the event bus,
// starting from the moment of subscription. One broadcast worker per
// connection: it owns its own `Queue` handle and therefore its own
// drop-oldest backpressure, isolated from every other consumer. A per-send
// timeout (default 5s) detects a stuck client and tears the connection down
// rather than blocking the worker indefinitely.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::AppState;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_TOPIC: &str = "tick_processed";

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
    topic: Option<String>,
}

/// Axum handler for the WebSocket upgrade request. Validates the token from
/// the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    let topic = query.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    info!(topic = %topic, "WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, topic))
        .into_response()
}

/// Runs the broadcast worker for a single connection until the client
/// disconnects, sends a Close frame, or a send exceeds `SEND_TIMEOUT`.
async fn handle_ws_connection(socket: WebSocket, state: Arc<AppState>, topic: String) {
    let consumer_name = format!("ws-{}", uuid::Uuid::new_v4());
    let queue = state.bus.subscribe(&topic, &consumer_name);
    let cancel = Arc::new(AtomicBool::new(false));

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            event = queue.recv(&cancel) => {
                let Some(payload) = event else { break };
                let text = match serde_json::to_string(&payload) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(error = %e, "failed to serialize event for websocket send");
                        continue;
                    }
                };
                match tokio::time::timeout(SEND_TIMEOUT, sender.send(Message::Text(text.into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!(error = %e, "websocket send failed — disconnecting");
                        break;
                    }
                    Err(_) => {
                        warn!(consumer = %consumer_name, "websocket send timed out — unregistering stuck consumer");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("websocket close frame received");
                        break;
                    }
                    Some(Ok(Message::Text(_))) | Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket receive error — disconnecting");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    cancel.store(true, Ordering::SeqCst);
    info!(consumer = %consumer_name, topic = %topic, "websocket broadcast worker stopped");
}
