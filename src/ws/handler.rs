//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::middleware::{resolve_peer, ResolvedPeer};
use crate::lobby::room::PeerId;
use crate::transport::Transport;
use crate::util::rate_limit::PeerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT, or a session token from an earlier `welcome` in guest mode
    #[serde(default)]
    pub token: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let secret = state.config.jwt_secret.as_deref();
    if secret.is_none() {
        state.guest_sessions.prune(|peer| state.hub.is_connected(peer));
    }

    // Verify the token before upgrading
    match resolve_peer(secret, &state.guest_sessions, query.token.as_deref()) {
        Ok(resolved) => {
            info!(peer_id = %resolved.peer_id, "WebSocket upgrade");
            ws.on_upgrade(move |socket| handle_socket(socket, resolved, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, resolved: ResolvedPeer, state: AppState) {
    let ResolvedPeer {
        peer_id,
        session_token,
    } = resolved;
    info!(peer_id = %peer_id, "New WebSocket connection");

    let (ws_sink, ws_stream) = socket.split();
    let outbound = state.hub.register(peer_id);

    // Writer task: hub queue -> WebSocket
    let writer = tokio::spawn(write_loop(peer_id, ws_sink, outbound));

    if state.lobby.connect(peer_id, session_token).await.is_err() {
        error!(peer_id = %peer_id, "Lobby unavailable, closing connection");
    } else {
        read_loop(peer_id, ws_stream, &state).await;
    }

    writer.abort();
    // Wait for the writer to drop its receiver so the hub sees the queue closed.
    let _ = writer.await;

    if state.hub.release(&peer_id) {
        let _ = state.lobby.disconnect(peer_id).await;
        info!(peer_id = %peer_id, "WebSocket connection closed");
    } else {
        debug!(peer_id = %peer_id, "Superseded connection closed");
    }
}

async fn write_loop(
    peer_id: PeerId,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(peer_id = %peer_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Reader loop: WebSocket -> lobby actor
async fn read_loop(
    peer_id: PeerId,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    state: &AppState,
) {
    let rate_limiter = PeerRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(peer_id = %peer_id, "Rate limited inbound message");
                    continue;
                }

                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(peer_id = %peer_id, error = %e, "Failed to parse client message");
                        state
                            .hub
                            .notify(&peer_id, ServerMsg::error("invalid_message", e.to_string()));
                        continue;
                    }
                };

                if matches!(client_msg, ClientMsg::JoinMatchmaking { .. })
                    && !rate_limiter.check_matchmaking()
                {
                    warn!(peer_id = %peer_id, "Rate limited matchmaking request");
                    continue;
                }

                if state.lobby.submit(peer_id, client_msg).await.is_err() {
                    debug!(peer_id = %peer_id, "Lobby closed");
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(peer_id = %peer_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(peer_id = %peer_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
