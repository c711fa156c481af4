//! WebSocket accept path and per-connection loop
//!
//! Admission (token → user → ownership) happens before the upgrade so the
//! rejection reason is known up front; the handshake still completes so the
//! close code and reason reach the client. After admission each session runs
//! one task multiplexing the socket, its command outbox, and the liveness
//! ping timer.

use super::protocol::{
    ClientFrame, ServerFrame, CLOSE_INTERNAL_ERROR, CLOSE_POLICY_VIOLATION, REASON_INTERNAL,
    REASON_INVALID_TOKEN, REASON_NOT_OWNED, REASON_NO_TOKEN,
};
use super::{PresenceNode, SessionCommand};
use crate::auth::extract_token;
use crate::Error;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Build the presence node router.
pub fn build_router(node: Arc<PresenceNode>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(node)
}

async fn health(State(node): State<Arc<PresenceNode>>) -> Response {
    if node.is_ready() {
        Json(serde_json::json!({ "status": "ok" })).into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": "initial heartbeat pending" })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Why a connection was refused; delivered as a close frame after the
/// handshake completes.
struct Rejection {
    code: u16,
    reason: &'static str,
}

fn admit(node: &PresenceNode, headers: &HeaderMap, query_token: Option<&str>) -> Result<String, Rejection> {
    let token = extract_token(headers, query_token).ok_or(Rejection {
        code: CLOSE_POLICY_VIOLATION,
        reason: REASON_NO_TOKEN,
    })?;

    let user_id = node.validator().validate(&token).map_err(|err| {
        debug!(error = %err, "token rejected");
        Rejection {
            code: CLOSE_POLICY_VIOLATION,
            reason: REASON_INVALID_TOKEN,
        }
    })?;

    match node.owns_user(&user_id) {
        Ok(_) => Ok(user_id),
        Err(Error::NotOwned { vnode }) => {
            debug!(user_id, vnode, "refusing user outside assigned vnodes");
            Err(Rejection {
                code: CLOSE_POLICY_VIOLATION,
                reason: REASON_NOT_OWNED,
            })
        }
        Err(err) => {
            warn!(user_id, error = %err, "admission failed");
            Err(Rejection {
                code: CLOSE_INTERNAL_ERROR,
                reason: REASON_INTERNAL,
            })
        }
    }
}

async fn ws_handler(
    State(node): State<Arc<PresenceNode>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let admission = admit(&node, &headers, query.token.as_deref());
    ws.on_upgrade(move |socket| handle_session(socket, node, admission))
}

async fn handle_session(
    mut socket: WebSocket,
    node: Arc<PresenceNode>,
    admission: Result<String, Rejection>,
) {
    let user_id = match admission {
        Ok(user_id) => user_id,
        Err(rejection) => {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: rejection.code,
                    reason: Cow::Borrowed(rejection.reason),
                })))
                .await;
            return;
        }
    };

    let (outbox, mut commands) = mpsc::unbounded_channel();
    let session_id = match node.attach_session(&user_id, outbox).await {
        Ok(session_id) => session_id,
        Err(err) => {
            warn!(user_id, error = %err, "session attach failed");
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_INTERNAL_ERROR,
                    reason: Cow::Borrowed(REASON_INTERNAL),
                })))
                .await;
            return;
        }
    };

    let welcome = ServerFrame::Welcome {
        user_id: user_id.clone(),
        node_id: node.node_id().to_string(),
        timestamp: node.now_millis(),
    };
    if send_frame(&mut socket, &welcome).await.is_err() {
        node.detach_session(&user_id, session_id).await;
        return;
    }

    let mut ping = tokio::time::interval(node.ping_interval());
    ping.tick().await; // the first tick fires immediately

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if handle_text(&mut socket, &node, &user_id, &text).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {} // binary and pong frames are ignored
                Some(Err(err)) => {
                    debug!(user_id, error = %err, "socket read failed");
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Frame(frame)) => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
                Some(SessionCommand::Close { code, reason }) => {
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: Cow::Borrowed(reason),
                        })))
                        .await;
                    break;
                }
                None => break,
            },
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    node.detach_session(&user_id, session_id).await;
}

/// Decode and answer one text frame. Malformed input and unknown types are
/// logged and ignored; only a dead socket ends the session.
async fn handle_text(
    socket: &mut WebSocket,
    node: &PresenceNode,
    user_id: &str,
    text: &str,
) -> Result<(), axum::Error> {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Ping { timestamp }) => {
            // Echo the client's timestamp when it sent one, so round-trip
            // measurement works; otherwise stamp server time.
            let pong = ServerFrame::Pong {
                timestamp: timestamp.unwrap_or_else(|| node.now_millis()),
            };
            send_frame(socket, &pong).await
        }
        Ok(ClientFrame::Unknown) => {
            debug!(user_id, frame = text, "ignoring unrecognized frame type");
            Ok(())
        }
        Err(err) => {
            warn!(user_id, error = %err, "malformed frame, ignoring");
            Ok(())
        }
    }
}

async fn send_frame(socket: &mut WebSocket, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    socket.send(Message::Text(text)).await
}
