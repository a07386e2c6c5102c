//! WebSocket sessions.
//!
//! The token is checked once, at upgrade. A rejected connection still
//! completes the upgrade so the client receives an `error` frame followed by
//! a policy-violation close instead of a bare HTTP failure.

use std::{collections::HashMap, sync::Arc};

use {
    axum::{
        extract::{
            Query, State, WebSocketUpgrade,
            ws::{CloseFrame, Message, WebSocket},
        },
        response::IntoResponse,
    },
    futures::{SinkExt, StreamExt},
    tracing::{debug, info, warn},
    uuid::Uuid,
};

use {
    tether_auth::{Claims, TokenError},
    tether_protocol::{
        ACK_RECEIVED, CLOSE_GOING_AWAY, CLOSE_POLICY_VIOLATION, CONNECTION_MESSAGE, ClientFrame,
        ServerFrame,
    },
    tether_simulation::CommandIntent,
};

use crate::{
    broadcast::now_ms,
    state::{GatewayState, Session, SessionError, outbound_queue},
};

const AUTH_FAILED: &str = "Authentication failed";

/// Result of the single authentication step performed at upgrade time.
#[derive(Debug)]
enum Admission {
    Accepted(Claims),
    Rejected(&'static str),
}

fn admit(state: &GatewayState, token: Option<&str>) -> Admission {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Admission::Rejected("missing token");
    };
    match state.tokens.validate(token) {
        Ok(claims) => Admission::Accepted(claims),
        Err(TokenError::Expired) => Admission::Rejected("expired token"),
        Err(_) => Admission::Rejected("invalid token"),
    }
}

/// `GET /ws?token=...`
pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    let admission = admit(&state, params.get("token").map(String::as_str));
    ws.on_upgrade(move |socket| async move {
        match admission {
            Admission::Accepted(claims) => handle_connection(socket, state, claims).await,
            Admission::Rejected(reason) => reject(socket, reason).await,
        }
    })
}

async fn reject(mut socket: WebSocket, reason: &'static str) {
    warn!(reason, "rejected websocket connection");
    // Clients see one generic message whatever the cause.
    let frame = ServerFrame::error(AUTH_FAILED);
    let _ = socket.send(Message::Text(frame.to_json().into())).await;
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: AUTH_FAILED.into(),
        })))
        .await;
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>, claims: Claims) {
    let client_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = outbound_queue();

    // Single writer: everything bound for this socket goes through `rx`.
    let write_handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_tx.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    // Replies share the session's queue so they stay ordered with broadcasts.
    let replies = Session::new(client_id, claims.sub.clone(), tx.clone());
    let _ = replies.send(&ServerFrame::Connection {
        client_id,
        message: CONNECTION_MESSAGE.into(),
    });
    state
        .sessions
        .add(client_id, Session::new(client_id, claims.sub.clone(), tx));
    info!(client_id = %client_id, subject = claims.sub, "websocket session opened");

    loop {
        let msg = tokio::select! {
            () = state.shutdown.cancelled() => {
                let close = Message::Close(Some(CloseFrame {
                    code: CLOSE_GOING_AWAY,
                    reason: "Server shutting down".into(),
                }));
                if replies.sender.try_send(close).is_err() {
                    // Writer is stuck behind a client that stopped reading.
                    write_handle.abort();
                }
                break;
            },
            msg = ws_rx.next() => msg,
        };
        let msg = match msg {
            Some(Ok(m)) => m,
            Some(Err(e)) => {
                debug!(client_id = %client_id, error = %e, "websocket read error");
                break;
            },
            None => break,
        };
        let reply = match msg {
            Message::Text(text) => handle_text(&state, client_id, text.as_str()),
            Message::Binary(_) => Some(ServerFrame::error("Binary frames are not supported")),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => None,
        };
        if let Some(frame) = reply {
            match replies.send(&frame) {
                Ok(()) => {},
                Err(SessionError::Lagging(_)) => {
                    debug!(client_id = %client_id, "client not reading, reply dropped");
                },
                Err(_) => break,
            }
        }
    }

    state.sessions.remove(&client_id);
    drop(replies);
    let _ = write_handle.await;
    info!(client_id = %client_id, "websocket session closed");
}

/// Process one inbound text frame and return the reply, if any.
fn handle_text(state: &GatewayState, client_id: Uuid, text: &str) -> Option<ServerFrame> {
    let frame = match ClientFrame::parse(text) {
        Ok(f) => f,
        Err(e) => {
            debug!(client_id = %client_id, error = %e, "bad client frame");
            return Some(ServerFrame::error(e.to_string()));
        },
    };

    match frame {
        ClientFrame::Ping => Some(ServerFrame::Pong {
            timestamp: now_ms(),
        }),
        ClientFrame::Command {
            command,
            companion_id,
            payload,
        } => {
            if let Some(raw) = companion_id {
                let Ok(entity_id) = Uuid::parse_str(&raw) else {
                    return Some(ServerFrame::error("Invalid companion ID format"));
                };
                let intent = CommandIntent {
                    entity_id,
                    command: command.clone(),
                    payload,
                };
                if state.simulation.enqueue_command(intent).is_err() {
                    return Some(ServerFrame::error("Simulation unavailable"));
                }
                debug!(client_id = %client_id, companion = %entity_id, command, "command enqueued");
            }
            Some(ServerFrame::CommandAck {
                command,
                status: ACK_RECEIVED.into(),
            })
        },
    }
}
