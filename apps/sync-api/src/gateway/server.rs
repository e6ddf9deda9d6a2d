//! WebSocket upgrade handler and the per-connection pumps.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};

use crate::AppState;

use super::handler::{authenticate, AuthenticatedPeer};
use super::session::{Outbound, Session};

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

/// Query parameters of the upgrade request. The credential travels here
/// because browsers cannot set headers on a WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct GatewayParams {
    pub token: Option<String>,
}

/// Client address: first `X-Forwarded-For` hop, else the socket peer.
pub struct RemoteAddr(pub String);

impl<S: Send + Sync> FromRequestParts<S> for RemoteAddr {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let forwarded = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return Ok(Self(ip.to_string()));
        }
        if let Some(ConnectInfo(addr)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            return Ok(Self(addr.ip().to_string()));
        }
        Ok(Self("unknown".to_string()))
    }
}

async fn ws_upgrade(
    State(state): State<AppState>,
    RemoteAddr(remote_addr): RemoteAddr,
    params: Result<Query<GatewayParams>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let token = params.ok().and_then(|Query(p)| p.token);

    // Authenticate before looking at the upgrade so unauthenticated callers
    // always get a 401, handshake or not.
    let peer = match authenticate(&state, token.as_deref()).await {
        Ok(peer) => peer,
        Err(e) => return e.into_response(),
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, peer, remote_addr))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    peer: AuthenticatedPeer,
    remote_addr: String,
) {
    let (session, outbound_rx) = Session::new(
        peer.user_id,
        peer.display_name,
        remote_addr,
        state.config.outbound_queue_capacity,
    );

    // Registration follows the 101 response; a snapshot dispatched in between
    // reaches the device only through its next pull.
    let registry = state.registry.clone();
    if !registry.register(session.clone()) {
        tracing::warn!(session_id = %session.id, "session could not be registered");
        return;
    }

    tracing::info!(
        session_id = %session.id,
        user_id = session.user_id,
        display_name = %session.display_name,
        remote_addr = %session.remote_addr,
        "gateway session established"
    );

    let (ws_tx, ws_rx) = socket.split();
    let outbound = tokio::spawn(outbound_pump(
        session.clone(),
        ws_tx,
        outbound_rx,
        state.config.keepalive_interval,
    ));

    inbound_pump(&session, ws_rx).await;

    // Runs exactly once per connection; closing is idempotent if the
    // dispatcher already purged this session.
    registry.unregister(&session);
    if let Err(e) = outbound.await {
        tracing::error!(?e, session_id = %session.id, "outbound pump panicked");
    }

    tracing::info!(
        session_id = %session.id,
        user_id = session.user_id,
        connected_secs = session.info().connected_secs,
        "gateway session ended"
    );
}

/// Read frames only to notice liveness, close and errors. Devices send no
/// application messages over this connection.
async fn inbound_pump(session: &Session, mut ws_rx: SplitStream<WebSocket>) {
    loop {
        tokio::select! {
            _ = session.closed() => break,
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(session_id = %session.id, "peer closed connection");
                        break;
                    }
                    Some(Ok(_)) => session.mark_alive(),
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.id, "ws read error");
                        break;
                    }
                }
            }
        }
    }
}

/// Write queued snapshots, one full snapshot per text frame, and probe the
/// peer every `keepalive`.
async fn outbound_pump(
    session: Arc<Session>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    keepalive: Duration,
) {
    let mut keepalive_timer = time::interval_at(Instant::now() + keepalive, keepalive);

    loop {
        tokio::select! {
            biased;

            _ = session.closed() => {
                let _ = send_close(&mut ws_tx, "Session closed").await;
                break;
            }

            next = outbound_rx.recv() => {
                let Some(snapshot) = next else {
                    let _ = send_close(&mut ws_tx, "Session closed").await;
                    break;
                };
                let json = match serde_json::to_string(&*snapshot) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!(?e, session_id = %session.id, "snapshot serialization failed");
                        continue;
                    }
                };
                if let Err(e) = ws_tx.send(Message::Text(json.into())).await {
                    tracing::debug!(?e, session_id = %session.id, "ws write error");
                    session.close();
                    break;
                }
            }

            _ = keepalive_timer.tick() => {
                if !session.take_alive() {
                    tracing::debug!(session_id = %session.id, "keepalive timeout, closing connection");
                    session.close();
                    continue;
                }
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    session.close();
                    break;
                }
            }
        }
    }
}

/// Send a normal-closure frame with a reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
