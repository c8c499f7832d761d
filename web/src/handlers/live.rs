//! Live WebSocket feed.
//!
//! `GET /ws?token=<jwt>` (or an `Authorization: Bearer` header). The token is
//! verified before the upgrade; a bad token gets a plain 401 and no socket.
//!
//! Once upgraded the connection is registered with the [`LiveHub`] and split in
//! two:
//!
//! ```text
//!   hub queue ──► write pump ──► socket        (text frames, in order)
//!   socket ──► read pump                       (drained; close ends the session)
//! ```
//!
//! Whichever pump finishes first ends the session, and the client is always
//! unregistered on the way out. When the hub disconnects a slow client its
//! queue ends, the write pump sends a close frame and the session ends.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use lending_core::types::BorrowerId;
use lending_runtime::{LiveClient, LiveHub};
use serde::Deserialize;

use crate::auth::{BearerToken, authenticate};
use crate::error::AppError;
use crate::state::AppState;

/// Query parameters of the live endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct LiveQuery {
    /// Access token, for clients that cannot set headers on a WebSocket
    pub token: Option<String>,
}

/// Upgrade an authenticated request to a live feed.
///
/// # Errors
///
/// 401 if no valid token is given; 503 if the hub has stopped.
pub async fn live(
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| BearerToken::from_headers(&headers).map(|b| b.0))
        .ok_or_else(|| AppError::unauthorized("Missing token"))?;
    let borrower = authenticate(&state, &token)?;

    let client = state
        .hub
        .register()
        .await
        .map_err(|e| AppError::unavailable(e.to_string()))?;
    tracing::info!(borrower_id = %borrower, client_id = client.id(), "Live viewer connected");

    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| session(socket, hub, client, borrower)))
}

async fn session(socket: WebSocket, hub: LiveHub, client: LiveClient, borrower: BorrowerId) {
    let id = client.id();
    let (sender, receiver) = socket.split();

    let mut write_pump = tokio::spawn(write_pump(sender, client));
    let mut read_pump = tokio::spawn(read_pump(receiver));

    tokio::select! {
        _ = (&mut write_pump) => read_pump.abort(),
        _ = (&mut read_pump) => write_pump.abort(),
    }

    hub.unregister(id).await;
    tracing::info!(borrower_id = %borrower, client_id = id, "Live viewer disconnected");
}

async fn write_pump(mut sender: futures::stream::SplitSink<WebSocket, Message>, mut client: LiveClient) {
    while let Some(payload) = client.recv().await {
        if sender.send(Message::Text(payload.to_string())).await.is_err() {
            return;
        }
    }
    // Queue closed: unregistered or dropped as too slow.
    let _ = sender.send(Message::Close(None)).await;
}

async fn read_pump(mut receiver: futures::stream::SplitStream<WebSocket>) {
    while let Some(Ok(message)) = receiver.next().await {
        if matches!(message, Message::Close(_)) {
            break;
        }
    }
}
