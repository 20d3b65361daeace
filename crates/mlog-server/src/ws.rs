//! `/api/events`: pushes every [`ServerEvent`] to connected clients in emission order.

use crate::AppState;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use mlog_proto::ServerEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{sleep_until, Instant};

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A subscriber that has not answered a ping for this long is dropped.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // subscribe before the upgrade so no event emitted meanwhile is missed
    let events = state.events.subscribe();
    ws.on_upgrade(move |socket| serve_subscriber(socket, events))
}

/// Why a subscriber session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disconnect {
    ClientClosed,
    PongTimeout,
    SendFailed,
    ServerShutdown,
}

/// Tracks the outstanding ping of one subscriber.
#[derive(Debug, Default)]
struct Keepalive {
    pong_due: Option<Instant>,
}

impl Keepalive {
    /// Record a ping; the first unanswered one sets the deadline.
    fn pinged(&mut self, now: Instant) {
        self.pong_due.get_or_insert(now + PONG_TIMEOUT);
    }

    fn ponged(&mut self) {
        self.pong_due = None;
    }

    fn deadline(&self) -> Option<Instant> {
        self.pong_due
    }
}

async fn serve_subscriber(socket: WebSocket, mut events: broadcast::Receiver<String>) {
    let (mut outbound, mut inbound) = socket.split();
    let mut keepalive = Keepalive::default();
    let mut next_ping = Instant::now() + PING_INTERVAL;
    let mut forwarded = 0usize;

    let reason = loop {
        let pong_deadline = keepalive.deadline();
        tokio::select! {
            event = events.recv() => match event {
                Ok(json) => {
                    if outbound.send(Message::Text(json.into())).await.is_err() {
                        break Disconnect::SendFailed;
                    }
                    forwarded += 1;
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber fell behind, mission events dropped");
                }
                Err(RecvError::Closed) => break Disconnect::ServerShutdown,
            },

            frame = inbound.next() => match frame {
                Some(Ok(Message::Pong(_))) => keepalive.ponged(),
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break Disconnect::ClientClosed,
                Some(Ok(_)) => {}
            },

            _ = sleep_until(next_ping) => {
                if outbound.send(Message::Ping(Bytes::new())).await.is_err() {
                    break Disconnect::SendFailed;
                }
                keepalive.pinged(Instant::now());
                next_ping = Instant::now() + PING_INTERVAL;
            }

            _ = sleep_until(pong_deadline.unwrap_or(next_ping)), if pong_deadline.is_some() => {
                break Disconnect::PongTimeout;
            }
        }
    };

    if reason != Disconnect::ClientClosed {
        let _ = outbound.send(Message::Close(None)).await;
    }
    tracing::debug!(?reason, forwarded, "event subscriber disconnected");
}

/// Serialize `event` and send it to every subscriber. Having no subscribers is not an error.
pub fn broadcast_event(tx: &broadcast::Sender<String>, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize server event"),
    }
}
