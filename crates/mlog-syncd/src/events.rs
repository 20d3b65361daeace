use crate::database::LocalDb;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use mlog_proto::{Mission, ServerEvent};
use std::sync::Arc;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub fn events_url(api_base: &str) -> String {
    let mut ws_url = api_base
        .trim_end_matches('/')
        .replace("http://", "ws://")
        .replace("https://", "wss://");
    if !ws_url.ends_with("/api/events") {
        ws_url.push_str("/api/events");
    }
    ws_url
}

/// Handle one text frame: new missions go to the head of the cache.
pub fn apply_event(db: &LocalDb, text: &str) -> Result<Option<Mission>> {
    match serde_json::from_str::<ServerEvent>(text) {
        Ok(ServerEvent::MissionUpdate { new_mission }) => {
            db.prepend_mission(&new_mission)?;
            Ok(Some(new_mission))
        }
        Err(e) => {
            tracing::debug!(error = %e, "ignoring unrecognized event");
            Ok(None)
        }
    }
}

/// Real-time listener, connected only while the client is online.
pub struct EventListener {
    url: String,
    db: Arc<LocalDb>,
    tx: UnboundedSender<Mission>,
}

impl EventListener {
    pub fn new(api_base: &str, db: Arc<LocalDb>, tx: UnboundedSender<Mission>) -> Self {
        Self {
            url: events_url(api_base),
            db,
            tx,
        }
    }

    pub async fn run(self, mut online: watch::Receiver<bool>) {
        loop {
            if online.wait_for(|up| *up).await.is_err() {
                return;
            }
            tokio::select! {
                result = self.listen_once() => {
                    if let Err(e) = result {
                        tracing::warn!(error = ?e, "event stream error");
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
                still_watching = async { online.wait_for(|up| !*up).await.is_ok() } => {
                    if !still_watching {
                        return;
                    }
                    tracing::info!("offline, event stream closed");
                }
            }
        }
    }

    async fn listen_once(&self) -> Result<()> {
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("Failed to connect to {}", self.url))?;
        tracing::info!(url = %self.url, "event stream connected");
        let (mut write, mut read) = ws.split();

        while let Some(msg) = read.next().await {
            match msg? {
                Message::Text(text) => {
                    if let Some(mission) = apply_event(&self.db, &text)? {
                        tracing::info!(id = mission.id, name = %mission.name, "new mission received");
                        let _ = self.tx.send(mission);
                    }
                }
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await?;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        tracing::info!("event stream closed by server");
        Ok(())
    }
}
