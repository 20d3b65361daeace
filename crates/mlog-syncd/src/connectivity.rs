//! Online/offline detection: platform network presence combined with a
//! periodic liveness probe against the server.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Online only when both the platform reports a network and the server answers.
pub fn combine(platform_online: bool, server_reachable: bool) -> bool {
    platform_online && server_reachable
}

#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Never fails: anything but a healthy answer is `false`.
    async fn probe(&self) -> bool;
}

/// `GET {api_url}/api/health`, reachable on any 2xx.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(api_base: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/health", api_base.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                tracing::debug!(status = %resp.status(), "health probe failed");
                false
            }
            Err(e) => {
                tracing::debug!(error = %e, "health probe unreachable");
                false
            }
        }
    }
}

/// Whether the host has a default route. Hosts without `/proc/net/route`
/// are assumed to be connected and rely on the liveness probe alone.
pub fn has_default_route() -> bool {
    match std::fs::read_to_string("/proc/net/route") {
        Ok(table) => table.lines().skip(1).any(|line| {
            let mut cols = line.split_whitespace();
            let iface = cols.next().unwrap_or("lo");
            cols.next() == Some("00000000") && iface != "lo"
        }),
        Err(_) => true,
    }
}

/// Platform network presence as a watch channel, refreshed every `interval`.
pub fn spawn_route_presence(interval: Duration) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(has_default_route());
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let present = has_default_route();
            let changed = tx.send_if_modified(|current| {
                let changed = *current != present;
                *current = present;
                changed
            });
            if changed {
                tracing::info!(present, "network presence changed");
            }
            if tx.is_closed() {
                break;
            }
        }
    });
    (rx, handle)
}

pub struct ConnectivityMonitor {
    probe: Arc<dyn LivenessProbe>,
    presence: watch::Receiver<bool>,
    interval: Duration,
}

impl ConnectivityMonitor {
    pub fn new(
        probe: Arc<dyn LivenessProbe>,
        presence: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            probe,
            presence,
            interval,
        }
    }

    /// Start monitoring. The returned channel starts at `false` (offline) and
    /// carries `combine(presence, probe)` after every probe.
    pub fn spawn(self) -> (watch::Receiver<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(tx));
        (rx, handle)
    }

    async fn run(mut self, tx: watch::Sender<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut presence_open = true;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.presence.changed(), if presence_open => {
                    if changed.is_err() {
                        tracing::debug!("presence source closed, probing on timer only");
                        presence_open = false;
                        continue;
                    }
                }
            }

            let platform = *self.presence.borrow_and_update();
            let reachable = self.probe.probe().await;
            let online = combine(platform, reachable);
            let changed = tx.send_if_modified(|current| {
                let changed = *current != online;
                *current = online;
                changed
            });
            if changed {
                tracing::info!(online, platform, reachable, "connectivity changed");
            }
            if tx.is_closed() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct FlagProbe {
        up: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LivenessProbe for FlagProbe {
        async fn probe(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn combine_truth_table() {
        assert!(combine(true, true));
        assert!(!combine(true, false));
        assert!(!combine(false, true));
        assert!(!combine(false, false));
    }

    #[tokio::test]
    async fn http_probe_maps_status_to_reachability() {
        let mut server = mockito::Server::new_async().await;
        let healthy = server
            .mock("GET", "/api/health")
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;
        let probe = HttpProbe::new(&server.url(), Duration::from_secs(2)).unwrap();
        assert!(probe.probe().await);
        healthy.assert_async().await;
        healthy.remove_async().await;

        server
            .mock("GET", "/api/health")
            .with_status(503)
            .create_async()
            .await;
        assert!(!probe.probe().await);
    }

    #[tokio::test]
    async fn http_probe_unreachable_is_offline() {
        // nothing listens on the discard port
        let probe = HttpProbe::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!probe.probe().await);
    }

    #[tokio::test]
    async fn monitor_follows_presence_and_probe() {
        let probe = Arc::new(FlagProbe {
            up: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
        });
        let (presence_tx, presence_rx) = watch::channel(false);
        let monitor =
            ConnectivityMonitor::new(probe.clone(), presence_rx, Duration::from_secs(3600));
        let (mut online, handle) = monitor.spawn();

        // first probe runs at start, platform still offline
        assert!(!*online.borrow());

        presence_tx.send(true).unwrap();
        online.wait_for(|up| *up).await.unwrap();
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);

        probe.up.store(false, Ordering::SeqCst);
        presence_tx.send(true).unwrap();
        online.wait_for(|up| !*up).await.unwrap();

        handle.abort();
    }
}
