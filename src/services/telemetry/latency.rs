//! Round-trip latency to the VPN server.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::session::Lifecycle;
use crate::infra::probe::EchoProbe;
use crate::infra::profiles::ProfileSource;
use crate::state::session_store::SessionStore;

pub struct LatencyPoller {
    store: Arc<SessionStore>,
    profiles: Arc<dyn ProfileSource>,
    probe: Arc<dyn EchoProbe>,
    fallback_target: String,
    interval: Duration,
    timeout: Duration,
}

impl LatencyPoller {
    pub fn new(
        store: Arc<SessionStore>,
        profiles: Arc<dyn ProfileSource>,
        probe: Arc<dyn EchoProbe>,
        fallback_target: impl Into<String>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            profiles,
            probe,
            fallback_target: fallback_target.into(),
            interval,
            timeout,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            fallback = %self.fallback_target,
            interval_ms = self.interval.as_millis() as u64,
            "Latency poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick().await,
            }
        }

        debug!("Latency poller stopped");
    }

    /// One probe step. The result is dropped if the session changed meanwhile.
    pub async fn tick(&self) {
        let snapshot = self.store.snapshot();
        if snapshot.lifecycle != Lifecycle::Connected {
            self.store.mutate(|s| {
                if !s.is_connected() {
                    s.ping_ms = None;
                }
            });
            return;
        }

        let session_id = snapshot.session_id;
        let target = self.target_for(&snapshot.config_path).await;
        let rtt = self.probe.probe(&target, self.timeout).await;
        let ping_ms = rtt.map(|ms| ms.max(0.0).round() as u64);

        let committed = self.store.mutate(|s| {
            if s.is_current(session_id) {
                s.ping_ms = ping_ms;
                true
            } else {
                false
            }
        });
        if !committed {
            debug!(session_id, target = %target, "Discarded stale latency sample");
        }
    }

    async fn target_for(&self, config_path: &str) -> String {
        let from_config = match self.profiles.read(config_path).await {
            Ok(Some(bytes)) => probe_target_from_config(&String::from_utf8_lossy(&bytes)),
            Ok(None) => None,
            Err(e) => {
                debug!(config = %config_path, error = %e, "Failed to read profile for ping target");
                None
            }
        };
        from_config.unwrap_or_else(|| self.fallback_target.clone())
    }
}

/// Host of the first `remote <host> [port]` directive.
pub fn probe_target_from_config(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with("remote ") && !line.starts_with("remote-cert"))
        .find_map(|line| line.split_whitespace().nth(1).map(String::from))
}
