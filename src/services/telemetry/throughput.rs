//! Tunnel throughput from interface byte counters.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::session::Lifecycle;
use crate::infra::net_stats::{InterfaceCounters, InterfaceStats};
use crate::state::session_store::SessionStore;

/// Previous sample, private to the poller.
#[derive(Clone, Copy, Debug)]
struct Cursor {
    session_id: u64,
    counters: InterfaceCounters,
    at: Instant,
}

pub struct ThroughputPoller {
    store: Arc<SessionStore>,
    stats: Arc<dyn InterfaceStats>,
    interfaces: Vec<String>,
    interval: Duration,
    cursor: Option<Cursor>,
}

impl ThroughputPoller {
    pub fn new(
        store: Arc<SessionStore>,
        stats: Arc<dyn InterfaceStats>,
        interfaces: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            stats,
            interfaces,
            interval,
            cursor: None,
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            interfaces = ?self.interfaces,
            interval_ms = self.interval.as_millis() as u64,
            "Throughput poller started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick(Instant::now()).await,
            }
        }

        debug!("Throughput poller stopped");
    }

    /// One sampling step.
    pub async fn tick(&mut self, now: Instant) {
        let snapshot = self.store.snapshot();
        if snapshot.lifecycle != Lifecycle::Connected {
            self.cursor = None;
            self.store.mutate(|s| {
                if !s.is_connected() {
                    s.down_rate_mbps = 0.0;
                    s.up_rate_mbps = 0.0;
                }
            });
            return;
        }

        let session_id = snapshot.session_id;
        if self.cursor.is_some_and(|c| c.session_id != session_id) {
            self.cursor = None;
        }

        let Some(counters) = self.read_counters().await else {
            // keep the cursor, the interface may come back next tick
            self.write(session_id, 0.0, 0.0);
            return;
        };

        if let Some(prev) = self.cursor {
            let elapsed = now.saturating_duration_since(prev.at).as_secs_f64();
            if elapsed > 0.0 {
                let down = compute_rate_mbps(prev.counters.rx_bytes, counters.rx_bytes, elapsed);
                let up = compute_rate_mbps(prev.counters.tx_bytes, counters.tx_bytes, elapsed);
                self.write(session_id, down, up);
            }
        }

        self.cursor = Some(Cursor {
            session_id,
            counters,
            at: now,
        });
    }

    async fn read_counters(&self) -> Option<InterfaceCounters> {
        for iface in &self.interfaces {
            if let Some(counters) = self.stats.read_counters(iface).await {
                return Some(counters);
            }
        }
        None
    }

    fn write(&self, session_id: u64, down: f64, up: f64) {
        self.store.mutate(|s| {
            if s.is_current(session_id) {
                s.down_rate_mbps = down;
                s.up_rate_mbps = up;
            }
        });
    }
}

/// Megabits per second between two counter readings, rounded to 2 decimals.
///
/// A counter that went backwards (reset or wraparound) gives 0.
pub fn compute_rate_mbps(prev_bytes: u64, bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    let delta = bytes.saturating_sub(prev_bytes) as f64;
    let mbps = (8.0 * delta / elapsed_secs / 1_000_000.0).max(0.0);
    (mbps * 100.0).round() / 100.0
}
