use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::{OutboundEvent, SubscriberRegistry};
use crate::metrics::PipelineMetrics;

/// Periodic `ping` to every subscriber
///
/// Pings keep idle connections alive through proxies and flush out
/// subscribers whose connection has gone away.
#[derive(Clone)]
pub struct Heartbeat {
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<PipelineMetrics>,
    interval: Duration,
}

impl Heartbeat {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        metrics: Arc<PipelineMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            metrics,
            interval,
        }
    }

    /// Send one ping to every subscriber
    pub fn ping(&self) {
        if self.registry.is_empty() {
            return;
        }
        let delivered = self.registry.send_all(&OutboundEvent::ping());
        self.metrics.ping_sends_total.inc();
        tracing::trace!(delivered, "Heartbeat sent");
    }

    /// Ping on every interval tick until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Heartbeat stopped");
                    break;
                }
                _ = ticker.tick() => self.ping(),
            }
        }
    }
}
