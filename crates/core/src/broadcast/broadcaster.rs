use std::sync::Arc;

use super::{EventSink, OutboundEvent, SubscriberRegistry};
use crate::metrics::PipelineMetrics;

/// Sends object lines to every subscriber of a registry
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    metrics: Arc<PipelineMetrics>,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>, metrics: Arc<PipelineMetrics>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }
}

impl EventSink for Broadcaster {
    fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    fn test_and_broadcast(&self, record: &str) -> bool {
        if self.registry.is_empty() {
            tracing::trace!("No subscribers, not broadcasting");
            return true;
        }

        self.registry.send_all(&OutboundEvent::event(record));
        self.metrics.event_sends_total.inc();

        if self.registry.is_empty() {
            tracing::debug!("Last subscriber went away during broadcast");
            return true;
        }
        false
    }
}
