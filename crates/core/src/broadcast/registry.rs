//! Subscriber registry

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::OutboundEvent;
use crate::metrics::PipelineMetrics;

/// Registry-assigned subscriber identifier
pub type SubscriberId = u64;

/// Connected subscribers and their outbound channels
pub struct SubscriberRegistry {
    subscribers: DashMap<SubscriberId, mpsc::Sender<OutboundEvent>>,
    next_id: AtomicU64,
    active: AtomicUsize,
    limit: Option<usize>,
    metrics: Arc<PipelineMetrics>,
}

impl SubscriberRegistry {
    pub fn new(metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            limit: None,
            metrics,
        }
    }

    /// Cap the number of concurrent subscribers; `None` means unlimited
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Register a subscriber channel
    ///
    /// Returns `None` when the channel is already closed or the registry is
    /// full. The subscriber stays registered until the returned
    /// [`Subscription`] is dropped or a send finds its channel closed.
    pub fn subscribe(self: &Arc<Self>, channel: mpsc::Sender<OutboundEvent>) -> Option<Subscription> {
        if channel.is_closed() {
            tracing::warn!("Rejecting subscriber with a closed channel");
            return None;
        }
        // Reserve the slot before the channel becomes visible to senders
        let reserved = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| match self.limit {
                Some(limit) if active >= limit => None,
                _ => Some(active + 1),
            });
        let active = match reserved {
            Ok(previous) => previous + 1,
            Err(active) => {
                tracing::warn!(active, limit = ?self.limit, "Subscriber limit reached, rejecting subscriber");
                return None;
            }
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, channel);
        self.metrics.active_connections.inc();
        tracing::debug!(subscriber_id = id, active, "Subscriber registered");

        Some(Subscription {
            id,
            registry: Arc::clone(self),
        })
    }

    /// Remove a subscriber; returns false if it was not registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        if self.subscribers.remove(&id).is_none() {
            return false;
        }
        let released = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| active.checked_sub(1));
        match released {
            Ok(previous) => {
                self.metrics.active_connections.dec();
                tracing::debug!(subscriber_id = id, active = previous - 1, "Subscriber removed");
            }
            Err(_) => {
                tracing::error!(subscriber_id = id, "Subscriber count already zero");
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }

    pub fn len(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Offer `event` to every subscriber registered at call time
    ///
    /// Returns the number of subscribers that accepted it. A full buffer
    /// drops the event for that subscriber; a closed channel removes the
    /// subscriber.
    pub fn send_all(&self, event: &OutboundEvent) -> usize {
        let snapshot: Vec<(SubscriberId, mpsc::Sender<OutboundEvent>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, sender) in snapshot {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    self.metrics.dropped_events_total.inc();
                    tracing::warn!(
                        subscriber_id = id,
                        event = event.name,
                        "Subscriber buffer full, dropping record"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(subscriber_id = id, "Subscriber write failed, closing connection");
                    self.unsubscribe(id);
                }
            }
        }
        delivered
    }
}

/// Handle that keeps a subscriber registered
///
/// Dropping it is the close callback of the underlying connection.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    registry: Arc<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("active", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<SubscriberRegistry> {
        let metrics = Arc::new(PipelineMetrics::with_default_registry().unwrap());
        Arc::new(SubscriberRegistry::new(metrics))
    }

    #[test]
    fn test_subscribe_and_drop() {
        let registry = registry();
        assert!(registry.is_empty());

        let (tx, _rx) = mpsc::channel(4);
        let subscription = registry.subscribe(tx).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.metrics.active_connections.get(), 1);

        drop(subscription);
        assert!(registry.is_empty());
        assert_eq!(registry.metrics.active_connections.get(), 0);
    }

    #[test]
    fn test_closed_channel_is_rejected() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        assert!(registry.subscribe(tx).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_limit_rejects_extra_subscribers() {
        let metrics = Arc::new(PipelineMetrics::with_default_registry().unwrap());
        let registry = Arc::new(SubscriberRegistry::new(metrics).with_limit(Some(1)));

        let (tx_a, _rx_a) = mpsc::channel(4);
        let (tx_b, _rx_b) = mpsc::channel(4);
        let first = registry.subscribe(tx_a).unwrap();
        assert!(registry.subscribe(tx_b.clone()).is_none());

        drop(first);
        assert!(registry.subscribe(tx_b).is_some());
    }

    #[test]
    fn test_concurrent_subscribes_respect_limit() {
        let metrics = Arc::new(PipelineMetrics::with_default_registry().unwrap());
        let registry = Arc::new(SubscriberRegistry::new(metrics).with_limit(Some(5)));
        let barrier = std::sync::Barrier::new(16);
        let (registry_ref, barrier_ref) = (&registry, &barrier);

        let accepted: Vec<(Subscription, mpsc::Receiver<OutboundEvent>)> =
            std::thread::scope(|scope| {
                let workers: Vec<_> = (0..16)
                    .map(|_| {
                        scope.spawn(move || {
                            let (tx, rx) = mpsc::channel(4);
                            barrier_ref.wait();
                            registry_ref.subscribe(tx).map(|subscription| (subscription, rx))
                        })
                    })
                    .collect();
                workers
                    .into_iter()
                    .filter_map(|worker| worker.join().unwrap())
                    .collect()
            });

        assert_eq!(accepted.len(), 5);
        assert_eq!(registry.len(), 5);
        assert_eq!(registry.metrics.active_connections.get(), 5);
        drop(accepted);
        assert!(registry.is_empty());
    }

    /// Subscribers that hang up while others broadcast never corrupt the count
    #[test]
    fn test_count_survives_concurrent_hangups() {
        let registry = registry();
        let done = std::sync::atomic::AtomicBool::new(false);
        let (registry_ref, done_ref) = (&registry, &done);

        std::thread::scope(|scope| {
            scope.spawn(move || {
                while !done_ref.load(Ordering::SeqCst) {
                    registry_ref.send_all(&OutboundEvent::ping());
                }
            });
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(move || {
                        for _ in 0..500 {
                            let (tx, rx) = mpsc::channel(1);
                            let subscription = registry_ref.subscribe(tx);
                            drop(rx);
                            registry_ref.send_all(&OutboundEvent::event("x"));
                            drop(subscription);
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        assert!(registry.is_empty());
        assert_eq!(registry.metrics.active_connections.get(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(4);
        let subscription = registry.subscribe(tx).unwrap();

        assert!(registry.unsubscribe(subscription.id()));
        assert!(!registry.unsubscribe(subscription.id()));
        drop(subscription);
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_send_all_delivers_to_every_subscriber() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let _a = registry.subscribe(tx_a).unwrap();
        let _b = registry.subscribe(tx_b).unwrap();

        assert_eq!(registry.send_all(&OutboundEvent::event("line")), 2);
        assert_eq!(rx_a.try_recv().unwrap(), OutboundEvent::event("line"));
        assert_eq!(rx_b.try_recv().unwrap(), OutboundEvent::event("line"));
    }

    #[test]
    fn test_full_buffer_drops_only_for_that_subscriber() {
        let registry = registry();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let _slow = registry.subscribe(slow_tx).unwrap();
        let _fast = registry.subscribe(fast_tx).unwrap();

        registry.send_all(&OutboundEvent::event("1"));
        assert_eq!(registry.send_all(&OutboundEvent::event("2")), 1);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.metrics.dropped_events_total.get(), 1);
        assert_eq!(&*slow_rx.try_recv().unwrap().data, "1");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(&*fast_rx.try_recv().unwrap().data, "1");
        assert_eq!(&*fast_rx.try_recv().unwrap().data, "2");
    }

    #[test]
    fn test_closed_subscriber_is_removed_on_send() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(4);
        let subscription = registry.subscribe(tx).unwrap();
        drop(rx);

        assert_eq!(registry.send_all(&OutboundEvent::ping()), 0);
        assert!(registry.is_empty());

        // Dropping the handle afterwards must not underflow the count
        drop(subscription);
        assert!(registry.is_empty());
    }
}
