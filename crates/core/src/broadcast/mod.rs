//! Fan-out of object lines to connected subscribers
//!
//! The hub is split in three:
//!
//! - [`SubscriberRegistry`] owns the subscriber channels and answers
//!   emptiness in O(1)
//! - [`Broadcaster`] is the send primitive the processor drives
//! - [`Heartbeat`] pings every subscriber on a fixed interval
//!
//! Sends never block: each subscriber has a bounded buffer and records that
//! do not fit are dropped for that subscriber only.

mod broadcaster;
mod heartbeat;
mod registry;

pub use broadcaster::Broadcaster;
pub use heartbeat::Heartbeat;
pub use registry::{SubscriberId, SubscriberRegistry, Subscription};

use std::sync::Arc;

/// Event name for object lines
pub const EVENT: &str = "event";

/// Event name (and payload) for heartbeats
pub const PING: &str = "ping";

/// One record sent to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEvent {
    pub name: &'static str,
    pub data: Arc<str>,
}

impl OutboundEvent {
    /// A line of object content
    pub fn event(line: &str) -> Self {
        Self {
            name: EVENT,
            data: Arc::from(line),
        }
    }

    /// A heartbeat
    pub fn ping() -> Self {
        Self {
            name: PING,
            data: Arc::from(PING),
        }
    }
}

/// Destination for object lines
pub trait EventSink: Send + Sync {
    /// No subscriber is connected
    fn is_empty(&self) -> bool;

    /// Send `record` to every subscriber
    ///
    /// Returns true when there was nobody to send to, either before the send
    /// or after it (every subscriber went away during the send). A true
    /// result tells the caller to stop producing.
    fn test_and_broadcast(&self, record: &str) -> bool;
}
