//! Notification queue access
//!
//! [`QueueIterator`] wraps a [`QueueClient`] with the receive parameters the
//! pipeline uses and a cancellation token for cooperative shutdown.

mod sqs;

pub use sqs::SqsQueueClient;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::QueueError;
use crate::metrics::PipelineMetrics;

/// A received queue message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    pub body: String,
    /// Handle used to delete this delivery
    pub receipt_handle: String,
}

/// Queue service operations used by the pipeline
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Long-poll for up to `max_messages` messages
    async fn receive(
        &self,
        max_messages: i32,
        visibility_timeout: Duration,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError>;

    /// Delete one delivery
    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Approximate number of visible messages
    async fn approximate_depth(&self) -> Result<u64, QueueError>;
}

/// Receive parameters
#[derive(Debug, Clone, Copy)]
pub struct ReceiveSettings {
    pub max_messages: i32,
    pub visibility_timeout: Duration,
    pub wait_time: Duration,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        Self {
            max_messages: 10,
            visibility_timeout: Duration::from_secs(10),
            wait_time: Duration::from_secs(20),
        }
    }
}

/// Iterator-style access to the notification queue
pub struct QueueIterator {
    client: Arc<dyn QueueClient>,
    settings: ReceiveSettings,
    shutdown: CancellationToken,
    metrics: Arc<PipelineMetrics>,
}

impl QueueIterator {
    pub fn new(
        client: Arc<dyn QueueClient>,
        settings: ReceiveSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            client,
            settings,
            shutdown: CancellationToken::new(),
            metrics,
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// False once [`close`](Self::close) has been called
    pub fn has_next(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Receive the next batch; an empty batch is not an error
    pub async fn next(&self) -> Result<Vec<QueueMessage>, QueueError> {
        let messages = self
            .client
            .receive(
                self.settings.max_messages,
                self.settings.visibility_timeout,
                self.settings.wait_time,
            )
            .await?;
        tracing::trace!(count = messages.len(), "Received queue messages");
        Ok(messages)
    }

    /// Delete a processed message; failures are logged and reported as false
    pub async fn delete(&self, message: &QueueMessage) -> bool {
        match self.client.delete(&message.receipt_handle).await {
            Ok(()) => {
                self.metrics.messages_deleted_total.inc();
                tracing::debug!(message_id = %message.id, "Deleted queue message");
                true
            }
            Err(e) => {
                self.metrics.delete_failures_total.inc();
                tracing::error!(message_id = %message.id, error = %e, "Failed to delete queue message");
                false
            }
        }
    }

    /// Approximate queue depth, 0 when it cannot be read
    pub async fn approximate_backlog(&self) -> u64 {
        match self.client.approximate_depth().await {
            Ok(depth) => depth,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read queue depth");
                0
            }
        }
    }

    /// Stop iteration; in-flight calls are left to finish
    pub fn close(&self) {
        tracing::info!("Closing queue iterator");
        self.shutdown.cancel();
    }

    /// Token cancelled by [`close`](Self::close)
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}
