//! Main pipeline loop
//!
//! ```text
//! loop until the queue is closed:
//!   ping subscribers
//!   nobody listening?      -> sleep, retry
//!   receive up to N messages (long poll)
//!   over limit?            -> back off
//!   process each message on its own task, delete the finished ones
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::broadcast::{EventSink, Heartbeat};
use crate::error::QueueError;
use crate::metrics::PipelineMetrics;
use crate::processor::MessageProcessor;
use crate::queue::{QueueIterator, QueueMessage};

/// Loop timing
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    /// Sleep when nobody is subscribed, and after transient queue errors
    pub idle_sleep: Duration,
    /// Sleep after the queue reports it is over its limit
    pub overload_sleep: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(1),
            overload_sleep: Duration::from_secs(10),
        }
    }
}

/// Drives messages from the queue through the processor
pub struct PipelineRunner {
    queue: Arc<QueueIterator>,
    processor: Arc<MessageProcessor>,
    sink: Arc<dyn EventSink>,
    heartbeat: Heartbeat,
    settings: RunnerSettings,
    metrics: Arc<PipelineMetrics>,
}

impl PipelineRunner {
    pub fn new(
        queue: Arc<QueueIterator>,
        processor: Arc<MessageProcessor>,
        sink: Arc<dyn EventSink>,
        heartbeat: Heartbeat,
        settings: RunnerSettings,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            queue,
            processor,
            sink,
            heartbeat,
            settings,
            metrics,
        }
    }

    /// Run until the queue iterator is closed
    pub async fn run(self) {
        tracing::info!("Pipeline runner started");

        while self.queue.has_next() {
            self.heartbeat.ping();

            if self.sink.is_empty() {
                tracing::trace!("No subscribers, idling");
                self.sleep(self.settings.idle_sleep).await;
                continue;
            }

            let backlog = self.queue.approximate_backlog().await;
            self.metrics.queue_backlog.set(backlog as i64);

            let messages = match self.queue.next().await {
                Ok(messages) => messages,
                Err(QueueError::OverLimit(e)) => {
                    tracing::error!(error = %e, "Queue over limit, backing off");
                    self.sleep(self.settings.overload_sleep).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive queue messages");
                    self.sleep(self.settings.idle_sleep).await;
                    continue;
                }
            };

            if !messages.is_empty() {
                self.dispatch(messages).await;
            }
        }

        tracing::info!("Pipeline runner stopped");
    }

    /// Process a batch concurrently and delete the messages that are done
    async fn dispatch(&self, messages: Vec<QueueMessage>) {
        let mut tasks = JoinSet::new();
        for message in messages {
            let processor = Arc::clone(&self.processor);
            let queue = Arc::clone(&self.queue);
            tasks.spawn(async move {
                let outcome = processor.process(&message).await;
                if outcome.should_delete() {
                    queue.delete(&message).await;
                }
            });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Message processing task failed");
            }
        }
    }

    /// Sleep, waking early when the queue is closed
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.queue.shutdown_token().cancelled() => {}
        }
    }
}
