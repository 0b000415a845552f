//! [`QueueClient`] backed by Amazon SQS

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::QueueAttributeName;
use aws_sdk_sqs::Client;
use std::fmt::Debug;
use std::time::Duration;

use super::{QueueClient, QueueMessage};
use crate::error::QueueError;

/// SQS queue bound to one queue URL
#[derive(Debug, Clone)]
pub struct SqsQueueClient {
    client: Client,
    queue_url: String,
}

impl SqsQueueClient {
    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

/// Error codes SQS uses when a caller must back off
fn is_over_limit(code: &str) -> bool {
    code.contains("OverLimit") || code.contains("Throttl")
}

fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    R: Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&err));
    match err.as_service_error().and_then(|service| service.code()) {
        Some(code) if is_over_limit(code) => QueueError::OverLimit(message),
        _ => QueueError::Service(message),
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn receive(
        &self,
        max_messages: i32,
        visibility_timeout: Duration,
        wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .visibility_timeout(visibility_timeout.as_secs() as i32)
            .wait_time_seconds(wait_time.as_secs() as i32)
            .send()
            .await
            .map_err(|e| classify("ReceiveMessage", e))?;

        let messages = output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| QueueMessage {
                id: message.message_id.unwrap_or_default(),
                body: message.body.unwrap_or_default(),
                receipt_handle: message.receipt_handle.unwrap_or_default(),
            })
            .collect();
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| classify("DeleteMessage", e))?;
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| classify("GetQueueAttributes", e))?;

        let depth = output
            .attributes()
            .and_then(|attributes| attributes.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .and_then(|value| value.parse().ok())
            .unwrap_or(0);
        Ok(depth)
    }
}
