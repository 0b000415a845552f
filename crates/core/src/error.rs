//! Error types for the pipeline core

use thiserror::Error;

/// Decoding failures for queue bodies and change records
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The queue body is not a valid notification envelope
    #[error("Invalid notification envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// The payload is not a valid change record batch
    #[error("Invalid change record batch: {0}")]
    Batch(#[source] serde_json::Error),

    /// A single change record has the wrong shape
    #[error("Invalid change record: {0}")]
    Record(#[source] serde_json::Error),

    /// A required field of a change record is empty
    #[error("Change record is missing {0}")]
    MissingField(&'static str),
}

/// Failures reported by a [`BlobStore`](crate::download::BlobStore) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist (any more)
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The storage service rejected or failed the request
    #[error("Storage service error: {0}")]
    Service(String),

    /// The request could not be built or sent by the client
    #[error("Storage client error: {0}")]
    Client(String),
}

/// Outcome of a failed [`Downloader::fetch`](crate::download::Downloader::fetch)
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The etag or version constraint did not match the stored object
    #[error("Object s3://{bucket}/{key} did not match the requested etag/version")]
    ConstraintMismatch { bucket: String, key: String },

    /// The object exists but has no content
    #[error("Object s3://{bucket}/{key} is empty")]
    EmptyObject { bucket: String, key: String },

    /// The object was deleted before it could be fetched
    #[error("Object s3://{bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    /// The storage service failed; the fetch may succeed later
    #[error("Storage service error for s3://{bucket}/{key}: {message}")]
    Service {
        bucket: String,
        key: String,
        message: String,
    },

    /// The storage client failed before reaching the service
    #[error("Storage client error for s3://{bucket}/{key}: {message}")]
    Client {
        bucket: String,
        key: String,
        message: String,
    },
}

impl DownloadError {
    /// Whether the record should be counted as handled and the batch continued
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            DownloadError::ConstraintMismatch { .. }
                | DownloadError::EmptyObject { .. }
                | DownloadError::NotFound { .. }
        )
    }
}

/// Queue service failures
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue service is throttling or over its in-flight limit
    #[error("Queue over limit: {0}")]
    OverLimit(String),

    /// Any other queue service failure
    #[error("Queue service error: {0}")]
    Service(String),
}
