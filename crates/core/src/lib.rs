//! Object Tail Pipeline Core
//!
//! Watches a queue of object storage change notifications, fetches every
//! referenced object and broadcasts each line of it to the currently
//! connected subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────────┐   ┌────────────┐   ┌──────────────┐
//! │ QueueIterator│──▶│ MessageProcessor │──▶│ Downloader │──▶│ Gzip decoder │
//! │ (long poll)  │   │ (one task / msg) │   │ (etag/ver) │   │ (streaming)  │
//! └──────▲───────┘   └────────┬─────────┘   └────────────┘   └──────┬───────┘
//!        │ delete             │ outcome                             │ lines
//!        │                    ▼                                     ▼
//! ┌──────┴──────────────────────────┐                      ┌──────────────────┐
//! │ PipelineRunner                  │                      │ Broadcaster      │
//! │ (heartbeat, idle + overload     │                      │ → registry       │
//! │  back-off, shutdown)            │                      │ → subscribers    │
//! └─────────────────────────────────┘                      └──────────────────┘
//! ```
//!
//! Messages are only deleted once every object they name has been broadcast
//! or can never be; anything else is left for redelivery.

pub mod broadcast;
pub mod decompress;
pub mod download;
pub mod error;
pub mod metrics;
pub mod notification;
pub mod processor;
pub mod queue;
pub mod reference;
pub mod runner;

pub use broadcast::{Broadcaster, EventSink, Heartbeat, OutboundEvent, SubscriberRegistry, Subscription};
pub use download::{BlobBody, BlobObject, BlobStore, Downloader, ObjectStoreBlobStore};
pub use error::{DecodeError, DownloadError, QueueError, StoreError};
pub use metrics::PipelineMetrics;
pub use processor::{DiscardReason, MessageProcessor, ProcessingOutcome, RetryReason};
pub use queue::{QueueClient, QueueIterator, QueueMessage, ReceiveSettings, SqsQueueClient};
pub use reference::ObjectReference;
pub use runner::{PipelineRunner, RunnerSettings};
