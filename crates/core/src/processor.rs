//! Per-message orchestration
//!
//! A queue message names one or more objects. Each object is fetched,
//! decompressed when needed and broadcast line by line. The
//! [`ProcessingOutcome`] tells the runner whether the message may be deleted.

use bytes::Bytes;
use serde_json::Value;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader, ReadBuf};
use tokio_util::io::StreamReader;

use crate::broadcast::EventSink;
use crate::decompress::StreamingGzipDecoder;
use crate::download::{BlobBody, BlobObject, Downloader};
use crate::metrics::PipelineMetrics;
use crate::notification::{ChangeRecordBatch, NotificationEnvelope};
use crate::queue::QueueMessage;
use crate::reference::ObjectReference;

/// Why a message is left on the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Nobody is listening
    NoSubscribers,
    /// The storage service failed
    FetchFailed,
    /// Every subscriber went away while an object was streaming
    SubscribersLost,
    /// Reading or decompressing an object failed midway
    StreamFailed,
}

/// Why a message is deleted without being broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    InvalidEnvelope,
    InvalidRecords,
    NoRecords,
}

/// Result of processing one queue message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Every record was streamed or skipped
    Processed { records: usize, events: u64 },
    /// Leave the message for redelivery
    Retry(RetryReason),
    /// The message can never be processed
    Discard(DiscardReason),
}

impl ProcessingOutcome {
    /// Whether the message should be acknowledged
    pub fn should_delete(&self) -> bool {
        !matches!(self, ProcessingOutcome::Retry(_))
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Processed { .. } => "processed",
            ProcessingOutcome::Retry(_) => "retry",
            ProcessingOutcome::Discard(_) => "discard",
        }
    }
}

enum RecordOutcome {
    Streamed(u64),
    Skipped,
    Aborted(RetryReason),
}

/// Turns queue messages into broadcast lines
pub struct MessageProcessor {
    downloader: Downloader,
    sink: Arc<dyn EventSink>,
    metrics: Arc<PipelineMetrics>,
}

impl MessageProcessor {
    pub fn new(
        downloader: Downloader,
        sink: Arc<dyn EventSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            downloader,
            sink,
            metrics,
        }
    }

    /// Process one queue message
    pub async fn process(&self, message: &QueueMessage) -> ProcessingOutcome {
        let outcome = self.process_message(message).await;
        self.metrics.record_outcome(outcome.label());
        tracing::debug!(message_id = %message.id, ?outcome, "Processed queue message");
        outcome
    }

    async fn process_message(&self, message: &QueueMessage) -> ProcessingOutcome {
        if self.sink.is_empty() {
            tracing::debug!(message_id = %message.id, "No subscribers, leaving message on the queue");
            return ProcessingOutcome::Retry(RetryReason::NoSubscribers);
        }

        let envelope = match NotificationEnvelope::decode(&message.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Discarding malformed queue message");
                return ProcessingOutcome::Discard(DiscardReason::InvalidEnvelope);
            }
        };

        if let Some(delay) = envelope.delay() {
            let seconds = delay.num_milliseconds().max(0) as f64 / 1000.0;
            self.metrics.notification_delay_seconds.observe(seconds);
            tracing::debug!(message_id = %message.id, delay_seconds = seconds, "Notification age");
        }

        let batch = match ChangeRecordBatch::parse(envelope.payload(&message.body)) {
            Ok(batch) => batch,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Discarding message with malformed records");
                return ProcessingOutcome::Discard(DiscardReason::InvalidRecords);
            }
        };

        let total = batch.len();
        self.metrics.records_per_message.observe(total as f64);
        if batch.is_empty() {
            tracing::warn!(message_id = %message.id, "Discarding message without change records");
            return ProcessingOutcome::Discard(DiscardReason::NoRecords);
        }

        let mut events = 0;
        for (processed, record) in batch.records().enumerate() {
            if self.sink.is_empty() {
                tracing::debug!(
                    message_id = %message.id,
                    processed,
                    total,
                    "Subscribers gone, leaving remaining records for redelivery"
                );
                return ProcessingOutcome::Retry(RetryReason::NoSubscribers);
            }

            match self.process_record(&message.id, record).await {
                RecordOutcome::Streamed(count) => events += count,
                RecordOutcome::Skipped => {}
                RecordOutcome::Aborted(reason) => return ProcessingOutcome::Retry(reason),
            }
        }

        ProcessingOutcome::Processed {
            records: total,
            events,
        }
    }

    async fn process_record(&self, message_id: &str, record: &Value) -> RecordOutcome {
        let reference = match ObjectReference::from_record(record) {
            Ok(reference) => reference,
            Err(e) => {
                tracing::error!(message_id, error = %e, "Skipping undecodable change record");
                return RecordOutcome::Skipped;
            }
        };

        let object = match self.downloader.fetch(&reference).await {
            Ok(object) => object,
            Err(e) if e.is_skippable() => {
                tracing::warn!(message_id, object = %reference.uri(), error = %e, "Skipping object");
                return RecordOutcome::Skipped;
            }
            Err(e) => {
                tracing::error!(
                    message_id,
                    object = %reference.uri(),
                    error = %e,
                    "Failed to fetch object, skipping remaining records"
                );
                return RecordOutcome::Aborted(RetryReason::FetchFailed);
            }
        };

        self.stream_object(message_id, object).await
    }

    async fn stream_object(&self, message_id: &str, object: BlobObject) -> RecordOutcome {
        let gzipped = object.is_gzipped();
        let BlobObject {
            bucket, key, body, ..
        } = object;
        let source = if gzipped {
            LineSource::Gzip(StreamingGzipDecoder::new(body))
        } else {
            LineSource::Plain(StreamReader::new(body))
        };

        let mut reader = LineReader::new(BufReader::new(source));
        let mut line = Vec::new();
        let mut events = 0;
        loop {
            match reader.next_line(&mut line).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    tracing::error!(
                        message_id,
                        bucket = %bucket,
                        key = %key,
                        events,
                        error = %e,
                        "Failed to read object"
                    );
                    return RecordOutcome::Aborted(RetryReason::StreamFailed);
                }
            }

            if line.is_empty() {
                continue;
            }

            let record = String::from_utf8_lossy(&line);
            let lost = self.sink.test_and_broadcast(&record);
            events += 1;
            if lost {
                tracing::warn!(
                    message_id,
                    bucket = %bucket,
                    key = %key,
                    events,
                    "No subscribers left, aborting object transfer"
                );
                self.metrics.events_per_object.observe(events as f64);
                reader.into_inner().into_inner().into_body().abort();
                return RecordOutcome::Aborted(RetryReason::SubscribersLost);
            }
        }

        self.metrics.events_per_object.observe(events as f64);
        tracing::debug!(message_id, bucket = %bucket, key = %key, gzipped, events, "Object broadcast");
        RecordOutcome::Streamed(events)
    }
}

/// Splits text into lines ending at `\n`, `\r` or `\r\n`
struct LineReader<R> {
    inner: R,
    /// The previous line ended at `\r`; a leading `\n` belongs to it
    skip_newline: bool,
}

impl<R: AsyncBufRead + Unpin> LineReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            skip_newline: false,
        }
    }

    fn into_inner(self) -> R {
        self.inner
    }

    /// Read the next line into `line`, without its terminator
    ///
    /// Returns false once the input is exhausted.
    async fn next_line(&mut self, line: &mut Vec<u8>) -> io::Result<bool> {
        line.clear();
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                return Ok(!line.is_empty());
            }

            let start = if self.skip_newline && available[0] == b'\n' { 1 } else { 0 };
            self.skip_newline = false;

            let terminator = available[start..]
                .iter()
                .position(|&b| b == b'\n' || b == b'\r')
                .map(|i| start + i);
            match terminator {
                Some(end) => {
                    line.extend_from_slice(&available[start..end]);
                    self.skip_newline = available[end] == b'\r';
                    self.inner.consume(end + 1);
                    return Ok(true);
                }
                None => {
                    let consumed = available.len();
                    line.extend_from_slice(&available[start..]);
                    self.inner.consume(consumed);
                }
            }
        }
    }
}

/// Object content, raw or gunzipped
enum LineSource {
    Plain(StreamReader<BlobBody, Bytes>),
    Gzip(StreamingGzipDecoder<BlobBody>),
}

impl LineSource {
    fn into_body(self) -> BlobBody {
        match self {
            LineSource::Plain(reader) => reader.into_inner(),
            LineSource::Gzip(decoder) => decoder.into_inner(),
        }
    }
}

impl AsyncRead for LineSource {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            LineSource::Plain(reader) => Pin::new(reader).poll_read(cx, buf),
            LineSource::Gzip(decoder) => Pin::new(decoder).poll_read(cx, buf),
        }
    }
}
