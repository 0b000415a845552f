//! In-memory collaborators shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pipeline_core::{
    BlobBody, BlobObject, BlobStore, EventSink, ObjectReference, PipelineMetrics, QueueClient,
    QueueError, QueueMessage, StoreError,
};

pub const SNS_NOTIFICATION: &str = include_str!("../fixtures/sns_notification.json");
pub const SQS_RECORDS: &str = include_str!("../fixtures/sqs_records.json");

pub fn metrics() -> Arc<PipelineMetrics> {
    Arc::new(PipelineMetrics::with_default_registry().unwrap())
}

pub fn gzip(content: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

/// `count` numbered lines, newline terminated
pub fn numbered_lines(prefix: &str, count: usize) -> String {
    (1..=count).map(|i| format!("{prefix} {i}\n")).collect()
}

pub fn message(id: &str, body: &str) -> QueueMessage {
    QueueMessage {
        id: id.to_string(),
        body: body.to_string(),
        receipt_handle: format!("receipt-{id}"),
    }
}

/// Direct (unwrapped) record batch naming `objects` as `(bucket, key, etag)`
pub fn records_body(objects: &[(&str, &str, Option<&str>)]) -> String {
    let records: Vec<serde_json::Value> = objects
        .iter()
        .map(|(bucket, key, etag)| {
            let mut object = serde_json::json!({"key": key, "size": 10});
            if let Some(etag) = etag {
                object["eTag"] = serde_json::Value::from(*etag);
            }
            serde_json::json!({
                "awsRegion": "us-east-1",
                "s3": {"bucket": {"name": bucket}, "object": object}
            })
        })
        .collect();
    serde_json::json!({ "Records": records }).to_string()
}

/// Chunked body that records whether it was dropped before the end
struct TrackedBody {
    chunks: VecDeque<Bytes>,
    aborted: Arc<AtomicBool>,
}

impl Stream for TrackedBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.chunks.pop_front().map(Ok))
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        if !self.chunks.is_empty() {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }
}

enum Entry {
    Object {
        content: Bytes,
        encoding: Option<String>,
        etag: String,
    },
    Failure(fn() -> StoreError),
}

/// Blob store over a map of `bucket/key` entries
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    requests: Mutex<Vec<String>>,
    aborted: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, bucket: &str, key: &str, content: impl Into<Bytes>, etag: &str) {
        self.insert(bucket, key, content.into(), None, etag);
    }

    pub fn put_gzip(&self, bucket: &str, key: &str, content: &str, etag: &str) {
        self.insert(
            bucket,
            key,
            Bytes::from(gzip(content.as_bytes())),
            Some("gzip".to_string()),
            etag,
        );
    }

    pub fn fail(&self, bucket: &str, key: &str, error: fn() -> StoreError) {
        self.entries
            .lock()
            .unwrap()
            .insert(format!("{bucket}/{key}"), Entry::Failure(error));
    }

    /// `bucket/key` of every request, in order
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Whether any body was dropped before it was fully read
    pub fn was_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn insert(&self, bucket: &str, key: &str, content: Bytes, encoding: Option<String>, etag: &str) {
        self.entries.lock().unwrap().insert(
            format!("{bucket}/{key}"),
            Entry::Object {
                content,
                encoding,
                etag: etag.to_string(),
            },
        );
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn get(&self, reference: &ObjectReference) -> Result<Option<BlobObject>, StoreError> {
        let path = format!("{}/{}", reference.bucket, reference.key);
        self.requests.lock().unwrap().push(path.clone());

        let entries = self.entries.lock().unwrap();
        let (content, encoding, etag) = match entries.get(&path) {
            None => return Err(StoreError::NotFound(path)),
            Some(Entry::Failure(error)) => return Err(error()),
            Some(Entry::Object {
                content,
                encoding,
                etag,
            }) => (content.clone(), encoding.clone(), etag.clone()),
        };

        if reference.etag.as_deref().is_some_and(|wanted| wanted != etag) {
            return Ok(None);
        }

        // Small chunks so lines and gzip blocks straddle chunk boundaries
        let chunks = content
            .chunks(7)
            .map(Bytes::copy_from_slice)
            .collect::<VecDeque<_>>();
        let body = TrackedBody {
            chunks,
            aborted: Arc::clone(&self.aborted),
        };

        Ok(Some(BlobObject {
            bucket: reference.bucket.clone(),
            key: reference.key.clone(),
            content_length: content.len() as u64,
            content_encoding: encoding,
            body: BlobBody::new(body),
        }))
    }
}

/// Sink that records lines and can lose its subscribers on cue
pub struct ScriptedSink {
    lines: Mutex<Vec<String>>,
    connected: AtomicBool,
    disconnect_after: Option<usize>,
    empty_checks: AtomicUsize,
}

impl ScriptedSink {
    pub fn connected() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            disconnect_after: None,
            empty_checks: AtomicUsize::new(0),
        })
    }

    pub fn without_subscribers() -> Arc<Self> {
        let sink = Self::connected();
        sink.connected.store(false, Ordering::SeqCst);
        sink
    }

    /// The last subscriber leaves while line `count` is being sent
    pub fn disconnecting_after(count: usize) -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
            disconnect_after: Some(count),
            empty_checks: AtomicUsize::new(0),
        })
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn empty_checks(&self) -> usize {
        self.empty_checks.load(Ordering::SeqCst)
    }
}

impl EventSink for ScriptedSink {
    fn is_empty(&self) -> bool {
        self.empty_checks.fetch_add(1, Ordering::SeqCst);
        !self.connected.load(Ordering::SeqCst)
    }

    fn test_and_broadcast(&self, record: &str) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return true;
        }
        let mut lines = self.lines.lock().unwrap();
        lines.push(record.to_string());
        if self.disconnect_after == Some(lines.len()) {
            self.connected.store(false, Ordering::SeqCst);
        }
        !self.connected.load(Ordering::SeqCst)
    }
}

/// Queue that serves scripted receive results, then closes itself
pub struct ScriptedQueue {
    receives: Mutex<VecDeque<Result<Vec<QueueMessage>, QueueError>>>,
    receive_calls: AtomicUsize,
    deleted: Mutex<Vec<String>>,
    depth: u64,
    shutdown: CancellationToken,
}

impl ScriptedQueue {
    pub fn new(
        receives: Vec<Result<Vec<QueueMessage>, QueueError>>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            receives: Mutex::new(receives.into()),
            receive_calls: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
            depth: 3,
            shutdown,
        })
    }

    pub fn receive_calls(&self) -> usize {
        self.receive_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        let mut deleted = self.deleted.lock().unwrap().clone();
        deleted.sort();
        deleted
    }
}

#[async_trait]
impl QueueClient for ScriptedQueue {
    async fn receive(
        &self,
        _max_messages: i32,
        _visibility_timeout: Duration,
        _wait_time: Duration,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        self.receive_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.receives.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => {
                self.shutdown.cancel();
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.deleted.lock().unwrap().push(receipt_handle.to_string());
        Ok(())
    }

    async fn approximate_depth(&self) -> Result<u64, QueueError> {
        Ok(self.depth)
    }
}
