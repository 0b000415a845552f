//! Blob downloads
//!
//! [`Downloader`] applies the etag/version constraints of an
//! [`ObjectReference`], rejects empty objects and hands back a streaming
//! body. The actual storage calls go through a [`BlobStore`], so the
//! processor can run against object storage in production and against an
//! in-memory store in tests.

mod store;

pub use store::ObjectStoreBlobStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::{DownloadError, StoreError};
use crate::reference::ObjectReference;

/// Storage backend able to fetch an object revision
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetch the object named by `reference`
    ///
    /// Returns `Ok(None)` when the etag or version constraint does not match
    /// the stored object.
    async fn get(&self, reference: &ObjectReference) -> Result<Option<BlobObject>, StoreError>;
}

/// Streaming object content
///
/// Chunks are yielded as they arrive from the store. Dropping the body (or
/// calling [`BlobBody::abort`]) closes the underlying transfer without reading
/// the rest of it.
pub struct BlobBody {
    inner: BoxStream<'static, io::Result<Bytes>>,
    received: u64,
}

impl BlobBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            received: 0,
        }
    }

    /// Body that yields nothing
    pub fn empty() -> Self {
        Self::new(futures::stream::empty())
    }

    /// Bytes pulled from the store so far
    pub fn bytes_received(&self) -> u64 {
        self.received
    }

    /// Stop the transfer without draining the remaining content
    pub fn abort(self) {
        tracing::debug!(bytes_received = self.received, "Aborting object transfer");
    }
}

impl Stream for BlobBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            self.received += chunk.len() as u64;
        }
        poll
    }
}

impl fmt::Debug for BlobBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobBody")
            .field("received", &self.received)
            .finish_non_exhaustive()
    }
}

/// A fetched object: metadata plus its open body
#[derive(Debug)]
pub struct BlobObject {
    pub bucket: String,
    pub key: String,
    /// Content length reported by the store
    pub content_length: u64,
    /// `Content-Encoding` metadata, if any
    pub content_encoding: Option<String>,
    pub body: BlobBody,
}

impl BlobObject {
    /// Whether the content must be gunzipped before reading lines
    pub fn is_gzipped(&self) -> bool {
        is_gzipped(self.content_encoding.as_deref(), Some(&self.key))
    }
}

/// Gzip detection from object metadata
///
/// True when the content encoding is `gzip` (trimmed, any case) or the key
/// ends with `.gz` (right-trimmed, any case). False when neither is known.
pub fn is_gzipped(content_encoding: Option<&str>, key: Option<&str>) -> bool {
    let encoded = content_encoding
        .map(|encoding| encoding.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);
    let suffixed = key
        .map(|key| key.trim_end().to_ascii_lowercase().ends_with(".gz"))
        .unwrap_or(false);
    encoded || suffixed
}

/// Conditional object fetcher
#[derive(Clone)]
pub struct Downloader {
    store: Arc<dyn BlobStore>,
}

impl Downloader {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Fetch the object named by `reference`
    ///
    /// Empty objects are closed before [`DownloadError::EmptyObject`] is
    /// returned; every other success hands the open body to the caller.
    pub async fn fetch(&self, reference: &ObjectReference) -> Result<BlobObject, DownloadError> {
        let bucket = reference.bucket.clone();
        let key = reference.key.clone();

        tracing::debug!(
            bucket = %bucket,
            key = %key,
            etag = ?reference.etag,
            version_id = ?reference.version_id,
            "Fetching object"
        );

        let object = match self.store.get(reference).await {
            Ok(Some(object)) => object,
            Ok(None) => return Err(DownloadError::ConstraintMismatch { bucket, key }),
            Err(StoreError::NotFound(_)) => return Err(DownloadError::NotFound { bucket, key }),
            Err(StoreError::Service(message)) => {
                return Err(DownloadError::Service {
                    bucket,
                    key,
                    message,
                })
            }
            Err(StoreError::Client(message)) => {
                return Err(DownloadError::Client {
                    bucket,
                    key,
                    message,
                })
            }
        };

        if object.content_length < 1 {
            object.body.abort();
            return Err(DownloadError::EmptyObject { bucket, key });
        }

        Ok(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Store that answers the first request with a scripted result
    struct Scripted {
        result: Mutex<Option<Result<Option<BlobObject>, StoreError>>>,
    }

    impl Scripted {
        fn new(result: Result<Option<BlobObject>, StoreError>) -> Arc<Self> {
            Arc::new(Self {
                result: Mutex::new(Some(result)),
            })
        }
    }

    #[async_trait]
    impl BlobStore for Scripted {
        async fn get(
            &self,
            _reference: &ObjectReference,
        ) -> Result<Option<BlobObject>, StoreError> {
            self.result
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(StoreError::Client("already consumed".into())))
        }
    }

    fn reference() -> ObjectReference {
        ObjectReference {
            region: "us-east-1".into(),
            bucket: "logs".into(),
            key: "a.log".into(),
            size: 5,
            etag: Some("tag".into()),
            version_id: None,
        }
    }

    fn object(content_length: u64) -> BlobObject {
        BlobObject {
            bucket: "logs".into(),
            key: "a.log".into(),
            content_length,
            content_encoding: None,
            body: BlobBody::new(futures::stream::iter(vec![Ok(Bytes::from_static(
                b"hello",
            ))])),
        }
    }

    #[test]
    fn test_is_gzipped_truth_table() {
        assert!(is_gzipped(Some("gzip"), Some("a.txt")));
        assert!(is_gzipped(Some("  GZip "), None));
        assert!(is_gzipped(None, Some("logs/a.GZ  ")));
        assert!(is_gzipped(Some("identity"), Some("a.gz")));
        assert!(!is_gzipped(Some("identity"), Some("a.txt")));
        assert!(!is_gzipped(Some("x-gzip"), Some("a.gzip")));
        assert!(!is_gzipped(None, Some("a.gz.txt")));
        assert!(!is_gzipped(None, None));
    }

    #[test]
    fn test_object_is_gzipped_uses_metadata() {
        let mut obj = object(5);
        assert!(!obj.is_gzipped());
        obj.content_encoding = Some("gzip".into());
        assert!(obj.is_gzipped());
    }

    #[tokio::test]
    async fn test_fetch_returns_open_body() {
        let downloader = Downloader::new(Scripted::new(Ok(Some(object(5)))));
        let mut fetched = downloader.fetch(&reference()).await.unwrap();

        let chunk = fetched.body.next().await.unwrap().unwrap();
        assert_eq!(&chunk[..], b"hello");
        assert_eq!(fetched.body.bytes_received(), 5);
    }

    async fn fetch_error(result: Result<Option<BlobObject>, StoreError>) -> DownloadError {
        Downloader::new(Scripted::new(result))
            .fetch(&reference())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_fetch_maps_store_outcomes() {
        let err = fetch_error(Ok(None)).await;
        assert!(matches!(err, DownloadError::ConstraintMismatch { .. }));
        assert!(err.is_skippable());

        let err = fetch_error(Ok(Some(object(0)))).await;
        assert!(matches!(err, DownloadError::EmptyObject { .. }));

        let err = fetch_error(Err(StoreError::NotFound("a.log".into()))).await;
        assert!(matches!(err, DownloadError::NotFound { .. }));
        assert!(err.is_skippable());

        let err = fetch_error(Err(StoreError::Service("SlowDown".into()))).await;
        assert!(matches!(err, DownloadError::Service { .. }));
        assert!(!err.is_skippable());

        let err = fetch_error(Err(StoreError::Client("bad endpoint".into()))).await;
        assert!(matches!(err, DownloadError::Client { .. }));
        assert!(!err.is_skippable());
    }
}
