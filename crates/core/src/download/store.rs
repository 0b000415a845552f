//! [`BlobStore`] backed by `object_store`
//!
//! Notifications can name any bucket, so one store client is built lazily
//! per bucket and cached.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{Attribute, GetOptions, ObjectStore};
use std::io;
use std::sync::Arc;

use super::{BlobBody, BlobObject, BlobStore};
use crate::error::StoreError;
use crate::reference::ObjectReference;

/// Builds the store client for `(bucket, region)`
pub type StoreFactory =
    Box<dyn Fn(&str, &str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync>;

/// Object storage client cache keyed by bucket
pub struct ObjectStoreBlobStore {
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    factory: StoreFactory,
    default_region: String,
}

impl ObjectStoreBlobStore {
    /// S3 stores configured from the environment
    ///
    /// `endpoint` overrides the service URL (S3-compatible stores, local
    /// emulators); plain `http://` endpoints are allowed in that case.
    pub fn s3(default_region: impl Into<String>, endpoint: Option<String>) -> Self {
        Self::with_factory(default_region, move |bucket, region| {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region);
            if let Some(endpoint) = &endpoint {
                builder = builder
                    .with_endpoint(endpoint)
                    .with_allow_http(endpoint.starts_with("http://"));
            }
            let store: Arc<dyn ObjectStore> = Arc::new(builder.build()?);
            Ok(store)
        })
    }

    /// Stores produced by a custom factory
    pub fn with_factory<F>(default_region: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&str, &str) -> object_store::Result<Arc<dyn ObjectStore>> + Send + Sync + 'static,
    {
        Self {
            stores: DashMap::new(),
            factory: Box::new(factory),
            default_region: default_region.into(),
        }
    }

    /// Number of buckets with a cached client
    pub fn cached_buckets(&self) -> usize {
        self.stores.len()
    }

    fn store_for(&self, bucket: &str, region: &str) -> Result<Arc<dyn ObjectStore>, StoreError> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(Arc::clone(store.value()));
        }

        let region = if region.is_empty() {
            self.default_region.as_str()
        } else {
            region
        };
        let store = (self.factory)(bucket, region).map_err(|e| {
            StoreError::Client(format!("failed to build store for bucket {bucket}: {e}"))
        })?;
        tracing::info!(bucket, region, "Created object store client");

        let entry = self
            .stores
            .entry(bucket.to_string())
            .or_insert(store);
        Ok(Arc::clone(entry.value()))
    }
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn get(&self, reference: &ObjectReference) -> Result<Option<BlobObject>, StoreError> {
        let store = self.store_for(&reference.bucket, &reference.region)?;
        let location = Path::from(reference.key.as_str());
        let options = GetOptions {
            if_match: reference.etag.clone(),
            version: reference.version_id.clone(),
            ..Default::default()
        };

        match store.get_opts(&location, options).await {
            Ok(result) => {
                let content_encoding = result
                    .attributes
                    .get(&Attribute::ContentEncoding)
                    .map(|value| value.to_string());
                let content_length = result.meta.size as u64;
                let body = BlobBody::new(result.into_stream().map_err(io::Error::other));

                Ok(Some(BlobObject {
                    bucket: reference.bucket.clone(),
                    key: reference.key.clone(),
                    content_length,
                    content_encoding,
                    body,
                }))
            }
            Err(object_store::Error::Precondition { .. })
            | Err(object_store::Error::NotModified { .. }) => Ok(None),
            Err(object_store::Error::NotFound { path, .. }) => Err(StoreError::NotFound(path)),
            Err(
                e @ (object_store::Error::InvalidPath { .. }
                | object_store::Error::NotSupported { .. }
                | object_store::Error::NotImplemented
                | object_store::Error::UnknownConfigurationKey { .. }),
            ) => Err(StoreError::Client(e.to_string())),
            Err(e) => Err(StoreError::Service(e.to_string())),
        }
    }
}
