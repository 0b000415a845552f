//! Object references decoded from storage change records
//!
//! A change record is one entry of the `Records` array carried by an object
//! storage notification. Two shapes have been produced over time:
//!
//! ```text
//! {"awsRegion": "us-east-1",
//!  "s3": {"bucket": {"name": "logs"},
//!         "object": {"key": "a.gz", "size": 1024, "eTag": "...", "versionId": "..."}}}
//! ```
//!
//! and a legacy variant that spells the tag `etag` and may leave `size` out
//! or null. Both decode through [`ObjectReference::from_record`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

/// Identifies one stored object and the exact revision a record refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Region of the bucket; empty when the record did not carry one
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Object key, as sent in the record
    pub key: String,
    /// Object size in bytes at notification time
    pub size: u64,
    /// Entity tag the fetch must match
    pub etag: Option<String>,
    /// Version the fetch must return
    pub version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(rename = "awsRegion", default)]
    aws_region: Option<String>,
    s3: RawEntity,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    bucket: RawBucket,
    object: RawObject,
}

#[derive(Debug, Deserialize)]
struct RawBucket {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    key: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "eTag", alias = "etag", default)]
    etag: Option<String>,
    #[serde(rename = "versionId", default)]
    version_id: Option<String>,
}

impl ObjectReference {
    /// Decode a single change record
    ///
    /// Unknown fields are ignored. A record without a bucket name or object
    /// key is rejected rather than defaulted.
    pub fn from_record(record: &Value) -> Result<Self, DecodeError> {
        let raw = RawRecord::deserialize(record).map_err(DecodeError::Record)?;

        if raw.s3.bucket.name.is_empty() {
            return Err(DecodeError::MissingField("bucket name"));
        }
        if raw.s3.object.key.is_empty() {
            return Err(DecodeError::MissingField("object key"));
        }

        Ok(Self {
            region: raw.aws_region.unwrap_or_default(),
            bucket: raw.s3.bucket.name,
            key: raw.s3.object.key,
            size: raw.s3.object.size.unwrap_or(0),
            etag: raw.s3.object.etag.filter(|tag| !tag.is_empty()),
            version_id: raw.s3.object.version_id.filter(|v| !v.is_empty()),
        })
    }

    /// `s3://bucket/key` form used in log lines
    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}
