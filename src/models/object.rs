//! Represents an object (blob) stored in the bucket.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, io};

/// Free-form string metadata attached to an object.
pub type ObjectMetadata = BTreeMap<String, String>;

/// Payload of an object, produced chunk by chunk.
pub type ObjectBody = BoxStream<'static, io::Result<Bytes>>;

/// Descriptive record of a stored object, without its payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key (path-like identifier within the bucket).
    pub key: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 hex digest of the payload.
    pub etag: String,

    /// Content type (MIME type) supplied at upload time.
    pub content_type: Option<String>,

    /// Timestamp of the last write.
    pub last_modified: DateTime<Utc>,
}

/// An object returned by a bucket read: its record, metadata and payload.
pub struct StoredObject {
    pub info: ObjectInfo,
    pub metadata: ObjectMetadata,
    pub body: ObjectBody,
}

#[cfg(test)]
impl StoredObject {
    /// Drain the payload stream into one contiguous buffer.
    pub async fn into_bytes(self) -> io::Result<Bytes> {
        use bytes::BytesMut;
        use futures::StreamExt;

        let mut body = self.body;
        let mut buf = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

/// Listing parameters. Also the query string of `GET /api/storage`.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ListOptions {
    pub prefix: Option<String>,
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

/// One page of a listing.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,

    /// Opaque token to pass back as `cursor` for the next page.
    pub cursor: Option<String>,

    pub truncated: bool,
}
