//! The bucket adapter contract.
//!
//! `ObjectStore` is the seam between the HTTP endpoint and whatever keeps the
//! bytes. Implementations perform no retries: a failed call surfaces as a
//! `StorageError` and the caller decides what to do with it.

use crate::models::object::{ListOptions, ListPage, ObjectMetadata, StoredObject};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use std::{io, sync::Arc};
use thiserror::Error;

pub const MAX_OBJECT_KEY_LEN: usize = 1024;
pub const MAX_LIST_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error("corrupt metadata for object `{key}`: {source}")]
    CorruptMetadata {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// A remote key/value object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Short name of the backend, reported by the readiness probe.
    fn backend(&self) -> &'static str;

    /// Store `value` under `key`, replacing any existing object.
    ///
    /// Returns the URL the object can be fetched from.
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        content_type: Option<String>,
        metadata: Option<ObjectMetadata>,
    ) -> StorageResult<String>;

    /// Fetch an object. A missing key is `Ok(None)`, not an error.
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>>;

    /// Remove an object. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// List keys in ascending byte order, one page at a time.
    async fn list(&self, options: ListOptions) -> StorageResult<ListPage>;

    /// Verify the backend can currently serve requests.
    async fn health_check(&self) -> StorageResult<()>;
}

/// Store handle shared by all request handlers.
pub type SharedStore = Arc<dyn ObjectStore>;

/// Reject keys no backend should accept.
///
/// Keys are otherwise opaque: `/`, spaces and non-ASCII text are all fine.
pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
        return Err(StorageError::InvalidObjectKey);
    }
    if key.chars().any(char::is_control) {
        return Err(StorageError::InvalidObjectKey);
    }
    Ok(())
}

/// Page size actually used for a listing request.
pub fn effective_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

pub fn encode_cursor(last_key: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(last_key)
}

/// Tokens that do not decode are taken as a literal key.
pub fn decode_cursor(cursor: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| cursor.to_string())
}

/// MD5 hex digest used as the object's etag.
pub fn etag_of(value: &[u8]) -> String {
    format!("{:x}", md5::compute(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(ensure_key_safe("greeting.txt").is_ok());
        assert!(ensure_key_safe("photos/2025/über grün.jpg").is_ok());
        assert!(matches!(
            ensure_key_safe(""),
            Err(StorageError::InvalidObjectKey)
        ));
        assert!(ensure_key_safe("bad\0key").is_err());
        assert!(ensure_key_safe("line\nbreak").is_err());
        assert!(ensure_key_safe(&"k".repeat(MAX_OBJECT_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn limit_is_clamped() {
        assert_eq!(effective_limit(None), MAX_LIST_LIMIT);
        assert_eq!(effective_limit(Some(0)), 1);
        assert_eq!(effective_limit(Some(25)), 25);
        assert_eq!(effective_limit(Some(50_000)), MAX_LIST_LIMIT);
    }

    #[test]
    fn cursor_tokens() {
        let token = encode_cursor("photos/2025/img.jpg");
        assert_eq!(decode_cursor(&token), "photos/2025/img.jpg");
        assert_eq!(decode_cursor("not base64!"), "not base64!");
    }

    #[test]
    fn etag_is_md5_hex() {
        assert_eq!(etag_of(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }
}
