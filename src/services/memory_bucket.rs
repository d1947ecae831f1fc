//! In-process bucket backed by an ordered map.

use crate::{
    models::{
        key::file_url,
        object::{ListOptions, ListPage, ObjectInfo, ObjectMetadata, StoredObject},
    },
    services::bucket::{
        ObjectStore, StorageResult, decode_cursor, effective_limit, encode_cursor,
        ensure_key_safe, etag_of,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use std::{collections::BTreeMap, ops::Bound, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Clone)]
struct MemoryObject {
    info: ObjectInfo,
    metadata: ObjectMetadata,
    data: Bytes,
}

/// Keeps every object in memory. Contents are lost when the process exits.
#[derive(Clone, Default)]
pub struct MemoryBucket {
    objects: Arc<RwLock<BTreeMap<String, MemoryObject>>>,
}

impl MemoryBucket {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryBucket {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        value: Bytes,
        content_type: Option<String>,
        metadata: Option<ObjectMetadata>,
    ) -> StorageResult<String> {
        ensure_key_safe(key)?;
        let object = MemoryObject {
            info: ObjectInfo {
                key: key.to_string(),
                size_bytes: value.len() as i64,
                etag: etag_of(&value),
                content_type,
                last_modified: Utc::now(),
            },
            metadata: metadata.unwrap_or_default(),
            data: value,
        };
        self.objects.write().await.insert(key.to_string(), object);
        debug!("stored {} in memory", key);
        Ok(file_url(key))
    }

    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        ensure_key_safe(key)?;
        let objects = self.objects.read().await;
        Ok(objects.get(key).cloned().map(|object| {
            let data = object.data;
            StoredObject {
                info: object.info,
                metadata: object.metadata,
                body: stream::once(async move { Ok(data) }).boxed(),
            }
        }))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        if self.objects.write().await.remove(key).is_none() {
            debug!("{} already absent", key);
        }
        Ok(())
    }

    async fn list(&self, options: ListOptions) -> StorageResult<ListPage> {
        let limit = effective_limit(options.limit);
        let after = options.cursor.as_deref().map(decode_cursor);
        let lower = match after.as_deref() {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let prefix = options.prefix.as_deref().unwrap_or("");

        let objects = self.objects.read().await;
        let mut page: Vec<ObjectInfo> = objects
            .range::<str, _>((lower, Bound::Unbounded))
            .filter(|(key, _)| key.starts_with(prefix))
            .take(limit + 1)
            .map(|(_, object)| object.info.clone())
            .collect();

        let truncated = page.len() > limit;
        page.truncate(limit);
        let cursor = if truncated {
            page.last().map(|info| encode_cursor(&info.key))
        } else {
            None
        };

        Ok(ListPage {
            objects: page,
            cursor,
            truncated,
        })
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
