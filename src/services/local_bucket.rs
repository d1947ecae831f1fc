//! src/services/local_bucket.rs
//!
//! LocalBucket — bucket backed by SQLite for object records and local disk
//! for payloads. Every write lands in its own file beneath
//! `base_path/{shard}/{shard}/{md5(key)}-{uuid}` and the row records which
//! file it describes, so arbitrary keys never turn into arbitrary filesystem
//! paths and a row never points at another writer's bytes.

use crate::{
    models::{
        key::file_url,
        object::{ListOptions, ListPage, ObjectInfo, ObjectMetadata, StoredObject},
    },
    services::bucket::{
        ObjectStore, StorageError, StorageResult, decode_cursor, effective_limit, encode_cursor,
        ensure_key_safe, etag_of,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use sqlx::{
    FromRow, QueryBuilder, SqlitePool,
    sqlite::{Sqlite, SqliteConnectOptions, SqlitePoolOptions},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

/// Number of key lock stripes. Keys hash onto a stripe by md5.
const KEY_LOCK_STRIPES: usize = 64;

/// Attempts at creating a temp file when a concurrent delete prunes the
/// shard directory underneath us.
const CREATE_ATTEMPTS: usize = 3;

/// Attempts at opening a payload that a concurrent overwrite retired.
const OPEN_ATTEMPTS: usize = 3;

const ROW_COLUMNS: &str = "key, payload, content_type, metadata, size_bytes, etag, last_modified";

/// Row shape of the `objects` table.
#[derive(FromRow, Debug)]
struct ObjectRow {
    key: String,
    /// Payload file, relative to the base path.
    payload: String,
    content_type: Option<String>,
    metadata: Option<String>,
    size_bytes: i64,
    etag: String,
    last_modified: DateTime<Utc>,
}

impl ObjectRow {
    fn into_parts(self) -> StorageResult<(ObjectInfo, ObjectMetadata)> {
        let metadata = match self.metadata.as_deref() {
            Some(raw) => {
                serde_json::from_str(raw).map_err(|source| StorageError::CorruptMetadata {
                    key: self.key.clone(),
                    source,
                })?
            }
            None => ObjectMetadata::new(),
        };
        let info = ObjectInfo {
            key: self.key,
            size_bytes: self.size_bytes,
            etag: self.etag,
            content_type: self.content_type,
            last_modified: self.last_modified,
        };
        Ok((info, metadata))
    }
}

/// Durable bucket on the local machine.
#[derive(Clone)]
pub struct LocalBucket {
    /// SQLite pool holding one row per live object.
    pub db: SqlitePool,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,

    /// Serializes row changes for keys that share a stripe.
    key_locks: Arc<[Mutex<()>]>,
}

impl LocalBucket {
    /// Connect to `database_url`, create the schema if needed and make sure
    /// `base_path` exists.
    pub async fn open(database_url: &str, base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
            info!("Created storage directory at {}", base_path.display());
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        if let Some(parent) = options
            .get_filename()
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
                info!("Created missing directory {}", parent.display());
            }
        }
        debug!("Connecting to {}", database_url);

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let key_locks = (0..KEY_LOCK_STRIPES)
            .map(|_| Mutex::new(()))
            .collect::<Vec<_>>()
            .into();
        let bucket = Self {
            db,
            base_path,
            key_locks,
        };
        bucket.run_migrations().await?;
        Ok(bucket)
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn run_migrations(&self) -> StorageResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("Running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&self.db).await?;
        }
        Ok(())
    }

    /// Relative path of a fresh payload file for `key`.
    ///
    /// Uses MD5(key); the first two digest bytes pick the shard directories
    /// and a uuid keeps concurrent writes to one key apart.
    fn new_payload_name(key: &str) -> String {
        let digest = md5::compute(key);
        format!(
            "{:02x}/{:02x}/{:x}-{}",
            digest[0],
            digest[1],
            digest,
            Uuid::new_v4().simple()
        )
    }

    fn payload_path(&self, payload: &str) -> PathBuf {
        self.base_path.join(payload)
    }

    async fn lock_key(&self, key: &str) -> MutexGuard<'_, ()> {
        let digest = md5::compute(key);
        let stripe = usize::from(u16::from_be_bytes([digest[0], digest[1]])) % self.key_locks.len();
        self.key_locks[stripe].lock().await
    }

    async fn fetch_row(&self, key: &str) -> StorageResult<Option<ObjectRow>> {
        let row = sqlx::query_as::<_, ObjectRow>(&format!(
            "SELECT {ROW_COLUMNS} FROM objects WHERE key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn fetch_payload_name(&self, key: &str) -> StorageResult<Option<String>> {
        let payload = sqlx::query_scalar("SELECT payload FROM objects WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db)
            .await?;
        Ok(payload)
    }

    /// Point the row for `key` at `payload` and return the payload it
    /// pointed at before. Callers hold the key lock.
    async fn upsert_row(
        &self,
        key: &str,
        payload: &str,
        content_type: Option<String>,
        metadata: Option<String>,
        value: &[u8],
    ) -> StorageResult<Option<String>> {
        let previous = self.fetch_payload_name(key).await?;
        sqlx::query(
            r#"
            INSERT INTO objects (key, payload, content_type, metadata, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                payload = excluded.payload,
                content_type = excluded.content_type,
                metadata = excluded.metadata,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(key)
        .bind(payload)
        .bind(content_type)
        .bind(metadata)
        .bind(value.len() as i64)
        .bind(etag_of(value))
        .bind(Utc::now())
        .execute(&self.db)
        .await?;
        Ok(previous)
    }

    /// Write `value` to a temp file next to `file_path`, fsync it and rename
    /// it into place.
    async fn write_payload(&self, file_path: &Path, value: &[u8]) -> StorageResult<()> {
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = Self::create_in_shard(&parent, &tmp_path).await?;

        // The directory is non-empty while the temp file exists, so pruning
        // cannot remove it before the rename.
        let result = async {
            file.write_all(value).await?;
            file.flush().await?;
            file.sync_all().await?;
            fs::rename(&tmp_path, file_path).await
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    /// Create `path` inside the shard directory `parent`, recreating the
    /// directory when a concurrent delete pruned it in between.
    async fn create_in_shard(parent: &Path, path: &Path) -> io::Result<File> {
        let mut attempt = 1;
        loop {
            fs::create_dir_all(parent).await?;
            match File::create(path).await {
                Err(err) if err.kind() == ErrorKind::NotFound && attempt < CREATE_ATTEMPTS => {
                    debug!("shard {} pruned during write, retrying", parent.display());
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Remove a retired payload file and prune its shard directories.
    async fn discard_payload(&self, payload: &str) -> StorageResult<()> {
        let file_path = self.payload_path(payload);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    /// Remove empty shard directories from `start` up to, not including, the
    /// base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalBucket {
    fn backend(&self) -> &'static str {
        "local"
    }

    /// Payload first into its own file, then the upserted row under the key
    /// lock. The file the previous row pointed at is retired only once the
    /// new row is in place; a failed upsert removes just the new file.
    async fn put(
        &self,
        key: &str,
        value: Bytes,
        content_type: Option<String>,
        metadata: Option<ObjectMetadata>,
    ) -> StorageResult<String> {
        ensure_key_safe(key)?;
        let metadata = metadata
            .filter(|m| !m.is_empty())
            .map(|m| serde_json::to_string(&m))
            .transpose()
            .map_err(|source| StorageError::CorruptMetadata {
                key: key.to_string(),
                source,
            })?;

        let payload = Self::new_payload_name(key);
        let file_path = self.payload_path(&payload);
        self.write_payload(&file_path, &value).await?;

        let upserted = {
            let _guard = self.lock_key(key).await;
            self.upsert_row(key, &payload, content_type, metadata, &value).await
        };

        match upserted {
            Ok(previous) => {
                debug!("stored {} ({} bytes) at {}", key, value.len(), file_path.display());
                if let Some(previous) = previous.filter(|p| *p != payload) {
                    if let Err(err) = self.discard_payload(&previous).await {
                        warn!("failed to remove retired payload {}: {}", previous, err);
                    }
                }
                Ok(file_url(key))
            }
            Err(err) => {
                let _ = self.discard_payload(&payload).await;
                Err(err)
            }
        }
    }

    /// A row whose payload file has gone missing reads as absent. When an
    /// overwrite retires the file between the row read and the open, the
    /// newer row is read again.
    async fn get(&self, key: &str) -> StorageResult<Option<StoredObject>> {
        ensure_key_safe(key)?;
        let mut attempt = 1;
        loop {
            let Some(row) = self.fetch_row(key).await? else {
                return Ok(None);
            };

            let file_path = self.payload_path(&row.payload);
            let file = match File::open(&file_path).await {
                Ok(file) => file,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    let current = self.fetch_payload_name(key).await?;
                    if attempt < OPEN_ATTEMPTS && current.is_some_and(|p| p != row.payload) {
                        attempt += 1;
                        continue;
                    }
                    warn!("payload for {} missing at {}", key, file_path.display());
                    return Ok(None);
                }
                Err(err) => return Err(StorageError::Io(err)),
            };

            let (info, metadata) = row.into_parts()?;
            return Ok(Some(StoredObject {
                info,
                metadata,
                body: ReaderStream::new(file).boxed(),
            }));
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let payload: Option<String> = {
            let _guard = self.lock_key(key).await;
            sqlx::query_scalar("DELETE FROM objects WHERE key = ? RETURNING payload")
                .bind(key)
                .fetch_optional(&self.db)
                .await?
        };

        match payload {
            Some(payload) => self.discard_payload(&payload).await,
            None => {
                debug!("{} already absent", key);
                Ok(())
            }
        }
    }

    async fn list(&self, options: ListOptions) -> StorageResult<ListPage> {
        let limit = effective_limit(options.limit);
        let fetch_limit = limit + 1;

        let mut builder =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ROW_COLUMNS} FROM objects WHERE 1 = 1"));
        if let Some(prefix) = options.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND instr(key, ");
            builder.push_bind(prefix.to_string());
            builder.push(") = 1");
        }
        if let Some(cursor) = options.cursor.as_deref() {
            builder.push(" AND key > ");
            builder.push_bind(decode_cursor(cursor));
        }
        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let rows: Vec<ObjectRow> = builder.build_query_as().fetch_all(&self.db).await?;

        let truncated = rows.len() == fetch_limit;
        let mut objects = rows
            .into_iter()
            .map(|row| row.into_parts().map(|(info, _)| info))
            .collect::<StorageResult<Vec<_>>>()?;
        objects.truncate(limit);
        let cursor = if truncated {
            objects.last().map(|info| encode_cursor(&info.key))
        } else {
            None
        };

        Ok(ListPage {
            objects,
            cursor,
            truncated,
        })
    }

    /// Runs `SELECT 1` and a write/read/delete round-trip under `base_path`.
    async fn health_check(&self) -> StorageResult<()> {
        let one: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.db).await?;
        if one != 1 {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::Other,
                format!("unexpected SELECT 1 result: {}", one),
            )));
        }

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        fs::write(&tmp_path, b"readyz").await?;
        let read_back = fs::read(&tmp_path).await;
        let _ = fs::remove_file(&tmp_path).await;
        if read_back? != b"readyz" {
            return Err(StorageError::Io(io::Error::new(
                ErrorKind::InvalidData,
                "file content mismatch",
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_bucket() -> (TempDir, LocalBucket) {
        let dir = tempfile::tempdir().unwrap();
        let db_url = format!("sqlite://{}", dir.path().join("meta/objects.db").display());
        let bucket = LocalBucket::open(&db_url, dir.path().join("objects"))
            .await
            .unwrap();
        (dir, bucket)
    }

    #[tokio::test]
    async fn put_then_get_round_trips_payload_and_metadata() {
        let (_dir, bucket) = open_bucket().await;
        let metadata = ObjectMetadata::from([("author".to_string(), "ada".to_string())]);
        let url = bucket
            .put(
                "reports/q1.csv",
                Bytes::from_static(b"a,b\n1,2\n"),
                Some("text/csv".into()),
                Some(metadata.clone()),
            )
            .await
            .unwrap();
        assert_eq!(url, "/api/storage/reports%2Fq1.csv");

        let object = bucket.get("reports/q1.csv").await.unwrap().unwrap();
        assert_eq!(object.info.content_type.as_deref(), Some("text/csv"));
        assert_eq!(object.info.size_bytes, 8);
        assert_eq!(object.info.etag, etag_of(b"a,b\n1,2\n"));
        assert_eq!(object.metadata, metadata);
        assert_eq!(
            object.into_bytes().await.unwrap(),
            Bytes::from_static(b"a,b\n1,2\n")
        );
    }

    #[tokio::test]
    async fn put_replaces_existing_object() {
        let (_dir, bucket) = open_bucket().await;
        bucket
            .put("k", Bytes::from_static(b"first"), Some("text/plain".into()), None)
            .await
            .unwrap();
        bucket
            .put("k", Bytes::from_static(b"second!"), None, None)
            .await
            .unwrap();

        let object = bucket.get("k").await.unwrap().unwrap();
        assert_eq!(object.info.content_type, None);
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"second!"));
    }

    async fn payload_file(bucket: &LocalBucket, key: &str) -> PathBuf {
        let payload = bucket.fetch_payload_name(key).await.unwrap().unwrap();
        bucket.payload_path(&payload)
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_prunes_shards() {
        let (_dir, bucket) = open_bucket().await;
        bucket
            .put("gone.txt", Bytes::from_static(b"bye"), None, None)
            .await
            .unwrap();
        let file_path = payload_file(&bucket, "gone.txt").await;
        assert!(file_path.exists());

        bucket.delete("gone.txt").await.unwrap();
        bucket.delete("gone.txt").await.unwrap();
        bucket.delete("never-existed").await.unwrap();

        assert!(bucket.get("gone.txt").await.unwrap().is_none());
        assert!(!file_path.exists());
        assert!(!file_path.parent().unwrap().exists());
        assert!(bucket.base_path.exists());
    }

    #[tokio::test]
    async fn overwrite_retires_previous_payload_file() {
        let (_dir, bucket) = open_bucket().await;
        bucket
            .put("k", Bytes::from_static(b"one"), None, None)
            .await
            .unwrap();
        let first = payload_file(&bucket, "k").await;
        bucket
            .put("k", Bytes::from_static(b"two"), None, None)
            .await
            .unwrap();
        let second = payload_file(&bucket, "k").await;

        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.exists());
    }

    #[tokio::test]
    async fn failed_upsert_keeps_existing_object() {
        let (_dir, bucket) = open_bucket().await;
        bucket
            .put("keep", Bytes::from_static(b"original"), None, None)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TRIGGER reject_updates BEFORE UPDATE ON objects \
             BEGIN SELECT RAISE(ABORT, 'read only'); END",
        )
        .execute(&bucket.db)
        .await
        .unwrap();

        let err = bucket
            .put("keep", Bytes::from_static(b"replacement"), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Sqlx(_)));

        let object = bucket.get("keep").await.unwrap().unwrap();
        assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"original"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_keep_row_and_payload_together() {
        let (_dir, bucket) = open_bucket().await;
        for _ in 0..50 {
            let writers = (1..=4usize)
                .map(|n| {
                    let bucket = bucket.clone();
                    tokio::spawn(async move {
                        bucket
                            .put(
                                "same-key",
                                Bytes::from(vec![n as u8; n * 1000]),
                                Some(format!("t/{n}")),
                                None,
                            )
                            .await
                    })
                })
                .collect::<Vec<_>>();
            for writer in writers {
                writer.await.unwrap().unwrap();
            }

            let object = bucket.get("same-key").await.unwrap().unwrap();
            let info = object.info.clone();
            let bytes = object.into_bytes().await.unwrap();
            let n = bytes.len() / 1000;
            assert_eq!(info.size_bytes as usize, bytes.len());
            assert_eq!(info.etag, etag_of(&bytes));
            assert_eq!(info.content_type, Some(format!("t/{n}")));
            assert!(bytes.iter().all(|b| usize::from(*b) == n));
        }

        let mut files = Vec::new();
        let mut dirs = vec![bucket.base_path.clone()];
        while let Some(dir) = dirs.pop() {
            let mut entries = fs::read_dir(&dir).await.unwrap();
            while let Some(entry) = entries.next_entry().await.unwrap() {
                if entry.file_type().await.unwrap().is_dir() {
                    dirs.push(entry.path());
                } else {
                    files.push(entry.path());
                }
            }
        }
        assert_eq!(files, [payload_file(&bucket, "same-key").await]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overwrite_racing_delete_never_fails() {
        let (_dir, bucket) = open_bucket().await;
        for i in 0..200 {
            let key = format!("fresh-{i}");
            bucket
                .put(&key, Bytes::from_static(b"old"), None, None)
                .await
                .unwrap();

            let putter = {
                let bucket = bucket.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    bucket
                        .put(&key, Bytes::from_static(b"new"), None, None)
                        .await
                })
            };
            let deleter = {
                let bucket = bucket.clone();
                let key = key.clone();
                tokio::spawn(async move { bucket.delete(&key).await })
            };
            putter.await.unwrap().unwrap();
            deleter.await.unwrap().unwrap();

            if let Some(object) = bucket.get(&key).await.unwrap() {
                assert_eq!(object.into_bytes().await.unwrap(), Bytes::from_static(b"new"));
            }
        }
    }

    #[tokio::test]
    async fn write_recreates_pruned_shard() {
        let (_dir, bucket) = open_bucket().await;
        let shard = bucket.base_path.join("ab").join("cd");
        bucket
            .write_payload(&shard.join("first"), b"one")
            .await
            .unwrap();
        fs::remove_file(shard.join("first")).await.unwrap();
        bucket.prune_empty_dirs(&shard).await;
        assert!(!shard.exists());

        bucket
            .write_payload(&shard.join("second"), b"two")
            .await
            .unwrap();
        assert_eq!(fs::read(shard.join("second")).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn list_filters_prefix_and_paginates() {
        let (_dir, bucket) = open_bucket().await;
        for key in ["img/1.png", "img/2.png", "img/3.png", "IMG/upper.png", "txt/a"] {
            bucket
                .put(key, Bytes::from_static(b"x"), None, None)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let page = bucket
                .list(ListOptions {
                    prefix: Some("img/".into()),
                    limit: Some(2),
                    cursor: cursor.take(),
                })
                .await
                .unwrap();
            seen.extend(page.objects.into_iter().map(|o| o.key));
            if !page.truncated {
                break;
            }
            cursor = page.cursor;
        }
        assert_eq!(seen, ["img/1.png", "img/2.png", "img/3.png"]);
    }

    #[tokio::test]
    async fn invalid_key_is_rejected() {
        let (_dir, bucket) = open_bucket().await;
        let err = bucket
            .put("", Bytes::new(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidObjectKey));
    }

    #[tokio::test]
    async fn health_check_passes_on_fresh_bucket() {
        let (_dir, bucket) = open_bucket().await;
        bucket.health_check().await.unwrap();
    }
}
