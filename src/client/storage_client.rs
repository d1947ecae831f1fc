//! HTTP client for the storage endpoint.
//!
//! `StorageClient` generates keys, percent-encodes them, and turns non-2xx
//! answers into [`ClientError::Server`] carrying the server's message.

use crate::{
    client::upload_widget::SelectedFile,
    models::{
        key::{STORAGE_PATH, file_url},
        object::{ListOptions, ListPage},
        responses::{DeleteResponse, ErrorResponse, UploadResponse},
    },
};
use chrono::Utc;
use reqwest::{StatusCode, header};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const UPLOAD_FAILED: &str = "Failed to upload file";
const DELETE_FAILED: &str = "Failed to delete file";
const LIST_FAILED: &str = "Failed to list files";

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    #[error("{message}")]
    Server { status: StatusCode, message: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Where an uploaded file ended up.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadedFile {
    pub key: String,
    pub url: String,
}

/// Raises a flag for as long as it lives.
struct FlagGuard<'a>(&'a AtomicBool);

impl<'a> FlagGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    uploading: AtomicBool,
    deleting: AtomicBool,
    last_key_millis: AtomicI64,
}

impl StorageClient {
    /// `base_url` is the server origin, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), base_url)
    }

    pub fn with_http(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            uploading: AtomicBool::new(false),
            deleting: AtomicBool::new(false),
            last_key_millis: AtomicI64::new(0),
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::SeqCst)
    }

    pub fn is_deleting(&self) -> bool {
        self.deleting.load(Ordering::SeqCst)
    }

    /// Relative URL of `key`. No network call.
    pub fn file_url(&self, key: &str) -> String {
        file_url(key)
    }

    /// Upload `file`, under `key` or a generated `<millis>-<name>` key.
    ///
    /// The request's content type is the file's declared type, else
    /// `content_type`, else `application/octet-stream`.
    pub async fn upload_file(
        &self,
        file: &SelectedFile,
        key: Option<&str>,
        content_type: Option<&str>,
    ) -> Result<UploadedFile, ClientError> {
        let _uploading = FlagGuard::raise(&self.uploading);

        let file_key = match key.filter(|k| !k.is_empty()) {
            Some(key) => key.to_string(),
            None => self.generate_key(&file.name),
        };
        let url = file_url(&file_key);
        let content_type = file
            .content_type
            .as_deref()
            .filter(|ct| !ct.is_empty())
            .or(content_type)
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        debug!("uploading {} ({} bytes) as {}", file.name, file.size, file_key);
        let response = self
            .http
            .put(self.endpoint(&url))
            .header(header::CONTENT_TYPE, content_type)
            .body(file.bytes.clone())
            .send()
            .await
            .inspect_err(|e| warn!("Error uploading file: {}", e))?;

        if !response.status().is_success() {
            let err = server_error(response, UPLOAD_FAILED).await;
            warn!("Error uploading file: {}", err);
            return Err(err);
        }
        let ack: UploadResponse = response.json().await?;
        debug!("server stored {}", ack.key);

        Ok(UploadedFile { key: file_key, url })
    }

    pub async fn delete_file(&self, key: &str) -> Result<DeleteResponse, ClientError> {
        let _deleting = FlagGuard::raise(&self.deleting);

        let response = self
            .http
            .delete(self.endpoint(&file_url(key)))
            .send()
            .await
            .inspect_err(|e| warn!("Error deleting file: {}", e))?;

        if !response.status().is_success() {
            let err = server_error(response, DELETE_FAILED).await;
            warn!("Error deleting file: {}", err);
            return Err(err);
        }
        Ok(response.json().await?)
    }

    pub async fn list_files(&self, options: &ListOptions) -> Result<ListPage, ClientError> {
        let response = self
            .http
            .get(self.endpoint(STORAGE_PATH))
            .query(options)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(server_error(response, LIST_FAILED).await);
        }
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `<unix millis>-<name>`. The timestamp never repeats for one client, so
    /// uploads of the same name within a millisecond still get distinct keys.
    fn generate_key(&self, name: &str) -> String {
        let now = Utc::now().timestamp_millis();
        let stamp = match self
            .last_key_millis
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            }) {
            Ok(last) | Err(last) => now.max(last + 1),
        };
        format!("{}-{}", stamp, name)
    }
}

/// Build the error for a non-2xx response, preferring the server's message.
async fn server_error(response: reqwest::Response, default: &str) -> ClientError {
    let status = response.status();
    let message = response
        .json::<ErrorResponse>()
        .await
        .ok()
        .map(|body| body.error)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| default.to_string());
    ClientError::Server { status, message }
}
