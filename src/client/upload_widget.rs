//! Upload widget state: file selection, size validation and error display.
//!
//! The widget owns no network code; it drives a [`StorageClient`] and reads
//! its uploading flag to decide whether the upload action is enabled.

use crate::client::storage_client::{StorageClient, UploadedFile};
use bytes::Bytes;
use std::{io, path::Path};
use tokio::fs;

/// 5 MiB.
pub const DEFAULT_MAX_SIZE: u64 = 5 * 1024 * 1024;

const UPLOAD_FAILED: &str = "Failed to upload file";

const TYPE_NOT_ACCEPTED: &str = "File type not accepted";

/// A file picked for upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SelectedFile {
    pub name: String,
    pub size: u64,
    /// Declared MIME type, if any.
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl SelectedFile {
    pub fn new(name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            content_type,
            bytes,
        }
    }

    /// Read a file from disk; its type is guessed from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                )
            })?;
        let bytes = Bytes::from(fs::read(path).await?);
        let content_type = mime_guess::from_path(path).first_raw().map(str::to_string);
        Ok(Self::new(name, content_type, bytes))
    }
}

type UploadCallback = Box<dyn FnMut(&UploadedFile) + Send>;

pub struct UploadWidget {
    max_size: u64,
    accept: Option<String>,
    selected: Option<SelectedFile>,
    error: Option<String>,
    on_upload: Option<UploadCallback>,
}

impl Default for UploadWidget {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadWidget {
    pub fn new() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            accept: None,
            selected: None,
            error: None,
            on_upload: None,
        }
    }

    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Restrict selection to a comma-separated list of MIME types
    /// (`image/png`), wildcards (`image/*`) or file extensions (`.pdf`).
    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = Some(accept.into());
        self
    }

    /// Called with `{key, url}` after every successful upload.
    pub fn on_upload(mut self, callback: impl FnMut(&UploadedFile) + Send + 'static) -> Self {
        self.on_upload = Some(Box::new(callback));
        self
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn accept(&self) -> Option<&str> {
        self.accept.as_deref()
    }

    pub fn selected_file(&self) -> Option<&SelectedFile> {
        self.selected.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Replace the selection. Files of a type outside `accept` and oversized
    /// files are rejected and leave nothing selected.
    pub fn select_file(&mut self, file: Option<SelectedFile>) {
        self.error = None;
        match file {
            Some(file) if !self.accepts(&file) => {
                self.error = Some(TYPE_NOT_ACCEPTED.to_string());
                self.selected = None;
            }
            Some(file) if file.size > self.max_size => {
                self.error = Some(format!(
                    "File size exceeds maximum limit of {}MB",
                    self.max_size as f64 / 1024.0 / 1024.0
                ));
                self.selected = None;
            }
            other => self.selected = other,
        }
    }

    fn accepts(&self, file: &SelectedFile) -> bool {
        let Some(accept) = self.accept.as_deref() else {
            return true;
        };
        let content_type = file
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase());
        let name = file.name.to_ascii_lowercase();

        accept
            .split(',')
            .map(|token| token.trim().to_ascii_lowercase())
            .filter(|token| !token.is_empty())
            .any(|token| {
                if token.starts_with('.') {
                    name.ends_with(&token)
                } else if token == "*/*" {
                    true
                } else if let Some(major) = token.strip_suffix("/*") {
                    content_type
                        .as_deref()
                        .and_then(|ct| ct.split_once('/'))
                        .is_some_and(|(ct_major, _)| ct_major == major)
                } else {
                    content_type.as_deref() == Some(token.as_str())
                }
            })
    }

    /// Upload is offered only with a selection and no upload in flight.
    pub fn can_upload(&self, client: &StorageClient) -> bool {
        self.selected.is_some() && !client.is_uploading()
    }

    /// Upload the selection. Returns `None` without a selection or on failure;
    /// a failure keeps the selection and records the message.
    pub async fn upload(&mut self, client: &StorageClient) -> Option<UploadedFile> {
        let file = self.selected.as_ref()?;
        self.error = None;

        match client.upload_file(file, None, None).await {
            Ok(uploaded) => {
                self.selected = None;
                if let Some(callback) = self.on_upload.as_mut() {
                    callback(&uploaded);
                }
                Some(uploaded)
            }
            Err(err) => {
                let message = err.to_string();
                self.error = Some(if message.is_empty() {
                    UPLOAD_FAILED.to_string()
                } else {
                    message
                });
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{routes::routes::app, services::memory_bucket::MemoryBucket, state::AppState};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    async fn spawn(state: AppState) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app(state)).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn file_of_size(name: &str, size: usize) -> SelectedFile {
        SelectedFile::new(name, Some("image/png".into()), Bytes::from(vec![7u8; size]))
    }

    #[test]
    fn oversized_file_is_rejected() {
        let client = StorageClient::new("http://unused.invalid");
        let mut widget = UploadWidget::new();
        widget.select_file(Some(file_of_size("huge.png", DEFAULT_MAX_SIZE as usize + 1)));

        assert!(widget.selected_file().is_none());
        assert!(!widget.can_upload(&client));
        let error = widget.error().unwrap();
        assert_eq!(error, "File size exceeds maximum limit of 5MB");
    }

    #[test]
    fn limit_is_reported_in_mib() {
        let mut widget = UploadWidget::new().with_max_size(1024 * 1024 / 2);
        widget.select_file(Some(file_of_size("a.png", 1024 * 1024)));
        assert!(widget.error().unwrap().contains("0.5MB"));
    }

    #[test]
    fn new_selection_clears_previous_error() {
        let client = StorageClient::new("http://unused.invalid");
        let mut widget = UploadWidget::new().with_max_size(10);
        widget.select_file(Some(file_of_size("big.png", 11)));
        assert!(widget.error().is_some());

        widget.select_file(Some(file_of_size("ok.png", 10)));
        assert!(widget.error().is_none());
        assert_eq!(widget.selected_file().unwrap().name, "ok.png");
        assert!(widget.can_upload(&client));
    }

    #[test]
    fn accept_filter_rejects_other_types() {
        let mut widget = UploadWidget::new().with_accept("image/*");
        widget.select_file(Some(SelectedFile::new(
            "notes.txt",
            Some("text/plain".into()),
            Bytes::from_static(b"hi"),
        )));
        assert!(widget.selected_file().is_none());
        assert_eq!(widget.error(), Some("File type not accepted"));

        widget.select_file(Some(file_of_size("cat.png", 4)));
        assert!(widget.error().is_none());
        assert_eq!(widget.selected_file().unwrap().name, "cat.png");
    }

    #[test]
    fn accept_filter_matches_exact_types_and_extensions() {
        let mut widget = UploadWidget::new().with_accept("application/pdf, .CSV");

        widget.select_file(Some(SelectedFile::new(
            "data.csv",
            None,
            Bytes::from_static(b"a,b"),
        )));
        assert!(widget.selected_file().is_some());

        widget.select_file(Some(SelectedFile::new(
            "paper",
            Some("application/pdf; charset=binary".into()),
            Bytes::from_static(b"%PDF"),
        )));
        assert!(widget.selected_file().is_some());

        widget.select_file(Some(SelectedFile::new(
            "blob",
            None,
            Bytes::from_static(b"?"),
        )));
        assert!(widget.selected_file().is_none());
        assert_eq!(widget.error(), Some("File type not accepted"));
    }

    #[test]
    fn no_accept_filter_takes_any_type() {
        let mut widget = UploadWidget::new();
        assert_eq!(widget.accept(), None);
        widget.select_file(Some(SelectedFile::new(
            "run.sh",
            Some("application/x-sh".into()),
            Bytes::from_static(b"#!"),
        )));
        assert!(widget.selected_file().is_some());
    }

    #[tokio::test]
    async fn upload_without_selection_is_a_no_op() {
        let client = StorageClient::new("http://unused.invalid");
        let mut widget = UploadWidget::new();
        assert!(widget.upload(&client).await.is_none());
        assert!(widget.error().is_none());
    }

    #[tokio::test]
    async fn successful_upload_clears_selection_and_notifies() {
        let base = spawn(AppState::new(Some(Arc::new(MemoryBucket::new())))).await;
        let client = StorageClient::new(base);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut widget = UploadWidget::new().on_upload(move |uploaded| {
            sink.lock().unwrap().push(uploaded.clone());
        });

        widget.select_file(Some(file_of_size("cat.png", 16)));
        let uploaded = widget.upload(&client).await.unwrap();

        assert!(uploaded.key.ends_with("-cat.png"));
        assert!(widget.selected_file().is_none());
        assert!(widget.error().is_none());
        assert_eq!(seen.lock().unwrap().as_slice(), &[uploaded]);
    }

    #[tokio::test]
    async fn failed_upload_keeps_selection_and_shows_message() {
        let base = spawn(AppState::new(None)).await;
        let client = StorageClient::new(base);
        let mut widget = UploadWidget::new();

        widget.select_file(Some(file_of_size("cat.png", 16)));
        assert!(widget.upload(&client).await.is_none());

        assert_eq!(widget.error(), Some("Storage is not configured"));
        assert_eq!(widget.selected_file().unwrap().name, "cat.png");
        assert!(widget.can_upload(&client));
    }

    #[tokio::test]
    async fn from_path_guesses_content_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        tokio::fs::write(&path, b"%PDF-1.7").await.unwrap();

        let file = SelectedFile::from_path(&path).await.unwrap();
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size, 8);
        assert_eq!(file.content_type.as_deref(), Some("application/pdf"));
    }
}
