//! Shared handler state.

use crate::{errors::ApiError, services::bucket::SharedStore};

/// Upper bound for buffered upload bodies when none is configured.
pub const DEFAULT_MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Created once at start-up and handed to every request through axum `State`.
///
/// `store` is `None` when no backend could be bound; handlers then answer with
/// [`ApiError::ConfigurationMissing`].
#[derive(Clone)]
pub struct AppState {
    pub store: Option<SharedStore>,
    pub max_body_bytes: usize,
}

impl AppState {
    pub fn new(store: Option<SharedStore>) -> Self {
        Self {
            store,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    /// The bound store, or the configuration error.
    pub fn store(&self) -> Result<&SharedStore, ApiError> {
        self.store.as_ref().ok_or(ApiError::ConfigurationMissing)
    }
}
