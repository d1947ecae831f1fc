//! JSON bodies of the storage endpoint.

use serde::{Deserialize, Serialize};

/// Body of a successful `PUT /api/storage/{key}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadResponse {
    pub success: bool,
    pub key: String,
}

/// Body of a successful `DELETE /api/storage/{key}`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DeleteResponse {
    pub success: bool,
}

/// Body of every non-2xx response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}
