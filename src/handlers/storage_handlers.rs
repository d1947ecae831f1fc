//! HTTP handlers for `/api/storage`.
//!
//! Object bodies are streamed out of the bucket as they are read. Upload
//! bodies are buffered whole (up to `AppState::max_body_bytes`) before being
//! handed to the bucket.

use crate::{
    errors::{ApiError, Operation},
    models::{
        key::file_name,
        object::{ListOptions, ListPage, ObjectInfo, ObjectMetadata},
        responses::{DeleteResponse, UploadResponse},
    },
    state::AppState,
};
use axum::{
    Json,
    body::{self, Body},
    extract::{FromRequestParts, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header, request::Parts},
    response::Response,
};
use tracing::{debug, error};

/// Prefix of request/response headers that carry custom object metadata.
pub const METADATA_HEADER_PREFIX: &str = "x-object-meta-";

/// Object key taken from the `{*key}` route segment, percent-decoded.
///
/// A segment that does not decode to UTF-8 is rejected with the same JSON
/// error as any other unusable key.
pub struct ObjectKey(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ObjectKey {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(key) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| {
                debug!(error = %rejection, "rejected object key");
                ApiError::ValidationFailure("Invalid object key".into())
            })?;
        Ok(Self(key))
    }
}

/// `GET /api/storage/{*key}` — stream an object back.
pub async fn get_object(
    State(state): State<AppState>,
    ObjectKey(key): ObjectKey,
) -> Result<Response, ApiError> {
    let store = state.store()?;
    let object = store
        .get(&key)
        .await
        .map_err(|err| ApiError::from_storage(Operation::Serve, &key, err))?
        .ok_or(ApiError::NotFound)?;

    let mut response = Response::new(Body::from_stream(object.body));
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &object.info, &object.metadata);
    Ok(response)
}

/// `PUT /api/storage/{*key}` — store the request body under `key`.
pub async fn upload_object(
    State(state): State<AppState>,
    ObjectKey(key): ObjectKey,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>, ApiError> {
    let store = state.store()?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());
    let metadata = metadata_from_headers(&headers);

    let data = body::to_bytes(body, state.max_body_bytes)
        .await
        .map_err(|err| {
            error!(key = %key, error = %err, "failed to read upload body");
            ApiError::TransportFailure(Operation::Upload)
        })?;
    debug!("received {} bytes for {}", data.len(), key);

    store
        .put(&key, data, content_type, metadata)
        .await
        .map_err(|err| ApiError::from_storage(Operation::Upload, &key, err))?;

    Ok(Json(UploadResponse { success: true, key }))
}

/// `DELETE /api/storage/{*key}` — succeeds whether or not the key existed.
pub async fn delete_object(
    State(state): State<AppState>,
    ObjectKey(key): ObjectKey,
) -> Result<Json<DeleteResponse>, ApiError> {
    let store = state.store()?;
    store
        .delete(&key)
        .await
        .map_err(|err| ApiError::from_storage(Operation::Delete, &key, err))?;

    Ok(Json(DeleteResponse { success: true }))
}

/// `GET /api/storage?prefix=&limit=&cursor=` — one page of object records.
pub async fn list_objects(
    State(state): State<AppState>,
    options: Result<Query<ListOptions>, QueryRejection>,
) -> Result<Json<ListPage>, ApiError> {
    let Query(options) = options.map_err(|rejection| {
        debug!(error = %rejection, "rejected list parameters");
        ApiError::ValidationFailure("Invalid list parameters".into())
    })?;
    let store = state.store()?;
    let prefix = options.prefix.clone().unwrap_or_default();
    let page = store
        .list(options)
        .await
        .map_err(|err| ApiError::from_storage(Operation::List, &prefix, err))?;

    Ok(Json(page))
}

fn set_object_headers(headers: &mut HeaderMap, info: &ObjectInfo, metadata: &ObjectMetadata) {
    if let Some(value) = info
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, value);
    }

    let disposition = format!("inline; filename=\"{}\"", file_name(&info.key));
    if let Ok(value) = HeaderValue::from_bytes(disposition.as_bytes()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(info.size_bytes.max(0) as u64),
    );

    if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", info.etag)) {
        headers.insert(header::ETAG, value);
    }

    if let Ok(value) = HeaderValue::from_str(&info.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    for (name, value) in metadata {
        let header_name = HeaderName::try_from(format!("{}{}", METADATA_HEADER_PREFIX, name));
        if let (Ok(name), Ok(value)) = (header_name, HeaderValue::from_str(value)) {
            headers.insert(name, value);
        }
    }
}

/// Collect `x-object-meta-*` request headers. `None` when there are none.
fn metadata_from_headers(headers: &HeaderMap) -> Option<ObjectMetadata> {
    let metadata: ObjectMetadata = headers
        .iter()
        .filter_map(|(name, value)| {
            let field = name.as_str().strip_prefix(METADATA_HEADER_PREFIX)?;
            let value = value.to_str().ok()?;
            (!field.is_empty()).then(|| (field.to_string(), value.to_string()))
        })
        .collect();

    (!metadata.is_empty()).then_some(metadata)
}
