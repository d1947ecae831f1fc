//! Defines routes for the storage endpoint.
//!
//! ## Structure
//! - `GET    /api/storage`         — list objects (prefix, limit, cursor)
//! - `GET    /api/storage/{*key}`  — download object
//! - `PUT    /api/storage/{*key}`  — upload object (raw body)
//! - `DELETE /api/storage/{*key}`  — delete object
//!
//! Keys usually arrive percent-encoded as one segment (`a%2Fb.txt`); the
//! wildcard also accepts raw nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        storage_handlers::{delete_object, get_object, list_objects, upload_object},
    },
    state::AppState,
};
use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

/// Router for all endpoints, still waiting for its `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/storage", get(list_objects))
        .route(
            "/api/storage/{*key}",
            get(get_object).put(upload_object).delete(delete_object),
        )
}

/// Complete application with request tracing and state attached.
pub fn app(state: AppState) -> Router {
    routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
