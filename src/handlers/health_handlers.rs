//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness: a store is bound and its health check passes

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::HashMap;
use tracing::error;

/// Reported in place of the store's own error, which stays in the log.
const STORAGE_CHECK_FAILED: &str = "Storage health check failed";

/// `GET /healthz`
///
/// Very small liveness probe, always 200 OK. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// HTTP 200 when the store is bound and healthy, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let (backend, check) = match state.store.as_ref() {
        None => (
            None,
            CheckStatus {
                ok: false,
                error: Some("Storage is not configured".into()),
            },
        ),
        Some(store) => {
            let check = match store.health_check().await {
                Ok(()) => CheckStatus {
                    ok: true,
                    error: None,
                },
                Err(e) => {
                    error!(backend = store.backend(), error = %e, "storage health check failed");
                    CheckStatus {
                        ok: false,
                        error: Some(STORAGE_CHECK_FAILED.into()),
                    }
                }
            };
            (Some(store.backend()), check)
        }
    };

    let ok = check.ok;
    let mut checks = HashMap::new();
    checks.insert("storage", check);

    let body = ReadyResponse {
        status: if ok { "ok".into() } else { "error".into() },
        backend,
        checks,
    };
    let status = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    backend: Option<&'static str>,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}
