//! Axum request handlers.

pub mod health_handlers;
pub mod storage_handlers;
