//! Key-addressed object storage proxy.
//!
//! `GET/PUT/DELETE /api/storage/{key}` over a pluggable bucket, plus the
//! client helper and upload widget that drive the endpoint.

pub mod client;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
