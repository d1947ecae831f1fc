//! Core data models shared by the storage endpoint and the client helper.
//!
//! `object` describes what the bucket holds, `key` how keys travel over HTTP,
//! and `responses` the JSON bodies exchanged between client and server.

pub mod key;
pub mod object;
pub mod responses;
