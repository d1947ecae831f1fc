//! Bucket adapter and its backends.

pub mod bucket;
pub mod local_bucket;
pub mod memory_bucket;
