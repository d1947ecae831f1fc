//! Client side of the storage endpoint: the HTTP helper and the upload
//! widget that drives it.

pub mod storage_client;
pub mod upload_widget;
