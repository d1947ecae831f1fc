//! Object key transport helpers.
//!
//! Keys are opaque strings that may contain `/`. On the wire they are encoded
//! as a single path component using the same rules as `encodeURIComponent`.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Path under which the storage endpoint is mounted.
pub const STORAGE_PATH: &str = "/api/storage";

/// Everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )` is escaped.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a key so it fits in one path segment.
pub fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, URI_COMPONENT).to_string()
}

/// Relative URL at which the object stored under `key` can be fetched.
pub fn file_url(key: &str) -> String {
    format!("{}/{}", STORAGE_PATH, encode_key(key))
}

/// Last `/`-separated segment of a key, used as the download filename.
pub fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
