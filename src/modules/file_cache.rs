//! File Caching Utilities
//!
//! Validators for served files: an MD5 content ETag, the Last-Modified date,
//! per-type cache lifetimes and conditional request handling.

use std::fs::Metadata;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use super::http_request::HttpRequest;

/// File cache information
#[derive(Debug, Clone)]
pub struct FileCacheInfo {
    /// Last modified time, truncated to whole seconds
    pub last_modified: DateTime<Utc>,
    /// File size in bytes
    pub size: u64,
    /// Quoted ETag value derived from the file contents
    pub etag: String,
}

impl FileCacheInfo {
    /// Create cache info from file metadata and the bytes about to be served
    pub fn new(metadata: &Metadata, contents: &[u8]) -> Self {
        let modified: DateTime<Utc> = metadata
            .modified()
            .unwrap_or_else(|_| SystemTime::now())
            .into();
        let last_modified = DateTime::from_timestamp(modified.timestamp(), 0).unwrap_or(modified);

        Self {
            last_modified,
            size: metadata.len(),
            etag: format!("\"{:x}\"", md5::compute(contents)),
        }
    }

    /// Last-Modified header value in HTTP date format (RFC 7231)
    pub fn last_modified_http(&self) -> String {
        format_http_date(&self.last_modified)
    }

    /// Get cache duration for different file types
    ///
    /// # Returns
    /// * `i64` - Cache duration in seconds (0 = revalidate every time)
    pub fn get_cache_duration(&self, content_type: &str) -> i64 {
        match content_type {
            t if t.starts_with("image/") => 31536000,
            t if t.starts_with("font/") => 31536000,
            t if t.starts_with("text/css") => 86400,
            t if t.starts_with("application/javascript") => 86400,
            t if t.starts_with("application/wasm") => 86400,

            t if t.starts_with("application/gzip") => 86400,
            t if t.starts_with("application/zip") => 86400,
            t if t.starts_with("application/octet-stream") => 86400,

            t if t.starts_with("text/html") => 0,
            _ => 3600,
        }
    }
}

/// Check if a conditional request should return 304 Not Modified
///
/// If-None-Match takes precedence; If-Modified-Since is only consulted when the
/// client sent no entity tags.
pub fn should_return_not_modified(cache_info: &FileCacheInfo, request: &HttpRequest) -> bool {
    if let Some(if_none_match) = request.header("if-none-match") {
        let server_etag = cache_info.etag.trim_matches('"');
        return if_none_match.split(',').any(|tag| {
            let tag = tag.trim();
            tag == "*" || tag.trim_start_matches("W/").trim_matches('"') == server_etag
        });
    }

    if let Some(if_modified_since) = request.header("if-modified-since") {
        if let Ok(since) = DateTime::parse_from_rfc2822(if_modified_since) {
            return cache_info.last_modified <= since.with_timezone(&Utc);
        }
    }

    false
}

/// Format a timestamp as an HTTP date: "Wed, 21 Oct 2015 07:28:00 GMT"
pub fn format_http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
