//! File Handler Module
//!
//! Turns a resolved file into a response: reads it, attaches validators and
//! cache headers, and answers conditional requests with 304. Path resolution
//! runs on a blocking worker. I/O failures are contained here and become 404
//! or 500 responses.

use std::io::ErrorKind;

use log::{debug, warn};

use super::content_resolver::ContentResolver;
use super::file_cache::{should_return_not_modified, FileCacheInfo};
use super::http_request::HttpRequest;
use super::http_response::HttpResponse;

/// Serve static content for a canonical hostname
pub async fn serve_content(resolver: &ContentResolver, hostname: &str, request: &HttpRequest) -> HttpResponse {
    let lookup = resolver.clone();
    let host = hostname.to_string();
    let path = request.path().to_string();
    let resolved = match tokio::task::spawn_blocking(move || lookup.resolve(&host, &path)).await {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Content lookup for {}{} failed: {}", hostname, request.path(), e);
            return HttpResponse::internal_server_error();
        }
    };
    let Some(file) = resolved else {
        debug!("No content for {}{}", hostname, request.path());
        return HttpResponse::not_found();
    };

    let (contents, metadata) = match tokio::fs::read(&file.path).await {
        Ok(contents) => match tokio::fs::metadata(&file.path).await {
            Ok(metadata) => (contents, metadata),
            Err(e) => return read_failure(&file.path, e),
        },
        Err(e) => return read_failure(&file.path, e),
    };

    let cache_info = FileCacheInfo::new(&metadata, &contents);
    let last_modified = cache_info.last_modified_http();

    if should_return_not_modified(&cache_info, request) {
        return HttpResponse::not_modified(&last_modified, &cache_info.etag);
    }

    let mut response = HttpResponse::ok(contents);
    response.set_content_type(file.content_type);
    response.set_content_length();
    response.add_caching_headers(&last_modified, &cache_info.etag, cache_info.get_cache_duration(file.content_type));
    response.add_security_headers();
    response
}

fn read_failure(path: &std::path::Path, error: std::io::Error) -> HttpResponse {
    if error.kind() == ErrorKind::NotFound {
        // Removed between resolution and read
        debug!("{} disappeared before it could be read", path.display());
        HttpResponse::not_found()
    } else {
        warn!("Failed to read {}: {}", path.display(), error);
        HttpResponse::internal_server_error()
    }
}
