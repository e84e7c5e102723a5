//! HTTP Response Builder
//!
//! Builds responses independently of the connection they are written to and
//! encodes them for the request's HTTP version.

use super::http_version::HttpVersion;

/// HTTP response representation
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code (e.g., 200, 404, 500)
    pub status_code: u16,
    /// HTTP status text (e.g., "OK", "Not Found", "Internal Server Error")
    pub status_text: String,
    /// HTTP headers in the order they are written
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a new HTTP response
    ///
    /// # Arguments
    /// * `status_code` - HTTP status code
    /// * `status_text` - HTTP status text
    /// * `body` - Response body as bytes
    pub fn new(status_code: u16, status_text: &str, body: Vec<u8>) -> Self {
        Self {
            status_code,
            status_text: status_text.to_string(),
            headers: Vec::new(),
            body,
        }
    }

    /// Create a 200 OK response
    pub fn ok(body: Vec<u8>) -> Self {
        Self::new(200, "OK", body)
    }

    /// Create a plain-text error response with the given status
    pub fn error(status_code: u16, status_text: &str) -> Self {
        let mut response = Self::new(status_code, status_text, format!("{} {}\n", status_code, status_text).into_bytes());
        response.set_content_type("text/plain; charset=utf-8");
        response.set_content_length();
        response
    }

    /// Create a 400 Bad Request response
    pub fn bad_request() -> Self {
        Self::error(400, "Bad Request")
    }

    /// Create a 404 Not Found response
    pub fn not_found() -> Self {
        Self::error(404, "Not Found")
    }

    /// Create a 405 Method Not Allowed response advertising GET and HEAD
    pub fn method_not_allowed() -> Self {
        let mut response = Self::error(405, "Method Not Allowed");
        response.set_header("Allow", "GET, HEAD");
        response
    }

    /// Create a 431 Request Header Fields Too Large response
    pub fn head_too_large() -> Self {
        Self::error(431, "Request Header Fields Too Large")
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_server_error() -> Self {
        Self::error(500, "Internal Server Error")
    }

    /// Create a 505 HTTP Version Not Supported response
    pub fn version_not_supported() -> Self {
        Self::error(505, "HTTP Version Not Supported")
    }

    /// Create a redirect response
    ///
    /// # Arguments
    /// * `status_code` - One of 301, 302, 303, 307, 308
    /// * `location` - The new location URL
    pub fn redirect(status_code: u16, location: &str) -> Self {
        let status_text = match status_code {
            301 => "Moved Permanently",
            303 => "See Other",
            307 => "Temporary Redirect",
            308 => "Permanent Redirect",
            _ => "Found",
        };
        let mut response = Self::new(status_code, status_text, Vec::new());
        response.set_header("Location", location);
        response.set_content_length();
        response
    }

    /// Create a 301 Moved Permanently response
    pub fn moved_permanently(location: &str) -> Self {
        Self::redirect(301, location)
    }

    /// Create a 304 Not Modified response for conditional requests
    pub fn not_modified(last_modified: &str, etag: &str) -> Self {
        let mut response = Self::new(304, "Not Modified", Vec::new());
        response.set_last_modified(last_modified);
        response.set_etag(etag);
        response
    }

    /// Set a header, replacing an existing header of the same name
    pub fn set_header(&mut self, name: &str, value: &str) {
        match self.headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some(existing) => existing.1 = value.to_string(),
            None => self.headers.push((name.to_string(), value.to_string())),
        }
    }

    /// Value of a header, if set
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set Content-Type header
    pub fn set_content_type(&mut self, content_type: &str) {
        self.set_header("Content-Type", content_type);
    }

    /// Set Content-Length header based on body size
    pub fn set_content_length(&mut self) {
        let length = self.body.len().to_string();
        self.set_header("Content-Length", &length);
    }

    /// Set Cache-Control header
    pub fn set_cache_control(&mut self, cache_control: &str) {
        self.set_header("Cache-Control", cache_control);
    }

    /// Set Last-Modified header
    pub fn set_last_modified(&mut self, last_modified: &str) {
        self.set_header("Last-Modified", last_modified);
    }

    /// Set ETag header for cache validation
    pub fn set_etag(&mut self, etag: &str) {
        self.set_header("ETag", etag);
    }

    /// Add caching headers for static files
    ///
    /// # Arguments
    /// * `last_modified` - Last modified date in HTTP format
    /// * `etag` - ETag value for cache validation
    /// * `cache_duration_seconds` - How long to cache (0 = no cache, -1 = cache forever)
    pub fn add_caching_headers(&mut self, last_modified: &str, etag: &str, cache_duration_seconds: i64) {
        self.set_last_modified(last_modified);
        self.set_etag(etag);

        match cache_duration_seconds {
            -1 => self.set_cache_control("public, max-age=31536000, immutable"),
            0 => self.set_cache_control("no-cache"),
            duration if duration > 0 => self.set_cache_control(&format!("public, max-age={}", duration)),
            _ => self.set_cache_control("no-cache"),
        }
    }

    /// Add security headers without overriding cache control
    pub fn add_security_headers(&mut self) {
        self.set_header("X-Content-Type-Options", "nosniff");
        self.set_header("X-Frame-Options", "DENY");
    }

    /// Encode the response for a specific HTTP version
    ///
    /// # Arguments
    /// * `version` - HTTP version to encode for
    /// * `keep_alive` - Whether to keep the connection alive
    /// * `include_body` - False for HEAD requests; headers are unchanged
    pub fn encode(&self, version: HttpVersion, keep_alive: bool, include_body: bool) -> Vec<u8> {
        let mut response = Vec::with_capacity(256 + self.body.len());

        let status_line = format!("{} {} {}\r\n",
            version.status_line_prefix(),
            self.status_code,
            self.status_text
        );
        response.extend_from_slice(status_line.as_bytes());

        for (name, value) in &self.headers {
            response.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        match version {
            // Persistent by default; only closing needs announcing
            HttpVersion::Http11 if !keep_alive => response.extend_from_slice(b"Connection: close\r\n"),
            HttpVersion::Http10 if keep_alive => response.extend_from_slice(b"Connection: Keep-Alive\r\n"),
            _ => {}
        }

        response.extend_from_slice(b"\r\n");

        if include_body {
            response.extend_from_slice(&self.body);
        }

        response
    }
}
