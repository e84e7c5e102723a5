//! Connection Policy Handler
//!
//! Decides whether a connection stays open after a response, and how long an
//! idle connection waits for its next request.

use std::time::Duration;

use super::http_request::HttpRequest;
use super::http_version::HttpVersion;

/// Responses larger than this close the connection afterwards
const MAX_KEEP_ALIVE_RESPONSE: usize = 10 * 1024 * 1024;

/// Connection policy for determining Keep-Alive behavior
#[derive(Debug, Clone)]
pub struct ConnectionPolicy {
    /// Maximum number of requests per connection
    pub max_requests: usize,
    /// How long to wait for the next request on an open connection
    pub idle_timeout: Duration,
    /// How long a TLS handshake may take
    pub handshake_timeout: Duration,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_requests: 100,
            idle_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ConnectionPolicy {
    pub fn new(max_requests: usize, idle_timeout: Duration) -> Self {
        Self {
            max_requests,
            idle_timeout,
            ..Self::default()
        }
    }

    /// Determine if connection should be kept alive
    ///
    /// # Arguments
    /// * `version` - HTTP version of the request
    /// * `request_connection_header` - Connection header from request (if any)
    /// * `response_size` - Size of the response body in bytes
    /// * `request_count` - Number of requests already handled on this connection
    pub fn should_keep_alive(
        &self,
        version: HttpVersion,
        request_connection_header: Option<&str>,
        response_size: usize,
        request_count: usize,
    ) -> bool {
        if request_count >= self.max_requests {
            return false;
        }

        if response_size > MAX_KEEP_ALIVE_RESPONSE {
            return false;
        }

        let connection = request_connection_header.map(str::to_ascii_lowercase);
        match version {
            HttpVersion::Http10 => connection.is_some_and(|c| c.contains("keep-alive")),
            HttpVersion::Http11 => !connection.is_some_and(|c| c.contains("close")),
        }
    }

    /// Keep-alive decision for a request that has been answered
    ///
    /// Requests with a body always close: the body is never read, so the next
    /// request could not be framed.
    pub fn keep_alive_after(&self, request: &HttpRequest, response_size: usize, request_count: usize) -> bool {
        !request.has_body()
            && self.should_keep_alive(request.version, request.header("connection"), response_size, request_count)
    }
}
