//! HTTP Version Support
//!
//! Only HTTP/1.0 and HTTP/1.1 are served. Every site is chosen by its Host
//! header, which HTTP/0.9 requests cannot carry.

/// HTTP version enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    /// HTTP/1.0 - closes after each response unless Keep-Alive is requested
    Http10,
    /// HTTP/1.1 - persistent connections by default
    Http11,
}

impl HttpVersion {
    /// Parse the version token of a request line (e.g. `HTTP/1.1`)
    ///
    /// # Returns
    /// * `Option<HttpVersion>` - None for anything other than HTTP/1.0 or HTTP/1.1
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "HTTP/1.1" => Some(HttpVersion::Http11),
            "HTTP/1.0" => Some(HttpVersion::Http10),
            _ => None,
        }
    }

    /// Get the status line prefix for this HTTP version
    pub fn status_line_prefix(&self) -> &'static str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
        }
    }

    /// Check if this version keeps connections open unless told otherwise
    pub fn supports_persistent_connections(&self) -> bool {
        matches!(self, HttpVersion::Http11)
    }
}

impl std::fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_line_prefix())
    }
}
