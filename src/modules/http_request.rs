//! HTTP request head parsing
//!
//! Requests are read off the wire until the blank line that ends the head,
//! then parsed into method, target, version and headers. Bodies are not read;
//! a request that announces one is answered and the connection closed.

use std::fmt;

use super::http_version::HttpVersion;

/// Largest request head accepted, including the terminating blank line
pub const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Request methods the server distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Head,
    Other(String),
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Other(other) => other,
        }
    }
}

/// Why a request head could not be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    MalformedRequestLine,
    UnsupportedVersion(String),
    MalformedHeader(String),
    HeadTooLarge,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::MalformedRequestLine => write!(f, "malformed request line"),
            RequestError::UnsupportedVersion(v) => write!(f, "unsupported HTTP version {:?}", v),
            RequestError::MalformedHeader(h) => write!(f, "malformed header line {:?}", h),
            RequestError::HeadTooLarge => write!(f, "request head exceeds {} bytes", MAX_HEAD_SIZE),
        }
    }
}

impl std::error::Error for RequestError {}

/// A parsed request head
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Request target exactly as sent, including any query string
    pub target: String,
    pub version: HttpVersion,
    headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Parse a request head (request line plus header lines)
    pub fn parse(head: &str) -> Result<Self, RequestError> {
        let mut lines = head.split("\r\n").flat_map(|l| l.split('\n'));

        let request_line = lines.next().ok_or(RequestError::MalformedRequestLine)?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(RequestError::MalformedRequestLine);
        };

        let version = HttpVersion::from_token(version)
            .ok_or_else(|| RequestError::UnsupportedVersion(version.to_string()))?;

        let mut headers = Vec::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| RequestError::MalformedHeader(line.to_string()))?;
            headers.push((name.trim().to_string(), value.trim().to_string()));
        }

        Ok(Self {
            method: Method::parse(method),
            target: target.to_string(),
            version,
            headers,
        })
    }

    /// First value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Raw Host header value, port included
    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }

    /// Path component of the target, without query or fragment
    pub fn path(&self) -> &str {
        let end = self.target.find(['?', '#']).unwrap_or(self.target.len());
        &self.target[..end]
    }

    /// Query string without the leading `?`, or empty
    pub fn query(&self) -> &str {
        match self.target.split_once('?') {
            Some((_, rest)) => rest.split('#').next().unwrap_or(""),
            None => "",
        }
    }

    /// Whether the client announced a request body
    pub fn has_body(&self) -> bool {
        let length = self
            .header("content-length")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        length > 0 || self.header("transfer-encoding").is_some()
    }
}

/// Split a complete request head off the front of `buf`
///
/// Returns `Ok(None)` while the terminating blank line has not arrived yet.
/// Bytes after the head stay in `buf` for the next request.
pub fn take_head(buf: &mut Vec<u8>) -> Result<Option<String>, RequestError> {
    match buf.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(end) => {
            let head: Vec<u8> = buf.drain(..end + 4).collect();
            Ok(Some(String::from_utf8_lossy(&head[..end]).into_owned()))
        }
        None if buf.len() >= MAX_HEAD_SIZE => Err(RequestError::HeadTooLarge),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let request = HttpRequest::parse(
            "GET /docs/index.html?lang=en HTTP/1.1\r\nHost: Example.com:8080\r\nConnection: keep-alive",
        )
        .unwrap();

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.version, HttpVersion::Http11);
        assert_eq!(request.path(), "/docs/index.html");
        assert_eq!(request.query(), "lang=en");
        assert_eq!(request.host(), Some("Example.com:8080"));
        assert_eq!(request.header("CONNECTION"), Some("keep-alive"));
        assert!(!request.has_body());
    }

    #[test]
    fn test_missing_host() {
        let request = HttpRequest::parse("HEAD / HTTP/1.0").unwrap();
        assert_eq!(request.method, Method::Head);
        assert_eq!(request.host(), None);
        assert_eq!(request.query(), "");
    }

    #[test]
    fn test_malformed_requests() {
        assert_eq!(HttpRequest::parse("GET /").unwrap_err(), RequestError::MalformedRequestLine);
        assert_eq!(HttpRequest::parse("").unwrap_err(), RequestError::MalformedRequestLine);
        assert!(matches!(
            HttpRequest::parse("GET / HTTP/2.0").unwrap_err(),
            RequestError::UnsupportedVersion(_)
        ));
        assert!(matches!(
            HttpRequest::parse("GET / HTTP/1.1\r\nno colon here").unwrap_err(),
            RequestError::MalformedHeader(_)
        ));
    }

    #[test]
    fn test_body_detection() {
        let request = HttpRequest::parse("POST /upload HTTP/1.1\r\nHost: a.example\r\nContent-Length: 12").unwrap();
        assert_eq!(request.method, Method::Other("POST".to_string()));
        assert!(request.has_body());
    }

    #[test]
    fn test_take_head_waits_for_blank_line() {
        let mut buf = b"GET / HTTP/1.1\r\nHost: a.example\r\n".to_vec();
        assert_eq!(take_head(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"\r\nGET /next HTTP/1.1\r\n");
        let head = take_head(&mut buf).unwrap().unwrap();
        assert_eq!(head, "GET / HTTP/1.1\r\nHost: a.example");
        assert_eq!(buf, b"GET /next HTTP/1.1\r\n");
    }

    #[test]
    fn test_take_head_limits_size() {
        let mut buf = vec![b'a'; MAX_HEAD_SIZE];
        assert_eq!(take_head(&mut buf), Err(RequestError::HeadTooLarge));
    }
}
