//! Server error reporting
//!
//! Errors carry the operation that failed and, where there is one, the file or
//! address it failed on.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::Path;

/// Error type that records what operation failed and on which target
#[derive(Debug)]
pub struct ServerError {
    pub operation: String,
    pub target: Option<String>,
    pub source: Box<dyn Error + Send + Sync>,
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref target) = self.target {
            write!(f, "{} failed for '{}': {}", self.operation, target, self.source)
        } else {
            write!(f, "{} failed: {}", self.operation, self.source)
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Create an error for a failed file operation
pub fn file_operation_error<P: AsRef<Path>>(
    operation: &str,
    path: P,
    error: io::Error,
) -> ServerError {
    ServerError {
        operation: operation.to_string(),
        target: Some(path.as_ref().to_string_lossy().to_string()),
        source: Box::new(error),
    }
}

/// Create an error for a failed network operation
pub fn network_operation_error(
    operation: &str,
    address: &str,
    error: Box<dyn Error + Send + Sync>,
) -> ServerError {
    ServerError {
        operation: operation.to_string(),
        target: Some(address.to_string()),
        source: error,
    }
}

/// Create an error for an operation with no file or address attached
pub fn operation_error(
    operation: &str,
    error: Box<dyn Error + Send + Sync>,
) -> ServerError {
    ServerError {
        operation: operation.to_string(),
        target: None,
        source: error,
    }
}

/// Network operations that report the address they failed on
pub mod network_ops {
    use super::*;
    use tokio::net::TcpListener;

    /// Bind a TCP listener, reporting the address on failure
    pub async fn bind_tcp_listener(addr: &str) -> Result<TcpListener, ServerError> {
        TcpListener::bind(addr).await
            .map_err(|e| network_operation_error("bind_tcp_listener", addr, Box::new(e)))
    }
}
