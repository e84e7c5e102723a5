//! Hostname canonicalization
//!
//! Host headers arrive in whatever form the client sent. Every hostname that
//! reaches the registry, the certificate policy or the access log goes through
//! [`canonicalize`] first, so `Example.COM`, `example.com.` and
//! `example.com:8443` all name the same site.

use std::fmt;

/// Maximum length of a DNS name in presentation form
const MAX_HOSTNAME_LEN: usize = 253;
/// Maximum length of a single DNS label
const MAX_LABEL_LEN: usize = 63;

/// Why a Host header value could not be used as a hostname
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostnameError {
    /// Nothing left after trimming and stripping the port
    Empty,
    /// Longer than a DNS name may be
    TooLong(usize),
    /// Bracketed IPv6 literal; certificates are only issued for names
    IpLiteral,
    /// A label is empty, too long, or contains a character outside `[a-z0-9-]`
    InvalidLabel(String),
}

impl fmt::Display for HostnameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostnameError::Empty => write!(f, "empty hostname"),
            HostnameError::TooLong(len) => {
                write!(f, "hostname is {} bytes, limit is {}", len, MAX_HOSTNAME_LEN)
            }
            HostnameError::IpLiteral => write!(f, "IP literals are not accepted as hostnames"),
            HostnameError::InvalidLabel(label) => write!(f, "invalid hostname label {:?}", label),
        }
    }
}

impl std::error::Error for HostnameError {}

/// Turn a raw Host header value into its canonical form
///
/// Trims whitespace, strips a `:port` suffix, lowercases and drops a single
/// trailing dot. The result must be a syntactically valid DNS name.
pub fn canonicalize(raw: &str) -> Result<String, HostnameError> {
    let host = raw.trim();

    if host.starts_with('[') {
        return Err(HostnameError::IpLiteral);
    }

    let host = strip_port(host);
    let host = host.strip_suffix('.').unwrap_or(host);

    if host.is_empty() {
        return Err(HostnameError::Empty);
    }
    if host.len() > MAX_HOSTNAME_LEN {
        return Err(HostnameError::TooLong(host.len()));
    }

    let host = host.to_ascii_lowercase();
    for label in host.split('.') {
        if !is_valid_label(label) {
            return Err(HostnameError::InvalidLabel(label.to_string()));
        }
    }

    Ok(host)
}

/// Strip a trailing `:port` if what follows the last colon is all digits
fn strip_port(host: &str) -> &str {
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}

fn is_valid_label(label: &str) -> bool {
    if label.is_empty() || label.len() > MAX_LABEL_LEN {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
