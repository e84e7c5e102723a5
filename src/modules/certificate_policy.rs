//! Certificate Policy
//!
//! Holds the whitelist of hostnames the certificate manager may obtain
//! certificates for. The whitelist is rebuilt from the full registry contents on
//! every change and published as a new version; readers always get the latest
//! complete snapshot.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;

use super::hostname;

/// Outcome of a certificate authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostDecision {
    Allow,
    Deny,
}

/// One published version of the whitelist
#[derive(Debug, Default)]
pub struct Whitelist {
    version: u64,
    hosts: HashSet<String>,
}

impl Whitelist {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, hostname: &str) -> bool {
        self.hosts.contains(hostname)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.iter().map(String::as_str)
    }
}

/// Whitelist-based host policy consulted on every certificate lookup
#[derive(Debug)]
pub struct CertificatePolicy {
    current: watch::Sender<Arc<Whitelist>>,
}

impl Default for CertificatePolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificatePolicy {
    /// Create a policy with an empty whitelist (version 0)
    pub fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(Whitelist::default()));
        Self { current }
    }

    /// Rebuild the whitelist from the complete set of registered hostnames
    ///
    /// This is never incremental: the new version contains exactly `hostnames`.
    pub fn refresh_whitelist<I, S>(&self, hostnames: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts: HashSet<String> = hostnames
            .into_iter()
            .map(|h| h.as_ref().to_string())
            .collect();

        self.current.send_modify(|whitelist| {
            *whitelist = Arc::new(Whitelist {
                version: whitelist.version + 1,
                hosts,
            });
        });
    }

    /// Whether a certificate may be issued or served for `hostname`
    pub fn authorize(&self, hostname: &str) -> HostDecision {
        let Ok(hostname) = hostname::canonicalize(hostname) else {
            return HostDecision::Deny;
        };

        if self.current.borrow().contains(&hostname) {
            HostDecision::Allow
        } else {
            HostDecision::Deny
        }
    }

    /// The most recently published whitelist
    pub fn snapshot(&self) -> Arc<Whitelist> {
        self.current.borrow().clone()
    }

    /// Receive every whitelist version published from now on
    pub fn subscribe(&self) -> watch::Receiver<Arc<Whitelist>> {
        self.current.subscribe()
    }
}
