//! ACME Certificate Manager
//!
//! Obtains certificates with TLS-ALPN-01 through rustls-acme. Every host in
//! the certificate policy's whitelist gets its own ACME issuer. Issuers start
//! when a new whitelist version is published, or during the first handshake
//! for a host that is authorized but has none yet. Every certificate lookup
//! during a TLS handshake is checked against the policy first.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::StreamExt;
use log::{debug, error, info};
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls_acme::caches::DirCache;
use rustls_acme::{AcmeConfig, ResolvesServerCertAcme};
use tokio_rustls::TlsAcceptor;

use super::certificate_policy::{CertificatePolicy, HostDecision, Whitelist};
use super::error::{operation_error, ServerError};
use super::hostname;

/// ALPN protocol identifier for TLS-ALPN-01 challenges
pub const ACME_TLS_ALPN: &[u8] = b"acme-tls/1";

#[derive(Debug, Clone)]
pub struct AcmeSettings {
    /// Directory for account keys and issued certificates
    pub cache_dir: PathBuf,
    /// Account contact, with or without the `mailto:` prefix
    pub contact: Option<String>,
    /// Let's Encrypt production directory rather than staging
    pub production: bool,
}

pub struct CertificateManager {
    policy: Arc<CertificatePolicy>,
    settings: AcmeSettings,
    provider: Arc<CryptoProvider>,
    issuers: RwLock<HashMap<String, Arc<ResolvesServerCertAcme>>>,
}

impl fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let issuers = self.issuers.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("CertificateManager")
            .field("settings", &self.settings)
            .field("issuers", &issuers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CertificateManager {
    pub fn new(policy: Arc<CertificatePolicy>, settings: AcmeSettings) -> Arc<Self> {
        Arc::new(Self {
            policy,
            settings,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            issuers: RwLock::new(HashMap::new()),
        })
    }

    /// Follow the certificate policy, starting an issuer for every newly
    /// whitelisted host. Runs for the life of the policy.
    pub async fn run(self: Arc<Self>) {
        let mut updates = self.policy.subscribe();
        loop {
            let whitelist = updates.borrow_and_update().clone();
            for host in self.pending_hosts(&whitelist) {
                self.issuer_or_start(&host);
            }

            if updates.changed().await.is_err() {
                break;
            }
        }
    }

    /// Whitelisted hosts that have no issuer yet
    fn pending_hosts(&self, whitelist: &Whitelist) -> Vec<String> {
        let issuers = self.issuers.read().unwrap_or_else(PoisonError::into_inner);
        let mut pending: Vec<String> = whitelist
            .hosts()
            .filter(|host| !issuers.contains_key(*host))
            .map(str::to_string)
            .collect();
        pending.sort();
        pending
    }

    /// Issuer for an authorized canonical host, started on first use
    ///
    /// Returns None for hosts the policy denies, or outside a tokio runtime.
    fn authorized_issuer(&self, host: &str) -> Option<Arc<ResolvesServerCertAcme>> {
        if self.policy.authorize(host) == HostDecision::Deny {
            debug!("TLS handshake for unregistered host {} refused", host);
            return None;
        }
        self.issuer_or_start(host)
    }

    fn issuer_or_start(&self, host: &str) -> Option<Arc<ResolvesServerCertAcme>> {
        if let Some(issuer) = self.issuer(host) {
            return Some(issuer);
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Cannot start certificate issuer for {} outside the runtime", host);
            return None;
        };

        // Check and insert under one write lock so each host gets a single issuer
        let mut issuers = self.issuers.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(issuer) = issuers.get(host) {
            return Some(issuer.clone());
        }

        let mut config = AcmeConfig::new_with_provider([host.to_string()], self.provider.clone())
            .cache(DirCache::new(self.settings.cache_dir.clone()))
            .directory_lets_encrypt(self.settings.production);
        if let Some(contact) = self.settings.contact.as_deref() {
            config = config.contact_push(mailto(contact));
        }

        let mut state = config.state();
        let issuer = state.resolver();
        issuers.insert(host.to_string(), issuer.clone());
        drop(issuers);

        info!("Starting certificate issuer for {} (production={})", host, self.settings.production);
        let host = host.to_string();
        runtime.spawn(async move {
            while let Some(event) = state.next().await {
                match event {
                    Ok(ok) => info!("ACME {}: {:?}", host, ok),
                    Err(err) => error!("ACME {}: {:?}", host, err),
                }
            }
        });

        Some(issuer)
    }

    fn issuer(&self, host: &str) -> Option<Arc<ResolvesServerCertAcme>> {
        self.issuers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(host)
            .cloned()
    }

    /// TLS acceptor whose certificates come from this manager
    pub fn tls_acceptor(self: &Arc<Self>) -> Result<TlsAcceptor, ServerError> {
        let mut config = rustls::ServerConfig::builder_with_provider(self.provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| operation_error("build TLS config", Box::new(e)))?
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(PolicyCertResolver { manager: self.clone() }));
        config.alpn_protocols = vec![b"http/1.1".to_vec(), ACME_TLS_ALPN.to_vec()];

        Ok(TlsAcceptor::from(Arc::new(config)))
    }
}

/// Certificate lookup gated by the certificate policy
#[derive(Debug)]
struct PolicyCertResolver {
    manager: Arc<CertificateManager>,
}

impl ResolvesServerCert for PolicyCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(server_name) = client_hello.server_name() else {
            debug!("TLS handshake without SNI refused");
            return None;
        };
        let Ok(host) = hostname::canonicalize(server_name) else {
            debug!("TLS handshake for invalid name {:?} refused", server_name);
            return None;
        };

        let issuer = self.manager.authorized_issuer(&host)?;

        if rustls_acme::is_tls_alpn_challenge(&client_hello) {
            debug!("Answering TLS-ALPN-01 challenge for {}", host);
        }
        issuer.resolve(client_hello)
    }
}

/// ACME contacts are URLs; bare addresses get a `mailto:` scheme
fn mailto(contact: &str) -> String {
    if contact.starts_with("mailto:") {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::domain_registry::DomainRegistry;

    fn manager(policy: Arc<CertificatePolicy>) -> Arc<CertificateManager> {
        CertificateManager::new(
            policy,
            AcmeSettings {
                cache_dir: PathBuf::from("certs"),
                contact: None,
                production: false,
            },
        )
    }

    #[test]
    fn test_mailto() {
        assert_eq!(mailto("ops@example.com"), "mailto:ops@example.com");
        assert_eq!(mailto("mailto:ops@example.com"), "mailto:ops@example.com");
    }

    #[test]
    fn test_pending_hosts_follow_whitelist() {
        let policy = Arc::new(CertificatePolicy::new());
        let manager = manager(policy.clone());
        assert!(manager.pending_hosts(&policy.snapshot()).is_empty());

        policy.refresh_whitelist(["b.example", "a.example"]);
        assert_eq!(manager.pending_hosts(&policy.snapshot()), vec!["a.example", "b.example"]);
    }

    #[tokio::test]
    async fn test_issuer_available_as_soon_as_register_returns() {
        let dir = tempfile::tempdir().unwrap();
        let policy = Arc::new(CertificatePolicy::new());
        let registry = DomainRegistry::new(dir.path().join("domains.txt"), policy.clone());
        let manager = CertificateManager::new(
            policy,
            AcmeSettings {
                cache_dir: dir.path().join("certs"),
                contact: None,
                production: false,
            },
        );

        assert!(manager.authorized_issuer("new.example").is_none());

        registry.register("new.example").unwrap();
        let issuer = manager.authorized_issuer("new.example").unwrap();
        let again = manager.authorized_issuer("new.example").unwrap();
        assert!(Arc::ptr_eq(&issuer, &again));
        assert!(manager.pending_hosts(&manager.policy.snapshot()).is_empty());

        assert!(manager.authorized_issuer("other.example").is_none());
    }

    #[test]
    fn test_tls_acceptor_advertises_acme_alpn() {
        let manager = manager(Arc::new(CertificatePolicy::new()));
        let acceptor = manager.tls_acceptor().unwrap();
        let config = acceptor.config();
        assert!(config.alpn_protocols.iter().any(|p| p == ACME_TLS_ALPN));
        assert!(config.alpn_protocols.iter().any(|p| p == b"http/1.1"));
    }
}
