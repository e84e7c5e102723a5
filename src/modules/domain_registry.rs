//! Domain Registry
//!
//! The authoritative, process-lifetime set of hostnames this server serves and
//! obtains certificates for. Membership lives in memory; the full list is
//! persisted to a text file, one hostname per line, on every insert.
//!
//! All mutation goes through one mutex covering check-and-insert, the file
//! rewrite and the certificate policy refresh. Once [`DomainRegistry::register`]
//! returns `Added` for a host, every later membership test and certificate
//! authorization for it succeeds.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{info, warn};

use super::certificate_policy::CertificatePolicy;
use super::error::{file_operation_error, ServerError};
use super::hostname::{self, HostnameError};

/// Result of a registration attempt that did not hit a persistence failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The hostname was new and is now persisted and whitelisted
    Added,
    /// The hostname was already registered; nothing changed
    AlreadyRegistered,
    /// The input is not a usable hostname; nothing changed
    Rejected(HostnameError),
}

#[derive(Debug)]
pub struct DomainRegistry {
    path: PathBuf,
    /// Insertion-ordered list; its lock serializes every registration
    domains: Mutex<Vec<String>>,
    /// Read side for membership tests, only written while `domains` is held
    known: RwLock<HashSet<String>>,
    policy: Arc<CertificatePolicy>,
}

impl DomainRegistry {
    /// Create an empty registry backed by `path` without touching the disk
    pub fn new(path: impl Into<PathBuf>, policy: Arc<CertificatePolicy>) -> Self {
        Self {
            path: path.into(),
            domains: Mutex::new(Vec::new()),
            known: RwLock::new(HashSet::new()),
            policy,
        }
    }

    /// Load the registry from `path`, creating the file if it does not exist
    ///
    /// Every non-blank line is canonicalized and deduplicated the same way
    /// [`register`](Self::register) does. If that changed anything the file is
    /// rewritten once. The policy is refreshed with the loaded set.
    pub fn load(path: impl Into<PathBuf>, policy: Arc<CertificatePolicy>) -> Result<Self, ServerError> {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| file_operation_error("create domain list directory", parent, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(|e| file_operation_error("open domain list", &path, e))?;

        let mut domains = Vec::new();
        let mut known = HashSet::new();
        let mut normalized = false;

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| file_operation_error("read domain list", &path, e))?;
            if line.trim().is_empty() {
                continue;
            }

            match hostname::canonicalize(&line) {
                Ok(host) => {
                    if host != line {
                        normalized = true;
                    }
                    if known.insert(host.clone()) {
                        domains.push(host);
                    } else {
                        info!("{} listed more than once in {}", host, path.display());
                        normalized = true;
                    }
                }
                Err(e) => {
                    warn!("Skipping {:?} in {}: {}", line, path.display(), e);
                    normalized = true;
                }
            }
        }

        if normalized {
            persist(&path, &domains)?;
        }

        policy.refresh_whitelist(&domains);
        info!("There are now {} domains registered", domains.len());

        Ok(Self {
            path,
            domains: Mutex::new(domains),
            known: RwLock::new(known),
            policy,
        })
    }

    /// Whether `hostname` is registered
    pub fn is_registered(&self, hostname: &str) -> bool {
        match hostname::canonicalize(hostname) {
            Ok(host) => self.known.read().unwrap_or_else(PoisonError::into_inner).contains(&host),
            Err(_) => false,
        }
    }

    /// Register `hostname`, persisting it and whitelisting it before returning
    ///
    /// An `Err` means the domain list could not be written. The in-memory set
    /// is left as it was before the call, but the caller can no longer trust
    /// the file to match what it has promised to serve.
    pub fn register(&self, hostname: &str) -> Result<Registration, ServerError> {
        let host = match hostname::canonicalize(hostname) {
            Ok(host) => host,
            Err(e) => {
                warn!("Cannot register {:?} as a domain: {}", hostname, e);
                return Ok(Registration::Rejected(e));
            }
        };

        let mut domains = self.domains.lock().unwrap_or_else(PoisonError::into_inner);

        if self.known.read().unwrap_or_else(PoisonError::into_inner).contains(&host) {
            info!("{} already in domain list", host);
            return Ok(Registration::AlreadyRegistered);
        }

        domains.push(host.clone());
        if let Err(e) = persist(&self.path, &domains) {
            domains.pop();
            return Err(e);
        }

        // Whitelist first: a host must never look registered while it is still denied
        self.policy.refresh_whitelist(domains.iter());
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(host.clone());

        info!("Added {} to registered domains", host);
        Ok(Registration::Added)
    }

    /// Registered hostnames in insertion order
    pub fn domains(&self) -> Vec<String> {
        self.domains.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn len(&self) -> usize {
        self.known.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace the domain list file with `domains`
///
/// Writes a sibling temp file, syncs it and renames it over the original so a
/// crash never leaves a partially written list behind.
fn persist(path: &Path, domains: &[String]) -> Result<(), ServerError> {
    let mut tmp_name = OsString::from(path.as_os_str());
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let mut contents = String::new();
    for domain in domains {
        contents.push_str(domain);
        contents.push('\n');
    }

    {
        let mut file = File::create(&tmp_path)
            .map_err(|e| file_operation_error("create temp domain list", &tmp_path, e))?;
        file.write_all(contents.as_bytes())
            .map_err(|e| file_operation_error("write temp domain list", &tmp_path, e))?;
        file.sync_all()
            .map_err(|e| file_operation_error("sync temp domain list", &tmp_path, e))?;
    }

    fs::rename(&tmp_path, path)
        .map_err(|e| file_operation_error("replace domain list", path, e))?;

    sync_parent_dir(path)
}

/// Flush the directory entry created by the rename
#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> Result<(), ServerError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(parent)
        .and_then(|dir| dir.sync_all())
        .map_err(|e| file_operation_error("sync domain list directory", parent, e))
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> Result<(), ServerError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::certificate_policy::HostDecision;
    use std::thread;
    use tempfile::tempdir;

    fn lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_register_twice_keeps_one_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        let registry = DomainRegistry::new(&path, Arc::new(CertificatePolicy::new()));

        assert_eq!(registry.register("twice.example").unwrap(), Registration::Added);
        assert_eq!(registry.register("twice.example").unwrap(), Registration::AlreadyRegistered);

        assert_eq!(registry.domains(), vec!["twice.example"]);
        assert_eq!(lines(&path), vec!["twice.example"]);
    }

    #[test]
    fn test_reload_restores_registered_domains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");

        {
            let registry = DomainRegistry::load(&path, Arc::new(CertificatePolicy::new())).unwrap();
            registry.register("a.example").unwrap();
            registry.register("b.example").unwrap();
        }

        let policy = Arc::new(CertificatePolicy::new());
        let reloaded = DomainRegistry::load(&path, policy.clone()).unwrap();
        assert!(reloaded.is_registered("a.example"));
        assert!(reloaded.is_registered("b.example"));
        assert_eq!(reloaded.domains(), vec!["a.example", "b.example"]);
        assert_eq!(policy.authorize("a.example"), HostDecision::Allow);
        assert_eq!(policy.authorize("b.example"), HostDecision::Allow);
    }

    #[test]
    fn test_empty_hostname_leaves_no_trace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        let policy = Arc::new(CertificatePolicy::new());
        let registry = DomainRegistry::new(&path, policy.clone());

        assert_eq!(registry.register("").unwrap(), Registration::Rejected(HostnameError::Empty));
        assert!(registry.is_empty());
        assert!(!path.exists());
        assert_eq!(policy.snapshot().version(), 0);
    }

    #[test]
    fn test_empty_hostname_does_not_alter_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        let registry = DomainRegistry::new(&path, Arc::new(CertificatePolicy::new()));
        registry.register("kept.example").unwrap();
        let before = fs::read(&path).unwrap();

        registry.register("").unwrap();

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_whitelist_is_fresh_when_register_returns() {
        let dir = tempdir().unwrap();
        let policy = Arc::new(CertificatePolicy::new());
        let registry = DomainRegistry::new(dir.path().join("domains.txt"), policy.clone());

        registry.register("new.example").unwrap();

        assert_eq!(policy.authorize("new.example"), HostDecision::Allow);
        assert_eq!(policy.authorize("missing.example"), HostDecision::Deny);
    }

    #[test]
    fn test_registered_hosts_are_never_denied() {
        let dir = tempdir().unwrap();
        let policy = Arc::new(CertificatePolicy::new());
        let registry = Arc::new(DomainRegistry::new(dir.path().join("domains.txt"), policy.clone()));

        let watcher = {
            let registry = registry.clone();
            let policy = policy.clone();
            thread::spawn(move || loop {
                let registered = registry.is_registered("watched.example");
                let decision = policy.authorize("watched.example");
                if registered {
                    return decision;
                }
                thread::yield_now();
            })
        };

        registry.register("watched.example").unwrap();
        assert_eq!(watcher.join().unwrap(), HostDecision::Allow);
    }

    #[test]
    fn test_persist_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("domains.txt");
        let registry = DomainRegistry::load(&path, Arc::new(CertificatePolicy::new())).unwrap();

        registry.register("a.example").unwrap();
        registry.register("b.example").unwrap();

        assert_eq!(lines(&path), vec!["a.example", "b.example"]);
        let entries: Vec<_> = fs::read_dir(dir.path().join("state"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![OsString::from("domains.txt")]);
    }

    #[test]
    fn test_duplicate_does_not_republish_policy() {
        let dir = tempdir().unwrap();
        let policy = Arc::new(CertificatePolicy::new());
        let registry = DomainRegistry::new(dir.path().join("domains.txt"), policy.clone());

        registry.register("once.example").unwrap();
        let version = policy.snapshot().version();
        registry.register("once.example").unwrap();
        registry.register("ONCE.example.").unwrap();
        assert_eq!(policy.snapshot().version(), version);
    }

    #[test]
    fn test_concurrent_first_contact_registers_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        let registry = Arc::new(DomainRegistry::new(&path, Arc::new(CertificatePolicy::new())));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.register("race.example").unwrap())
            })
            .collect();

        let outcomes: Vec<Registration> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let added = outcomes.iter().filter(|o| **o == Registration::Added).count();
        assert_eq!(added, 1);
        assert_eq!(registry.domains(), vec!["race.example"]);
        assert_eq!(lines(&path), vec!["race.example"]);
    }

    #[test]
    fn test_count_matches_distinct_valid_hostnames() {
        let dir = tempdir().unwrap();
        let registry = DomainRegistry::new(dir.path().join("domains.txt"), Arc::new(CertificatePolicy::new()));

        let sequence = [
            "one.example", "", "two.example", "one.example", "three.example",
            "", "two.example", "Three.Example", "four.example:443",
        ];
        for host in sequence {
            registry.register(host).unwrap();
        }

        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.domains(),
            vec!["one.example", "two.example", "three.example", "four.example"]
        );
    }

    #[test]
    fn test_load_creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("domains.txt");

        let registry = DomainRegistry::load(&path, Arc::new(CertificatePolicy::new())).unwrap();

        assert!(registry.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn test_load_normalizes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        fs::write(&path, "Mixed.Example\n\nplain.example\nmixed.example.\nbad host\nplain.example").unwrap();

        let registry = DomainRegistry::load(&path, Arc::new(CertificatePolicy::new())).unwrap();

        assert_eq!(registry.domains(), vec!["mixed.example", "plain.example"]);
        assert_eq!(lines(&path), vec!["mixed.example", "plain.example"]);
    }

    #[test]
    fn test_load_leaves_clean_file_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("domains.txt");
        // No trailing newline, as older versions of the list were written
        fs::write(&path, "a.example\nb.example").unwrap();

        DomainRegistry::load(&path, Arc::new(CertificatePolicy::new())).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "a.example\nb.example");
    }

    #[test]
    fn test_persist_failure_is_reported_and_rolled_back() {
        let dir = tempdir().unwrap();
        // A directory in place of the list makes the rename fail
        let path = dir.path().join("domains.txt");
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupied"), "x").unwrap();

        let policy = Arc::new(CertificatePolicy::new());
        let registry = DomainRegistry::new(&path, policy.clone());

        assert!(registry.register("doomed.example").is_err());
        assert!(!registry.is_registered("doomed.example"));
        assert!(registry.domains().is_empty());
        assert_eq!(policy.authorize("doomed.example"), HostDecision::Deny);
    }
}
