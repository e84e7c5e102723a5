//! Command-line configuration

use std::ffi::OsString;
use std::path::PathBuf;

use lexopt::prelude::*;
use log::LevelFilter;

use super::content_resolver::ContentConfig;

pub const USAGE: &str = "\
Usage: autohost [OPTIONS]

Serves static sites over HTTPS for every hostname that reaches it, obtaining
certificates from Let's Encrypt the first time a hostname is seen.

Options:
      --dev                  Plain HTTP on 0.0.0.0:34265, no certificates
      --console-access       Also print access log lines to the console
      --listen <ADDR>        HTTPS listen address [default: 0.0.0.0:443]
      --http-listen <ADDR>   Plain HTTP redirect listener [default: 0.0.0.0:80]
      --domains <FILE>       Registered domain list [default: domains.txt]
      --sites <DIR>          Per-host content trees [default: sites]
      --default-root <DIR>   Content for hosts without a tree [default: client]
      --log-dir <DIR>        Access log directory [default: .logs]
      --cert-cache <DIR>     ACME account and certificate cache [default: certs]
      --acme-contact <EMAIL> Contact address for the ACME account
      --acme-staging         Use the Let's Encrypt staging directory
      --routes <FILE>        JSON route table
      --log-level <LEVEL>    off, error, warn, info, debug or trace [default: info]
  -h, --help                 Print this help
";

const DEV_LISTEN: &str = "0.0.0.0:34265";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub dev: bool,
    pub console_access: bool,
    pub listen: String,
    pub http_listen: String,
    pub domains_file: PathBuf,
    pub sites_dir: PathBuf,
    pub default_root: PathBuf,
    pub log_dir: PathBuf,
    pub cert_cache: PathBuf,
    pub acme_contact: Option<String>,
    pub acme_staging: bool,
    pub routes_file: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            dev: false,
            console_access: false,
            listen: "0.0.0.0:443".to_string(),
            http_listen: "0.0.0.0:80".to_string(),
            domains_file: PathBuf::from("domains.txt"),
            sites_dir: PathBuf::from("sites"),
            default_root: PathBuf::from("client"),
            log_dir: PathBuf::from(".logs"),
            cert_cache: PathBuf::from("certs"),
            acme_contact: None,
            acme_staging: false,
            routes_file: None,
            log_level: LevelFilter::Info,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Run(ServerConfig),
    Help,
}

impl ServerConfig {
    /// Parse the process arguments
    pub fn from_env() -> Result<Command, lexopt::Error> {
        Self::from_args(std::env::args_os().skip(1))
    }

    /// Parse arguments, not including the program name
    pub fn from_args<I>(args: I) -> Result<Command, lexopt::Error>
    where
        I: IntoIterator,
        I::Item: Into<OsString>,
    {
        let mut config = ServerConfig::default();
        let mut listen = None;
        let mut parser = lexopt::Parser::from_args(args);

        while let Some(arg) = parser.next()? {
            match arg {
                Short('h') | Long("help") => return Ok(Command::Help),
                Long("dev") => config.dev = true,
                Long("console-access") => config.console_access = true,
                Long("listen") => listen = Some(parser.value()?.string()?),
                Long("http-listen") => config.http_listen = parser.value()?.string()?,
                Long("domains") => config.domains_file = parser.value()?.into(),
                Long("sites") => config.sites_dir = parser.value()?.into(),
                Long("default-root") => config.default_root = parser.value()?.into(),
                Long("log-dir") => config.log_dir = parser.value()?.into(),
                Long("cert-cache") => config.cert_cache = parser.value()?.into(),
                Long("acme-contact") => config.acme_contact = Some(parser.value()?.string()?),
                Long("acme-staging") => config.acme_staging = true,
                Long("routes") => config.routes_file = Some(parser.value()?.into()),
                Long("log-level") => config.log_level = parse_level(&parser.value()?.string()?)?,
                _ => return Err(arg.unexpected()),
            }
        }

        config.listen = match (listen, config.dev) {
            (Some(listen), _) => listen,
            (None, true) => DEV_LISTEN.to_string(),
            (None, false) => config.listen,
        };

        Ok(Command::Run(config))
    }

    pub fn content_config(&self) -> ContentConfig {
        ContentConfig {
            sites_dir: self.sites_dir.clone(),
            default_root: self.default_root.clone(),
            ..ContentConfig::default()
        }
    }

    #[cfg(feature = "acme")]
    pub fn acme_settings(&self) -> super::acme_manager::AcmeSettings {
        super::acme_manager::AcmeSettings {
            cache_dir: self.cert_cache.clone(),
            contact: self.acme_contact.clone(),
            production: !self.acme_staging,
        }
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, lexopt::Error> {
    match level.to_ascii_lowercase().as_str() {
        "off" => Ok(LevelFilter::Off),
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        _ => Err(format!("unknown log level '{}'", level).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(args: &[&str]) -> ServerConfig {
        match ServerConfig::from_args(args.iter().copied()).unwrap() {
            Command::Run(config) => config,
            Command::Help => panic!("expected a run command"),
        }
    }

    #[test]
    fn test_defaults() {
        let config = run(&[]);
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.listen, "0.0.0.0:443");
        assert_eq!(config.domains_file, PathBuf::from("domains.txt"));
    }

    #[test]
    fn test_dev_mode_listens_on_dev_port() {
        let config = run(&["--dev", "--console-access"]);
        assert!(config.dev);
        assert!(config.console_access);
        assert_eq!(config.listen, "0.0.0.0:34265");

        let config = run(&["--dev", "--listen", "127.0.0.1:8080"]);
        assert_eq!(config.listen, "127.0.0.1:8080");
    }

    #[test]
    fn test_options_with_values() {
        let config = run(&[
            "--domains", "/var/lib/autohost/domains.txt",
            "--sites", "/srv/sites",
            "--routes=routes.json",
            "--acme-contact", "ops@example.com",
            "--acme-staging",
            "--log-level", "DEBUG",
        ]);
        assert_eq!(config.domains_file, PathBuf::from("/var/lib/autohost/domains.txt"));
        assert_eq!(config.sites_dir, PathBuf::from("/srv/sites"));
        assert_eq!(config.routes_file, Some(PathBuf::from("routes.json")));
        assert_eq!(config.acme_contact.as_deref(), Some("ops@example.com"));
        assert!(config.acme_staging);
        assert_eq!(config.log_level, LevelFilter::Debug);
    }

    #[test]
    fn test_help_and_errors() {
        assert_eq!(ServerConfig::from_args(["-h"]).unwrap(), Command::Help);
        assert_eq!(ServerConfig::from_args(["--dev", "--help"]).unwrap(), Command::Help);
        assert!(ServerConfig::from_args(["--bogus"]).is_err());
        assert!(ServerConfig::from_args(["--listen"]).is_err());
        assert!(ServerConfig::from_args(["--log-level", "loud"]).is_err());
    }
}
