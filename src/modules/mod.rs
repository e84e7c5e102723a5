//! Modules for the autohost HTTPS server
//!
//! Domain registration, certificate policy, request handling and static
//! content serving.

pub mod access_log;
#[cfg(feature = "acme")]
pub mod acme_manager;
pub mod certificate_policy;
pub mod config;
pub mod connection_policy;
pub mod content_resolver;
pub mod domain_registry;
pub mod error;
pub mod file_cache;
pub mod file_handler;
pub mod hostname;
pub mod http_request;
pub mod http_response;
pub mod http_version;
pub mod router;
pub mod server;
