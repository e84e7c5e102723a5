//! autohost: on-demand multi-tenant HTTPS static server
//!
//! Every hostname that reaches the server is registered on first contact,
//! persisted to the domain list and handed to the certificate manager.

pub mod modules;
