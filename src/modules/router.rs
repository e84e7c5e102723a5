//! Request Router
//!
//! Maps `(hostname, path)` to a handler. Routes are tried in order and the
//! first match wins; anything unmatched is served as static content.
//!
//! A route table can be loaded from JSON:
//!
//! ```json
//! { "routes": [
//!     { "host": "ifcfg.org", "handler": { "type": "client_ip" } },
//!     { "host": "dl.example", "path": "/install",
//!       "handler": { "type": "redirect", "location": "https://example.com/install.sh" } },
//!     { "host": "dl.example", "path_prefix": "/files/", "handler": { "type": "content" } }
//! ] }
//! ```

use std::fs;
use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use super::error::{file_operation_error, operation_error, ServerError};
use super::hostname;
use super::http_request::HttpRequest;
use super::http_response::HttpResponse;

/// What answers a routed request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handler {
    /// Static content for the request's host (registers unknown hosts)
    Content,
    /// Fixed redirect
    Redirect {
        location: String,
        #[serde(default = "default_redirect_status")]
        status: u16,
    },
    /// Echo the client's IP address
    ClientIp,
}

fn default_redirect_status() -> u16 {
    302
}

static DEFAULT_HANDLER: Handler = Handler::Content;

/// How a route matches the request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Exact(exact) => path == exact,
            PathMatch::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Canonical hostname, or None to match every host
    pub host: Option<String>,
    pub path: PathMatch,
    pub handler: Handler,
}

#[derive(Debug, Deserialize)]
struct RouteTable {
    routes: Vec<RouteSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RouteSpec {
    host: Option<String>,
    path: Option<String>,
    path_prefix: Option<String>,
    handler: Handler,
}

impl RouteSpec {
    fn into_route(self) -> Result<Route, String> {
        let host = match self.host {
            Some(host) => Some(hostname::canonicalize(&host).map_err(|e| format!("route host {:?}: {}", host, e))?),
            None => None,
        };

        let path = match (self.path, self.path_prefix) {
            (Some(_), Some(_)) => return Err("a route takes either path or path_prefix, not both".to_string()),
            (Some(exact), None) => PathMatch::Exact(exact),
            (None, Some(prefix)) => PathMatch::Prefix(prefix),
            (None, None) => PathMatch::Prefix("/".to_string()),
        };

        if let Handler::Redirect { status, .. } = &self.handler {
            if !matches!(status, 301 | 302 | 303 | 307 | 308) {
                return Err(format!("unsupported redirect status {}", status));
            }
        }

        Ok(Route { host, path, handler: self.handler })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Router with no routes: every request is served as content
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route; earlier routes take precedence
    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Parse a JSON route table
    pub fn from_json(json: &str) -> Result<Self, ServerError> {
        let table: RouteTable = serde_json::from_str(json)
            .map_err(|e| operation_error("parse route table", Box::new(e)))?;

        let routes = table
            .routes
            .into_iter()
            .map(RouteSpec::into_route)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| operation_error("parse route table", e.into()))?;

        Ok(Self { routes })
    }

    /// Load a JSON route table from disk
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let json = fs::read_to_string(path).map_err(|e| file_operation_error("read route table", path, e))?;
        Self::from_json(&json)
    }

    /// Handler for a canonical hostname and request path
    pub fn dispatch(&self, hostname: &str, path: &str) -> &Handler {
        self.routes
            .iter()
            .find(|r| r.host.as_deref().is_none_or(|h| h == hostname) && r.path.matches(path))
            .map(|r| &r.handler)
            .unwrap_or(&DEFAULT_HANDLER)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Answer with the client's address, newline-terminated for command-line clients
pub fn client_ip_response(request: &HttpRequest, client_ip: IpAddr) -> HttpResponse {
    let wants_text = request.header("user-agent").is_some_and(|ua| ua.contains("curl"))
        || request.header("accept") == Some("text/plain");

    let body = if wants_text {
        format!("{}\n", client_ip)
    } else {
        client_ip.to_string()
    };

    let mut response = HttpResponse::ok(body.into_bytes());
    response.set_content_type("text/plain; charset=utf-8");
    response.set_cache_control("no-store");
    response.set_content_length();
    response
}
