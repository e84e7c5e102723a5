//! Front Door
//!
//! Accepts connections, reads HTTP/1.x requests and answers them. Three kinds
//! of listener share one request loop:
//! - `Redirect`: plain HTTP; registers the Host and sends a 301 to its https URL
//! - `Secure`: TLS with certificates from the certificate manager
//! - `Plain`: development mode, plain HTTP serving content directly
//!
//! The first content or redirect request for an unknown host registers it.
//! Registration runs on a blocking worker and is awaited before anything is
//! written back, so a dropped connection never interrupts a write to the
//! domain file. A failed write to the domain file is fatal.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::timeout;

use super::access_log::{AccessLog, AccessLogEntry};
use super::connection_policy::ConnectionPolicy;
use super::content_resolver::ContentResolver;
use super::domain_registry::{DomainRegistry, Registration};
use super::file_handler::serve_content;
use super::hostname::{self, HostnameError};
use super::http_request::{take_head, HttpRequest, Method, RequestError};
use super::http_response::HttpResponse;
use super::http_version::HttpVersion;
use super::router::{client_ip_response, Handler, Router};

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// What a listener does with the requests it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerMode {
    Redirect,
    Secure,
    Plain,
}

pub struct FrontDoor {
    registry: Arc<DomainRegistry>,
    router: Router,
    content: ContentResolver,
    access_log: AccessLog,
    connection_policy: ConnectionPolicy,
}

impl FrontDoor {
    pub fn new(
        registry: Arc<DomainRegistry>,
        router: Router,
        content: ContentResolver,
        access_log: AccessLog,
        connection_policy: ConnectionPolicy,
    ) -> Self {
        Self {
            registry,
            router,
            content,
            access_log,
            connection_policy,
        }
    }

    /// Accept plain TCP connections forever
    pub async fn serve_plain(self: Arc<Self>, listener: TcpListener, mode: ListenerMode) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let front_door = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = front_door.serve_connection(stream, peer, mode).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    /// Accept TLS connections forever
    ///
    /// Connections that negotiated the ACME validation protocol are closed once
    /// the handshake is done; the certificate was all the validator wanted.
    #[cfg(feature = "acme")]
    pub async fn serve_tls(self: Arc<Self>, listener: TcpListener, acceptor: tokio_rustls::TlsAcceptor) {
        use super::acme_manager::ACME_TLS_ALPN;

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    debug!("Accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let front_door = Arc::clone(&self);
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let handshake = timeout(front_door.connection_policy.handshake_timeout, acceptor.accept(stream)).await;
                let tls = match handshake {
                    Ok(Ok(tls)) => tls,
                    Ok(Err(e)) => {
                        debug!("TLS handshake with {} failed: {}", peer, e);
                        return;
                    }
                    Err(_) => {
                        debug!("TLS handshake with {} timed out", peer);
                        return;
                    }
                };

                if tls.get_ref().1.alpn_protocol() == Some(ACME_TLS_ALPN) {
                    debug!("Validation handshake from {} complete", peer);
                    return;
                }

                if let Err(e) = front_door.serve_connection(tls, peer, ListenerMode::Secure).await {
                    debug!("Connection from {} ended: {}", peer, e);
                }
            });
        }
    }

    /// Request loop for one connection
    pub async fn serve_connection<S>(&self, mut stream: S, peer: SocketAddr, mode: ListenerMode) -> std::io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buf = Vec::with_capacity(4096);
        let mut chunk = [0u8; 4096];
        let mut request_count = 0;

        loop {
            let head = loop {
                match take_head(&mut buf) {
                    Ok(Some(head)) => break Ok(head),
                    Ok(None) => {}
                    Err(e) => break Err(e),
                }

                let read = match timeout(self.connection_policy.idle_timeout, stream.read(&mut chunk)).await {
                    Ok(read) => read?,
                    Err(_) => {
                        debug!("Closing idle connection from {}", peer);
                        return Ok(());
                    }
                };
                if read == 0 {
                    return Ok(());
                }
                buf.extend_from_slice(&chunk[..read]);
            };

            let request = match head.and_then(|head| HttpRequest::parse(&head)) {
                Ok(request) => request,
                Err(e) => {
                    debug!("Bad request from {}: {}", peer, e);
                    let response = rejection(&e);
                    stream.write_all(&response.encode(HttpVersion::Http11, false, true)).await?;
                    return stream.shutdown().await;
                }
            };
            request_count += 1;

            let client_ip = client_ip(&request, peer);
            let response = self.respond(mode, &request, client_ip).await;

            let keep_alive = self
                .connection_policy
                .keep_alive_after(&request, response.body.len(), request_count);
            let include_body = request.method != Method::Head;
            stream.write_all(&response.encode(request.version, keep_alive, include_body)).await?;
            stream.flush().await?;

            let bytes = if include_body { response.body.len() } else { 0 };
            self.access_log
                .record(AccessLogEntry::new(&request, client_ip, response.status_code, bytes));

            if !keep_alive {
                return stream.shutdown().await;
            }
        }
    }

    async fn respond(&self, mode: ListenerMode, request: &HttpRequest, client_ip: IpAddr) -> HttpResponse {
        let Some(raw_host) = request.host() else {
            debug!("Request from {} without a Host header", client_ip);
            return HttpResponse::bad_request();
        };
        let host = match hostname::canonicalize(raw_host) {
            Ok(host) => host,
            Err(e) => {
                debug!("Request from {} for invalid host {:?}: {}", client_ip, raw_host, e);
                return HttpResponse::bad_request();
            }
        };

        if mode == ListenerMode::Redirect {
            if self.ensure_registered(&host).await.is_err() {
                return HttpResponse::bad_request();
            }
            return HttpResponse::moved_permanently(&format!("https://{}{}", host, request.target));
        }

        match self.router.dispatch(&host, request.path()) {
            Handler::Content => {
                if !matches!(request.method, Method::Get | Method::Head) {
                    return HttpResponse::method_not_allowed();
                }
                if self.ensure_registered(&host).await.is_err() {
                    return HttpResponse::bad_request();
                }
                serve_content(&self.content, &host, request).await
            }
            Handler::Redirect { location, status } => HttpResponse::redirect(*status, location),
            Handler::ClientIp => client_ip_response(request, client_ip),
        }
    }

    /// Make sure a canonical host is in the registry before answering for it
    ///
    /// Exits the process if the domain file cannot be written.
    async fn ensure_registered(&self, host: &str) -> Result<(), HostnameError> {
        if self.registry.is_registered(host) {
            return Ok(());
        }

        let registry = Arc::clone(&self.registry);
        let candidate = host.to_string();
        match tokio::task::spawn_blocking(move || registry.register(&candidate)).await {
            Ok(Ok(Registration::Added)) => {
                debug!("First contact from {}", host);
                Ok(())
            }
            Ok(Ok(Registration::AlreadyRegistered)) => Ok(()),
            Ok(Ok(Registration::Rejected(e))) => Err(e),
            Ok(Err(e)) => {
                error!("Registering {} failed: {}", host, e);
                std::process::exit(1);
            }
            Err(e) => {
                error!("Registration worker for {} failed: {}", host, e);
                std::process::exit(1);
            }
        }
    }
}

/// Response for a request head that could not be parsed
fn rejection(error: &RequestError) -> HttpResponse {
    match error {
        RequestError::HeadTooLarge => HttpResponse::head_too_large(),
        RequestError::UnsupportedVersion(_) => HttpResponse::version_not_supported(),
        RequestError::MalformedRequestLine | RequestError::MalformedHeader(_) => HttpResponse::bad_request(),
    }
}

/// Client address for logging; a local reverse proxy may pass the real one in `X-Real-IP`
fn client_ip(request: &HttpRequest, peer: SocketAddr) -> IpAddr {
    if peer.ip().is_loopback() {
        if let Some(real_ip) = request.header("x-real-ip").and_then(|v| v.parse().ok()) {
            return real_ip;
        }
    }
    peer.ip()
}
