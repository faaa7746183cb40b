//! WebSocket dialer
//!
//! Dials the origin named by [`StartOptions`], optionally wraps the socket in
//! TLS with an overridden server name, and performs the client upgrade with
//! the configured header set.

use async_trait::async_trait;
use http::header::{HeaderValue, HOST, LOCATION};
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::{Host, Url};
use wscarrier_proto::StartOptions;

use crate::config::WebSocketConfig;
use crate::error::{TransportError, TransportResult};

/// The WebSocket produced by [`TungsteniteDialer`]
pub type CarrierSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Capability to open one WebSocket towards the configured origin
#[async_trait]
pub trait WebSocketDialer: Send + Sync + 'static {
    /// Underlying byte stream the WebSocket runs over
    type Io: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn dial(&self, options: &StartOptions) -> TransportResult<WebSocketStream<Self::Io>>;
}

#[async_trait]
impl<D: WebSocketDialer> WebSocketDialer for Arc<D> {
    type Io = D::Io;

    async fn dial(&self, options: &StartOptions) -> TransportResult<WebSocketStream<Self::Io>> {
        (**self).dial(options).await
    }
}

/// Dialer backed by tokio-tungstenite and rustls
pub struct TungsteniteDialer {
    config: Arc<WebSocketConfig>,
    verified: TlsConnector,
    insecure: TlsConnector,
}

impl std::fmt::Debug for TungsteniteDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteDialer")
            .field("config", &self.config)
            .finish()
    }
}

impl TungsteniteDialer {
    pub fn new(config: WebSocketConfig) -> TransportResult<Self> {
        let verified = config.build_tls_connector(false)?;
        let insecure = config.build_tls_connector(true)?;

        Ok(Self {
            config: Arc::new(config),
            verified,
            insecure,
        })
    }

    async fn connect(&self, options: &StartOptions) -> TransportResult<CarrierSocket> {
        let url = options.websocket_url()?;
        let host = dial_host(&url);
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::Handshake(format!("no port for {}", url)))?;
        let address = format!("{}:{}", host, port);

        debug!(address = %address, url = %url, "Dialing carrier origin");

        let tcp_stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|source| TransportError::Connect {
                address: address.clone(),
                source,
            })?;
        if let Err(e) = tcp_stream.set_nodelay(true) {
            debug!(address = %address, "Failed to set TCP_NODELAY: {}", e);
        }

        let stream = if url.scheme() == "wss" {
            let server_name = options.server_name()?;
            let dns_name = ServerName::try_from(server_name.clone())
                .map_err(|e| TransportError::Tls(format!("Invalid server name: {}", e)))?;

            let connector = match &options.tls {
                Some(tls) if tls.insecure_skip_verify => &self.insecure,
                _ => &self.verified,
            };

            let tls_stream = connector
                .connect(dns_name, tcp_stream)
                .await
                .map_err(|e| TransportError::Tls(format!("TLS handshake failed: {}", e)))?;

            debug!(server_name = %server_name, "TLS handshake complete");
            MaybeTlsStream::Rustls(tls_stream)
        } else {
            MaybeTlsStream::Plain(tcp_stream)
        };

        let request = build_upgrade_request(&url, options)?;

        let (socket, _response) = tokio_tungstenite::client_async_with_config(
            request,
            stream,
            Some(self.config.tungstenite_config()),
        )
        .await
        .map_err(handshake_error)?;

        info!(address = %address, url = %url, "Carrier WebSocket established");
        Ok(socket)
    }
}

#[async_trait]
impl WebSocketDialer for TungsteniteDialer {
    type Io = MaybeTlsStream<TcpStream>;

    async fn dial(&self, options: &StartOptions) -> TransportResult<CarrierSocket> {
        options.validate()?;

        let timeout = self.config.connect_timeout;
        match tokio::time::timeout(timeout, self.connect(options)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                address: options.origin_url.clone(),
                timeout,
            }),
        }
    }
}

/// Build the upgrade request: the standard WebSocket headers, every
/// configured header value, and the `Host` override when present.
pub fn build_upgrade_request(url: &Url, options: &StartOptions) -> TransportResult<Request> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::Handshake(format!("Invalid upgrade request: {}", e)))?;

    let headers = request.headers_mut();
    for (name, value) in options.headers.iter() {
        headers.append(name.clone(), value.clone());
    }

    if let Some(host) = options.host.as_deref().filter(|h| !h.is_empty()) {
        let value = HeaderValue::from_str(host)
            .map_err(|e| TransportError::Handshake(format!("Invalid host override: {}", e)))?;
        headers.insert(HOST, value);
    }

    Ok(request)
}

fn dial_host(url: &Url) -> String {
    match url.host() {
        Some(Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => String::new(),
    }
}

fn handshake_error(error: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error;

    match error {
        Error::Http(response) => TransportError::HandshakeRejected {
            status: response.status().as_u16(),
            location: response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        },
        other => TransportError::Handshake(other.to_string()),
    }
}
