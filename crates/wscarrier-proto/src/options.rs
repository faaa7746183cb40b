//! Per-session carrier configuration

use crate::error::{ProtoError, ProtoResult};
use http::HeaderMap;
use url::Url;

/// TLS settings used when the dialed address and the presented server
/// identity differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsClientConfig {
    /// Server name sent in SNI
    pub server_name: String,
    /// Accept any server certificate
    pub insecure_skip_verify: bool,
}

impl TlsClientConfig {
    /// SNI override paired with relaxed verification
    pub fn sni_override(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            insecure_skip_verify: true,
        }
    }
}

/// Immutable configuration shared by every carrier connection of a session.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// WebSocket upgrade target (`https://`, `http://`, `wss://` or `ws://`)
    pub origin_url: String,
    /// Headers sent with the upgrade request; multiple values per name allowed
    pub headers: HeaderMap,
    /// Virtual host presented to the remote side, distinct from the dialed address
    pub host: Option<String>,
    /// TLS override; `None` means SNI from the origin host with full verification
    pub tls: Option<TlsClientConfig>,
}

impl StartOptions {
    pub fn new(origin_url: impl Into<String>) -> Self {
        Self {
            origin_url: origin_url.into(),
            ..Default::default()
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Check the options before a connection attempt
    pub fn validate(&self) -> ProtoResult<()> {
        if self.origin_url.trim().is_empty() {
            return Err(ProtoError::MissingDestination);
        }
        self.websocket_url().map(|_| ())
    }

    /// The origin URL with its scheme mapped for the upgrade
    /// (`https` → `wss`, `http` → `ws`).
    pub fn websocket_url(&self) -> ProtoResult<Url> {
        if self.origin_url.trim().is_empty() {
            return Err(ProtoError::MissingDestination);
        }

        let mut url = Url::parse(&self.origin_url).map_err(|e| ProtoError::InvalidOriginUrl {
            url: self.origin_url.clone(),
            reason: e.to_string(),
        })?;

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(ProtoError::UnsupportedScheme {
                    url: self.origin_url.clone(),
                    scheme: other.to_string(),
                })
            }
        };

        if url.set_scheme(scheme).is_err() {
            return Err(ProtoError::InvalidOriginUrl {
                url: self.origin_url.clone(),
                reason: format!("cannot switch scheme to {}", scheme),
            });
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(ProtoError::InvalidOriginUrl {
                url: self.origin_url.clone(),
                reason: "missing host".to_string(),
            });
        }

        Ok(url)
    }

    /// Server name to present during the TLS handshake
    pub fn server_name(&self) -> ProtoResult<String> {
        if let Some(tls) = &self.tls {
            return Ok(tls.server_name.clone());
        }
        let url = self.websocket_url()?;
        Ok(url
            .host_str()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
            .unwrap_or_default())
    }
}

/// Prefix `https://` when the hostname carries no scheme
pub fn ensure_url_scheme(hostname: &str) -> String {
    if hostname.contains("://") {
        hostname.to_string()
    } else {
        format!("https://{}", hostname)
    }
}

/// Extract the `host:port` to bind from a listener URL.
///
/// Accepts `scheme://host:port` (for example `tcp://localhost:2222`) or a bare
/// `host:port`. The port must be explicit unless the scheme has a well-known
/// default.
pub fn listener_address(raw: &str) -> ProtoResult<String> {
    let invalid = |reason: &str| ProtoError::InvalidListenerAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address"));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("tcp://{}", trimmed)
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;
    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port"))?;

    Ok(format!("{}:{}", host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_url_scheme() {
        assert_eq!(ensure_url_scheme("ssh.example.com"), "https://ssh.example.com");
        assert_eq!(
            ensure_url_scheme("http://ssh.example.com"),
            "http://ssh.example.com"
        );
    }

    #[test]
    fn test_websocket_url_maps_scheme() {
        let url = StartOptions::new("https://ssh.example.com").websocket_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.port_or_known_default(), Some(443));

        let url = StartOptions::new("http://127.0.0.1:8080").websocket_url().unwrap();
        assert_eq!(url.as_str(), "ws://127.0.0.1:8080/");
    }

    #[test]
    fn test_empty_origin_is_missing_destination() {
        let options = StartOptions::default();
        assert_eq!(options.validate(), Err(ProtoError::MissingDestination));
    }

    #[test]
    fn test_unsupported_scheme() {
        let err = StartOptions::new("ftp://example.com").validate().unwrap_err();
        assert!(matches!(err, ProtoError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
    }

    #[test]
    fn test_listener_address() {
        assert_eq!(listener_address("tcp://localhost:2222").unwrap(), "localhost:2222");
        assert_eq!(listener_address("127.0.0.1:2222").unwrap(), "127.0.0.1:2222");
        assert_eq!(listener_address("tcp://[::1]:2222").unwrap(), "[::1]:2222");
        assert_eq!(listener_address("http://localhost").unwrap(), "localhost:80");

        assert!(matches!(
            listener_address("localhost"),
            Err(ProtoError::InvalidListenerAddress { .. })
        ));
        assert!(listener_address("").is_err());
    }

    #[test]
    fn test_server_name_prefers_tls_override() {
        let mut options = StartOptions::new("https://10.0.0.5:443");
        assert_eq!(options.server_name().unwrap(), "10.0.0.5");

        options.tls = Some(TlsClientConfig::sni_override("spoofed.example"));
        assert_eq!(options.server_name().unwrap(), "spoofed.example");
    }
}
