//! WebSocket dialer configuration

use crate::error::{TransportError, TransportResult};
use std::sync::Arc;
use std::time::Duration;

/// Dialer-wide settings shared by every carrier connection
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Upper bound on TCP connect + TLS + upgrade
    pub connect_timeout: Duration,

    /// Maximum incoming message size
    pub max_message_size: usize,

    /// Extra DER-encoded root certificates; webpki roots are used when empty
    pub root_certs: Vec<Vec<u8>>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            max_message_size: 16 * 1024 * 1024, // 16MB
            root_certs: Vec::new(),
        }
    }
}

impl WebSocketConfig {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Trust an additional DER-encoded root certificate
    pub fn with_root_cert(mut self, der: Vec<u8>) -> Self {
        self.root_certs.push(der);
        self
    }

    pub(crate) fn tungstenite_config(
        &self,
    ) -> tokio_tungstenite::tungstenite::protocol::WebSocketConfig {
        let mut config = tokio_tungstenite::tungstenite::protocol::WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config
    }

    /// Build rustls TlsConnector, optionally skipping certificate verification
    pub(crate) fn build_tls_connector(
        &self,
        insecure_skip_verify: bool,
    ) -> TransportResult<tokio_rustls::TlsConnector> {
        ensure_crypto_provider();

        let client_crypto = if insecure_skip_verify {
            rustls::ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipVerification::new())
                .with_no_client_auth()
        } else {
            let mut roots = rustls::RootCertStore::empty();
            if self.root_certs.is_empty() {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            } else {
                for cert_der in &self.root_certs {
                    roots
                        .add(rustls::pki_types::CertificateDer::from(cert_der.clone()))
                        .map_err(|e| TransportError::Tls(format!("Invalid root cert: {}", e)))?;
                }
            }

            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };

        Ok(tokio_rustls::TlsConnector::from(Arc::new(client_crypto)))
    }
}

static CRYPTO_PROVIDER_INIT: std::sync::Once = std::sync::Once::new();

fn ensure_crypto_provider() {
    CRYPTO_PROVIDER_INIT.call_once(|| {
        if rustls::crypto::ring::default_provider()
            .install_default()
            .is_err()
        {
            tracing::debug!("Rustls crypto provider already installed");
        }
    });
}

// Accepts any server certificate; only used for SNI overrides
#[derive(Debug)]
struct SkipVerification;

impl SkipVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
