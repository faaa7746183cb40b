//! Transport error types

use std::time::Duration;
use thiserror::Error;
use wscarrier_proto::ProtoError;

/// Path the access front end redirects unauthenticated upgrades to
const ACCESS_LOGIN_PATH: &str = "cdn-cgi/access/login";

/// Errors raised while establishing a carrier WebSocket
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ProtoError),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        source: std::io::Error,
    },

    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("{}", rejection_message(*status, location.as_deref()))]
    HandshakeRejected {
        status: u16,
        location: Option<String>,
    },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
}

impl TransportError {
    /// Whether a caller-level retry could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Connect { .. }
            | TransportError::Timeout { .. }
            | TransportError::Handshake(_) => true,
            TransportError::HandshakeRejected { status, .. } => *status >= 500,
            TransportError::Configuration(_) | TransportError::Tls(_) => false,
        }
    }

    /// The upgrade was redirected to the access login page
    pub fn is_access_login_redirect(&self) -> bool {
        matches!(
            self,
            TransportError::HandshakeRejected { location: Some(location), .. }
                if location.contains(ACCESS_LOGIN_PATH)
        )
    }
}

fn rejection_message(status: u16, location: Option<&str>) -> String {
    match location {
        Some(location) if location.contains(ACCESS_LOGIN_PATH) => format!(
            "WebSocket upgrade redirected to access login ({}): a service token or login is required",
            location
        ),
        Some(location) => format!(
            "WebSocket upgrade rejected with status {} (location: {})",
            status, location
        ),
        None => format!("WebSocket upgrade rejected with status {}", status),
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
