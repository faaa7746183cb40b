//! Carrier error taxonomy

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use wscarrier_proto::ProtoError;
use wscarrier_transport_websocket::TransportError;

/// Direction of a relay copy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayDirection {
    LocalToRemote,
    RemoteToLocal,
}

impl std::fmt::Display for RelayDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayDirection::LocalToRemote => write!(f, "local->remote"),
            RelayDirection::RemoteToLocal => write!(f, "remote->local"),
        }
    }
}

#[derive(Debug, Error)]
pub enum CarrierError {
    /// Invalid user configuration; never retried
    #[error(transparent)]
    Configuration(#[from] ProtoError),

    /// The WebSocket could not be established
    #[error("failed to establish carrier connection: {0}")]
    Connect(#[from] TransportError),

    #[error("failed to bind listener on {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("relay {direction} failed: {source}")]
    RelayIo {
        direction: RelayDirection,
        source: std::io::Error,
    },

    #[error("relay {direction} failed: {source}")]
    RelayWebSocket {
        direction: RelayDirection,
        source: tungstenite::Error,
    },

    #[error("carrier connection exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Cancelled before the carrier connection was established
    #[error("cancelled while connecting")]
    Cancelled,
}

impl CarrierError {
    /// Whether the caller may retry the operation that produced this error
    pub fn is_retryable(&self) -> bool {
        match self {
            CarrierError::Connect(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Configuration errors are surfaced to the operator as-is
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CarrierError::Configuration(_)
                | CarrierError::Connect(TransportError::Configuration(_))
        )
    }
}

pub type CarrierResult<T> = Result<T, CarrierError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors_are_not_retryable() {
        let err = CarrierError::from(ProtoError::InvalidConnectionOverride("a:b:c:d".into()));
        assert!(err.is_configuration());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid connection override: a:b:c:d");
    }

    #[test]
    fn test_relay_error_names_direction() {
        let err = CarrierError::RelayIo {
            direction: RelayDirection::RemoteToLocal,
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        assert!(err.to_string().starts_with("relay remote->local failed"));
    }

    #[test]
    fn test_cancelled_is_not_retryable() {
        assert!(!CarrierError::Cancelled.is_retryable());
        assert!(!CarrierError::Cancelled.is_configuration());
    }
}
