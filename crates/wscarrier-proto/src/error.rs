//! Configuration errors for carrier sessions

use thiserror::Error;

/// Errors raised while assembling a carrier session's configuration.
///
/// None of these are transient: they echo the offending input back so the
/// operator can fix it, and callers must not retry them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtoError {
    #[error("invalid connection override: {0}")]
    InvalidConnectionOverride(String),

    #[error("no destination configured: origin URL is empty")]
    MissingDestination,

    #[error("invalid origin URL {url}: {reason}")]
    InvalidOriginUrl { url: String, reason: String },

    #[error("unsupported origin scheme '{scheme}' in {url} (expected http, https, ws or wss)")]
    UnsupportedScheme { url: String, scheme: String },

    #[error("invalid listener address {address}: {reason}")]
    InvalidListenerAddress { address: String, reason: String },
}

impl ProtoError {
    /// Configuration errors are never worth retrying.
    pub fn is_retryable(&self) -> bool {
        false
    }
}

pub type ProtoResult<T> = Result<T, ProtoError>;
