//! Connection override grammar
//!
//! An override redirects the carrier to a different network endpoint than the
//! one named by the hostname. It is a colon-delimited string with one to three
//! fields:
//!
//! ```text
//! override := host
//!           | host ":" port
//!           | sni ":" port ":" realhost
//! ```
//!
//! The three-field form dials `realhost:port` while presenting `sni` during the
//! TLS handshake. Because the certificate can then never match the dialed
//! address, verification is disabled for that form. The `sni` field must not
//! be empty.

use crate::error::{ProtoError, ProtoResult};
use crate::options::{StartOptions, TlsClientConfig};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Parsed connection override
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationOverride {
    /// Plain origin, certificate checked against the dialed host
    Origin { origin_url: String },
    /// Origin dialed while presenting a different server name
    WithTlsOverride {
        origin_url: String,
        tls: TlsClientConfig,
    },
}

impl DestinationOverride {
    /// Parse an override string, rejecting any arity other than 1 to 3.
    pub fn parse(raw: &str) -> ProtoResult<Self> {
        if raw.is_empty() {
            return Err(ProtoError::InvalidConnectionOverride(raw.to_string()));
        }

        let fields: Vec<&str> = raw.split(':').collect();
        match fields.as_slice() {
            [host] => Ok(Self::Origin {
                origin_url: format!("https://{}", host),
            }),
            [host, port] => Ok(Self::Origin {
                origin_url: format!("https://{}:{}", host, port),
            }),
            [sni, port, real_host] if !sni.is_empty() => Ok(Self::WithTlsOverride {
                origin_url: format!("https://{}:{}", real_host, port),
                tls: TlsClientConfig::sni_override(*sni),
            }),
            _ => Err(ProtoError::InvalidConnectionOverride(raw.to_string())),
        }
    }

    pub fn origin_url(&self) -> &str {
        match self {
            Self::Origin { origin_url } | Self::WithTlsOverride { origin_url, .. } => origin_url,
        }
    }

    pub fn tls(&self) -> Option<&TlsClientConfig> {
        match self {
            Self::Origin { .. } => None,
            Self::WithTlsOverride { tls, .. } => Some(tls),
        }
    }

    /// Rewrite the session options to target this override.
    ///
    /// Applying an SNI override always emits a warning, since it weakens
    /// transport security.
    pub fn apply(self, options: &mut StartOptions) {
        match self {
            Self::Origin { origin_url } => {
                options.origin_url = origin_url;
            }
            Self::WithTlsOverride { origin_url, tls } => {
                warn!(
                    server_name = %tls.server_name,
                    origin = %origin_url,
                    "Using insecure SSL connection because SNI overridden to {}",
                    tls.server_name
                );
                options.origin_url = origin_url;
                options.tls = Some(tls);
            }
        }
    }
}

impl FromStr for DestinationOverride {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DestinationOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Origin { origin_url } => write!(f, "{}", origin_url),
            Self::WithTlsOverride { origin_url, tls } => {
                write!(f, "{} (sni: {})", origin_url, tls.server_name)
            }
        }
    }
}

/// Apply a raw override string to the session options.
///
/// An empty override passes the options through unchanged.
pub fn resolve_destination(raw: &str, mut options: StartOptions) -> ProtoResult<StartOptions> {
    if raw.is_empty() {
        return Ok(options);
    }
    DestinationOverride::parse(raw)?.apply(&mut options);
    Ok(options)
}
