//! Forwarder configuration file
//!
//! Declares one or more forwarders in YAML. Token fields support `${ENV_VAR}`
//! expansion so secrets can stay out of the file.
//!
//! ```yaml
//! forwarders:
//!   - url: https://ssh.example.com
//!     listener: tcp://localhost:2222
//!     service_token_id: "${WSCARRIER_TOKEN_ID}"
//!     service_token_secret: "${WSCARRIER_TOKEN_SECRET}"
//!     destination: ssh.internal:22
//! ```

use anyhow::{Context, Result};
use regex_lite::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use wscarrier_lib::{
    ensure_url_scheme, resolve_destination, HeaderBuilder, StartOptions,
};
use wscarrier_proto::listener_address;

/// Top-level configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CarrierConfig {
    #[serde(default)]
    pub forwarders: Vec<ForwarderConfig>,
}

/// A single local listener tunneled to one origin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    /// Remote origin the WebSocket upgrade targets
    pub url: String,

    /// Local address to listen on (e.g. `tcp://localhost:2222`)
    pub listener: String,

    /// Service token client ID (supports ${ENV_VAR} expansion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token_id: Option<String>,

    /// Service token client secret (supports ${ENV_VAR} expansion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_token_secret: Option<String>,

    /// Jump destination behind the access front end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,

    /// Connection override (`host`, `host:port` or `sni:port:realhost`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_to: Option<String>,

    /// Extra upgrade headers as `"key: value"` strings
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<String>,

    /// Per-connection deadline in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_seconds: Option<u64>,
}

impl CarrierConfig {
    /// Load config from a specific file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content)
    }

    /// Parse config from YAML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: CarrierConfig =
            serde_yaml::from_str(content).context("Failed to parse YAML config")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.forwarders.is_empty() {
            anyhow::bail!("No forwarders defined in config file");
        }

        let mut listeners = std::collections::HashSet::new();
        for forwarder in &self.forwarders {
            if forwarder.url.trim().is_empty() {
                anyhow::bail!("Forwarder on '{}' has an empty url", forwarder.listener);
            }

            let address = listener_address(&forwarder.listener)?;
            if !listeners.insert(address.clone()) {
                anyhow::bail!("Duplicate forwarder listener: {}", address);
            }
        }

        Ok(())
    }
}

impl ForwarderConfig {
    /// Local `host:port` to bind
    pub fn listener_address(&self) -> Result<String> {
        Ok(listener_address(&self.listener)?)
    }

    /// Session options for this forwarder, with headers and any
    /// connection override applied
    pub fn start_options(&self) -> Result<StartOptions> {
        let expand = |value: &Option<String>| value.as_deref().map(expand_env_vars);

        let mut builder = HeaderBuilder::new().pairs(&self.headers);
        if let Some(id) = expand(&self.service_token_id) {
            builder = builder.client_id(&id);
        }
        if let Some(secret) = expand(&self.service_token_secret) {
            builder = builder.client_secret(&secret);
        }
        if let Some(destination) = &self.destination {
            builder = builder.jump_destination(destination);
        }

        let options = StartOptions::new(ensure_url_scheme(&self.url)).with_headers(builder.build());
        let connect_to = self.connect_to.as_deref().unwrap_or_default();

        resolve_destination(connect_to, options)
            .with_context(|| format!("Invalid connect_to for forwarder on {}", self.listener))
    }
}

static ENV_VAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").ok());

/// Expand `${VAR}` references. Unset variables expand to an empty string.
pub fn expand_env_vars(input: &str) -> String {
    match ENV_VAR_PATTERN.as_ref() {
        Some(pattern) => pattern
            .replace_all(input, |caps: &Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        None => input.to_string(),
    }
}
