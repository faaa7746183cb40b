//! Stream-over-WebSocket carrier
//!
//! Tunnels arbitrary byte streams through authenticated WebSocket connections
//! so that protocols without HTTP awareness, such as SSH, can pass through an
//! HTTP(S) access front end.
//!
//! Two modes drive [`CarrierConnection`]s:
//! - [`Forwarder`]: binds a local TCP listener and tunnels every accepted
//!   connection independently
//! - [`StdioClient`]: tunnels the process's stdin/stdout as one stream
//!
//! # Example
//!
//! ```no_run
//! use tokio_util::sync::CancellationToken;
//! use wscarrier_lib::{Forwarder, StartOptions};
//! use wscarrier_transport_websocket::{TungsteniteDialer, WebSocketConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let options = StartOptions::new("https://ssh.example.com");
//! let dialer = TungsteniteDialer::new(WebSocketConfig::default())?;
//! let forwarder = Forwarder::bind("127.0.0.1:2222", dialer, options).await?;
//! forwarder.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod error;
pub mod forwarder;
pub mod stdio;

pub use connection::{CarrierConnection, RelayControl, RelayEnd, RelaySummary};
pub use error::{CarrierError, CarrierResult, RelayDirection};
pub use forwarder::{Forwarder, InFlight};
pub use stdio::{StdioClient, StdioStream};

// Re-export the configuration surface
pub use wscarrier_proto::{
    build_request_headers, ensure_url_scheme, resolve_destination, DestinationOverride,
    HeaderBuilder, StartOptions, TlsClientConfig,
};
