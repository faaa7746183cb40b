//! WebSocket dialer for the carrier
//!
//! Opens the single WebSocket a carrier connection tunnels its byte stream
//! through. The dial sequence is:
//!
//! 1. TCP connect to the origin host and port
//! 2. For `wss` origins, a rustls handshake presenting either the origin host
//!    or the overridden server name as SNI
//! 3. The HTTP upgrade, carrying access headers and the `Host` override
//!
//! The [`WebSocketDialer`] trait is the seam carrier code depends on, so tests
//! and embedders can supply their own transport.

pub mod config;
pub mod dialer;
pub mod error;

pub use config::WebSocketConfig;
pub use dialer::{build_upgrade_request, CarrierSocket, TungsteniteDialer, WebSocketDialer};
pub use error::{TransportError, TransportResult};
