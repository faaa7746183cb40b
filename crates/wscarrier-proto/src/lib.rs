//! Carrier Protocol Definitions
//!
//! This crate defines the configuration surface shared by every carrier mode:
//! the fixed access header names, the header set attached to the WebSocket
//! upgrade, the compact `host[:port[:realhost]]` connection override grammar and
//! the per-session [`StartOptions`].

pub mod destination;
pub mod error;
pub mod headers;
pub mod options;

pub use destination::{resolve_destination, DestinationOverride};
pub use error::{ProtoError, ProtoResult};
pub use headers::{
    build_request_headers, HeaderBuilder, ACCESS_CLIENT_ID_HEADER, ACCESS_CLIENT_SECRET_HEADER,
    JUMP_DESTINATION_HEADER,
};
pub use options::{ensure_url_scheme, listener_address, StartOptions, TlsClientConfig};
