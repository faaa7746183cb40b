//! Forwarder mode: accept local TCP connections and tunnel each one
//!
//! Lifecycle:
//! `bind` (Listening) → accept loop → shutdown token fires (ShuttingDown) →
//! listener dropped, `run` returns (Stopped).
//!
//! Every accepted connection runs in its own task with its own carrier
//! connection. The only state shared between them is the read-only
//! [`StartOptions`] and the shutdown token. Relays already in progress when
//! shutdown fires are left to drain on their own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use wscarrier_proto::StartOptions;
use wscarrier_transport_websocket::WebSocketDialer;

use crate::connection::{CarrierConnection, RelayControl};
use crate::error::{CarrierError, CarrierResult};

/// Local listener that opens one carrier connection per accepted stream
pub struct Forwarder<D> {
    listener: TcpListener,
    dialer: Arc<D>,
    options: Arc<StartOptions>,
    connection_deadline: Option<Duration>,
    tracker: TaskTracker,
}

impl<D> std::fmt::Debug for Forwarder<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("local_addr", &self.listener.local_addr())
            .field("origin", &self.options.origin_url)
            .finish()
    }
}

impl<D: WebSocketDialer> Forwarder<D> {
    /// Validate the session options and bind the local listener
    pub async fn bind(address: &str, dialer: D, options: StartOptions) -> CarrierResult<Self> {
        options.validate()?;

        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| CarrierError::Bind {
                address: address.to_string(),
                source,
            })?;

        Ok(Self {
            listener,
            dialer: Arc::new(dialer),
            options: Arc::new(options),
            connection_deadline: None,
            tracker: TaskTracker::new(),
        })
    }

    /// Limit the lifetime of every tunneled connection
    pub fn with_connection_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.connection_deadline = deadline;
        self
    }

    pub fn local_addr(&self) -> CarrierResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled.
    ///
    /// Returns once the listener is closed; connections still relaying at
    /// that point are reported through the returned [`InFlight`] handle.
    pub async fn run(self, shutdown: CancellationToken) -> CarrierResult<InFlight> {
        let local_addr = self.listener.local_addr()?;
        info!(
            local_addr = %local_addr,
            origin = %self.options.origin_url,
            "Start Websocket listener"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(local_addr = %local_addr, "Shutdown requested, closing listener");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!(peer_addr = %peer_addr, "Accepted local connection");
                        self.tracker.spawn(handle_connection(
                            stream,
                            peer_addr,
                            self.dialer.clone(),
                            self.options.clone(),
                            shutdown.clone(),
                            self.connection_deadline,
                        ));
                    }
                    Err(e) => {
                        warn!(local_addr = %local_addr, "Failed to accept local connection: {}", e);
                    }
                },
            }
        }

        drop(self.listener);
        self.tracker.close();

        let in_flight = InFlight {
            tracker: self.tracker,
        };
        info!(
            local_addr = %local_addr,
            in_flight = in_flight.len(),
            "Websocket listener stopped"
        );
        Ok(in_flight)
    }
}

/// Connections still relaying after the forwarder stopped accepting
#[derive(Debug, Clone)]
pub struct InFlight {
    tracker: TaskTracker,
}

impl InFlight {
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait until every remaining connection has finished on its own
    pub async fn wait(&self) {
        self.tracker.wait().await
    }
}

async fn handle_connection<D: WebSocketDialer>(
    stream: TcpStream,
    peer_addr: SocketAddr,
    dialer: Arc<D>,
    options: Arc<StartOptions>,
    shutdown: CancellationToken,
    deadline: Option<Duration>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer_addr = %peer_addr, "Failed to set TCP_NODELAY: {}", e);
    }

    // Shutdown only interrupts connections that are not relaying yet
    let connection = tokio::select! {
        _ = shutdown.cancelled() => {
            debug!(peer_addr = %peer_addr, "Shutdown before carrier connection was established");
            return;
        }
        result = CarrierConnection::connect(&*dialer, &options) => match result {
            Ok(connection) => connection,
            Err(e) => {
                error!(peer_addr = %peer_addr, "Failed to establish carrier connection: {}", e);
                return;
            }
        },
    };

    let connection_id = connection.id().to_string();
    debug!(connection_id = %connection_id, peer_addr = %peer_addr, "Relaying local connection");

    match connection
        .relay(stream, RelayControl::new().with_deadline(deadline))
        .await
    {
        Ok(summary) => info!(
            connection_id = %connection_id,
            peer_addr = %peer_addr,
            end = ?summary.end,
            bytes_to_remote = summary.bytes_to_remote,
            bytes_to_local = summary.bytes_to_local,
            "Carrier connection closed"
        ),
        Err(e) => warn!(
            connection_id = %connection_id,
            peer_addr = %peer_addr,
            "Carrier connection ended with error: {}",
            e
        ),
    }
}
