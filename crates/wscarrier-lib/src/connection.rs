//! Carrier connection: one duplex stream tunneled over one WebSocket
//!
//! The relay runs two copy loops:
//! - local reads → binary WebSocket messages
//! - WebSocket messages → local writes
//!
//! Whichever loop finishes first ends the relay. The other loop is dropped,
//! then the local write half is shut down and the WebSocket is closed. The
//! socket is owned by the relay, so it is closed exactly once.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use wscarrier_proto::StartOptions;
use wscarrier_transport_websocket::WebSocketDialer;

use crate::error::{CarrierError, CarrierResult, RelayDirection};

/// Read buffer size for the local → remote direction
const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Per-connection cancellation and deadline
#[derive(Debug, Clone, Default)]
pub struct RelayControl {
    /// Cancelling ends the relay as [`RelayEnd::Cancelled`]
    pub cancel: CancellationToken,
    /// Maximum lifetime of the relay
    pub deadline: Option<Duration>,
}

impl RelayControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Why a relay ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The local stream reached EOF
    LocalClosed,
    /// The remote sent a close frame or the WebSocket ended
    RemoteClosed,
    /// The relay's cancellation token fired
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    pub connection_id: String,
    pub end: RelayEnd,
    pub bytes_to_remote: u64,
    pub bytes_to_local: u64,
}

/// A WebSocket dedicated to tunneling a single local stream
pub struct CarrierConnection<S> {
    id: String,
    socket: WebSocketStream<S>,
}

impl<S> std::fmt::Debug for CarrierConnection<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarrierConnection")
            .field("id", &self.id)
            .finish()
    }
}

impl<S> CarrierConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Perform the WebSocket upgrade described by `options`.
    ///
    /// Failures are returned as-is; no retry happens here.
    pub async fn connect<D>(dialer: &D, options: &StartOptions) -> CarrierResult<Self>
    where
        D: WebSocketDialer<Io = S>,
    {
        let socket = dialer.dial(options).await?;
        let connection = Self::from_socket(socket);
        debug!(
            connection_id = %connection.id,
            origin = %options.origin_url,
            "Carrier connection established"
        );
        Ok(connection)
    }

    /// Wrap an already upgraded WebSocket
    pub fn from_socket(socket: WebSocketStream<S>) -> Self {
        Self {
            id: format!("ws-{}", uuid::Uuid::new_v4()),
            socket,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Relay bytes between `local` and the WebSocket until either side
    /// closes, the control token is cancelled, or the deadline passes.
    ///
    /// Clean EOF on either side is `Ok`; a read or write failure is returned
    /// as the terminating error.
    pub async fn relay<L>(self, local: L, control: RelayControl) -> CarrierResult<RelaySummary>
    where
        L: AsyncRead + AsyncWrite + Send,
    {
        let CarrierConnection { id, socket } = self;
        let (mut ws_sink, mut ws_source) = socket.split();
        let (mut local_read, mut local_write) = tokio::io::split(local);

        let mut bytes_to_remote = 0u64;
        let mut bytes_to_local = 0u64;
        let deadline = control.deadline;

        debug!(connection_id = %id, "Relay started");

        let outcome = {
            let upstream = copy_local_to_remote(&mut local_read, &mut ws_sink, &mut bytes_to_remote);
            let downstream =
                copy_remote_to_local(&mut ws_source, &mut local_write, &mut bytes_to_local);
            let expiry = async {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(upstream, downstream, expiry);

            tokio::select! {
                result = &mut upstream => result.map(|_| RelayEnd::LocalClosed),
                result = &mut downstream => result.map(|_| RelayEnd::RemoteClosed),
                _ = control.cancel.cancelled() => Ok(RelayEnd::Cancelled),
                _ = &mut expiry => Err(CarrierError::DeadlineExceeded(deadline.unwrap_or_default())),
            }
        };

        // Both copy loops are gone; release the local sink and the socket.
        if let Err(e) = local_write.shutdown().await {
            trace!(connection_id = %id, "Local shutdown after relay: {}", e);
        }
        if let Err(e) = ws_sink.close().await {
            trace!(connection_id = %id, "WebSocket close after relay: {}", e);
        }
        drop(ws_source);

        match &outcome {
            Ok(end) => debug!(
                connection_id = %id,
                end = ?end,
                bytes_to_remote,
                bytes_to_local,
                "Relay finished"
            ),
            Err(e) => debug!(
                connection_id = %id,
                bytes_to_remote,
                bytes_to_local,
                "Relay terminated: {}",
                e
            ),
        }

        outcome.map(|end| RelaySummary {
            connection_id: id,
            end,
            bytes_to_remote,
            bytes_to_local,
        })
    }
}

async fn copy_local_to_remote<R, W>(
    local: &mut R,
    remote: &mut W,
    total: &mut u64,
) -> CarrierResult<()>
where
    R: AsyncRead + Unpin,
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut buffer = vec![0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = local
            .read(&mut buffer)
            .await
            .map_err(|source| CarrierError::RelayIo {
                direction: RelayDirection::LocalToRemote,
                source,
            })?;

        if n == 0 {
            return Ok(());
        }

        remote
            .send(Message::Binary(buffer[..n].to_vec()))
            .await
            .map_err(|source| CarrierError::RelayWebSocket {
                direction: RelayDirection::LocalToRemote,
                source,
            })?;
        *total += n as u64;
    }
}

async fn copy_remote_to_local<R, W>(
    remote: &mut R,
    local: &mut W,
    total: &mut u64,
) -> CarrierResult<()>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(message) = remote.next().await {
        let message = message.map_err(|source| CarrierError::RelayWebSocket {
            direction: RelayDirection::RemoteToLocal,
            source,
        })?;

        let data = match message {
            Message::Binary(data) => data,
            Message::Text(text) => text.into_bytes(),
            Message::Close(frame) => {
                trace!("Remote sent close frame: {:?}", frame);
                return Ok(());
            }
            // Pong replies are queued by tungstenite itself
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };

        let io_err = |source: std::io::Error| CarrierError::RelayIo {
            direction: RelayDirection::RemoteToLocal,
            source,
        };
        local.write_all(&data).await.map_err(io_err)?;
        local.flush().await.map_err(io_err)?;
        *total += data.len() as u64;
    }

    Ok(())
}
