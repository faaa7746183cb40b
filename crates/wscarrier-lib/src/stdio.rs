//! Client mode: tunnel the process's own stdin/stdout

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf, Stdin, Stdout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use wscarrier_proto::StartOptions;
use wscarrier_transport_websocket::WebSocketDialer;

use crate::connection::{CarrierConnection, RelayControl, RelaySummary};
use crate::error::{CarrierError, CarrierResult};

/// Standard input and output joined into a single duplex stream
#[derive(Debug)]
pub struct StdioStream {
    stdin: Stdin,
    stdout: Stdout,
}

impl StdioStream {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for StdioStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}

/// Tunnels one local stream (stdio by default) for the life of the process
pub struct StdioClient<D> {
    dialer: D,
    options: StartOptions,
    deadline: Option<Duration>,
}

impl<D: WebSocketDialer> StdioClient<D> {
    pub fn new(dialer: D, options: StartOptions) -> Self {
        Self {
            dialer,
            options,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Tunnel stdin/stdout until either side closes.
    ///
    /// A failure to establish the carrier is returned so the process can
    /// exit non-zero. Cancelling while still connecting returns
    /// [`CarrierError::Cancelled`].
    pub async fn run(self, cancel: CancellationToken) -> CarrierResult<RelaySummary> {
        self.run_with(StdioStream::new(), cancel).await
    }

    /// Same as [`run`](Self::run) with a caller-supplied local stream
    pub async fn run_with<L>(self, local: L, cancel: CancellationToken) -> CarrierResult<RelaySummary>
    where
        L: AsyncRead + AsyncWrite + Send,
    {
        self.options.validate()?;

        let connection = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(origin = %self.options.origin_url, "Cancelled before carrier connection was established");
                return Err(CarrierError::Cancelled);
            }
            result = CarrierConnection::connect(&self.dialer, &self.options) => result?,
        };
        info!(
            connection_id = %connection.id(),
            origin = %self.options.origin_url,
            "Tunneling standard input/output"
        );

        let control = RelayControl::new()
            .with_cancel(cancel)
            .with_deadline(self.deadline);
        connection.relay(local, control).await
    }
}
