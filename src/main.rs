//! wscarrier - tunnel TCP streams through authenticated WebSocket connections
//!
//! Lets protocols without HTTP awareness, such as SSH, reach services that sit
//! behind an HTTP(S) access front end.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wscarrier_lib::{
    ensure_url_scheme, resolve_destination, CarrierError, Forwarder, HeaderBuilder, InFlight,
    StartOptions, StdioClient,
};
use wscarrier_proto::listener_address;
use wscarrier_transport_websocket::{TungsteniteDialer, WebSocketConfig};

use crate::config::CarrierConfig;

/// wscarrier - carry TCP streams over WebSocket
#[derive(Parser, Debug)]
#[command(name = "wscarrier")]
#[command(about = "Carry TCP streams (SSH and friends) over authenticated WebSocket connections")]
#[command(version = env!("GIT_TAG"))]
#[command(long_version = concat!(env!("GIT_TAG"), "\nCommit: ", env!("GIT_HASH"), "\nBuilt: ", env!("BUILD_TIME")))]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info", env = "WSCARRIER_LOG_LEVEL")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tunnel one stream to an origin, over stdio or through a local listener
    #[command(long_about = r#"
Open a WebSocket to the origin and carry a byte stream through it.

Without --url the process's stdin/stdout are tunneled, which makes the command
usable as an SSH ProxyCommand. With --url a local TCP listener is bound and
every accepted connection gets its own WebSocket.

EXAMPLES:
  # ~/.ssh/config
  Host ssh.example.com
    ProxyCommand wscarrier ssh --hostname %h

  # Local listener on port 2222
  wscarrier ssh --hostname ssh.example.com --url tcp://localhost:2222

  # Dial a specific address while presenting the public name over TLS
  wscarrier ssh --hostname ssh.example.com \
    --connect-to ssh.example.com:443:10.0.0.5

ENVIRONMENT VARIABLES:
  WSCARRIER_HOSTNAME              Origin hostname
  WSCARRIER_SERVICE_TOKEN_ID      Access service token client ID
  WSCARRIER_SERVICE_TOKEN_SECRET  Access service token client secret
  WSCARRIER_DESTINATION           Jump destination behind the origin
  WSCARRIER_CONNECT_TO            Connection override
  WSCARRIER_URL                   Local listener URL
    "#)]
    Ssh {
        /// Origin hostname (https:// is assumed when no scheme is given)
        #[arg(long, env = "WSCARRIER_HOSTNAME")]
        hostname: String,

        /// Extra upgrade header as "key: value" (repeatable)
        #[arg(long = "header", value_name = "KEY: VALUE")]
        headers: Vec<String>,

        /// Access service token client ID
        #[arg(long, env = "WSCARRIER_SERVICE_TOKEN_ID")]
        service_token_id: Option<String>,

        /// Access service token client secret
        #[arg(long, env = "WSCARRIER_SERVICE_TOKEN_SECRET", hide_env_values = true)]
        service_token_secret: Option<String>,

        /// Jump destination behind the access front end (e.g. ssh.internal:22)
        #[arg(long, env = "WSCARRIER_DESTINATION")]
        destination: Option<String>,

        /// Connection override: host, host:port or sni:port:realhost
        #[arg(long, env = "WSCARRIER_CONNECT_TO")]
        connect_to: Option<String>,

        /// Local listener URL (e.g. tcp://localhost:2222); stdio when omitted
        #[arg(long, env = "WSCARRIER_URL")]
        url: Option<String>,

        /// Per-connection deadline in seconds
        #[arg(long, env = "WSCARRIER_CONNECTION_TIMEOUT")]
        connection_timeout: Option<u64>,
    },

    /// Run the forwarders declared in a YAML file
    Forward {
        /// Configuration file (YAML)
        #[arg(long, short = 'c', env = "WSCARRIER_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Ssh {
            hostname,
            headers,
            service_token_id,
            service_token_secret,
            destination,
            connect_to,
            url,
            connection_timeout,
        } => {
            let mut builder = HeaderBuilder::new().pairs(&headers);
            if let Some(id) = &service_token_id {
                builder = builder.client_id(id);
            }
            if let Some(secret) = &service_token_secret {
                builder = builder.client_secret(secret);
            }
            if let Some(destination) = &destination {
                builder = builder.jump_destination(destination);
            }

            let options = StartOptions::new(ensure_url_scheme(&hostname))
                .with_headers(builder.build())
                .with_host(presented_host(&hostname));
            let options = resolve_destination(connect_to.as_deref().unwrap_or_default(), options)
                .context("Invalid --connect-to")?;
            let deadline = connection_timeout.map(Duration::from_secs);

            match url {
                Some(listener) => run_ssh_forwarder(&listener, options, deadline).await,
                None => run_stdio(options, deadline).await,
            }
        }
        Commands::Forward { config } => run_forwarders(&config).await,
    }
}

/// Logs go to stderr so stdout stays reserved for tunnel payload in stdio mode
fn init_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .context("Failed to initialize logging filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();

    Ok(())
}

/// Host header value for the origin: the hostname without any scheme or path
fn presented_host(hostname: &str) -> String {
    let without_scheme = match hostname.split_once("://") {
        Some((_, rest)) => rest,
        None => hostname,
    };
    without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_string()
}

fn new_dialer() -> Result<TungsteniteDialer> {
    TungsteniteDialer::new(WebSocketConfig::default()).context("Failed to initialize TLS")
}

/// Cancel `token` on the first Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            token.cancel();
        }
    });
}

async fn run_stdio(options: StartOptions, deadline: Option<Duration>) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let client = StdioClient::new(new_dialer()?, options).with_deadline(deadline);
    match client.run(cancel).await {
        Ok(summary) => {
            info!(
                connection_id = %summary.connection_id,
                end = ?summary.end,
                bytes_to_remote = summary.bytes_to_remote,
                bytes_to_local = summary.bytes_to_local,
                "Tunnel closed"
            );
            Ok(())
        }
        Err(CarrierError::Cancelled) => {
            info!("Interrupted before the tunnel was established");
            Ok(())
        }
        Err(e) => Err(explain(e)).context("Failed to tunnel standard input/output"),
    }
}

async fn run_ssh_forwarder(
    listener: &str,
    options: StartOptions,
    deadline: Option<Duration>,
) -> Result<()> {
    let address = listener_address(listener)?;
    let forwarder = Forwarder::bind(&address, new_dialer()?, options)
        .await
        .with_context(|| format!("Failed to start listener on {}", address))?
        .with_connection_deadline(deadline);

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let in_flight = forwarder.run(shutdown).await?;
    drain(vec![in_flight]).await;
    Ok(())
}

async fn run_forwarders(path: &std::path::Path) -> Result<()> {
    let config = CarrierConfig::load(path)?;
    let dialer = Arc::new(new_dialer()?);

    let mut forwarders = Vec::with_capacity(config.forwarders.len());
    for entry in &config.forwarders {
        let address = entry.listener_address()?;
        let options = entry.start_options()?;
        let deadline = entry.connection_timeout_seconds.map(Duration::from_secs);

        let forwarder = Forwarder::bind(&address, dialer.clone(), options)
            .await
            .with_context(|| format!("Failed to start listener on {}", address))?
            .with_connection_deadline(deadline);
        forwarders.push(forwarder);
    }

    info!(count = forwarders.len(), "Starting forwarders");

    let shutdown = CancellationToken::new();
    cancel_on_ctrl_c(shutdown.clone());

    let mut tasks = JoinSet::new();
    for forwarder in forwarders {
        tasks.spawn(forwarder.run(shutdown.clone()));
    }

    let mut in_flight = Vec::new();
    let mut failed = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(remaining)) => in_flight.push(remaining),
            Ok(Err(e)) => {
                error!("Forwarder stopped: {}", e);
                failed = true;
                shutdown.cancel();
            }
            Err(e) => {
                error!("Forwarder task panicked: {}", e);
                failed = true;
                shutdown.cancel();
            }
        }
    }

    drain(in_flight).await;

    if failed {
        anyhow::bail!("One or more forwarders failed");
    }
    Ok(())
}

/// Let established relays finish; a second Ctrl+C exits immediately
async fn drain(in_flight: Vec<InFlight>) {
    let remaining: usize = in_flight.iter().map(InFlight::len).sum();
    if remaining == 0 {
        return;
    }

    info!(
        in_flight = remaining,
        "Waiting for open connections to close (Ctrl+C again to exit)"
    );
    tokio::select! {
        _ = async {
            for handle in &in_flight {
                handle.wait().await;
            }
        } => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Exiting with open connections");
        }
    }
}

/// Add an operator hint to errors that have one
fn explain(err: CarrierError) -> anyhow::Error {
    let access_login = matches!(&err, CarrierError::Connect(e) if e.is_access_login_redirect());
    let err = anyhow::Error::new(err);
    if access_login {
        err.context("The origin requires an access token; pass --service-token-id and --service-token-secret")
    } else {
        err
    }
}
