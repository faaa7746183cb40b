//! TLS dial path against a loopback server with a self-signed certificate

use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use wscarrier_proto::{resolve_destination, StartOptions};
use wscarrier_transport_websocket::{
    TransportError, TungsteniteDialer, WebSocketConfig, WebSocketDialer,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn self_signed_acceptor() -> TlsAcceptor {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".into()]).unwrap();

    let certs: Vec<CertificateDer<'static>> = vec![cert.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .unwrap();

    TlsAcceptor::from(Arc::new(config))
}

/// WebSocket-over-TLS echo server reporting the SNI of every handshake it completes
async fn spawn_tls_echo_server() -> (SocketAddr, mpsc::UnboundedReceiver<Option<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let acceptor = self_signed_acceptor();
    let (sni_tx, sni_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let sni_tx = sni_tx.clone();
            tokio::spawn(async move {
                // A client that rejects the certificate aborts here
                let Ok(tls) = acceptor.accept(stream).await else {
                    return;
                };
                let _ = sni_tx.send(tls.get_ref().1.server_name().map(str::to_string));

                let Ok(mut ws) = tokio_tungstenite::accept_async(tls).await else {
                    return;
                };
                if let Some(Ok(msg)) = ws.next().await {
                    let _ = ws.send(msg).await;
                }
            });
        }
    });

    (addr, sni_rx)
}

#[tokio::test]
async fn test_sni_override_dials_self_signed_origin() {
    init_logging();
    let (addr, mut sni_rx) = spawn_tls_echo_server().await;

    let override_spec = format!("spoofed.example:{}:127.0.0.1", addr.port());
    let options = resolve_destination(
        &override_spec,
        StartOptions::new("https://ssh.example.com").with_host("ssh.example.com"),
    )
    .unwrap();
    assert_eq!(options.origin_url, format!("https://127.0.0.1:{}", addr.port()));
    assert!(options.tls.as_ref().unwrap().insecure_skip_verify);

    let dialer = TungsteniteDialer::new(WebSocketConfig::default()).unwrap();
    let mut socket = dialer.dial(&options).await.unwrap();

    assert_eq!(
        sni_rx.recv().await.unwrap().as_deref(),
        Some("spoofed.example")
    );

    socket.send(Message::Binary(b"over tls".to_vec())).await.unwrap();
    let echoed = socket.next().await.unwrap().unwrap();
    assert_eq!(echoed.into_data(), b"over tls".to_vec());
}

#[tokio::test]
async fn test_untrusted_certificate_rejected_without_override() {
    init_logging();
    let (addr, _sni_rx) = spawn_tls_echo_server().await;

    let options = StartOptions::new(format!("https://127.0.0.1:{}", addr.port()));
    let dialer = TungsteniteDialer::new(WebSocketConfig::default()).unwrap();
    let err = dialer.dial(&options).await.unwrap_err();

    assert!(matches!(err, TransportError::Tls(_)), "{:?}", err);
    assert!(!err.is_retryable());
}
