//! Relay lifecycle tests over in-memory WebSocket pairs

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use wscarrier_lib::{CarrierConnection, CarrierError, RelayControl, RelayDirection, RelayEnd};

async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    (client, server)
}

/// Drain the remote side, counting close frames until the socket ends
async fn count_close_frames(server: &mut WebSocketStream<DuplexStream>) -> usize {
    let mut closes = 0;
    while let Some(message) = server.next().await {
        match message {
            Ok(Message::Close(_)) => closes += 1,
            Ok(_) => {}
            Err(_) => break,
        }
    }
    closes
}

#[tokio::test]
async fn test_bytes_flow_in_both_directions() {
    let (client, mut server) = socket_pair().await;
    let (local, mut app) = tokio::io::duplex(1024);

    let relay = tokio::spawn(CarrierConnection::from_socket(client).relay(local, RelayControl::new()));

    app.write_all(b"SSH-2.0-client\r\n").await.unwrap();
    let upstream = server.next().await.unwrap().unwrap();
    assert_eq!(upstream.into_data(), b"SSH-2.0-client\r\n".to_vec());

    server
        .send(Message::Binary(b"SSH-2.0-server\r\n".to_vec()))
        .await
        .unwrap();
    let mut buf = [0u8; 16];
    app.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"SSH-2.0-server\r\n");

    server.close(None).await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should end after remote close")
        .unwrap()
        .unwrap();

    assert_eq!(summary.end, RelayEnd::RemoteClosed);
    assert_eq!(summary.bytes_to_remote, 16);
    assert_eq!(summary.bytes_to_local, 16);
}

#[tokio::test]
async fn test_remote_close_terminates_local_side() {
    let (client, mut server) = socket_pair().await;
    let (local, mut app) = tokio::io::duplex(1024);

    let relay = tokio::spawn(CarrierConnection::from_socket(client).relay(local, RelayControl::new()));

    server
        .send(Message::Binary(b"last words".to_vec()))
        .await
        .unwrap();
    server.close(None).await.unwrap();

    // The local stream sees the data followed by EOF, even though the app
    // never closed its own side.
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), app.read_to_end(&mut received))
        .await
        .expect("local side should reach EOF")
        .unwrap();
    assert_eq!(received, b"last words");

    let summary = relay.await.unwrap().unwrap();
    assert_eq!(summary.end, RelayEnd::RemoteClosed);

    // Writing after the relay ended must not hang
    let _ = app.write_all(b"ignored").await;
}

#[tokio::test]
async fn test_socket_closed_exactly_once_on_local_eof() {
    let (client, mut server) = socket_pair().await;
    let (local, mut app) = tokio::io::duplex(1024);

    let relay = tokio::spawn(CarrierConnection::from_socket(client).relay(local, RelayControl::new()));

    app.write_all(b"bye").await.unwrap();
    app.shutdown().await.unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should end after local EOF")
        .unwrap()
        .unwrap();
    assert_eq!(summary.end, RelayEnd::LocalClosed);
    assert_eq!(summary.bytes_to_remote, 3);

    let first = server.next().await.unwrap().unwrap();
    assert_eq!(first.into_data(), b"bye".to_vec());
    assert_eq!(count_close_frames(&mut server).await, 1);
}

#[tokio::test]
async fn test_socket_closed_exactly_once_on_remote_close() {
    let (client, mut server) = socket_pair().await;
    let (local, _app) = tokio::io::duplex(1024);

    let relay = tokio::spawn(CarrierConnection::from_socket(client).relay(local, RelayControl::new()));

    server.close(None).await.unwrap();
    let summary = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should end after remote close")
        .unwrap()
        .unwrap();
    assert_eq!(summary.end, RelayEnd::RemoteClosed);

    // Only the single close reply comes back
    assert_eq!(count_close_frames(&mut server).await, 1);
}

#[tokio::test]
async fn test_remote_reset_is_relay_error() {
    let (client, server) = socket_pair().await;
    let (local, _app) = tokio::io::duplex(1024);

    let relay = tokio::spawn(CarrierConnection::from_socket(client).relay(local, RelayControl::new()));

    // Drop the remote without a closing handshake
    drop(server);

    let result = tokio::time::timeout(Duration::from_secs(5), relay)
        .await
        .expect("relay should end after remote reset")
        .unwrap();

    match result {
        Err(CarrierError::RelayWebSocket { direction, .. }) => {
            assert_eq!(direction, RelayDirection::RemoteToLocal)
        }
        Ok(summary) => assert_eq!(summary.end, RelayEnd::RemoteClosed),
        Err(other) => panic!("unexpected relay error: {:?}", other),
    }
}
