//! Data-channel state machine behaviour against real sockets.

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::Duration,
};
use wharf::{DataChannel, DataChannelError, SimplePasvAddressResolver};

fn channel() -> DataChannel {
    let local: SocketAddr = "127.0.0.1:21".parse().expect("literal address parses");
    let remote: SocketAddr = "127.0.0.1:54321".parse().expect("literal address parses");
    DataChannel::new(local, remote, Arc::new(SimplePasvAddressResolver::default()))
}

#[tokio::test]
async fn passive_accepts_a_client_and_resets_cleanly() {
    let mut data = channel();
    let advertised = data.use_passive(None).await.expect("listener binds");

    let mut client = TcpStream::connect(advertised).await.expect("client connects");
    let mut server = data
        .open(Duration::from_secs(5))
        .await
        .expect("accepted socket is queued");

    client.write_all(b"ping").await.expect("write succeeds");
    drop(client);
    let mut received = Vec::new();
    server.read_to_end(&mut received).await.expect("read succeeds");
    assert_eq!(received, b"ping");

    data.reset();
    assert!(data.passive_address().is_none());
    assert!(data.mode().is_none());

    // Reset is idempotent and a fresh passive round works independently.
    data.reset();
    let advertised = data.use_passive(None).await.expect("listener binds again");
    TcpStream::connect(advertised).await.expect("client connects again");
    data.open(Duration::from_secs(5)).await.expect("second accept works");
}

#[tokio::test]
async fn passive_wait_times_out_distinctly() {
    let mut data = channel();
    data.use_passive(None).await.expect("listener binds");

    let outcome = data.open(Duration::from_millis(100)).await;
    assert!(matches!(outcome, Err(DataChannelError::Timeout)));
}

#[tokio::test]
async fn queued_passive_connections_are_handed_out_in_arrival_order() {
    let mut data = channel();
    let advertised = data.use_passive(None).await.expect("listener binds");

    let mut first = TcpStream::connect(advertised).await.expect("first client connects");
    first.write_all(b"1").await.expect("write succeeds");
    first.flush().await.expect("flush succeeds");
    // Make sure the first connection was accepted before the second dials.
    let mut server_first = data.open(Duration::from_secs(5)).await.expect("first accept");

    let mut second = TcpStream::connect(advertised).await.expect("second client connects");
    second.write_all(b"2").await.expect("write succeeds");
    let mut server_second = data.open(Duration::from_secs(5)).await.expect("second accept");

    let mut buf = [0u8; 1];
    server_first.read_exact(&mut buf).await.expect("read succeeds");
    assert_eq!(&buf, b"1");
    server_second.read_exact(&mut buf).await.expect("read succeeds");
    assert_eq!(&buf, b"2");
}

#[tokio::test]
async fn active_mode_connects_to_the_recorded_target() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener binds");
    let target = listener.local_addr().expect("listener has an address");

    let mut data = channel();
    data.use_active(Some(target));
    let open = data.open(Duration::from_secs(5));
    let (connected, accepted) = tokio::join!(open, listener.accept());
    let mut stream = connected.expect("active connect succeeds");
    let (mut peer, _) = accepted.expect("accept succeeds");

    stream.write_all(b"data").await.expect("write succeeds");
    drop(stream);
    let mut received = Vec::new();
    peer.read_to_end(&mut received).await.expect("read succeeds");
    assert_eq!(received, b"data");
}

#[tokio::test]
async fn refused_active_connect_is_not_reported_as_a_timeout() {
    // Bind-then-drop to get a port that is very likely closed.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener binds");
    let target = listener.local_addr().expect("listener has an address");
    drop(listener);

    let mut data = channel();
    data.use_active(Some(target));
    let outcome = data.open(Duration::from_secs(5)).await;
    assert!(matches!(outcome, Err(DataChannelError::Connect(_))));
}

#[tokio::test]
async fn selecting_active_discards_the_passive_listener() {
    let mut data = channel();
    data.use_passive(None).await.expect("listener binds");
    assert!(data.passive_address().is_some());

    data.use_active(Some("127.0.0.1:50000".parse().expect("literal address parses")));
    assert!(data.passive_address().is_none());
}
