//! End-to-end transfers over a passive data connection.

mod common;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use common::connect;

/// Pull the host/port out of a `227 Entering Passive Mode (...)` reply.
fn parse_pasv_reply(reply: &str) -> std::net::SocketAddr {
    let inner = reply
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(inner, _)| inner)
        .expect("227 reply carries an address");
    let parts: Vec<u16> = inner.split(',').map(|p| p.parse().expect("number")).collect();
    assert_eq!(parts.len(), 6);
    format!(
        "{}.{}.{}.{}:{}",
        parts[0],
        parts[1],
        parts[2],
        parts[3],
        (parts[4] << 8) | parts[5],
    )
    .parse()
    .expect("assembled address parses")
}

#[tokio::test]
async fn retr_streams_a_file_through_the_passive_channel() {
    let mut client = connect().await;
    client.login().await;

    client.send("TYPE I").await;
    client.expect(200).await;
    client.send("PASV").await;
    let target = parse_pasv_reply(&client.expect(227).await);

    client.send("RETR /welcome.txt").await;
    client.expect(150).await;

    let mut data = TcpStream::connect(target).await.expect("data connect succeeds");
    let mut payload = Vec::new();
    data.read_to_end(&mut payload).await.expect("data read succeeds");
    assert_eq!(payload, b"Welcome to wharf.\r\n");

    client.expect(226).await;
}

#[tokio::test]
async fn stor_commits_the_uploaded_bytes() {
    let mut client = connect().await;
    client.login().await;

    client.send("PASV").await;
    let target = parse_pasv_reply(&client.expect(227).await);

    client.send("STOR /upload.bin").await;
    client.expect(150).await;

    let mut data = TcpStream::connect(target).await.expect("data connect succeeds");
    data.write_all(b"uploaded-bytes").await.expect("data write succeeds");
    data.shutdown().await.expect("shutdown succeeds");
    drop(data);

    client.expect(226).await;
    client.send("SIZE /upload.bin").await;
    assert_eq!(client.expect(213).await, "213 14");
}

#[tokio::test]
async fn list_writes_the_directory_listing() {
    let mut client = connect().await;
    client.login().await;

    client.send("PASV").await;
    let target = parse_pasv_reply(&client.expect(227).await);

    client.send("LIST").await;
    client.expect(150).await;

    let mut data = TcpStream::connect(target).await.expect("data connect succeeds");
    let mut listing = String::new();
    data.read_to_string(&mut listing).await.expect("data read succeeds");
    client.expect(226).await;

    assert!(listing.contains("welcome.txt"));
    assert!(listing.lines().any(|line| line.starts_with("drwxr-xr-x") && line.ends_with("pub")));
}

#[tokio::test]
async fn rest_offsets_the_following_retrieve() {
    let mut client = connect().await;
    client.login().await;

    client.send("PASV").await;
    let target = parse_pasv_reply(&client.expect(227).await);

    client.send("REST 8").await;
    client.expect(350).await;
    client.send("RETR /welcome.txt").await;
    client.expect(150).await;

    let mut data = TcpStream::connect(target).await.expect("data connect succeeds");
    let mut payload = Vec::new();
    data.read_to_end(&mut payload).await.expect("data read succeeds");
    assert_eq!(payload, b"to wharf.\r\n");

    client.expect(226).await;
}

#[tokio::test]
async fn eprt_with_an_unknown_protocol_gets_522() {
    let mut client = connect().await;
    client.login().await;

    client.send("EPRT |9|host|1|").await;
    client.expect(522).await;
}

#[tokio::test]
async fn mixing_port_families_is_rejected() {
    let mut client = connect().await;
    client.login().await;

    client.send("PORT 127,0,0,1,200,10").await;
    client.expect(200).await;
    client.send("EPRT |1|127.0.0.1|51210|").await;
    client.expect(500).await;
}
