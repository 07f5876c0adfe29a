//! Shared harness: drives a real `Connection` over an in-memory duplex
//! stream and speaks the client side of the control channel.
#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf},
    time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;
use wharf::{
    AnonymousAuthorizer, Connection, ConnectionConfig, HandlerRegistry, MemoryFilesystem,
    commands::default_registry,
};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of a control connection to an in-process server.
pub struct FtpClient {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    shutdown: CancellationToken,
}

impl FtpClient {
    /// Send one command line.
    pub async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .expect("control channel accepts writes");
    }

    /// Read the next reply line; `None` once the server closed the stream.
    pub async fn line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(REPLY_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("server replies within the timeout")
            .expect("control channel read succeeds");
        if read == 0 {
            return None;
        }
        Some(line.trim_end_matches(['\r', '\n']).to_owned())
    }

    /// Read one full reply (multi-line aware) and assert its code.
    pub async fn expect(&mut self, code: u16) -> String {
        let first = self.line().await.expect("a reply is expected");
        assert!(
            first.starts_with(&code.to_string()),
            "expected reply {code}, got {first:?}",
        );
        if first.as_bytes().get(3) == Some(&b'-') {
            let terminator = format!("{code} ");
            loop {
                let line = self.line().await.expect("continuation line expected");
                if line.starts_with(&terminator) {
                    break;
                }
            }
        }
        first
    }

    /// Complete the anonymous login.
    pub async fn login(&mut self) {
        self.send("USER anonymous").await;
        self.expect(331).await;
        self.send("PASS -").await;
        self.expect(230).await;
    }

    /// Whether the server has closed the control channel.
    pub async fn is_closed(&mut self) -> bool { self.line().await.is_none() }
}

impl Drop for FtpClient {
    fn drop(&mut self) { self.shutdown.cancel(); }
}

/// A filesystem with a few entries the tests rely on.
pub fn seeded_filesystem() -> MemoryFilesystem {
    let fs = MemoryFilesystem::new();
    fs.seed_dir("/pub");
    fs.seed_file("/welcome.txt", b"Welcome to wharf.\r\n".to_vec());
    fs
}

/// Start a connection with the default handler set.
pub async fn connect() -> FtpClient {
    connect_with(default_registry(), seeded_filesystem()).await
}

/// Start a connection with a custom handler table and filesystem.
pub async fn connect_with(registry: HandlerRegistry, fs: MemoryFilesystem) -> FtpClient {
    let (client_end, server_end) = tokio::io::duplex(16 * 1024);
    let local: SocketAddr = "127.0.0.1:21".parse().expect("literal address parses");
    let remote: SocketAddr = "127.0.0.1:54321".parse().expect("literal address parses");

    let config = Arc::new(ConnectionConfig::new(Arc::new(registry)));
    let authorizer = Arc::new(AnonymousAuthorizer::new(Arc::new(fs)));
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    tokio::spawn(async move {
        Connection::run(server_end, local, remote, authorizer, config, &token).await;
    });

    let (read, write) = tokio::io::split(client_end);
    let mut client = FtpClient {
        reader: BufReader::new(read),
        writer: write,
        shutdown,
    };
    client.expect(220).await;
    client
}
