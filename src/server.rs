//! Tokio-based accept loop.
//!
//! `Server` binds a listener, spawns one [`Connection`] task per accepted
//! client and shuts down gracefully on `ctrl_c`: the listener stops, the
//! connection tasks observe the shared cancellation token and the server
//! waits for them to unwind.

use std::{io, net::SocketAddr, sync::Arc};

use log::{info, warn};
use tokio::{
    net::TcpListener,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{auth::AuthorizerFactory, connection::{Connection, ConnectionConfig}};

/// FTP server driving one [`Connection`] per client.
pub struct Server {
    config: Arc<ConnectionConfig>,
    authorizers: Arc<dyn AuthorizerFactory>,
    listener: Option<TcpListener>,
}

impl Server {
    /// Create a server from a connection configuration and an authorizer
    /// factory.
    #[must_use]
    pub fn new(config: ConnectionConfig, authorizers: Arc<dyn AuthorizerFactory>) -> Self {
        Self {
            config: Arc::new(config),
            authorizers,
            listener: None,
        }
    }

    /// Bind the control-channel listener.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] if binding fails.
    pub async fn bind(mut self, addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("listening on {}", listener.local_addr()?);
        self.listener = Some(listener);
        Ok(self)
    }

    /// The bound address, once [`bind`](Self::bind) succeeded.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Accept connections until a shutdown signal arrives, then wait for the
    /// active sessions to finish.
    ///
    /// # Errors
    ///
    /// Returns an [`io::Error`] when the local address of an accepted socket
    /// cannot be determined.
    ///
    /// # Panics
    ///
    /// Panics if called before [`bind`](Self::bind).
    pub async fn run(self) -> io::Result<()> {
        let listener = self.listener.expect("`bind` must be called before `run`");
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let mut delay = Duration::from_millis(10);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    shutdown.cancel();
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        delay = Duration::from_millis(10);
                        let local = stream.local_addr()?;
                        let config = Arc::clone(&self.config);
                        let authorizer = self.authorizers.create();
                        let shutdown = shutdown.clone();
                        tracker.spawn(async move {
                            Connection::run(stream, local, peer, authorizer, config, &shutdown)
                                .await;
                        });
                    }
                    Err(e) => {
                        warn!("accept error: {e}");
                        sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(1));
                    }
                },
            }
        }

        drop(listener);
        tracker.close();
        tracker.wait().await;
        Ok(())
    }
}
