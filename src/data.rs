//! Data-channel lifecycle per connection.
//!
//! [`DataChannel`] tracks the one way the next transfer will be established:
//! default active (back to the control channel's remote address), explicit
//! active (`PORT`/`EPRT`) or passive (`PASV`/`EPSV`). Selecting one mode
//! discards the other; [`DataChannel::reset`] returns to default active and
//! can be called from error paths regardless of the current state.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use serde::Deserialize;
use tracing::{debug, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::{Duration, timeout},
};
use tokio_util::sync::CancellationToken;

/// Raw passive-mode configuration as an embedder supplies it.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
pub struct PasvOptions {
    /// Lowest port to hand out; `None` or 0 means ephemeral.
    pub min_port: Option<u16>,
    /// Highest port to hand out.
    pub max_port: Option<u16>,
    /// Address advertised to clients, when it differs from the bound one.
    pub public_address: Option<IpAddr>,
}

/// Resolved passive-listener parameters for one `PASV`/`EPSV` request.
#[derive(Clone, Copy, Debug)]
pub struct PasvListenerOptions {
    /// Lowest candidate port; 0 selects an ephemeral port.
    pub min_port: u16,
    /// Highest candidate port.
    pub max_port: u16,
    /// Address to advertise in the reply.
    pub public_address: IpAddr,
}

/// Port-allocation policy consumed when entering passive mode.
pub trait PasvAddressResolver: Send + Sync {
    /// Resolve the listener options for a connection bound locally to
    /// `local_address`.
    fn resolve(&self, local_address: IpAddr) -> PasvListenerOptions;
}

/// Default resolver applying the configured range as-is.
///
/// Privileged minimum ports are raised to 1024 and an inverted range is
/// collapsed onto the minimum.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimplePasvAddressResolver {
    options: PasvOptions,
}

impl SimplePasvAddressResolver {
    /// Create a resolver from raw options.
    #[must_use]
    pub fn new(options: PasvOptions) -> Self { Self { options } }
}

impl PasvAddressResolver for SimplePasvAddressResolver {
    fn resolve(&self, local_address: IpAddr) -> PasvListenerOptions {
        let mut min_port = self.options.min_port.unwrap_or(0);
        if min_port > 0 && min_port < 1024 {
            min_port = 1024;
        }
        let max_port = self.options.max_port.unwrap_or(0).max(min_port);

        PasvListenerOptions {
            min_port,
            max_port,
            public_address: self.options.public_address.unwrap_or(local_address),
        }
    }
}

/// Failures while establishing a data connection.
///
/// Timeouts are a distinct variant because handlers report them differently
/// from straight connection failures.
#[derive(Debug)]
pub enum DataChannelError {
    /// The bounded wait for a connection elapsed.
    Timeout,
    /// The outward active connection failed.
    Connect(std::io::Error),
    /// No port in the configured passive range could be bound.
    Listen(std::io::Error),
    /// The passive accept loop is gone.
    Closed,
}

impl std::fmt::Display for DataChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => f.write_str("timed out waiting for the data connection"),
            Self::Connect(e) => write!(f, "active connect failed: {e}"),
            Self::Listen(e) => write!(f, "no passive port available: {e}"),
            Self::Closed => f.write_str("passive listener is closed"),
        }
    }
}

impl std::error::Error for DataChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Listen(e) => Some(e),
            Self::Timeout | Self::Closed => None,
        }
    }
}

/// Which establishment mode is currently selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataMode {
    /// An explicit `PORT`/`EPRT` target was recorded.
    Active,
    /// A passive listener is waiting for the client.
    Passive,
}

struct PassiveEndpoint {
    cancel: CancellationToken,
    accepted: mpsc::UnboundedReceiver<TcpStream>,
    advertised: SocketAddr,
}

/// Per-connection data-channel state machine.
pub struct DataChannel {
    local_ip: IpAddr,
    default_target: SocketAddr,
    target: SocketAddr,
    passive: Option<PassiveEndpoint>,
    mode: Option<DataMode>,
    resolver: Arc<dyn PasvAddressResolver>,
}

impl DataChannel {
    /// Create the channel for a control connection between `local` and
    /// `remote`; the default active target is the control peer itself.
    #[must_use]
    pub fn new(local: SocketAddr, remote: SocketAddr, resolver: Arc<dyn PasvAddressResolver>) -> Self {
        Self {
            local_ip: local.ip(),
            default_target: remote,
            target: remote,
            passive: None,
            mode: None,
            resolver,
        }
    }

    /// The currently selected mode, if any.
    #[must_use]
    pub fn mode(&self) -> Option<DataMode> { self.mode }

    /// The address a passive listener advertises, when one is active.
    #[must_use]
    pub fn passive_address(&self) -> Option<SocketAddr> {
        self.passive.as_ref().map(|p| p.advertised)
    }

    /// Record an active-mode target, or fall back to the control peer.
    ///
    /// Any passive listener is discarded.
    pub fn use_active(&mut self, target: Option<SocketAddr>) {
        self.drop_passive();
        match target {
            Some(address) => {
                self.target = address;
                self.mode = Some(DataMode::Active);
            }
            None => {
                self.target = self.default_target;
                self.mode = None;
            }
        }
    }

    /// Enter passive mode: bind a listener per the resolver's policy, start
    /// its accept loop and return the address to advertise.
    ///
    /// # Errors
    ///
    /// Returns [`DataChannelError::Listen`] when no port in the configured
    /// range can be bound.
    pub async fn use_passive(&mut self, port: Option<u16>) -> Result<SocketAddr, DataChannelError> {
        self.drop_passive();

        let options = self.resolver.resolve(self.local_ip);
        let listener = self.bind_listener(port, &options).await?;
        let bound = listener.local_addr().map_err(DataChannelError::Listen)?;

        let (tx, accepted) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(accept_loop(listener, tx, cancel.clone()));

        let advertised = SocketAddr::new(options.public_address, bound.port());
        self.passive = Some(PassiveEndpoint {
            cancel,
            accepted,
            advertised,
        });
        self.target = self.default_target;
        self.mode = Some(DataMode::Passive);
        Ok(advertised)
    }

    /// Open the next data connection within `wait`.
    ///
    /// Passive mode hands out the next accepted socket in arrival order;
    /// active mode connects out to the recorded target.
    ///
    /// # Errors
    ///
    /// [`DataChannelError::Timeout`] when nothing connects within `wait`;
    /// other variants for connect and listener failures.
    pub async fn open(&mut self, wait: Duration) -> Result<TcpStream, DataChannelError> {
        if let Some(endpoint) = &mut self.passive {
            return match timeout(wait, endpoint.accepted.recv()).await {
                Ok(Some(stream)) => Ok(stream),
                Ok(None) => Err(DataChannelError::Closed),
                Err(_) => Err(DataChannelError::Timeout),
            };
        }

        match timeout(wait, TcpStream::connect(self.target)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::TimedOut => Err(DataChannelError::Timeout),
            Ok(Err(e)) => Err(DataChannelError::Connect(e)),
            Err(_) => Err(DataChannelError::Timeout),
        }
    }

    /// Return to default active mode, cancelling any passive listener.
    ///
    /// Idempotent; error paths call this unconditionally.
    pub fn reset(&mut self) {
        self.drop_passive();
        self.target = self.default_target;
        self.mode = None;
    }

    fn drop_passive(&mut self) {
        if let Some(endpoint) = self.passive.take() {
            endpoint.cancel.cancel();
        }
    }

    async fn bind_listener(
        &self,
        port: Option<u16>,
        options: &PasvListenerOptions,
    ) -> Result<TcpListener, DataChannelError> {
        if let Some(port) = port {
            return TcpListener::bind((self.local_ip, port))
                .await
                .map_err(DataChannelError::Listen);
        }

        if options.min_port == 0 {
            return TcpListener::bind((self.local_ip, 0))
                .await
                .map_err(DataChannelError::Listen);
        }

        let mut last = None;
        for candidate in options.min_port..=options.max_port {
            match TcpListener::bind((self.local_ip, candidate)).await {
                Ok(listener) => return Ok(listener),
                Err(e) => last = Some(e),
            }
        }
        Err(DataChannelError::Listen(last.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "empty passive port range")
        })))
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.drop_passive();
    }
}

async fn accept_loop(
    listener: TcpListener,
    tx: mpsc::UnboundedSender<TcpStream>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    debug!("client connected from {peer} for a passive data connection");
                    if tx.send(stream).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("passive listener accept failed: {e}");
                    break;
                }
            },
        }
    }
}
