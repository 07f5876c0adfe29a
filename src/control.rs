//! Internal control messages and the features built on them.
//!
//! A connection carries, next to commands and replies, a request/status pair
//! of channels: features post a [`ServerCommand`] and observe the matching
//! [`ServerStatus`] on a broadcast channel. A requester subscribes before it
//! posts, so the correlation is by request identity rather than a shared
//! event, and several listeners can watch the same transition.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

/// Actions a feature can request from the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerCommand {
    /// Stop dispatching, flush pending replies and close the connection.
    Shutdown,
    /// Upgrade the control channel to TLS.
    EnableTls,
    /// Downgrade the control channel back to plain text.
    DisableTls,
    /// Resume a response sender paused by a transport change.
    ResumeResponseSender,
}

/// Outcomes reported for control requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerStatus {
    /// The control channel is now encrypted.
    TlsEnabled,
    /// The control channel is now plain.
    TlsDisabled,
    /// A disable request found the channel already plain.
    TlsWasDisabled,
    /// No server certificate is configured; nothing changed.
    TlsEnableErrorNotConfigured,
    /// The handshake failed; the plain channel stays active.
    TlsEnableError,
}

/// Failure to complete a control request.
#[derive(Debug)]
pub enum ControlError {
    /// The connection's control channels are gone.
    ChannelClosed,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => f.write_str("connection control channel is closed"),
        }
    }
}

impl std::error::Error for ControlError {}

/// Connection-lifetime capability.
///
/// Wraps the cancellation token that unwinds all of a connection's loops;
/// handlers use it to observe or force connection teardown.
pub struct LifetimeFeature {
    token: CancellationToken,
}

impl LifetimeFeature {
    /// Wrap the connection's cancellation token.
    #[must_use]
    pub fn new(token: CancellationToken) -> Self { Self { token } }

    /// The connection's cancellation token.
    #[must_use]
    pub fn token(&self) -> &CancellationToken { &self.token }

    /// Tear the connection down.
    pub fn abort(&self) { self.token.cancel(); }
}

/// TLS control capability registered in every session.
///
/// Posting through this feature is the only way to change the control
/// channel's transport; the caller blocks on the status broadcast until its
/// own request is answered.
pub struct SecureControlFeature {
    commands: mpsc::UnboundedSender<ServerCommand>,
    status: broadcast::Sender<ServerStatus>,
    configured: bool,
    secured: AtomicBool,
}

impl SecureControlFeature {
    /// Create the feature.
    ///
    /// `configured` records whether a server certificate exists; handlers
    /// check it before announcing TLS support.
    #[must_use]
    pub fn new(
        commands: mpsc::UnboundedSender<ServerCommand>,
        status: broadcast::Sender<ServerStatus>,
        configured: bool,
    ) -> Self {
        Self {
            commands,
            status,
            configured,
            secured: AtomicBool::new(false),
        }
    }

    /// Whether a server certificate is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool { self.configured }

    /// Whether the control channel is currently encrypted.
    #[must_use]
    pub fn is_secured(&self) -> bool { self.secured.load(Ordering::Relaxed) }

    /// Request the TLS upgrade and wait for its outcome.
    ///
    /// # Errors
    ///
    /// [`ControlError::ChannelClosed`] when the connection is shutting down.
    pub async fn enable_tls(&self) -> Result<ServerStatus, ControlError> {
        let status = self
            .request(ServerCommand::EnableTls, |status| {
                matches!(
                    status,
                    ServerStatus::TlsEnabled
                        | ServerStatus::TlsEnableError
                        | ServerStatus::TlsEnableErrorNotConfigured
                )
            })
            .await?;
        self.secured
            .store(status == ServerStatus::TlsEnabled, Ordering::Relaxed);
        Ok(status)
    }

    /// Request the TLS downgrade and wait for its outcome.
    ///
    /// # Errors
    ///
    /// [`ControlError::ChannelClosed`] when the connection is shutting down.
    pub async fn disable_tls(&self) -> Result<ServerStatus, ControlError> {
        let status = self
            .request(ServerCommand::DisableTls, |status| {
                matches!(status, ServerStatus::TlsDisabled | ServerStatus::TlsWasDisabled)
            })
            .await?;
        self.secured.store(false, Ordering::Relaxed);
        Ok(status)
    }

    async fn request(
        &self,
        command: ServerCommand,
        matches: impl Fn(ServerStatus) -> bool,
    ) -> Result<ServerStatus, ControlError> {
        // Subscribe before posting so the reply cannot be missed.
        let mut rx = self.status.subscribe();
        self.commands
            .send(command)
            .map_err(|_| ControlError::ChannelClosed)?;

        loop {
            match rx.recv().await {
                Ok(status) if matches(status) => return Ok(status),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return Err(ControlError::ChannelClosed),
            }
        }
    }
}
