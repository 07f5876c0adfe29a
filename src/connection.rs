//! Per-connection driver.
//!
//! [`Connection::run`] owns one accepted control connection and runs its
//! four cooperating loops: the framer (exclusive transport reader), the
//! server-command listener (TLS transitions and shutdown), the dispatch
//! pipeline, and the response sender (exclusive transport writer). The loops
//! communicate only over the connection's channels and unwind together on
//! one cancellation token; the transport is dropped after all of them have
//! finished.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use log::{debug, info, warn};
use tokio::sync::{Notify, Semaphore, broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{Authorizer, AuthorizerFeature},
    catalog::{Catalog, DefaultCatalog, LocalizationFeature},
    collector::CommandCollector,
    command::Command,
    control::{LifetimeFeature, SecureControlFeature, ServerCommand, ServerStatus},
    data::{DataChannel, PasvAddressResolver, SimplePasvAddressResolver},
    handler::HandlerRegistry,
    middleware::Middleware,
    multiplexer::Multiplexer,
    reply::Reply,
    state::Session,
    tls::{self, TlsIdentity},
    transport::{ControlStream, SharedTransport, Transportable},
};

/// How long a paused response sender waits before resuming on its own.
const RESUME_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared configuration applied to every connection of a server.
pub struct ConnectionConfig {
    /// Handler table, built once at startup.
    pub registry: Arc<HandlerRegistry>,
    /// Middleware layers, outermost first.
    pub middleware: Vec<Arc<dyn Middleware>>,
    /// Catalog used to translate reply messages.
    pub catalog: Arc<dyn Catalog>,
    /// Passive-mode port allocation policy.
    pub resolver: Arc<dyn PasvAddressResolver>,
    /// Server TLS identity; `None` leaves `AUTH TLS` unconfigured.
    pub tls: Option<TlsIdentity>,
    /// Text of the 220 greeting.
    pub greeting: String,
}

impl ConnectionConfig {
    /// Configuration with the given handler table and defaults for the rest.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            middleware: Vec::new(),
            catalog: Arc::new(DefaultCatalog),
            resolver: Arc::new(SimplePasvAddressResolver::default()),
            tls: None,
            greeting: "FTP Server Ready".to_owned(),
        }
    }
}

struct SenderGate {
    parked: Semaphore,
    resume: Notify,
}

/// One accepted control connection.
pub struct Connection;

impl Connection {
    /// Drive `stream` as an FTP control connection until it closes.
    ///
    /// `shutdown` is the server-level signal; the connection derives its own
    /// cancellation token from it, so either side can end the session.
    pub async fn run<S>(
        stream: S,
        local: SocketAddr,
        remote: SocketAddr,
        authorizer: Arc<dyn Authorizer>,
        config: Arc<ConnectionConfig>,
        shutdown: &CancellationToken,
    ) where
        S: Transportable + 'static,
    {
        info!("connected from {remote}");

        let closed = shutdown.child_token();
        let halt = CancellationToken::new();
        let transport = Arc::new(SharedTransport::new(ControlStream::plain(stream)));
        let gate = Arc::new(SenderGate {
            parked: Semaphore::new(0),
            resume: Notify::new(),
        });

        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel::<Reply>();
        let (server_tx, server_rx) = mpsc::unbounded_channel::<ServerCommand>();
        let (status_tx, _) = broadcast::channel::<ServerStatus>(16);

        let session = Arc::new(Session::new(
            local,
            remote,
            DataChannel::new(local, remote, Arc::clone(&config.resolver)),
        ));
        session
            .features()
            .insert(LifetimeFeature::new(closed.clone()));
        session.features().insert(SecureControlFeature::new(
            server_tx.clone(),
            status_tx.clone(),
            config.tls.is_some(),
        ));
        session.features().insert(LocalizationFeature::new(
            Arc::clone(&config.catalog),
            "en",
        ));
        session
            .features()
            .insert(AuthorizerFeature::new(Arc::clone(&authorizer)));

        // Greeting goes out before the dispatcher starts.
        let _ = reply_tx.send(Reply::new(220, config.greeting.clone()));

        let framer = tokio::spawn(run_framer(
            Arc::clone(&transport),
            Arc::clone(&session),
            command_tx,
            closed.clone(),
            halt.clone(),
        ));

        let listener = tokio::spawn(run_server_command_listener(
            Arc::clone(&transport),
            config.tls.clone(),
            Arc::clone(&gate),
            server_rx,
            status_tx,
            closed.clone(),
            halt.clone(),
        ));

        let multiplexer = Multiplexer::new(
            Arc::clone(&config.registry),
            config.middleware.clone(),
            authorizer,
            Arc::clone(&session),
            closed.clone(),
        );
        let dispatcher =
            tokio::spawn(async move { multiplexer.run(command_rx, reply_tx, server_tx).await });

        let sender = tokio::spawn(run_response_sender(
            Arc::clone(&transport),
            Arc::clone(&session),
            Arc::clone(&gate),
            reply_rx,
            closed.clone(),
            halt.clone(),
        ));

        // Either transport loop finishing ends the connection: both cancel
        // the shared token on their way out, pulling the remaining loops
        // down. The transport drops only after every task has returned.
        for task in [framer, sender, listener, dispatcher] {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("connection task failed: {e}");
                }
            }
        }

        info!("connection from {remote} closed");
    }
}

async fn run_framer(
    transport: Arc<SharedTransport>,
    session: Arc<Session>,
    commands: mpsc::UnboundedSender<Command>,
    closed: CancellationToken,
    halt: CancellationToken,
) {
    let mut collector = CommandCollector::new();
    let mut buf = BytesMut::with_capacity(1024);

    let cancel = 'read: loop {
        let read = tokio::select! {
            () = closed.cancelled() => break true,
            // A fatal reply is still being flushed; the response sender
            // cancels the token once the stream is closed.
            () = halt.cancelled() => break false,
            read = transport.read_chunk(&mut buf) => read,
        };

        match read {
            Ok(0) => break true,
            Ok(_) => {
                let chunk = buf.split();
                for command in collector.collect(&chunk, session.encoding().get()) {
                    if commands.send(command).is_err() {
                        break 'read true;
                    }
                }
            }
            Err(e) => {
                debug!("control channel read failed: {e}");
                break true;
            }
        }
    };

    info!("no more commands will be received from {}", session.remote_addr());
    if cancel {
        closed.cancel();
    }
}

async fn run_response_sender(
    transport: Arc<SharedTransport>,
    session: Arc<Session>,
    gate: Arc<SenderGate>,
    mut replies: mpsc::UnboundedReceiver<Reply>,
    closed: CancellationToken,
    halt: CancellationToken,
) {
    loop {
        let reply = tokio::select! {
            () = closed.cancelled() => break,
            () = halt.cancelled() => {
                // A fatal reply is already queued; flush what is left, then
                // close the response stream.
                while let Ok(reply) = replies.try_recv() {
                    if write_reply(&transport, &session, &reply).await.is_err() {
                        break;
                    }
                }
                break;
            }
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
        };

        if let Err(e) = write_reply(&transport, &session, &reply).await {
            debug!("control channel write failed: {e}");
            break;
        }

        if reply.pauses_sender() {
            // Signal readiness to pause, then wait for the resume command.
            // The timeout keeps a lost resume from deadlocking the session.
            gate.parked.add_permits(1);
            let resumed =
                tokio::time::timeout(RESUME_TIMEOUT, gate.resume.notified()).await;
            if resumed.is_err() {
                debug!("response sender resumed after timeout");
            }
        }
    }

    info!("no more responses will be sent to {}", session.remote_addr());
    closed.cancel();
}

async fn write_reply(
    transport: &SharedTransport,
    session: &Session,
    reply: &Reply,
) -> std::io::Result<()> {
    let mut step = reply.next_line(None);
    loop {
        if let Some(text) = step.text() {
            debug!("{} <- {text}", session.remote_addr());
            let mut data = session.encoding().get().encode(text);
            data.extend_from_slice(b"\r\n");
            transport.write_all(&data).await?;
        }
        match step.token() {
            Some(token) => step = reply.next_line(Some(token)),
            None => return Ok(()),
        }
    }
}

async fn run_server_command_listener(
    transport: Arc<SharedTransport>,
    identity: Option<TlsIdentity>,
    gate: Arc<SenderGate>,
    mut commands: mpsc::UnboundedReceiver<ServerCommand>,
    status: broadcast::Sender<ServerStatus>,
    closed: CancellationToken,
    halt: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            () = closed.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            ServerCommand::Shutdown => {
                halt.cancel();
                break;
            }
            ServerCommand::ResumeResponseSender => gate.resume.notify_one(),
            ServerCommand::EnableTls => {
                if let Some(outcome) = enable_tls(&transport, identity.as_ref(), &gate, &closed).await
                {
                    let _ = status.send(outcome);
                }
            }
            ServerCommand::DisableTls => {
                if let Some(outcome) = disable_tls(&transport, &gate, &closed).await {
                    let _ = status.send(outcome);
                }
            }
        }
    }

    debug!("no more server commands will be processed");
}

/// Wait until the response sender has parked at its pause point.
async fn wait_for_parked_sender(gate: &SenderGate, closed: &CancellationToken) -> bool {
    tokio::select! {
        () = closed.cancelled() => false,
        permit = gate.parked.acquire() => match permit {
            Ok(permit) => {
                permit.forget();
                true
            }
            Err(_) => false,
        },
    }
}

async fn enable_tls(
    transport: &SharedTransport,
    identity: Option<&TlsIdentity>,
    gate: &SenderGate,
    closed: &CancellationToken,
) -> Option<ServerStatus> {
    let Some(identity) = identity else {
        return Some(ServerStatus::TlsEnableErrorNotConfigured);
    };

    if !wait_for_parked_sender(gate, closed).await {
        return None;
    }

    // Downgrade and handshake inside one swap window, so the framer cannot
    // slip in between and read the client's first handshake bytes.
    let acceptor = identity.acceptor();
    let handshake = transport
        .with_stream(move |stream| async move {
            let (stream, _) = tls::close(stream).await;
            tls::handshake(acceptor, stream).await
        })
        .await;
    match handshake {
        Ok(()) => Some(ServerStatus::TlsEnabled),
        Err(e) => {
            warn!("TLS connection couldn't be established: {e}");
            Some(ServerStatus::TlsEnableError)
        }
    }
}

async fn disable_tls(
    transport: &SharedTransport,
    gate: &SenderGate,
    closed: &CancellationToken,
) -> Option<ServerStatus> {
    if !wait_for_parked_sender(gate, closed).await {
        return None;
    }

    let was_secured = transport.with_stream(tls::close).await;
    Some(if was_secured {
        ServerStatus::TlsDisabled
    } else {
        ServerStatus::TlsWasDisabled
    })
}
