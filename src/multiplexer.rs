//! The command dispatch pipeline.
//!
//! One [`Multiplexer`] drives one connection: it drains the command queue in
//! order, pushes each command through the middleware chain into the terminal
//! dispatch step, and enforces the pipeline invariants: login gating,
//! extension sub-dispatch, the single background slot and the translation of
//! every handler fault into a reply. Nothing a handler does ever escapes to
//! the connection's reader or writer loops.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use log::{error, info, trace};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    auth::{Authorizer, SecurityStatus},
    command::Command,
    control::ServerCommand,
    error::ProtocolError,
    handler::{CommandContext, HandlerRegistry, Resolved},
    middleware::{Middleware, Next, Terminal},
    reply::Reply,
    state::Session,
};

enum BackgroundOutcome {
    Finished(Result<Option<Reply>, ProtocolError>),
    Cancelled,
}

type BackgroundSlot = (oneshot::Receiver<BackgroundOutcome>, String);

#[derive(Default)]
struct BackgroundState {
    occupied: bool,
    handoff: Option<BackgroundSlot>,
}

/// Dispatch pipeline for a single connection.
///
/// Non-background commands run to completion before the next queued command
/// is dispatched, so their replies leave in arrival order. A background
/// command's reply is appended whenever it completes; replies of in-order
/// commands finishing earlier are not held back for it.
pub struct Multiplexer {
    registry: Arc<HandlerRegistry>,
    middleware: Arc<[Arc<dyn Middleware>]>,
    authorizer: Arc<dyn Authorizer>,
    session: Arc<Session>,
    background: Mutex<BackgroundState>,
    halted: AtomicBool,
    shutdown: CancellationToken,
}

impl Multiplexer {
    /// Assemble the pipeline for one connection.
    #[must_use]
    pub fn new(
        registry: Arc<HandlerRegistry>,
        middleware: Vec<Arc<dyn Middleware>>,
        authorizer: Arc<dyn Authorizer>,
        session: Arc<Session>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            middleware: middleware.into(),
            authorizer,
            session,
            background: Mutex::new(BackgroundState::default()),
            halted: AtomicBool::new(false),
            shutdown,
        }
    }

    /// Drain `commands` until the queue closes, the connection is cancelled
    /// or a fatal reply halts the pipeline.
    ///
    /// The completion of an in-flight background command is observed
    /// alongside new commands; its reply (or the generic 500 on
    /// cancellation) is appended to `replies` at that point.
    pub async fn run(
        &self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        replies: mpsc::UnboundedSender<Reply>,
        server_commands: mpsc::UnboundedSender<ServerCommand>,
    ) {
        let mut active: Option<BackgroundSlot> = None;

        loop {
            let background_running = active.is_some();
            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,

                outcome = poll_background(&mut active), if background_running => {
                    let (_, command) = active.take().expect("a background slot was active");
                    self.background.lock().expect("background slot lock poisoned").occupied = false;
                    let reply = match outcome {
                        Ok(BackgroundOutcome::Finished(Ok(reply))) => reply,
                        Ok(BackgroundOutcome::Finished(Err(e))) => {
                            Some(self.translate(&command, &e))
                        }
                        Ok(BackgroundOutcome::Cancelled) | Err(_) => Some(Reply::new(
                            500,
                            "Syntax error, command unrecognized.",
                        )),
                    };
                    if let Some(reply) = reply {
                        self.queue_reply(&replies, &server_commands, reply);
                    }
                }

                command = commands.recv() => {
                    let Some(command) = command else { break };
                    let context = CommandContext::new(
                        command,
                        Arc::clone(&self.session),
                        replies.clone(),
                        server_commands.clone(),
                    );
                    Next::new(&self.middleware, self).run(context).await;

                    if active.is_none() {
                        active = self
                            .background
                            .lock()
                            .expect("background slot lock poisoned")
                            .handoff
                            .take();
                    }
                }
            }

            if self.halted.load(Ordering::Relaxed) {
                break;
            }
        }
    }

    fn queue_reply(
        &self,
        replies: &mpsc::UnboundedSender<Reply>,
        server_commands: &mpsc::UnboundedSender<ServerCommand>,
        reply: Reply,
    ) {
        let code = reply.code();
        let _ = replies.send(reply);
        // 421 is fatal: request the shutdown and dispatch nothing further.
        // The response sender flushes the queued reply before it stops.
        if code == 421 {
            let _ = server_commands.send(ServerCommand::Shutdown);
            self.halted.store(true, Ordering::Relaxed);
        }
    }

    fn start_background(&self, resolved: Resolved, context: CommandContext) {
        let mut state = self.background.lock().expect("background slot lock poisoned");
        if state.occupied {
            drop(state);
            self.queue_reply(
                context.replies(),
                &server_commands_of(&context),
                Reply::new(503, context.text("Parallel commands aren't allowed.")),
            );
            return;
        }
        state.occupied = true;

        let (done_tx, done_rx) = oneshot::channel();
        let label = context.command().to_string();
        state.handoff = Some((done_rx, label));
        drop(state);

        let token = self.shutdown.clone();
        let (target, command) = resolved.into_target_and_command();
        let background_context = context.with_command(command);
        tokio::spawn(async move {
            let outcome = tokio::select! {
                () = token.cancelled() => BackgroundOutcome::Cancelled,
                result = target.handle(background_context) => BackgroundOutcome::Finished(result),
            };
            let _ = done_tx.send(outcome);
        });
    }

    fn translate(&self, command: &str, error: &ProtocolError) -> Reply {
        match error {
            ProtocolError::DataChannel(e) => {
                info!("opening data connection ({command}) failed: {e}");
                Reply::new(425, format!("Can't open data connection: {e}."))
            }
            ProtocolError::FileSystem(e) => {
                info!("rejected command ({command}) with error {e}");
                let message = if e.message().is_empty() {
                    e.name().to_owned()
                } else {
                    format!("{}: {}", e.name(), e.message())
                };
                Reply::new(e.code(), message)
            }
            ProtocolError::Unsupported(what) => {
                info!("unsupported operation ({command}): {what}");
                Reply::new(502, format!("Command {what} not supported."))
            }
            ProtocolError::Fault(what) => {
                error!("failed to process command ({command}): {what}");
                Reply::new(501, "Syntax error in parameters or arguments.")
            }
        }
    }
}

fn server_commands_of(context: &CommandContext) -> mpsc::UnboundedSender<ServerCommand> {
    context.server_commands().clone()
}

/// Await the active background command, or park forever when none runs.
///
/// The caller gates this behind its own `is_some` check, so the pending
/// branch is never actually reached.
async fn poll_background(
    active: &mut Option<BackgroundSlot>,
) -> Result<BackgroundOutcome, oneshot::error::RecvError> {
    match active.as_mut() {
        Some((done, _)) => done.await,
        None => std::future::pending().await,
    }
}

#[async_trait]
impl Terminal for Multiplexer {
    async fn dispatch(&self, context: CommandContext) {
        trace!("dispatching {}", context.command());

        let Some(resolved) = self.registry.resolve(context.command()) else {
            self.queue_reply(
                context.replies(),
                &server_commands_of(&context),
                Reply::new(500, context.text("Syntax error, command unrecognized.")),
            );
            return;
        };

        if resolved.login_required() && self.authorizer.status() != SecurityStatus::Authorized {
            self.queue_reply(
                context.replies(),
                &server_commands_of(&context),
                Reply::new(530, context.text("Not logged in.")),
            );
            return;
        }

        if resolved.abortable() {
            self.start_background(resolved, context);
            return;
        }

        let command = context.command().to_string();
        let context_command = resolved.command().clone();
        let outcome = resolved.handle(context.with_command(context_command)).await;
        let reply = match outcome {
            Ok(reply) => reply,
            Err(e) => Some(self.translate(&command, &e)),
        };
        if let Some(reply) = reply {
            self.queue_reply(context.replies(), &server_commands_of(&context), reply);
        }
    }
}
