//! Command handler contracts and the per-connection handler table.
//!
//! Handlers implement [`CommandHandler`]; a handler that declares itself
//! extensible carries [`CommandExtension`]s dispatched on the argument's
//! leading token (`OPTS UTF8 …`, `SITE UTIME …`). Registration happens once
//! at startup into a [`HandlerRegistry`] shared by every connection.

use std::{borrow::Cow, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    catalog::LocalizationFeature,
    command::Command,
    control::ServerCommand,
    error::ProtocolError,
    fs::{self, Filesystem},
    reply::Reply,
    state::Session,
};

/// Everything a handler needs to process one command.
///
/// Cheap to clone; background commands take their own copy.
#[derive(Clone)]
pub struct CommandContext {
    command: Command,
    session: Arc<Session>,
    replies: mpsc::UnboundedSender<Reply>,
    server_commands: mpsc::UnboundedSender<ServerCommand>,
}

impl CommandContext {
    /// Bundle a command with its session and outgoing writers.
    #[must_use]
    pub fn new(
        command: Command,
        session: Arc<Session>,
        replies: mpsc::UnboundedSender<Reply>,
        server_commands: mpsc::UnboundedSender<ServerCommand>,
    ) -> Self {
        Self {
            command,
            session,
            replies,
            server_commands,
        }
    }

    /// The command being processed.
    #[must_use]
    pub fn command(&self) -> &Command { &self.command }

    /// The connection's session state.
    #[must_use]
    pub fn session(&self) -> &Arc<Session> { &self.session }

    /// Queue an additional reply ahead of the handler's return value.
    ///
    /// Send failures only happen while the connection shuts down and are
    /// deliberately ignored.
    pub fn send(&self, reply: Reply) { let _ = self.replies.send(reply); }

    /// Post an internal server command.
    pub fn request(&self, command: ServerCommand) { let _ = self.server_commands.send(command); }

    /// Translate a message through the session's catalog.
    #[must_use]
    pub fn text(&self, message: &str) -> String {
        match self.session.features().get::<LocalizationFeature>() {
            Some(localization) => localization.catalog().text(message).into_owned(),
            None => message.to_owned(),
        }
    }

    /// The filesystem attached to this session.
    ///
    /// # Errors
    ///
    /// A fault when no filesystem is attached; login-gated handlers only run
    /// authorized, so this indicates a wiring bug rather than a user error.
    pub fn filesystem(&self) -> Result<Arc<dyn Filesystem>, ProtocolError> {
        self.session
            .filesystem()
            .ok_or_else(|| ProtocolError::Fault("no filesystem attached to the session".to_owned()))
    }

    /// Resolve a path argument against the session's working directory.
    #[must_use]
    pub fn resolve_path(&self, argument: &str) -> String {
        fs::resolve_path(&self.session.working_dir(), argument)
    }

    pub(crate) fn with_command(&self, command: Command) -> Self {
        let mut context = self.clone();
        context.command = command;
        context
    }

    pub(crate) fn replies(&self) -> &mpsc::UnboundedSender<Reply> { &self.replies }

    pub(crate) fn server_commands(&self) -> &mpsc::UnboundedSender<ServerCommand> {
        &self.server_commands
    }
}

/// A registered command handler.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Verb names this handler answers to.
    fn names(&self) -> &'static [&'static str];

    /// Whether the command requires a completed login.
    fn login_required(&self) -> bool { true }

    /// Whether the command may run in the background and be interrupted by
    /// connection closure.
    fn is_abortable(&self) -> bool { false }

    /// Sub-extensions dispatched on the argument's leading token.
    fn extensions(&self) -> Vec<Arc<dyn CommandExtension>> { Vec::new() }

    /// Process the command.
    ///
    /// Returning `Ok(None)` means the handler queued its replies itself.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`]; the dispatch boundary translates it into a
    /// reply.
    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError>;
}

/// An extension hanging off an extensible handler.
#[async_trait]
pub trait CommandExtension: Send + Sync {
    /// Sub-verb names this extension answers to.
    fn names(&self) -> &'static [&'static str];

    /// Overrides the host handler's login requirement when set.
    fn login_required(&self) -> Option<bool> { None }

    /// Process the nested command; the context's command is the re-parsed
    /// remainder of the host command's argument.
    ///
    /// # Errors
    ///
    /// Any [`ProtocolError`]; the dispatch boundary translates it into a
    /// reply.
    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError>;
}

struct HandlerEntry {
    handler: Arc<dyn CommandHandler>,
    extensions: HashMap<String, Arc<dyn CommandExtension>>,
}

/// The result of resolving a command against the registry.
pub struct Resolved {
    target: ResolvedTarget,
    command: Command,
    login_required: bool,
    abortable: bool,
}

enum ResolvedTarget {
    Handler(Arc<dyn CommandHandler>),
    Extension(Arc<dyn CommandExtension>),
}

impl Resolved {
    /// The command to hand to the target; for extensions this is the
    /// re-parsed remainder of the host command.
    #[must_use]
    pub fn command(&self) -> &Command { &self.command }

    /// Effective login requirement, with the extension's override applied.
    #[must_use]
    pub fn login_required(&self) -> bool { self.login_required }

    /// Whether the target may run as a background command.
    #[must_use]
    pub fn abortable(&self) -> bool { self.abortable }

    /// Run the resolved target.
    ///
    /// # Errors
    ///
    /// Whatever the target raises.
    pub async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        match &self.target {
            ResolvedTarget::Handler(handler) => handler.handle(context).await,
            ResolvedTarget::Extension(extension) => extension.handle(context).await,
        }
    }

    pub(crate) fn into_target_and_command(self) -> (ResolvedHandle, Command) {
        let handle = match self.target {
            ResolvedTarget::Handler(handler) => ResolvedHandle::Handler(handler),
            ResolvedTarget::Extension(extension) => ResolvedHandle::Extension(extension),
        };
        (handle, self.command)
    }
}

/// Owned resolved target, used to move a background command into its task.
pub(crate) enum ResolvedHandle {
    Handler(Arc<dyn CommandHandler>),
    Extension(Arc<dyn CommandExtension>),
}

impl ResolvedHandle {
    pub(crate) async fn handle(
        &self,
        context: CommandContext,
    ) -> Result<Option<Reply>, ProtocolError> {
        match self {
            Self::Handler(handler) => handler.handle(context).await,
            Self::Extension(extension) => extension.handle(context).await,
        }
    }
}

/// Verb-to-handler table built once at startup and shared by every
/// connection.
///
/// Lookups ignore ASCII case; registering a handler under an already-taken
/// name replaces the earlier registration.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: HashMap<String, Arc<HandlerEntry>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `handler` under each of its names.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        let extensions: HashMap<String, Arc<dyn CommandExtension>> = handler
            .extensions()
            .into_iter()
            .flat_map(|extension| {
                extension
                    .names()
                    .iter()
                    .map(|name| (name.to_ascii_uppercase(), Arc::clone(&extension)))
                    .collect::<Vec<_>>()
            })
            .collect();

        let entry = Arc::new(HandlerEntry {
            handler,
            extensions,
        });
        for name in entry.handler.names() {
            self.entries.insert(name.to_ascii_uppercase(), Arc::clone(&entry));
        }
    }

    /// Registered verb names, sorted; used by `FEAT`-style listings.
    #[must_use]
    pub fn verbs(&self) -> Vec<Cow<'static, str>> {
        let mut names: Vec<Cow<'static, str>> =
            self.entries.keys().cloned().map(Cow::Owned).collect();
        names.sort();
        names
    }

    /// Resolve a command to its handler or sub-extension.
    ///
    /// Resolution is a pure function of the verb and the argument's leading
    /// token: when the verb's handler is extensible and the token names a
    /// registered extension, the remainder is re-parsed as a nested command
    /// and dispatched to the extension instead.
    #[must_use]
    pub fn resolve(&self, command: &Command) -> Option<Resolved> {
        let entry = self.entries.get(&command.verb().to_ascii_uppercase())?;

        if !command.argument().trim().is_empty() && !entry.extensions.is_empty() {
            if let Some(nested) = Command::parse(command.argument()) {
                if let Some(extension) = entry.extensions.get(&nested.verb().to_ascii_uppercase()) {
                    return Some(Resolved {
                        login_required: extension
                            .login_required()
                            .unwrap_or_else(|| entry.handler.login_required()),
                        abortable: false,
                        target: ResolvedTarget::Extension(Arc::clone(extension)),
                        command: nested,
                    });
                }
            }
        }

        Some(Resolved {
            login_required: entry.handler.login_required(),
            abortable: entry.handler.is_abortable(),
            target: ResolvedTarget::Handler(Arc::clone(&entry.handler)),
            command: command.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{CommandContext, CommandExtension, CommandHandler, HandlerRegistry};
    use crate::{command::Command, error::ProtocolError, reply::Reply, state::Session};

    struct Plain(u16);

    #[async_trait]
    impl CommandHandler for Plain {
        fn names(&self) -> &'static [&'static str] { &["NOOP"] }

        fn login_required(&self) -> bool { false }

        async fn handle(&self, _context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
            Ok(Some(Reply::new(self.0, "ok")))
        }
    }

    struct Utf8Extension;

    #[async_trait]
    impl CommandExtension for Utf8Extension {
        fn names(&self) -> &'static [&'static str] { &["UTF8", "UTF-8"] }

        fn login_required(&self) -> Option<bool> { Some(false) }

        async fn handle(&self, _context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
            Ok(Some(Reply::new(200, "extension")))
        }
    }

    struct Opts;

    #[async_trait]
    impl CommandHandler for Opts {
        fn names(&self) -> &'static [&'static str] { &["OPTS"] }

        fn extensions(&self) -> Vec<Arc<dyn CommandExtension>> { vec![Arc::new(Utf8Extension)] }

        async fn handle(&self, _context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
            Ok(Some(Reply::new(501, "unknown option")))
        }
    }

    fn context(command: Command) -> (CommandContext, ContextChannels) {
        let (replies, reply_rx) = mpsc::unbounded_channel();
        let (server, server_rx) = mpsc::unbounded_channel();
        let context = CommandContext::new(command, Arc::new(Session::for_tests()), replies, server);
        (context, (reply_rx, server_rx))
    }

    type ContextChannels = (
        mpsc::UnboundedReceiver<Reply>,
        mpsc::UnboundedReceiver<crate::control::ServerCommand>,
    );

    #[tokio::test]
    async fn lookup_is_case_insensitive_and_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Plain(200)));
        registry.register(Arc::new(Plain(250)));

        let resolved = registry
            .resolve(&Command::new("noop", ""))
            .expect("NOOP is registered");
        assert!(!resolved.login_required());

        let (context, _channels) = context(Command::new("noop", ""));
        let reply = resolved
            .handle(context)
            .await
            .expect("handler succeeds")
            .expect("handler replies");
        assert_eq!(reply.code(), 250);
    }

    #[test]
    fn extension_token_redirects_resolution() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Opts));

        let resolved = registry
            .resolve(&Command::new("OPTS", "utf8 ON"))
            .expect("OPTS is registered");
        assert_eq!(resolved.command().verb(), "utf8");
        assert_eq!(resolved.command().argument(), "ON");
        // The extension overrides the host's login requirement.
        assert!(!resolved.login_required());
    }

    #[test]
    fn unknown_extension_token_falls_back_to_the_host() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Opts));

        let resolved = registry
            .resolve(&Command::new("OPTS", "MODE Z"))
            .expect("OPTS is registered");
        assert_eq!(resolved.command().verb(), "OPTS");
        assert!(resolved.login_required());
    }

    #[test]
    fn unknown_verb_does_not_resolve() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve(&Command::new("FOO", "")).is_none());
    }
}
