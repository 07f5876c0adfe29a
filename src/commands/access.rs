//! Access-control and housekeeping verbs.

use async_trait::async_trait;

use crate::{
    auth::AuthorizerFeature,
    control::ServerCommand,
    error::ProtocolError,
    handler::{CommandContext, CommandHandler},
    reply::Reply,
};

/// `USER`, `PASS` and `ACCT`, forwarded to the connection's authorizer.
pub struct LoginHandler;

#[async_trait]
impl CommandHandler for LoginHandler {
    fn names(&self) -> &'static [&'static str] { &["USER", "PASS", "ACCT"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let feature = context.session().features().require::<AuthorizerFeature>();
        let reply = feature
            .authorizer()
            .handle(context.session(), context.command())
            .await?;
        Ok(Some(reply))
    }
}

/// `QUIT`: say goodbye, then ask the connection to shut down.
pub struct QuitHandler;

#[async_trait]
impl CommandHandler for QuitHandler {
    fn names(&self) -> &'static [&'static str] { &["QUIT", "LOGOUT"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        // Queue the farewell before the shutdown request so the sender
        // flushes it on its way out.
        context.send(Reply::new(221, context.text("Service closing control connection.")));
        context.request(ServerCommand::Shutdown);
        Ok(None)
    }
}

/// `NOOP`.
pub struct NoopHandler;

#[async_trait]
impl CommandHandler for NoopHandler {
    fn names(&self) -> &'static [&'static str] { &["NOOP"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        Ok(Some(Reply::new(200, context.text("NOOP command successful."))))
    }
}

/// `SYST`.
pub struct SystHandler;

#[async_trait]
impl CommandHandler for SystHandler {
    fn names(&self) -> &'static [&'static str] { &["SYST"] }

    async fn handle(&self, _context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        Ok(Some(Reply::new(215, "UNIX Type: L8")))
    }
}
