//! Login and authorization collaborator interface.
//!
//! The engine consumes an [`Authorizer`]: it asks for the current
//! [`SecurityStatus`] when gating login-required commands and forwards the
//! access verbs (`USER`, `PASS`, `ACCT`, `AUTH` negotiation aside) to it.
//! The state machine behind those answers is the embedder's business;
//! [`AnonymousAuthorizer`] is the bundled sample.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{command::Command, error::ProtocolError, fs::Filesystem, reply::Reply, state::Session};

/// Authorization progress of one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SecurityStatus {
    /// No user name seen yet.
    Unauthenticated,
    /// User accepted, password outstanding.
    NeedsPassword,
    /// Login completed.
    Authorized,
}

/// Login/authorization state machine consumed by the dispatch pipeline.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Current authorization status; consulted before every login-gated
    /// command.
    fn status(&self) -> SecurityStatus;

    /// Execute one access-control command (`USER`, `PASS`, `ACCT`).
    async fn handle(&self, session: &Session, command: &Command) -> Result<Reply, ProtocolError>;
}

/// Creates one [`Authorizer`] per accepted connection.
pub trait AuthorizerFactory: Send + Sync {
    /// Build the authorizer for a new connection.
    fn create(&self) -> Arc<dyn Authorizer>;
}

impl<F> AuthorizerFactory for F
where
    F: Fn() -> Arc<dyn Authorizer> + Send + Sync,
{
    fn create(&self) -> Arc<dyn Authorizer> { self() }
}

/// Capability giving handlers access to the connection's authorizer.
///
/// The access verbs (`USER`, `PASS`, `ACCT`) are forwarded through this
/// feature; the dispatch pipeline consults the same authorizer for login
/// gating.
pub struct AuthorizerFeature {
    authorizer: Arc<dyn Authorizer>,
}

impl AuthorizerFeature {
    /// Wrap the connection's authorizer.
    #[must_use]
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self { Self { authorizer } }

    /// The connection's authorizer.
    #[must_use]
    pub fn authorizer(&self) -> &Arc<dyn Authorizer> { &self.authorizer }
}

#[derive(Debug)]
struct LoginState {
    status: SecurityStatus,
    user: Option<String>,
}

/// Sample authorizer admitting the classic anonymous accounts.
///
/// `anonymous` and `ftp` are accepted with any password; the password is
/// treated as a contact address and ignored. On success the configured
/// filesystem is attached to the session.
pub struct AnonymousAuthorizer {
    filesystem: Arc<dyn Filesystem>,
    state: Mutex<LoginState>,
}

impl AnonymousAuthorizer {
    /// Create an authorizer that attaches `filesystem` after login.
    #[must_use]
    pub fn new(filesystem: Arc<dyn Filesystem>) -> Self {
        Self {
            filesystem,
            state: Mutex::new(LoginState {
                status: SecurityStatus::Unauthenticated,
                user: None,
            }),
        }
    }

    fn is_anonymous(user: &str) -> bool {
        user.eq_ignore_ascii_case("anonymous") || user.eq_ignore_ascii_case("ftp")
    }
}

#[async_trait]
impl Authorizer for AnonymousAuthorizer {
    fn status(&self) -> SecurityStatus {
        self.state.lock().expect("login state lock poisoned").status
    }

    async fn handle(&self, session: &Session, command: &Command) -> Result<Reply, ProtocolError> {
        let mut state = self.state.lock().expect("login state lock poisoned");
        if command.is("USER") {
            let user = command.argument().trim();
            if user.is_empty() {
                return Ok(Reply::new(501, "Syntax error in parameters or arguments."));
            }
            if !Self::is_anonymous(user) {
                state.status = SecurityStatus::Unauthenticated;
                state.user = None;
                return Ok(Reply::new(530, "Not logged in."));
            }
            // A fresh USER restarts the login, even when already authorized.
            state.user = Some(user.to_owned());
            state.status = SecurityStatus::NeedsPassword;
            return Ok(Reply::new(331, format!("User {user} logged in, needs password.")));
        }

        if command.is("PASS") {
            if state.status != SecurityStatus::NeedsPassword {
                return Ok(Reply::new(503, "Bad sequence of commands."));
            }
            state.status = SecurityStatus::Authorized;
            session.attach_filesystem(Arc::clone(&self.filesystem));
            return Ok(Reply::new(230, "Password ok, FTP server ready."));
        }

        if command.is("ACCT") {
            return Ok(Reply::new(503, "Bad sequence of commands."));
        }

        Ok(Reply::new(421, "Service not available."))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AnonymousAuthorizer, Authorizer, SecurityStatus};
    use crate::{command::Command, fs::MemoryFilesystem, state::Session};

    fn session() -> Session { Session::for_tests() }

    #[tokio::test]
    async fn anonymous_login_flow() {
        let auth = AnonymousAuthorizer::new(Arc::new(MemoryFilesystem::new()));
        let session = session();
        assert_eq!(auth.status(), SecurityStatus::Unauthenticated);

        let user = auth
            .handle(&session, &Command::new("USER", "anonymous"))
            .await
            .expect("USER is handled");
        assert_eq!(user.code(), 331);
        assert_eq!(auth.status(), SecurityStatus::NeedsPassword);

        let pass = auth
            .handle(&session, &Command::new("PASS", "-"))
            .await
            .expect("PASS is handled");
        assert_eq!(pass.code(), 230);
        assert_eq!(auth.status(), SecurityStatus::Authorized);
        assert!(session.filesystem().is_some());
    }

    #[tokio::test]
    async fn named_accounts_are_rejected() {
        let auth = AnonymousAuthorizer::new(Arc::new(MemoryFilesystem::new()));
        let session = session();
        let reply = auth
            .handle(&session, &Command::new("USER", "root"))
            .await
            .expect("USER is handled");
        assert_eq!(reply.code(), 530);
        assert_eq!(auth.status(), SecurityStatus::Unauthenticated);
    }

    #[tokio::test]
    async fn password_without_user_is_a_sequence_error() {
        let auth = AnonymousAuthorizer::new(Arc::new(MemoryFilesystem::new()));
        let reply = auth
            .handle(&session(), &Command::new("PASS", "-"))
            .await
            .expect("PASS is handled");
        assert_eq!(reply.code(), 503);
    }
}
