//! Working-directory verbs.

use async_trait::async_trait;

use crate::{
    error::ProtocolError,
    fs::FsError,
    handler::{CommandContext, CommandHandler},
    reply::Reply,
};

/// `PWD`/`XPWD`.
pub struct PwdHandler;

#[async_trait]
impl CommandHandler for PwdHandler {
    fn names(&self) -> &'static [&'static str] { &["PWD", "XPWD"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.session().working_dir_display();
        Ok(Some(Reply::new(257, format!("\"{path}\""))))
    }
}

/// `CWD`/`XCWD`.
pub struct CwdHandler;

#[async_trait]
impl CommandHandler for CwdHandler {
    fn names(&self) -> &'static [&'static str] { &["CWD", "XCWD"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        let filesystem = context.filesystem()?;
        let metadata = filesystem.metadata(&path).await?;
        if !metadata.is_dir {
            return Err(FsError::not_a_directory(&metadata.name).into());
        }

        context.session().set_working_dir(
            path.split('/')
                .filter(|part| !part.is_empty())
                .map(str::to_owned)
                .collect(),
        );
        Ok(Some(Reply::new(250, format!("Successful (\"{path}\")."))))
    }
}

/// `CDUP`/`XCUP`.
pub struct CdupHandler;

#[async_trait]
impl CommandHandler for CdupHandler {
    fn names(&self) -> &'static [&'static str] { &["CDUP", "XCUP"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let mut stack = context.session().working_dir();
        stack.pop();
        context.session().set_working_dir(stack);
        Ok(Some(Reply::new(200, context.text("Command okay."))))
    }
}
