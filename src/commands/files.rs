//! File and directory management verbs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::ProtocolError,
    handler::{CommandContext, CommandHandler},
    reply::Reply,
};

/// `MKD`.
pub struct MkdHandler;

#[async_trait]
impl CommandHandler for MkdHandler {
    fn names(&self) -> &'static [&'static str] { &["MKD", "XMKD"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        context.filesystem()?.create_dir(&path).await?;
        Ok(Some(Reply::new(257, format!("\"{path}\" created."))))
    }
}

/// `RMD`.
pub struct RmdHandler;

#[async_trait]
impl CommandHandler for RmdHandler {
    fn names(&self) -> &'static [&'static str] { &["RMD", "XRMD"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        context.filesystem()?.remove_dir(&path).await?;
        Ok(Some(Reply::new(250, context.text("Directory removed."))))
    }
}

/// `DELE`.
pub struct DeleHandler;

#[async_trait]
impl CommandHandler for DeleHandler {
    fn names(&self) -> &'static [&'static str] { &["DELE"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        context.filesystem()?.remove_file(&path).await?;
        Ok(Some(Reply::new(250, context.text("File deleted."))))
    }
}

/// `RNFR`: record the rename source for the following `RNTO`.
pub struct RenameFromHandler;

#[async_trait]
impl CommandHandler for RenameFromHandler {
    fn names(&self) -> &'static [&'static str] { &["RNFR"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        // The source must exist before the rename is started.
        context.filesystem()?.metadata(&path).await?;
        context.session().set_rename_source(path);
        Ok(Some(Reply::new(350, context.text("Rename started."))))
    }
}

/// `RNTO`: complete a rename started by `RNFR`.
pub struct RenameToHandler;

#[async_trait]
impl CommandHandler for RenameToHandler {
    fn names(&self) -> &'static [&'static str] { &["RNTO"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let Some(source) = context.session().take_rename_source() else {
            return Ok(Some(Reply::new(503, context.text("RNFR must be sent first."))));
        };
        let target = context.resolve_path(context.command().argument());
        context.filesystem()?.rename(&source, &target).await?;
        Ok(Some(Reply::new(250, context.text("Renamed file successfully."))))
    }
}

/// `SIZE`.
pub struct SizeHandler;

#[async_trait]
impl CommandHandler for SizeHandler {
    fn names(&self) -> &'static [&'static str] { &["SIZE"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        let metadata = context.filesystem()?.metadata(&path).await?;
        if metadata.is_dir {
            return Ok(Some(Reply::new(550, context.text("Entry is a directory."))));
        }
        Ok(Some(Reply::new(213, metadata.size.to_string())))
    }
}

/// `MDTM`.
pub struct MdtmHandler;

#[async_trait]
impl CommandHandler for MdtmHandler {
    fn names(&self) -> &'static [&'static str] { &["MDTM"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        let metadata = context.filesystem()?.metadata(&path).await?;
        let Some(modified) = metadata.modified else {
            return Ok(Some(Reply::new(
                550,
                context.text("No modification time available."),
            )));
        };
        let timestamp: DateTime<Utc> = modified.into();
        Ok(Some(Reply::new(213, timestamp.format("%Y%m%d%H%M%S").to_string())))
    }
}
