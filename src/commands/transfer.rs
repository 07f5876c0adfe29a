//! Transfer verbs and the transfers themselves.
//!
//! `RETR`, `STOR`, `APPE` and `LIST`/`NLST` are abortable: the pipeline runs
//! them in its single background slot, so the control channel keeps
//! answering while data moves. Each of them opens the data connection
//! through the session's channel state machine and resets it afterwards,
//! success or not.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::Duration;

use crate::{
    error::ProtocolError,
    fs::{Metadata, WriteMode},
    handler::{CommandContext, CommandHandler},
    reply::Reply,
    state::TransferType,
};

/// Bounded wait for data-connection establishment.
const DATA_TIMEOUT: Duration = Duration::from_secs(10);

/// `TYPE`.
pub struct TypeHandler;

#[async_trait]
impl CommandHandler for TypeHandler {
    fn names(&self) -> &'static [&'static str] { &["TYPE"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let argument = context.command().argument().trim().to_ascii_uppercase();
        let transfer_type = match argument.as_str() {
            "A" | "A N" => TransferType::Ascii,
            "I" | "L 8" => TransferType::Image,
            _ => {
                return Ok(Some(Reply::new(
                    504,
                    format!("Mode {argument} not supported."),
                )));
            }
        };
        context.session().set_transfer_type(transfer_type);
        let name = match transfer_type {
            TransferType::Ascii => "ASCII",
            TransferType::Image => "Binary",
        };
        Ok(Some(Reply::new(200, format!("{name} transfer mode active."))))
    }
}

/// `REST` (STREAM mode restart marker).
pub struct RestHandler;

#[async_trait]
impl CommandHandler for RestHandler {
    fn names(&self) -> &'static [&'static str] { &["REST"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let offset: u64 = context
            .command()
            .argument()
            .trim()
            .parse()
            .map_err(|_| ProtocolError::Fault("REST offset is not a number".to_owned()))?;
        context.session().set_restart_offset(offset);
        Ok(Some(Reply::new(
            350,
            format!("Restarting next transfer from position {offset}."),
        )))
    }
}

async fn open_data_connection(context: &CommandContext) -> Result<TcpStream, ProtocolError> {
    let mut data = context.session().data().lock().await;
    match data.open(DATA_TIMEOUT).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            data.reset();
            Err(e.into())
        }
    }
}

async fn reset_data_connection(context: &CommandContext) {
    context.session().data().lock().await.reset();
}

/// `RETR`: stream a file to the client.
pub struct RetrHandler;

#[async_trait]
impl CommandHandler for RetrHandler {
    fn names(&self) -> &'static [&'static str] { &["RETR"] }

    fn is_abortable(&self) -> bool { true }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let path = context.resolve_path(context.command().argument());
        let offset = context.session().take_restart_offset().unwrap_or(0);
        let mut reader = context.filesystem()?.open_read(&path, offset).await?;

        context.send(Reply::new(150, context.text("Opening connection for data transfer.")));
        let mut stream = open_data_connection(&context).await?;

        let copied = tokio::io::copy(&mut reader, &mut stream).await;
        let _ = stream.shutdown().await;
        reset_data_connection(&context).await;

        match copied {
            Ok(_) => Ok(Some(Reply::new(226, context.text("File downloaded successfully.")))),
            Err(_) => Ok(Some(Reply::new(
                426,
                context.text("Connection closed; transfer aborted."),
            ))),
        }
    }
}

async fn store(context: &CommandContext, mode: WriteMode) -> Result<Option<Reply>, ProtocolError> {
    let path = context.resolve_path(context.command().argument());
    let mut sink = context.filesystem()?.open_write(&path, mode).await?;

    context.send(Reply::new(150, context.text("Opening connection for data transfer.")));
    let mut stream = open_data_connection(context).await?;

    let copied = tokio::io::copy(&mut stream, &mut sink).await;
    reset_data_connection(context).await;

    match copied {
        Ok(_) => {
            sink.shutdown()
                .await
                .map_err(|e| ProtocolError::Fault(format!("failed to persist upload: {e}")))?;
            Ok(Some(Reply::new(226, context.text("Uploaded file successfully."))))
        }
        Err(_) => Ok(Some(Reply::new(
            426,
            context.text("Connection closed; transfer aborted."),
        ))),
    }
}

/// `STOR`: receive a file from the client.
pub struct StorHandler;

#[async_trait]
impl CommandHandler for StorHandler {
    fn names(&self) -> &'static [&'static str] { &["STOR"] }

    fn is_abortable(&self) -> bool { true }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let mode = match context.session().take_restart_offset() {
            Some(offset) => WriteMode::Resume(offset),
            None => WriteMode::Create,
        };
        store(&context, mode).await
    }
}

/// `APPE`: append to a file.
pub struct AppeHandler;

#[async_trait]
impl CommandHandler for AppeHandler {
    fn names(&self) -> &'static [&'static str] { &["APPE"] }

    fn is_abortable(&self) -> bool { true }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        store(&context, WriteMode::Append).await
    }
}

fn permissions(entry: &Metadata) -> &'static str {
    if entry.is_dir { "drwxr-xr-x" } else { "-rw-r--r--" }
}

fn long_listing_line(entry: &Metadata) -> String {
    let modified: DateTime<Utc> = entry.modified.unwrap_or(std::time::UNIX_EPOCH).into();
    format!(
        "{} 1 ftp ftp {:>12} {} {}",
        permissions(entry),
        entry.size,
        modified.format("%b %e %H:%M"),
        entry.name,
    )
}

/// `LIST` and `NLST`: directory listings over the data channel.
pub struct ListHandler;

#[async_trait]
impl CommandHandler for ListHandler {
    fn names(&self) -> &'static [&'static str] { &["LIST", "NLST"] }

    fn is_abortable(&self) -> bool { true }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        // Tolerate `ls`-style flags some clients insist on sending.
        let argument = context
            .command()
            .argument()
            .split_whitespace()
            .find(|part| !part.starts_with('-'))
            .unwrap_or("");
        let path = context.resolve_path(argument);
        let entries = context.filesystem()?.list(&path).await?;

        context.send(Reply::new(150, context.text("Opening data connection.")));
        let mut stream = open_data_connection(&context).await?;

        let names_only = context.command().is("NLST");
        let mut listing = String::new();
        for entry in &entries {
            if names_only {
                listing.push_str(&entry.name);
            } else {
                listing.push_str(&long_listing_line(entry));
            }
            listing.push_str("\r\n");
        }

        let written = stream.write_all(listing.as_bytes()).await;
        let _ = stream.shutdown().await;
        reset_data_connection(&context).await;

        match written {
            Ok(()) => Ok(Some(Reply::new(226, context.text("Closing data connection.")))),
            Err(_) => Ok(Some(Reply::new(
                426,
                context.text("Connection closed; transfer aborted."),
            ))),
        }
    }
}

/// `ABOR`.
///
/// A background transfer is interrupted only by connection closure; with
/// nothing in flight the abort is simply acknowledged.
pub struct AborHandler;

#[async_trait]
impl CommandHandler for AborHandler {
    fn names(&self) -> &'static [&'static str] { &["ABOR"] }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        Ok(Some(Reply::new(226, context.text("ABOR command successful."))))
    }
}
