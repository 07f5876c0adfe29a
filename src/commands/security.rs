//! Control-channel security verbs.

use async_trait::async_trait;
use log::warn;

use crate::{
    control::{SecureControlFeature, ServerCommand, ServerStatus},
    error::ProtocolError,
    handler::{CommandContext, CommandHandler},
    reply::Reply,
};

/// `AUTH`: upgrade the control channel to TLS.
///
/// The 234 reply carries the pause flag, so the response sender parks right
/// after writing it; the handshake then runs over the quiesced transport and
/// the sender is resumed once the transition settled either way.
pub struct AuthHandler;

#[async_trait]
impl CommandHandler for AuthHandler {
    fn names(&self) -> &'static [&'static str] { &["AUTH"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let mechanism = context.command().argument().trim().to_ascii_uppercase();
        if mechanism != "TLS" && mechanism != "SSL" {
            return Ok(Some(Reply::new(
                504,
                format!("Authentication mode {mechanism} not supported."),
            )));
        }

        let feature = context.session().features().require::<SecureControlFeature>();
        if !feature.is_configured() {
            return Ok(Some(Reply::new(431, context.text("TLS not configured."))));
        }
        if feature.is_secured() {
            return Ok(Some(Reply::new(534, context.text("TLS session already active."))));
        }

        context.send(Reply::new(234, context.text("Enabling TLS Connection")).pausing());
        let status = feature.enable_tls().await;
        context.request(ServerCommand::ResumeResponseSender);

        match status {
            Ok(ServerStatus::TlsEnabled) => {}
            Ok(other) => warn!("TLS upgrade did not complete: {other:?}"),
            Err(e) => warn!("TLS upgrade request failed: {e}"),
        }

        // The 234 already went out; the outcome shows in the transport.
        Ok(None)
    }
}

/// `PBSZ`: protection buffer size, fixed at zero for TLS.
pub struct PbszHandler;

#[async_trait]
impl CommandHandler for PbszHandler {
    fn names(&self) -> &'static [&'static str] { &["PBSZ"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let feature = context.session().features().require::<SecureControlFeature>();
        if !feature.is_secured() {
            return Ok(Some(Reply::new(503, context.text("Bad sequence of commands."))));
        }
        if context.command().argument().trim() == "0" {
            Ok(Some(Reply::new(200, "PBSZ=0")))
        } else {
            Ok(Some(Reply::new(
                501,
                context.text("Syntax error in parameters or arguments."),
            )))
        }
    }
}

/// `PROT`: data-channel protection level.
///
/// Only clear data channels are supported; the control channel's TLS state
/// is independent of it.
pub struct ProtHandler;

#[async_trait]
impl CommandHandler for ProtHandler {
    fn names(&self) -> &'static [&'static str] { &["PROT"] }

    fn login_required(&self) -> bool { false }

    async fn handle(&self, context: CommandContext) -> Result<Option<Reply>, ProtocolError> {
        let feature = context.session().features().require::<SecureControlFeature>();
        if !feature.is_secured() {
            return Ok(Some(Reply::new(503, context.text("Bad sequence of commands."))));
        }
        match context.command().argument().trim().to_ascii_uppercase().as_str() {
            "C" => Ok(Some(Reply::new(200, context.text("Command okay.")))),
            "P" => Ok(Some(Reply::new(
                536,
                context.text("Data protection level P not supported."),
            ))),
            _ => Ok(Some(Reply::new(
                504,
                context.text("Command not implemented for that parameter."),
            ))),
        }
    }
}
