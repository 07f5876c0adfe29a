//! Built-in command handlers.
//!
//! Each submodule groups related verbs; [`default_registry`] wires the whole
//! set together. Embedders can start from it and register replacements; the
//! last registration for a verb wins.

use std::sync::Arc;

use crate::handler::HandlerRegistry;

pub mod access;
pub mod capabilities;
pub mod channel;
pub mod files;
pub mod navigation;
pub mod security;
pub mod transfer;

/// The full built-in handler table.
#[must_use]
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(access::LoginHandler));
    registry.register(Arc::new(access::QuitHandler));
    registry.register(Arc::new(access::NoopHandler));
    registry.register(Arc::new(access::SystHandler));
    registry.register(Arc::new(navigation::PwdHandler));
    registry.register(Arc::new(navigation::CwdHandler));
    registry.register(Arc::new(navigation::CdupHandler));
    registry.register(Arc::new(files::MkdHandler));
    registry.register(Arc::new(files::RmdHandler));
    registry.register(Arc::new(files::DeleHandler));
    registry.register(Arc::new(files::RenameFromHandler));
    registry.register(Arc::new(files::RenameToHandler));
    registry.register(Arc::new(files::SizeHandler));
    registry.register(Arc::new(files::MdtmHandler));
    registry.register(Arc::new(channel::PortHandler));
    registry.register(Arc::new(channel::PasvHandler));
    registry.register(Arc::new(transfer::TypeHandler));
    registry.register(Arc::new(transfer::RestHandler));
    registry.register(Arc::new(transfer::RetrHandler));
    registry.register(Arc::new(transfer::StorHandler));
    registry.register(Arc::new(transfer::AppeHandler));
    registry.register(Arc::new(transfer::ListHandler));
    registry.register(Arc::new(transfer::AborHandler));
    registry.register(Arc::new(security::AuthHandler));
    registry.register(Arc::new(security::PbszHandler));
    registry.register(Arc::new(security::ProtHandler));
    registry.register(Arc::new(capabilities::FeatHandler));
    registry.register(Arc::new(capabilities::OptsHandler));
    registry.register(Arc::new(capabilities::SiteHandler));
    registry
}
