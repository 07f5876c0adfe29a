//! Public API for the `wharf` library.
//!
//! This crate provides a server-side FTP connection-processing engine:
//! command framing, an extensible handler/middleware dispatch pipeline,
//! per-connection session state, active/passive data-channel negotiation and
//! in-band TLS upgrade of the control channel. Storage, authorization and
//! localization are consumed through collaborator traits; in-memory sample
//! implementations ship with the crate.

pub mod auth;
pub mod catalog;
pub mod collector;
pub mod command;
pub mod commands;
pub mod connection;
pub mod control;
pub mod data;
pub mod encoding;
pub mod error;
pub mod features;
pub mod fs;
pub mod handler;
pub mod middleware;
pub mod multiplexer;
pub mod reply;
pub mod server;
pub mod state;
pub mod tls;
mod transport;

pub use auth::{AnonymousAuthorizer, Authorizer, AuthorizerFactory, AuthorizerFeature, SecurityStatus};
pub use catalog::{Catalog, DefaultCatalog, LocalizationFeature};
pub use collector::CommandCollector;
pub use command::Command;
pub use connection::{Connection, ConnectionConfig};
pub use control::{LifetimeFeature, SecureControlFeature, ServerCommand, ServerStatus};
pub use data::{DataChannel, DataChannelError, PasvAddressResolver, PasvOptions, SimplePasvAddressResolver};
pub use encoding::TextEncoding;
pub use error::ProtocolError;
pub use features::FeatureSet;
pub use fs::{Filesystem, FsError, MemoryFilesystem};
pub use handler::{CommandContext, CommandExtension, CommandHandler, HandlerRegistry};
pub use middleware::{Middleware, Next};
pub use multiplexer::Multiplexer;
pub use reply::Reply;
pub use server::Server;
pub use state::Session;
pub use tls::TlsIdentity;
pub use transport::Transportable;
