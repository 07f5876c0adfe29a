//! Fault taxonomy for command processing.
//!
//! Every failure a handler can produce is caught at the dispatch boundary
//! and translated into a reply; nothing here ever tears down the connection
//! loops. The variants mirror the reply codes the translation produces.

use crate::{data::DataChannelError, fs::FsError};

/// Faults raised while processing a single command.
#[derive(Debug)]
pub enum ProtocolError {
    /// Establishing the data connection failed; translated to 425.
    DataChannel(DataChannelError),
    /// The filesystem layer rejected the operation; the layer supplies the
    /// reply code and error name.
    FileSystem(FsError),
    /// The operation is recognised but not supported; translated to 502.
    Unsupported(String),
    /// Anything else; translated to the generic 501 syntax error.
    Fault(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataChannel(e) => write!(f, "data connection failed: {e}"),
            Self::FileSystem(e) => write!(f, "file system error: {e}"),
            Self::Unsupported(what) => write!(f, "unsupported operation: {what}"),
            Self::Fault(what) => write!(f, "command processing failed: {what}"),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::DataChannel(e) => Some(e),
            Self::FileSystem(e) => Some(e),
            Self::Unsupported(_) | Self::Fault(_) => None,
        }
    }
}

impl From<DataChannelError> for ProtocolError {
    fn from(e: DataChannelError) -> Self { Self::DataChannel(e) }
}

impl From<FsError> for ProtocolError {
    fn from(e: FsError) -> Self { Self::FileSystem(e) }
}
