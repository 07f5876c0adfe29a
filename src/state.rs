//! Per-connection session state.
//!
//! One [`Session`] exists per accepted control connection. It is shared
//! across that connection's tasks, so each mutable piece sits behind its own
//! small lock: commands execute one at a time, with at most one background
//! transfer alongside, and none of the critical sections here outlive a few
//! instructions.

use std::{
    net::SocketAddr,
    sync::{Arc, Mutex},
};

use crate::{data::DataChannel, encoding::EncodingCell, features::FeatureSet, fs::Filesystem};

/// Representation type negotiated with `TYPE`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransferType {
    /// ASCII text (`TYPE A`).
    #[default]
    Ascii,
    /// Binary image (`TYPE I`).
    Image,
}

/// State owned by one control connection.
pub struct Session {
    local: SocketAddr,
    remote: SocketAddr,
    encoding: EncodingCell,
    features: FeatureSet,
    filesystem: Mutex<Option<Arc<dyn Filesystem>>>,
    working_dir: Mutex<Vec<String>>,
    transfer_type: Mutex<TransferType>,
    transfer_verb: Mutex<Option<String>>,
    rename_source: Mutex<Option<String>>,
    restart_offset: Mutex<Option<u64>>,
    data: tokio::sync::Mutex<DataChannel>,
}

impl Session {
    /// Create the session for a connection between `local` and `remote`.
    #[must_use]
    pub fn new(local: SocketAddr, remote: SocketAddr, data: DataChannel) -> Self {
        Self {
            local,
            remote,
            encoding: EncodingCell::default(),
            features: FeatureSet::default(),
            filesystem: Mutex::new(None),
            working_dir: Mutex::new(Vec::new()),
            transfer_type: Mutex::new(TransferType::default()),
            transfer_verb: Mutex::new(None),
            rename_source: Mutex::new(None),
            restart_offset: Mutex::new(None),
            data: tokio::sync::Mutex::new(data),
        }
    }

    /// Session with loopback addresses and a default data channel, for unit
    /// tests that never open one.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn for_tests() -> Self {
        let local: SocketAddr = "127.0.0.1:21".parse().expect("literal address parses");
        let remote: SocketAddr = "127.0.0.1:40000".parse().expect("literal address parses");
        let resolver = Arc::new(crate::data::SimplePasvAddressResolver::default());
        Self::new(local, remote, DataChannel::new(local, remote, resolver))
    }

    /// Local address of the control channel.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr { self.local }

    /// Remote address of the control channel.
    #[must_use]
    pub fn remote_addr(&self) -> SocketAddr { self.remote }

    /// Shared handle to the control-channel encoding.
    #[must_use]
    pub fn encoding(&self) -> &EncodingCell { &self.encoding }

    /// The connection's capability registry.
    #[must_use]
    pub fn features(&self) -> &FeatureSet { &self.features }

    /// The data-channel state machine.
    #[must_use]
    pub fn data(&self) -> &tokio::sync::Mutex<DataChannel> { &self.data }

    /// The filesystem attached at login, if any.
    #[must_use]
    pub fn filesystem(&self) -> Option<Arc<dyn Filesystem>> {
        self.filesystem
            .lock()
            .expect("session lock poisoned")
            .clone()
    }

    /// Attach the filesystem for this session; called by the authorizer once
    /// login completes.
    pub fn attach_filesystem(&self, filesystem: Arc<dyn Filesystem>) {
        *self.filesystem.lock().expect("session lock poisoned") = Some(filesystem);
        self.working_dir.lock().expect("session lock poisoned").clear();
    }

    /// Snapshot of the working-directory stack.
    #[must_use]
    pub fn working_dir(&self) -> Vec<String> {
        self.working_dir.lock().expect("session lock poisoned").clone()
    }

    /// Replace the working-directory stack.
    pub fn set_working_dir(&self, stack: Vec<String>) {
        *self.working_dir.lock().expect("session lock poisoned") = stack;
    }

    /// The working directory rendered as an absolute path.
    #[must_use]
    pub fn working_dir_display(&self) -> String {
        let stack = self.working_dir.lock().expect("session lock poisoned");
        if stack.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}", stack.join("/"))
        }
    }

    /// Currently negotiated representation type.
    #[must_use]
    pub fn transfer_type(&self) -> TransferType {
        *self.transfer_type.lock().expect("session lock poisoned")
    }

    /// Set the representation type.
    pub fn set_transfer_type(&self, transfer_type: TransferType) {
        *self.transfer_type.lock().expect("session lock poisoned") = transfer_type;
    }

    /// Lock the session onto one family of data-setup verbs.
    ///
    /// `PORT` and `EPRT` (or `PASV` and `EPSV`) must not be mixed within a
    /// session; the first such verb wins.
    ///
    /// # Errors
    ///
    /// Returns the verb recorded earlier when `verb` differs from it.
    pub fn lock_transfer_verb(&self, verb: &str) -> Result<(), String> {
        let mut used = self.transfer_verb.lock().expect("session lock poisoned");
        match used.as_deref() {
            Some(previous) if !previous.eq_ignore_ascii_case(verb) => Err(previous.to_owned()),
            Some(_) => Ok(()),
            None => {
                *used = Some(verb.to_ascii_uppercase());
                Ok(())
            }
        }
    }

    /// Record the source path of a pending rename.
    pub fn set_rename_source(&self, path: String) {
        *self.rename_source.lock().expect("session lock poisoned") = Some(path);
    }

    /// Take the pending rename source, clearing it.
    #[must_use]
    pub fn take_rename_source(&self) -> Option<String> {
        self.rename_source.lock().expect("session lock poisoned").take()
    }

    /// Record the restart offset for the next transfer.
    pub fn set_restart_offset(&self, offset: u64) {
        *self.restart_offset.lock().expect("session lock poisoned") = Some(offset);
    }

    /// Take the restart offset; it applies to a single transfer.
    #[must_use]
    pub fn take_restart_offset(&self) -> Option<u64> {
        self.restart_offset.lock().expect("session lock poisoned").take()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local", &self.local)
            .field("remote", &self.remote)
            .field("encoding", &self.encoding.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Session, TransferType};

    #[test]
    fn working_dir_renders_as_absolute_path() {
        let session = Session::for_tests();
        assert_eq!(session.working_dir_display(), "/");
        session.set_working_dir(vec!["srv".into(), "docs".into()]);
        assert_eq!(session.working_dir_display(), "/srv/docs");
    }

    #[test]
    fn transfer_verb_lock_rejects_mixing() {
        let session = Session::for_tests();
        assert!(session.lock_transfer_verb("PORT").is_ok());
        assert!(session.lock_transfer_verb("port").is_ok());
        assert_eq!(session.lock_transfer_verb("EPRT"), Err("PORT".to_owned()));
    }

    #[test]
    fn restart_offset_is_single_use() {
        let session = Session::for_tests();
        session.set_restart_offset(42);
        assert_eq!(session.take_restart_offset(), Some(42));
        assert_eq!(session.take_restart_offset(), None);
    }

    #[test]
    fn transfer_type_defaults_to_ascii() {
        let session = Session::for_tests();
        assert_eq!(session.transfer_type(), TransferType::Ascii);
        session.set_transfer_type(TransferType::Image);
        assert_eq!(session.transfer_type(), TransferType::Image);
    }
}
