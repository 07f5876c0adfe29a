//! TLS identity loading and control-channel handshakes.
//!
//! The control channel starts plain and is upgraded in-band (`AUTH TLS`).
//! [`TlsIdentity`] turns PEM certificate material into a rustls acceptor;
//! [`handshake`] and [`close`] perform the actual transport transitions on
//! behalf of the connection's server-command listener.

use std::{io, path::Path, sync::Arc};

use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use tokio::io::AsyncWriteExt;
use tokio_rustls::TlsAcceptor;

use crate::transport::ControlStream;

/// Failures while loading the server's TLS identity.
#[derive(Debug)]
pub enum TlsError {
    /// The certificate chain could not be read or parsed.
    CertificateLoad(io::Error),
    /// The private key could not be read, parsed, or was absent.
    PrivateKeyLoad(io::Error),
    /// rustls rejected the certificate/key combination.
    Config(rustls::Error),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CertificateLoad(e) => write!(f, "failed to load certificate chain: {e}"),
            Self::PrivateKeyLoad(e) => write!(f, "failed to load private key: {e}"),
            Self::Config(e) => write!(f, "invalid TLS configuration: {e}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CertificateLoad(e) | Self::PrivateKeyLoad(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

/// Server certificate and key, ready to accept handshakes.
#[derive(Clone)]
pub struct TlsIdentity {
    acceptor: TlsAcceptor,
}

impl TlsIdentity {
    /// Build an identity from PEM-encoded certificate chain and key bytes.
    ///
    /// # Errors
    ///
    /// Returns a [`TlsError`] when the PEM data is unreadable or rustls
    /// rejects the material.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<_, _>>()
            .map_err(TlsError::CertificateLoad)?;
        let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(TlsError::PrivateKeyLoad)?
            .ok_or_else(|| {
                TlsError::PrivateKeyLoad(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "no private key found",
                ))
            })?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(TlsError::Config)?;

        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::new(config)),
        })
    }

    /// Build an identity from PEM files on disk.
    ///
    /// # Errors
    ///
    /// Returns a [`TlsError`] when either file is unreadable or invalid.
    pub fn from_pem_files(cert: &Path, key: &Path) -> Result<Self, TlsError> {
        let cert_pem = std::fs::read(cert).map_err(TlsError::CertificateLoad)?;
        let key_pem = std::fs::read(key).map_err(TlsError::PrivateKeyLoad)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    pub(crate) fn acceptor(&self) -> TlsAcceptor { self.acceptor.clone() }
}

/// Run the server-side handshake over a plain stream.
///
/// On failure the original plain stream is handed back untouched, so the
/// control channel keeps working; an already secured stream is returned
/// as-is with an error, because the caller is expected to downgrade first.
pub(crate) async fn handshake(
    acceptor: TlsAcceptor,
    stream: ControlStream,
) -> (ControlStream, Result<(), io::Error>) {
    match stream {
        ControlStream::Plain(inner) => match acceptor.accept(inner).into_fallible().await {
            Ok(secured) => (ControlStream::Secured(Box::new(secured)), Ok(())),
            Err((error, inner)) => (ControlStream::Plain(inner), Err(error)),
        },
        secured @ ControlStream::Secured(_) => (
            secured,
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "control channel is already secured",
            )),
        ),
    }
}

/// Unwrap a secured stream back to the plain transport.
///
/// Sends the TLS close alert first. Returns whether the stream actually was
/// secured.
pub(crate) async fn close(stream: ControlStream) -> (ControlStream, bool) {
    match stream {
        ControlStream::Secured(mut secured) => {
            // Close alert; the peer may already be gone, which is fine.
            let _ = secured.shutdown().await;
            let (inner, _) = secured.into_inner();
            (ControlStream::Plain(inner), true)
        }
        plain @ ControlStream::Plain(_) => (plain, false),
    }
}
