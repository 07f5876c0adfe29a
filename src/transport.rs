//! Shared, swappable control-channel transport.
//!
//! The framer owns reads and the response sender owns writes, but the TLS
//! state machine must occasionally take the whole stream back to wrap or
//! unwrap it. The transport therefore keeps its split halves behind async
//! mutexes with a watch-based swap gate: raising the gate makes the framer
//! abandon its pending read and release its half, after which
//! [`SharedTransport::with_stream`] reunites the halves, hands them to the
//! caller and re-splits whatever comes back.

use std::pin::Pin;

use bytes::BytesMut;
use tokio::{
    io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf},
    sync::{Mutex, watch},
};

/// Byte stream usable as a control channel.
pub trait Transportable: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transportable for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// The control channel in its current encryption state.
pub enum ControlStream {
    /// Plain transport, as accepted.
    Plain(Box<dyn Transportable>),
    /// TLS-wrapped transport after a successful handshake.
    Secured(Box<tokio_rustls::server::TlsStream<Box<dyn Transportable>>>),
}

impl ControlStream {
    /// Wrap a freshly accepted stream.
    pub fn plain(stream: impl Transportable + 'static) -> Self { Self::Plain(Box::new(stream)) }

    /// Whether the stream is currently unencrypted.
    #[must_use]
    pub fn is_plain(&self) -> bool { matches!(self, Self::Plain(_)) }
}

impl AsyncRead for ControlStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Secured(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ControlStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Secured(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Secured(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Secured(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Control transport shared by the framer, the response sender and the TLS
/// state machine.
///
/// Invariant: outside of [`with_stream`](Self::with_stream), both halves are
/// present; only the single server-command listener task swaps the stream,
/// so swaps never overlap.
pub struct SharedTransport {
    read: Mutex<Option<ReadHalf<ControlStream>>>,
    write: Mutex<Option<WriteHalf<ControlStream>>>,
    swap: watch::Sender<bool>,
}

impl SharedTransport {
    /// Split `stream` and share it.
    #[must_use]
    pub fn new(stream: ControlStream) -> Self {
        let (read, write) = io::split(stream);
        let (swap, _) = watch::channel(false);
        Self {
            read: Mutex::new(Some(read)),
            write: Mutex::new(Some(write)),
            swap,
        }
    }

    /// Read a chunk into `buf`, yielding to a pending transport swap.
    ///
    /// Returns the number of bytes read; 0 means the peer closed the
    /// connection.
    ///
    /// # Errors
    ///
    /// Propagates transport read errors.
    pub async fn read_chunk(&self, buf: &mut BytesMut) -> io::Result<usize> {
        loop {
            let mut gate = self.swap.subscribe();
            let swapping = *gate.borrow();
            if swapping && gate.wait_for(|swapping| !swapping).await.is_err() {
                return Ok(0);
            }

            let mut guard = self.read.lock().await;
            let Some(half) = guard.as_mut() else {
                // Restore window between gate release and half placement.
                drop(guard);
                tokio::task::yield_now().await;
                continue;
            };

            tokio::select! {
                result = half.read_buf(buf) => return result,
                _ = gate.wait_for(|swapping| *swapping) => {
                    // A swap wants the stream; release our half and retry on
                    // whatever transport comes out of it.
                    drop(guard);
                }
            }
        }
    }

    /// Write `data` fully and flush it.
    ///
    /// # Errors
    ///
    /// Propagates transport write errors.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        loop {
            let mut gate = self.swap.subscribe();
            let swapping = *gate.borrow();
            if swapping && gate.wait_for(|swapping| !swapping).await.is_err() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "transport is gone"));
            }

            let mut guard = self.write.lock().await;
            let Some(half) = guard.as_mut() else {
                drop(guard);
                tokio::task::yield_now().await;
                continue;
            };
            half.write_all(data).await?;
            return half.flush().await;
        }
    }

    /// Take the whole stream, run `f` on it and install whatever `f`
    /// returns.
    ///
    /// Raises the swap gate first so the framer backs off; the caller must
    /// have parked the response sender through the pause protocol before
    /// invoking this.
    pub async fn with_stream<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(ControlStream) -> Fut,
        Fut: Future<Output = (ControlStream, T)>,
    {
        // `send_replace` updates the gate even when no loop currently holds
        // a receiver.
        self.swap.send_replace(true);
        let mut read_guard = self.read.lock().await;
        let mut write_guard = self.write.lock().await;
        let read = read_guard.take().expect("transport half missing during swap");
        let write = write_guard.take().expect("transport half missing during swap");

        let (stream, result) = f(read.unsplit(write)).await;

        let (read, write) = io::split(stream);
        *read_guard = Some(read);
        *write_guard = Some(write);
        drop(write_guard);
        drop(read_guard);
        self.swap.send_replace(false);
        result
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use tokio::io::AsyncWriteExt;

    use super::{ControlStream, SharedTransport};

    #[tokio::test]
    async fn reads_and_writes_pass_through() {
        let (ours, mut theirs) = tokio::io::duplex(256);
        let transport = SharedTransport::new(ControlStream::plain(ours));

        theirs.write_all(b"NOOP\r\n").await.expect("write succeeds");
        let mut buf = BytesMut::new();
        let n = transport.read_chunk(&mut buf).await.expect("read succeeds");
        assert_eq!(&buf[..n], b"NOOP\r\n");

        transport.write_all(b"200 Command okay.\r\n").await.expect("write succeeds");
    }

    #[tokio::test]
    async fn swap_interrupts_a_pending_read() {
        let (ours, mut theirs) = tokio::io::duplex(256);
        let transport = std::sync::Arc::new(SharedTransport::new(ControlStream::plain(ours)));

        let reader = {
            let transport = std::sync::Arc::clone(&transport);
            tokio::spawn(async move {
                let mut buf = BytesMut::new();
                transport.read_chunk(&mut buf).await.map(|n| buf[..n].to_vec())
            })
        };

        // Give the reader time to park inside the transport.
        tokio::task::yield_now().await;
        let swapped = transport
            .with_stream(|stream| async move {
                let kind = stream_kind(&stream);
                (stream, kind)
            })
            .await;
        assert_eq!(swapped, "plain");

        // The reader must survive the swap and still deliver bytes.
        theirs.write_all(b"SYST\r\n").await.expect("write succeeds");
        let bytes = reader
            .await
            .expect("reader task completes")
            .expect("read succeeds");
        assert_eq!(bytes, b"SYST\r\n");
    }

    fn stream_kind(stream: &ControlStream) -> &'static str {
        if stream.is_plain() { "plain" } else { "secured" }
    }
}
