//! Stream listener fed by the tunnel
//!
//! Every `StreamOpen` from the manager becomes one [`TunnelStream`] handed
//! to whoever holds the [`TunnelListener`]. The listener closes when the
//! protocol loop that feeds it exits.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;

use wharf_protocol::StreamId;

/// A forwarded connection carried inside the tunnel
#[derive(Debug)]
pub struct TunnelStream {
    id: StreamId,
    io: DuplexStream,
}

impl TunnelStream {
    pub fn new(id: StreamId, io: DuplexStream) -> Self {
        Self { id, io }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl AsyncRead for TunnelStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for TunnelStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

/// Returned by [`TunnelListener::accept`] once the tunnel is gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tunnel listener closed")]
pub struct ListenerClosed;

/// Accepts connections the manager opens through the tunnel
#[derive(Debug)]
pub struct TunnelListener {
    incoming: mpsc::Receiver<TunnelStream>,
}

impl TunnelListener {
    /// Listener plus the sender the protocol loop pushes new streams into
    pub fn channel(backlog: usize) -> (mpsc::Sender<TunnelStream>, Self) {
        let (tx, rx) = mpsc::channel(backlog);
        (tx, Self { incoming: rx })
    }

    /// Wait for the next forwarded connection
    pub async fn accept(&mut self) -> Result<TunnelStream, ListenerClosed> {
        self.incoming.recv().await.ok_or(ListenerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_accept_delivers_stream() {
        let (tx, mut listener) = TunnelListener::channel(4);
        let (local, mut remote) = tokio::io::duplex(64);
        tx.send(TunnelStream::new(StreamId::new(7), local)).await.unwrap();

        let mut stream = listener.accept().await.unwrap();
        assert_eq!(stream.id(), StreamId::new(7));

        remote.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_accept_fails_after_sender_dropped() {
        let (tx, mut listener) = TunnelListener::channel(4);
        drop(tx);
        assert_eq!(listener.accept().await.unwrap_err(), ListenerClosed);
    }
}
