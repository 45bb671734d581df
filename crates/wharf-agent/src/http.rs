//! Minimal HTTP/1.1 head handling.
//!
//! Used to peek at a forwarded request before deciding whether it is
//! spliced to the container engine or served by the router.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};

/// Largest request or response head accepted
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Offset just past the blank line ending the head, if it is buffered
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)
        .map(|pos| pos + HEAD_TERMINATOR.len())
}

/// Read until `buf` holds a complete head.
///
/// Returns the head length; bytes past it stay in `buf`. `Ok(None)` means
/// the peer closed before sending anything.
pub async fn read_head<R>(reader: &mut R, buf: &mut BytesMut) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = find_head_end(buf) {
            return Ok(Some(end));
        }
        if buf.len() >= MAX_HEAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("head exceeds {} bytes", MAX_HEAD_SIZE),
            ));
        }

        buf.reserve(1024);
        if reader.read_buf(buf).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed inside head",
            ));
        }
    }
}

/// Request line of a forwarded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Length of the line including its CRLF
    pub len: usize,
}

impl RequestLine {
    /// Parse the first line of a request head
    pub fn parse(head: &[u8]) -> Option<Self> {
        let line_end = head.windows(2).position(|w| w == b"\r\n")?;
        let line = std::str::from_utf8(&head[..line_end]).ok()?;

        let mut parts = line.split(' ');
        let method = parts.next().filter(|m| !m.is_empty())?;
        let target = parts.next().filter(|t| !t.is_empty())?;
        let version = parts.next().filter(|v| v.starts_with("HTTP/"))?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            len: line_end + 2,
        })
    }
}

/// Write a complete plain-text response and flush it
pub async fn write_plain_response<W>(
    writer: &mut W,
    status: u16,
    reason: &str,
    body: &str,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await
}

/// Stream that replays already-consumed bytes before reading further
pub struct Rewind<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = std::cmp::min(self.prefix.len(), buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
