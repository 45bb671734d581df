//! Raw passthrough to the container engine socket
//!
//! Requests under `/proxy` are not parsed beyond their request line. The
//! buffered head (with the prefix stripped from the target) is written to
//! the engine's Unix socket, then bytes are spliced both ways until the
//! engine side is done. Streaming endpoints such as attach and logs work
//! because nothing in between frames the traffic.

use std::io;
use std::path::{Path, PathBuf};

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;

use crate::http::{self, RequestLine};

/// Path prefix that selects the passthrough
pub const PROXY_PREFIX: &str = "/proxy";

#[derive(Debug, Error)]
pub enum PassthroughError {
    /// The engine socket could not be reached; the client got a 500
    #[error("Failed to dial {}: {source}", .path.display())]
    Dial {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Whether a request target belongs to the passthrough
pub fn is_proxy_target(target: &str) -> bool {
    match target.strip_prefix(PROXY_PREFIX) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

/// Target forwarded to the engine: the prefix removed, never empty
pub fn strip_prefix(target: &str) -> String {
    let rest = target.strip_prefix(PROXY_PREFIX).unwrap_or(target);
    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

/// Rebuild the buffered bytes with the rewritten request line.
///
/// `buffered` holds the request line, the rest of the head, and whatever
/// body bytes were read along with it.
pub fn rewrite_request(line: &RequestLine, buffered: &[u8]) -> Bytes {
    let target = strip_prefix(&line.target);
    let mut out = BytesMut::with_capacity(buffered.len());
    out.put_slice(format!("{} {} {}\r\n", line.method, target, line.version).as_bytes());
    out.put_slice(&buffered[line.len..]);
    out.freeze()
}

/// Splice `client` to the engine socket at `backend`.
///
/// `request` is written to the engine first. Returns once the engine stops
/// sending; both connections are closed on return.
pub async fn splice<C>(mut client: C, request: Bytes, backend: &Path) -> Result<u64, PassthroughError>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let engine = match UnixStream::connect(backend).await {
        Ok(engine) => engine,
        Err(source) => {
            let body = format!("failed to reach container engine: {}", source);
            let _ = http::write_plain_response(&mut client, 500, "Internal Server Error", &body).await;
            let _ = client.shutdown().await;
            return Err(PassthroughError::Dial {
                path: backend.to_path_buf(),
                source,
            });
        }
    };

    let (mut client_rd, mut client_wr) = tokio::io::split(client);
    let (mut engine_rd, mut engine_wr) = engine.into_split();

    let forward = tokio::spawn(async move {
        engine_wr.write_all(&request).await?;
        let sent = tokio::io::copy(&mut client_rd, &mut engine_wr).await?;
        engine_wr.shutdown().await?;
        Ok::<u64, io::Error>(sent)
    });

    let copied = tokio::io::copy(&mut engine_rd, &mut client_wr).await;
    let _ = client_wr.shutdown().await;

    // The client half lives in the forwarding task; stop it so the
    // connection is released here
    forward.abort();
    let _ = forward.await;

    Ok(copied?)
}
