//! Agent API served over the tunnel listener
//!
//! Every forwarded connection is peeked at up to the end of its request
//! head. Targets under `/proxy` are spliced raw to the container engine
//! socket; everything else is replayed into the HTTP router.
//!
//! The choice is made once per connection, so router connections carry a
//! single request and answer with `Connection: close`. A client wanting
//! `/proxy` after another route has to open a new stream.

pub mod passthrough;
mod routes;
pub mod sysinfo;

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use bytes::BytesMut;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::directory::Directories;
use crate::http::{self, RequestLine, Rewind};
use crate::tunnel::{ListenerClosed, TunnelListener};

pub use sysinfo::SystemInfo;

#[derive(Debug, Error)]
pub enum ApiError {
    /// The session behind the listener is gone
    #[error("API listener closed: {0}")]
    ListenerClosed(#[from] ListenerClosed),
}

/// The agent's local API
#[derive(Clone)]
pub struct LocalApi {
    router: Router,
    container_socket: Arc<PathBuf>,
}

impl LocalApi {
    pub fn new(agent_id: &str, directories: Directories, container_socket: PathBuf) -> Self {
        let router = routes::router(routes::ApiState {
            agent_id: Arc::from(agent_id),
            directories,
        });
        Self {
            router,
            container_socket: Arc::new(container_socket),
        }
    }

    /// Serve connections from `listener` until it closes or `cancel` fires.
    ///
    /// A closed listener means the session is gone and is reported as an
    /// error; cancellation returns `Ok(())`. In-flight connections are
    /// dropped on return.
    pub async fn serve(
        self,
        mut listener: TunnelListener,
        cancel: CancellationToken,
    ) -> Result<(), ApiError> {
        tracing::info!("Agent API serving");

        let mut connections = JoinSet::new();
        loop {
            tokio::select! {
                biased;

                accepted = listener.accept() => {
                    let stream = accepted?;
                    tracing::debug!("Accepted {}", stream.id());
                    let api = self.clone();
                    connections.spawn(async move { api.handle(stream).await });
                }

                _ = cancel.cancelled() => return Ok(()),

                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
    }

    /// Serve one connection
    pub async fn handle<S>(&self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let mut buf = BytesMut::with_capacity(1024);
        let head_len = match http::read_head(&mut stream, &mut buf).await {
            Ok(Some(len)) => len,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!("Bad request head: {}", e);
                let _ = http::write_plain_response(&mut stream, 400, "Bad Request", "malformed request head\n").await;
                return;
            }
        };

        let line = match RequestLine::parse(&buf[..head_len]) {
            Some(line) => line,
            None => {
                let _ = http::write_plain_response(&mut stream, 400, "Bad Request", "malformed request line\n").await;
                return;
            }
        };

        if passthrough::is_proxy_target(&line.target) {
            let request = passthrough::rewrite_request(&line, &buf);
            match passthrough::splice(stream, request, &self.container_socket).await {
                Ok(bytes) => {
                    tracing::debug!("{} {} passed through, {} bytes back", line.method, line.target, bytes)
                }
                Err(e) => tracing::error!("{} {} passthrough failed: {}", line.method, line.target, e),
            }
            return;
        }

        let io = TokioIo::new(Rewind::new(buf.freeze(), stream));
        let service = TowerToHyperService::new(self.router.clone());
        if let Err(e) = http1::Builder::new()
            .timer(TokioTimer::new())
            .keep_alive(false)
            .serve_connection(io, service)
            .await
        {
            tracing::debug!("API connection ended with error: {}", e);
        }
    }
}
