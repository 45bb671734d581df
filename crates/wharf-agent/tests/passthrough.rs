//! Container engine passthrough tests
//!
//! Forwarded connections are fed to the agent API through a tunnel
//! listener; the engine is a Unix socket in a temporary directory.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use wharf_agent::api::LocalApi;
use wharf_agent::directory::{Directories, RecordDirectory};
use wharf_agent::tunnel::{TunnelListener, TunnelStream};
use wharf_protocol::StreamId;

const ENGINE_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 2\r\n\r\n[]";

/// Agent API served over an in-memory tunnel listener
struct TestApi {
    streams: mpsc::Sender<TunnelStream>,
    next_id: u32,
    cancel: CancellationToken,
}

impl TestApi {
    fn start(socket: PathBuf) -> Self {
        let directories = Directories {
            dns: Arc::new(RecordDirectory::new("dns", "127.0.0.1:0", None)),
            proxy: Arc::new(RecordDirectory::new("gateway", "127.0.0.1:0", None)),
        };
        let api = LocalApi::new("node-a", directories, socket);
        let (streams, listener) = TunnelListener::channel(4);
        let cancel = CancellationToken::new();

        let serve_cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = api.serve(listener, serve_cancel).await;
        });

        Self {
            streams,
            next_id: 1,
            cancel,
        }
    }

    /// Open a forwarded connection and return the client end
    async fn connect(&mut self) -> DuplexStream {
        let (client, server) = tokio::io::duplex(64 * 1024);
        self.streams
            .send(TunnelStream::new(StreamId::new(self.next_id), server))
            .await
            .unwrap();
        self.next_id += 1;
        client
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn read_all(client: &mut DuplexStream) -> Vec<u8> {
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("response not finished in time")
        .unwrap();
    response
}

#[tokio::test]
async fn test_proxy_request_reaches_engine_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("engine.sock");
    let engine = UnixListener::bind(&socket).unwrap();

    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        let (mut conn, _) = engine.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut request = Vec::new();
        while !request.ends_with(b"{}") {
            let n = conn.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            request.extend_from_slice(&buf[..n]);
        }
        conn.write_all(ENGINE_RESPONSE).await.unwrap();
        conn.shutdown().await.unwrap();
        let _ = seen_tx.send(request);
    });

    let mut api = TestApi::start(socket);
    let mut client = api.connect().await;
    client
        .write_all(
            b"POST /proxy/containers/create?name=web HTTP/1.1\r\nHost: docker\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await
        .unwrap();

    let response = read_all(&mut client).await;
    assert_eq!(response, ENGINE_RESPONSE);

    let request = seen_rx.await.unwrap();
    assert_eq!(
        request,
        b"POST /containers/create?name=web HTTP/1.1\r\nHost: docker\r\nContent-Length: 2\r\n\r\n{}"
    );
}

#[tokio::test]
async fn test_proxy_without_engine_answers_500() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = TestApi::start(dir.path().join("missing.sock"));

    let mut client = api.connect().await;
    client
        .write_all(b"GET /proxy/containers/json HTTP/1.1\r\nHost: docker\r\n\r\n")
        .await
        .unwrap();

    let response = String::from_utf8(read_all(&mut client).await).unwrap();
    assert!(response.starts_with("HTTP/1.1 500"), "{}", response);
    assert!(response.contains("Connection: close"));
}

#[tokio::test]
async fn test_plain_requests_share_the_listener() {
    let dir = tempfile::tempdir().unwrap();
    let mut api = TestApi::start(dir.path().join("missing.sock"));

    for _ in 0..3 {
        let mut client = api.connect().await;
        client
            .write_all(b"GET /ping HTTP/1.1\r\nHost: agent\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let response = String::from_utf8(read_all(&mut client).await).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.ends_with("pong"));
    }
}
