//! In-process manager used by the integration tests
//!
//! Serves the liveness probe, the query surface and the tunnel upgrade on
//! one port, the way a real manager does. Registered tunnels are handed to
//! the test so it can push frames as the manager.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use wharf_agent::tunnel::JoinOptions;
use wharf_protocol::{
    AppId, AppSummary, Frame, FrameCodec, Message, ProxyConfig, TaskHealth, TaskId, TaskRecord,
    TaskRef, TaskStatus, VersionId, VersionRecord, TUNNEL_PATH, TUNNEL_UPGRADE,
};

/// Manager end of a registered tunnel
pub type ManagerTunnel = Framed<TokioIo<Upgraded>, FrameCodec>;

/// What the fake manager knows about
#[derive(Clone, Default)]
pub struct Scheduler {
    pub apps: Vec<AppSummary>,
    pub tasks: HashMap<(AppId, TaskId), TaskRecord>,
    pub versions: HashMap<(AppId, VersionId), VersionRecord>,
}

impl Scheduler {
    /// Add a task (and its version) to the scheduler
    pub fn task(mut self, app: &str, id: &str, ip: &str, status: TaskStatus, gateway: bool) -> Self {
        let app_id = AppId::new(app);
        let version_id = VersionId::new(format!("{}-v1", app));

        let task = TaskRecord {
            id: TaskId::new(id),
            app_id: app_id.clone(),
            version_id: version_id.clone(),
            ip: ip.to_string(),
            port: 8080,
            weight: 100.0,
            health: TaskHealth::Unset,
            status,
        };

        match self.apps.iter_mut().find(|a| a.id == app_id) {
            Some(summary) => summary.tasks.push(TaskRef {
                id: task.id.clone(),
                version_id: version_id.clone(),
            }),
            None => self.apps.push(AppSummary {
                id: app_id.clone(),
                tasks: vec![TaskRef {
                    id: task.id.clone(),
                    version_id: version_id.clone(),
                }],
            }),
        }

        self.versions.insert(
            (app_id.clone(), version_id.clone()),
            VersionRecord {
                id: version_id,
                proxy: Some(ProxyConfig {
                    enabled: gateway,
                    alias: format!("{}.example.com", app),
                }),
            },
        );
        self.tasks.insert((app_id, task.id.clone()), task);
        self
    }
}

#[derive(Clone)]
struct ManagerState {
    scheduler: Arc<Scheduler>,
    ping_status: StatusCode,
    reject: Option<String>,
    registered: Arc<Mutex<Vec<String>>>,
    tunnels: mpsc::UnboundedSender<ManagerTunnel>,
}

/// Fake manager options
#[derive(Clone)]
pub struct ManagerOptions {
    pub scheduler: Scheduler,
    /// Status returned by `/ping`
    pub ping_status: StatusCode,
    /// Refuse every registration with this reason
    pub reject: Option<String>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            scheduler: Scheduler::default(),
            ping_status: StatusCode::OK,
            reject: None,
        }
    }
}

pub struct FakeManager {
    pub addr: SocketAddr,
    registered: Arc<Mutex<Vec<String>>>,
    tunnels: mpsc::UnboundedReceiver<ManagerTunnel>,
    server: tokio::task::JoinHandle<()>,
}

impl FakeManager {
    pub async fn start(options: ManagerOptions) -> Self {
        let (tunnels_tx, tunnels) = mpsc::unbounded_channel();
        let registered = Arc::new(Mutex::new(Vec::new()));
        let state = ManagerState {
            scheduler: Arc::new(options.scheduler),
            ping_status: options.ping_status,
            reject: options.reject,
            registered: registered.clone(),
            tunnels: tunnels_tx,
        };

        let router = Router::new()
            .route("/ping", get(ping))
            .route("/v1/apps", get(list_apps))
            .route("/v1/apps/:app/tasks/:task", get(get_task))
            .route("/v1/apps/:app/versions/:version", get(get_version))
            .route(TUNNEL_PATH, get(tunnel))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self {
            addr,
            registered,
            tunnels,
            server,
        }
    }

    pub async fn healthy() -> Self {
        Self::start(ManagerOptions::default()).await
    }

    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    /// Agent ids registered so far, in order
    pub fn registrations(&self) -> Vec<String> {
        self.registered.lock().unwrap().clone()
    }

    /// Wait for the next accepted tunnel
    pub async fn next_tunnel(&mut self) -> ManagerTunnel {
        tokio::time::timeout(Duration::from_secs(10), self.tunnels.recv())
            .await
            .expect("no tunnel registered in time")
            .expect("manager stopped")
    }

    pub fn stop(&self) {
        self.server.abort();
    }
}

impl Drop for FakeManager {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Address nothing listens on
pub fn closed_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

pub fn join_options(agent_id: &str) -> JoinOptions {
    JoinOptions {
        agent_id: agent_id.to_string(),
        connect_timeout: Duration::from_secs(5),
        heartbeat_timeout: Duration::from_secs(30),
    }
}

/// Read frames until one satisfies `pred`
pub async fn expect_frame<F>(tunnel: &mut ManagerTunnel, mut pred: F) -> Frame
where
    F: FnMut(&Frame) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let frame = tunnel
                .next()
                .await
                .expect("tunnel closed")
                .expect("bad frame");
            if pred(&frame) {
                return frame;
            }
        }
    })
    .await
    .expect("frame not received in time")
}

async fn ping(State(state): State<ManagerState>) -> impl IntoResponse {
    (state.ping_status, "pong")
}

async fn list_apps(State(state): State<ManagerState>) -> Json<Vec<AppSummary>> {
    Json(state.scheduler.apps.clone())
}

async fn get_task(
    State(state): State<ManagerState>,
    Path((app, task)): Path<(String, String)>,
) -> Result<Json<TaskRecord>, StatusCode> {
    state
        .scheduler
        .tasks
        .get(&(AppId::new(app), TaskId::new(task)))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_version(
    State(state): State<ManagerState>,
    Path((app, version)): Path<(String, String)>,
) -> Result<Json<VersionRecord>, StatusCode> {
    state
        .scheduler
        .versions
        .get(&(AppId::new(app), VersionId::new(version)))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn tunnel(State(state): State<ManagerState>, mut request: Request) -> Response {
    let wants_tunnel = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        == Some(TUNNEL_UPGRADE);
    if !wants_tunnel {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let on_upgrade = hyper::upgrade::on(&mut request);
    tokio::spawn(async move {
        let upgraded = match on_upgrade.await {
            Ok(upgraded) => upgraded,
            Err(_) => return,
        };
        let mut framed = Framed::new(TokioIo::new(upgraded), FrameCodec::new());

        let agent_id = match framed.next().await {
            Some(Ok(Frame {
                message: Message::Register { agent_id, .. },
                ..
            })) => agent_id,
            _ => return,
        };

        let ack = match &state.reject {
            Some(reason) => Message::RegisterAck {
                accepted: false,
                reason: Some(reason.clone()),
            },
            None => Message::RegisterAck {
                accepted: true,
                reason: None,
            },
        };
        if framed.send(Frame::control(ack)).await.is_err() || state.reject.is_some() {
            return;
        }

        state.registered.lock().unwrap().push(agent_id);
        let _ = state.tunnels.send(framed);
    });

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "Upgrade")
        .header(header::UPGRADE, TUNNEL_UPGRADE)
        .body(Body::empty())
        .unwrap()
}
