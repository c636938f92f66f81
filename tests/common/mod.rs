#![allow(dead_code)]

use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use ttyshare::api::{self, AppState, RouterConfig};
use ttyshare::pty::{PtySpawner, SpawnCommand};
use ttyshare::session::{SessionOptions, SessionRegistry};

pub use ttyshare::session::testing::{FakePtyControl, FakeSpawner};

pub type WsClient = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// A running server plus handles to its internals.
pub struct TestServer {
    pub addr: SocketAddr,
    pub sessions: SessionRegistry,
}

impl TestServer {
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Wait until session `id` has exactly `count` clients registered.
    pub async fn wait_for_clients(&self, id: &str, count: usize) {
        let deadline = tokio::time::Instant::now() + TIMEOUT;
        loop {
            let current = self.sessions.get(id).map(|s| s.client_count()).unwrap_or(0);
            if current == count {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "session {id} has {current} clients, expected {count}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Terminate every session so the blocking pumps finish.
    pub fn shutdown(&self) {
        self.sessions.drain();
    }
}

pub async fn start_server(
    spawner: Arc<dyn PtySpawner>,
    options: SessionOptions,
    command_log: bool,
    config: RouterConfig,
) -> TestServer {
    let sessions = SessionRegistry::new(spawner, options);
    let state = AppState {
        sessions: sessions.clone(),
        command: SpawnCommand::new("fake", Vec::new()),
        command_log,
    };
    let app = api::router(state, config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, sessions }
}

/// Default server over fake PTYs.
pub async fn start_fake_server(command_log: bool) -> (TestServer, Arc<FakeSpawner>) {
    let spawner = FakeSpawner::new();
    let server = start_server(
        spawner.clone(),
        SessionOptions::default(),
        command_log,
        RouterConfig::default(),
    )
    .await;
    (server, spawner)
}

/// Read binary frames until their concatenation has at least `len` bytes.
pub async fn read_output(ws: &mut WsClient, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for output")
            .expect("connection ended")
            .expect("websocket error");
        match msg {
            Message::Binary(data) => out.extend_from_slice(&data),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
    out
}

/// Read binary frames until the output contains `needle`.
pub async fn read_until(ws: &mut WsClient, needle: &str) -> String {
    let mut out = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !out.contains(needle) {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {needle:?}, got {out:?}"))
            .expect("connection ended")
            .expect("websocket error");
        if let Message::Binary(data) = msg {
            out.push_str(&String::from_utf8_lossy(&data));
        }
    }
    out
}

/// Wait for the server's close frame, skipping any output still in flight.
pub async fn expect_close(ws: &mut WsClient) -> Option<tokio_tungstenite::tungstenite::protocol::CloseFrame> {
    loop {
        let msg = tokio::time::timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(frame))) => return frame,
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Poll `check` until it holds or the timeout elapses.
pub async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
