//! End-to-end over a real PTY: WebSocket input -> shell -> broadcast output.

mod common;

use common::*;
use futures::SinkExt;
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use ttyshare::api::{self, AppState, RouterConfig};
use ttyshare::pty::{NativePtySpawner, SpawnCommand};
use ttyshare::session::{SessionOptions, SessionRegistry};

async fn start_shell_server(command_log: bool) -> TestServer {
    let sessions = SessionRegistry::new(Arc::new(NativePtySpawner), SessionOptions::default());
    let state = AppState {
        sessions: sessions.clone(),
        command: SpawnCommand::new("/bin/sh", Vec::new()),
        command_log,
    };
    let app = api::router(state, RouterConfig::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    TestServer { addr, sessions }
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_output_reaches_writer_and_viewer() {
    let server = start_shell_server(true).await;
    let (mut writer, _) = connect_async(server.ws_url("/ws/shell")).await.unwrap();
    let (mut viewer, _) = connect_async(server.ws_url("/ws-ro/shell")).await.unwrap();
    server.wait_for_clients("shell", 2).await;

    // The arithmetic keeps the echoed command line from matching.
    writer
        .send(Message::text("echo TTYSHARE_$((6*7))\r"))
        .await
        .unwrap();

    read_until(&mut writer, "TTYSHARE_42").await;
    read_until(&mut viewer, "TTYSHARE_42").await;

    let session = server.sessions.get("shell").unwrap();
    assert_eq!(session.command_log(), vec!["echo TTYSHARE_$((6*7))".to_string()]);
    assert!(session.pid().is_some());
    server.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn shell_exit_ends_the_session() {
    let server = start_shell_server(false).await;
    let (mut ws, _) = connect_async(server.ws_url("/ws/bye")).await.unwrap();
    server.wait_for_clients("bye", 1).await;

    ws.send(Message::text("exit\r")).await.unwrap();

    let frame = expect_close(&mut ws).await;
    if let Some(frame) = frame {
        assert_eq!(frame.reason.as_str(), "session ended");
    }
    eventually(|| server.sessions.get("bye").is_none(), "session deregistered").await;
}
