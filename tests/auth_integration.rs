//! HTTP Basic access gate in front of the live server.

mod common;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use common::*;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError},
};
use ttyshare::api::RouterConfig;
use ttyshare::session::SessionOptions;

const CREDENTIAL: &str = "alice:correct-horse";

async fn start_gated_server() -> (TestServer, std::sync::Arc<FakeSpawner>) {
    let spawner = FakeSpawner::new();
    let server = start_server(
        spawner.clone(),
        SessionOptions::default(),
        false,
        RouterConfig {
            credential: Some(CREDENTIAL.to_string()),
        },
    )
    .await;
    (server, spawner)
}

fn basic(user_pass: &str) -> String {
    format!("Basic {}", STANDARD.encode(user_pass))
}

#[tokio::test(flavor = "multi_thread")]
async fn http_routes_require_credential() {
    let (server, _spawner) = start_gated_server().await;
    let client = reqwest::Client::new();

    let resp = client.get(server.http_url("/sessions")).send().await.unwrap();
    assert_eq!(resp.status(), 401);
    assert_eq!(
        resp.headers()["www-authenticate"],
        r#"Basic realm="Restricted""#
    );

    let resp = client
        .get(server.http_url("/sessions"))
        .basic_auth("alice", Some("wrong"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(server.http_url("/sessions"))
        .basic_auth("alice", Some("correct-horse"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client.get(server.http_url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), 200, "health is never gated");
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_without_credential_never_spawns() {
    let (server, spawner) = start_gated_server().await;

    match connect_async(server.ws_url("/ws/dev")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected HTTP 401, got {:?}", other.map(|_| ())),
    }
    assert_eq!(spawner.spawn_count(), 0);
    assert!(server.sessions.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn websocket_with_credential_attaches() {
    let (server, spawner) = start_gated_server().await;

    let mut request = server.ws_url("/ws-ro/dev").into_client_request().unwrap();
    request.headers_mut().insert(
        "authorization",
        HeaderValue::from_str(&basic(CREDENTIAL)).unwrap(),
    );
    let (mut ws, _) = connect_async(request).await.unwrap();
    server.wait_for_clients("dev", 1).await;

    spawner.control(0).emit(b"welcome");
    assert_eq!(read_output(&mut ws, 7).await, b"welcome".to_vec());
    server.shutdown();
}
