use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    Json,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::{ControlMessage, Inbound};
use crate::session::{ClientHandle, Session, SessionSummary};

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
}

pub(super) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /ws/{id}`: attach with input rights. The identifier may contain
/// slashes.
pub(super) async fn ws_read_write(
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    connect(id, ws, state, false).await
}

/// `GET /ws-ro/{id}`: attach as a viewer. Inbound frames are discarded.
pub(super) async fn ws_read_only(
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    connect(id, ws, state, true).await
}

/// `GET /ws/` and `GET /ws-ro/`.
pub(super) async fn missing_session_id() -> ApiError {
    ApiError::MissingSessionId
}

async fn connect(
    id: String,
    ws: WebSocketUpgrade,
    state: AppState,
    read_only: bool,
) -> Result<Response, ApiError> {
    let id = id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::MissingSessionId);
    }

    // Spawning a process blocks; keep it off the async workers.
    let registry = state.sessions.clone();
    let command = state.command.clone();
    let lookup_id = id.clone();
    let session = tokio::task::spawn_blocking(move || registry.get_or_create(&lookup_id, &command))
        .await
        .map_err(|e| ApiError::SessionCreateFailed(e.to_string()))?
        .map_err(|e| {
            tracing::error!(session = %id, error = %e, "failed to create session");
            ApiError::from(e)
        })?;

    let max_clients = state.sessions.options().max_clients;
    if session.client_count() >= max_clients {
        tracing::warn!(session = %id, max_clients, "rejecting client, session is full");
        return Err(ApiError::TooManyClients(max_clients));
    }

    Ok(ws
        .on_failed_upgrade(move |e| {
            tracing::warn!(session = %id, error = %e, "websocket upgrade failed");
        })
        .on_upgrade(move |socket| handle_socket(socket, state, session, read_only)))
}

fn session_ended() -> Message {
    Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static("session ended"),
    }))
}

async fn handle_socket(socket: WebSocket, state: AppState, session: Arc<Session>, read_only: bool) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (handle, mut outbound) = ClientHandle::new(read_only);

    let client = match session.add_client(handle) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(session = %session.id(), read_only, error = %e, "client not admitted");
            let _ = ws_tx.send(session_ended()).await;
            return;
        }
    };

    loop {
        tokio::select! {
            // Session output -> WebSocket
            chunk = outbound.recv() => {
                match chunk {
                    Some(data) => {
                        if ws_tx.send(Message::Binary(data)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(session_ended()).await;
                        let _ = ws_tx.flush().await;
                        break;
                    }
                }
            }

            // WebSocket -> PTY
            msg = ws_rx.next() => {
                let frame = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ping/Pong handled automatically
                    Some(Err(e)) => {
                        tracing::debug!(session = %session.id(), client = %client, error = %e, "websocket read failed");
                        break;
                    }
                };
                if read_only {
                    continue;
                }
                if !apply_inbound(&session, state.command_log, frame).await {
                    break;
                }
            }
        }
    }

    session.remove_client(client);
}

/// Apply one frame from a read-write client. Returns `false` when the
/// connection should be closed.
async fn apply_inbound(session: &Session, command_log: bool, frame: Bytes) -> bool {
    match Inbound::classify(&frame) {
        Inbound::Control(ControlMessage::Resize { cols, rows }) => {
            if cols == 0 || rows == 0 {
                tracing::debug!(session = %session.id(), rows, cols, "ignoring zero-sized resize");
            } else if let Err(e) = session.resize(rows, cols) {
                tracing::warn!(session = %session.id(), rows, cols, error = %e, "resize failed");
            }
            true
        }
        Inbound::Input(_) => {
            if let Err(e) = session.write(frame.clone()).await {
                tracing::warn!(session = %session.id(), error = %e, "failed to write input to pty");
                return false;
            }
            if command_log {
                session.process_input(&frame);
            }
            true
        }
    }
}

pub(super) async fn session_list(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let mut sessions: Vec<SessionSummary> =
        state.sessions.list().iter().map(|s| s.summary()).collect();
    sessions.sort_by(|a, b| a.id.cmp(&b.id));
    Json(sessions)
}

#[derive(Serialize)]
pub(super) struct CommandLogResponse {
    id: String,
    commands: Vec<String>,
}

pub(super) async fn session_log(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CommandLogResponse>, ApiError> {
    let session = state
        .sessions
        .get(&id)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
    Ok(Json(CommandLogResponse {
        id,
        commands: session.command_log(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakePty;

    fn create_test_session() -> (Arc<Session>, crate::session::testing::FakePtyControl) {
        let (pty, control) = FakePty::new();
        let (session, _reader) = Session::new("test", "fake", Box::new(pty), 64).unwrap();
        (Arc::new(session), control)
    }

    #[tokio::test]
    async fn resize_frame_resizes_instead_of_writing() {
        let (session, control) = create_test_session();
        let keep = apply_inbound(
            &session,
            false,
            Bytes::from_static(br#"{"type":"resize","cols":100,"rows":30}"#),
        )
        .await;

        assert!(keep);
        assert_eq!(control.resizes(), vec![(30, 100)]);
        assert_eq!(control.write_calls(), 0);
        session.terminate();
    }

    #[tokio::test]
    async fn zero_sized_resize_is_ignored() {
        let (session, control) = create_test_session();
        let keep = apply_inbound(
            &session,
            false,
            Bytes::from_static(br#"{"type":"resize","cols":0,"rows":30}"#),
        )
        .await;

        assert!(keep);
        assert!(control.resizes().is_empty());
        assert_eq!(control.write_calls(), 0);
        session.terminate();
    }

    #[tokio::test]
    async fn malformed_control_is_written_verbatim() {
        let (session, control) = create_test_session();
        let frame = Bytes::from_static(br#"{"type":"resize","cols":"#);
        assert!(apply_inbound(&session, false, frame.clone()).await);

        assert_eq!(control.written(), frame.to_vec());
        assert!(control.resizes().is_empty());
        session.terminate();
    }

    #[tokio::test]
    async fn input_is_recorded_only_when_logging() {
        let (session, _control) = create_test_session();
        assert!(apply_inbound(&session, false, Bytes::from_static(b"ls\r")).await);
        assert!(session.command_log().is_empty());

        assert!(apply_inbound(&session, true, Bytes::from_static(b"pwd\r")).await);
        assert_eq!(session.command_log(), vec!["pwd".to_string()]);
        session.terminate();
    }

    #[tokio::test]
    async fn write_failure_closes_connection() {
        let (session, _control) = create_test_session();
        session.terminate();
        assert!(!apply_inbound(&session, true, Bytes::from_static(b"ls\r")).await);
        assert!(session.command_log().is_empty());
    }
}
