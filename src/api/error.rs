use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use crate::session::SessionError;

/// Value of the `WWW-Authenticate` header sent with 401 responses.
pub const BASIC_REALM: &str = r#"Basic realm="Restricted""#;

/// Structured error type for all HTTP handlers.
///
/// Each variant maps to an HTTP status code, a machine-readable code string,
/// and a human-readable message.
#[derive(Debug)]
pub enum ApiError {
    /// 401 - Missing or wrong credential.
    AuthRequired,
    /// 400 - The request target carries no session identifier.
    MissingSessionId,
    /// 404 - No live session with this identifier.
    SessionNotFound(String),
    /// 500 - The session's process could not be started.
    SessionCreateFailed(String),
    /// 503 - The session is at its client cap.
    TooManyClients(usize),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::MissingSessionId => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::SessionCreateFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::TooManyClients(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AuthRequired => "auth_required",
            ApiError::MissingSessionId => "missing_session_id",
            ApiError::SessionNotFound(_) => "session_not_found",
            ApiError::SessionCreateFailed(_) => "session_create_failed",
            ApiError::TooManyClients(_) => "too_many_clients",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::AuthRequired => "Authentication required.".to_string(),
            ApiError::MissingSessionId => "Session ID is required.".to_string(),
            ApiError::SessionNotFound(id) => format!("Session not found: {}.", id),
            ApiError::SessionCreateFailed(detail) => {
                format!("Failed to start session: {}.", detail)
            }
            ApiError::TooManyClients(max) => {
                format!("Session already has the maximum of {} clients.", max)
            }
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::TooManyClients(max) => ApiError::TooManyClients(max),
            other => ApiError::SessionCreateFailed(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        let mut response = (self.status_code(), Json(body)).into_response();
        if matches!(self, ApiError::AuthRequired) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(BASIC_REALM),
            );
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::PtyError;
    use axum::body::Body;
    use http_body_util::BodyExt;

    async fn response_parts(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let body = Body::new(response.into_body())
            .collect()
            .await
            .unwrap()
            .to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn missing_session_id_is_bad_request() {
        let (status, json) = response_parts(ApiError::MissingSessionId).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["code"], "missing_session_id");
        assert_eq!(json["error"]["message"], "Session ID is required.");
    }

    #[tokio::test]
    async fn session_not_found_includes_id() {
        let (status, json) = response_parts(ApiError::SessionNotFound("dev".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["message"], "Session not found: dev.");
    }

    #[tokio::test]
    async fn auth_required_sets_challenge_header() {
        let response = ApiError::AuthRequired.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_REALM
        );
    }

    #[tokio::test]
    async fn spawn_failure_maps_to_server_error() {
        let err: ApiError =
            SessionError::Spawn(PtyError::SpawnCommand(anyhow::anyhow!("no such file"))).into();
        let (status, json) = response_parts(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["code"], "session_create_failed");
    }

    #[tokio::test]
    async fn client_cap_maps_to_unavailable() {
        let err: ApiError = SessionError::TooManyClients(64).into();
        let (status, json) = response_parts(err).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["error"]["code"], "too_many_clients");
    }
}
