use axum::{extract::Request, middleware::Next, response::Response};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use subtle::ConstantTimeEq;

use super::error::ApiError;

/// Extract the decoded `user:pass` from a `Basic` Authorization header.
fn extract_basic(req: &Request) -> Option<String> {
    let value = req.headers().get("authorization")?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

/// Access gate: every request must carry the configured `user:pass`
/// credential via HTTP Basic auth.
pub async fn require_basic_auth(
    credential: String,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match extract_basic(&req) {
        Some(supplied) if bool::from(supplied.as_bytes().ct_eq(credential.as_bytes())) => {
            Ok(next.run(req).await)
        }
        Some(_) => {
            tracing::warn!(uri = %req.uri(), "rejected request with invalid credential");
            Err(ApiError::AuthRequired)
        }
        None => Err(ApiError::AuthRequired),
    }
}
