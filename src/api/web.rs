use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use rust_embed::Embed;

#[derive(Embed)]
#[folder = "web/"]
struct WebAssets;

/// Serve the embedded viewer. Unknown paths fall back to `index.html` so the
/// page can read the session id from its own URL.
pub async fn web_asset(uri: axum::http::Uri) -> impl IntoResponse {
    let path = uri.path().trim_start_matches('/');

    let (file, mime) = match WebAssets::get(path).filter(|_| !path.is_empty()) {
        Some(file) => (
            Some(file),
            mime_guess::from_path(path).first_or_text_plain().to_string(),
        ),
        None => (WebAssets::get("index.html"), "text/html".to_string()),
    };

    match file {
        Some(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, mime)],
            content.data.to_vec(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
