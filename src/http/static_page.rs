//! Landing page for `/` and `/index.html`.
//!
//! Grounded on the teacher's `system::default_page` module: serve a local
//! file if present, otherwise fall back to a minimal built-in response —
//! never fail the request over a missing asset.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

const FALLBACK_BANNER: &str = "It works!\n";

pub async fn serve_index() -> Response {
    match tokio::fs::read_to_string("index.html").await {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(_) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            FALLBACK_BANNER,
        )
            .into_response(),
    }
}
