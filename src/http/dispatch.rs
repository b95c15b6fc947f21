//! Root dispatcher (spec.md §4.H): one fallback handler in front of
//! everything, replicating the legacy single-listener dispatch order
//! instead of axum's usual route-table matching — the static page, then a
//! WebSocket upgrade, then the XHTTP session path, in that fixed order.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::{static_page, ws, xhttp};
use crate::state::AppState;

pub async fn root_handler(State(state): State<AppState>, req: Request) -> Response {
    let path = req.uri().path().to_string();

    if path == "/" || path == "/index.html" {
        return static_page::serve_index().await;
    }

    if is_websocket_upgrade(&req) {
        let (mut parts, _body) = req.into_parts();
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(upgrade) => {
                let state = state.clone();
                upgrade.on_upgrade(move |socket| ws::handle_socket(socket, state))
            }
            Err(rejection) => rejection.into_response(),
        };
    }

    let mount = format!("/{}", state.config.wspath);
    if path == mount || path.starts_with(&format!("{mount}/")) {
        let id = extract_session_id(&path);
        let method = req.method().clone();
        return match method {
            Method::GET => xhttp::get_handler(state, id).await,
            Method::POST => {
                let headers = req.headers().clone();
                let body = req.into_body();
                xhttp::post_handler(state, id, headers, body).await
            }
            _ => StatusCode::NOT_FOUND.into_response(),
        };
    }

    StatusCode::NOT_FOUND.into_response()
}

fn is_websocket_upgrade(req: &Request) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .map(|v| v.as_bytes().eq_ignore_ascii_case(b"websocket"))
        .unwrap_or(false)
}

/// The session id is the third `/`-separated segment of the path (`""`,
/// `<WSPATH>`, `<id>`, ...) — i.e. the path component right after the mount
/// point. A request missing it gets a freshly minted id instead of being
/// rejected, matching the legacy server's tolerance for bare mount-path
/// probes.
fn extract_session_id(path: &str) -> String {
    path.split('/')
        .nth(2)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
