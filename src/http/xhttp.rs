//! XHTTP request handlers (spec.md §4.F): adapt a long-polling GET and a
//! POST into bind/unbind operations on a [`Session`], keeping the long poll
//! open until the session releases it.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::dialer;
use crate::error::GatewayError;
use crate::protocol::{self, ParsedHeader};
use crate::session::{registry, spawn_downlink_pump, Session, SessionState};
use crate::state::AppState;

/// Generous cap on a single-shot POST body read (the "session is new" path
/// reads the whole body as the first chunk). Not a protocol limit — purely
/// a guard against an unbounded allocation from a malicious client.
const MAX_FIRST_BODY_BYTES: usize = 1024 * 1024;

pub async fn get_handler(state: AppState, id: String) -> Response {
    let _ = &state; // GET carries no protocol bytes; kept for symmetry/future use.
    let session = registry::REGISTRY.get_or_create(&id);

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let token = session.bind_get(tx).await;
    session.flush_downlink().await;

    let watcher = session.clone();
    tokio::spawn(async move {
        watcher.wait_for_release().await;
        watcher.unbind_get_if_self(token).await;
    });

    streaming_response(rx)
}

pub async fn post_handler(state: AppState, id: String, headers: HeaderMap, body: Body) -> Response {
    let has_content_length = headers.contains_key(header::CONTENT_LENGTH);
    let existed_before = registry::REGISTRY.get(&id).is_some();
    let session = registry::REGISTRY.get_or_create(&id);

    let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
    let post_token = session.bind_post(tx).await;
    session.flush_downlink().await;

    if !existed_before {
        handle_new_session_body(&state, &session, body).await;
    } else {
        handle_existing_session_body(&state, &session, body).await;
    }

    if session.has_download().await && has_content_length {
        // Ack/Divert: a GET is already in place to carry downstream bytes,
        // so this POST can complete immediately instead of holding a
        // second connection open.
        session.unbind_post_if_self(post_token).await;
        return empty_octet_stream_response();
    }

    let watcher = session.clone();
    tokio::spawn(async move {
        watcher.wait_for_release().await;
        watcher.unbind_post_if_self(post_token).await;
    });

    streaming_response(rx)
}

async fn handle_new_session_body(state: &AppState, session: &Arc<Session>, body: Body) {
    session.mark_connecting().await;

    let bytes = match axum::body::to_bytes(body, MAX_FIRST_BODY_BYTES).await {
        Ok(b) => b,
        Err(_) => {
            session.close().await;
            return;
        }
    };

    if bytes.is_empty() {
        // Empty first POST body closes the session without dialing.
        session.close().await;
        return;
    }

    if bootstrap_tunnel(session, state, &bytes).await.is_err() {
        session.close().await;
    }
}

async fn handle_existing_session_body(state: &AppState, session: &Arc<Session>, body: Body) {
    let mut stream = body.into_data_stream();
    while let Some(frame) = stream.next().await {
        let chunk = match frame {
            Ok(c) => c,
            Err(_) => break,
        };

        match session.state().await {
            SessionState::Established | SessionState::Connecting => {
                if session.write_upstream(chunk).await.is_err() {
                    break;
                }
            }
            SessionState::Idle => {
                // Fixed behavior (see SPEC_FULL.md "IDLE→CONNECTING
                // POST-body transition"): treat this chunk as the first
                // chunk instead of discarding it.
                session.mark_connecting().await;
                if bootstrap_tunnel(session, state, &chunk).await.is_err() {
                    session.close().await;
                    break;
                }
            }
            SessionState::Closed => break,
        }
    }
}

/// Parses the first chunk, dials the target, establishes the session, and
/// spawns the target→downlink pump. Shared by the "session is new" and the
/// "existing session was still IDLE" paths.
async fn bootstrap_tunnel(
    session: &Arc<Session>,
    state: &AppState,
    buf: &[u8],
) -> Result<(), GatewayError> {
    let parsed: ParsedHeader = protocol::parse_first_chunk(buf, &state.config.uuid_bytes)?;
    let target = dialer::dial(&parsed.host, parsed.port).await?;
    let (read_half, write_half) = target.into_split();

    session.establish(write_half, &parsed).await?;

    let payload = parsed.initial_payload(buf);
    if !payload.is_empty() {
        session
            .write_upstream(Bytes::copy_from_slice(payload))
            .await?;
    }

    spawn_downlink_pump(session.clone(), read_half);
    Ok(())
}

fn streaming_response(rx: mpsc::UnboundedReceiver<Bytes>) -> Response {
    let stream = UnboundedReceiverStream::new(rx).map(Ok::<Bytes, std::io::Error>);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONNECTION, "keep-alive")
        .header(header::PRAGMA, "no-cache")
        .body(body)
        .unwrap()
        .into_response()
}

fn empty_octet_stream_response() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONNECTION, "keep-alive")
        .header(header::PRAGMA, "no-cache")
        .body(Body::empty())
        .unwrap()
        .into_response()
}
