//! WebSocket transport (spec.md §4.G): a one-shot duplex bridge, not a
//! session. The first binary frame is parsed exactly like an XHTTP first
//! chunk, the target is dialed, and the socket is then bridged verbatim
//! until either side closes. No session registry involvement — the
//! WebSocket connection itself is the tunnel's lifetime.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::dialer;
use crate::protocol;
use crate::state::AppState;

pub async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let first = loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(b))) => break b,
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {
                // Non-binary frames (text, ping/pong handled internally by
                // axum) carry no protocol bytes; a first text/control frame
                // closes the socket without dialing anything.
                let _ = socket.close().await;
                return;
            }
            Some(Err(_)) => return,
        }
    };

    let parsed = match protocol::parse_first_chunk(&first, &state.config.uuid_bytes) {
        Ok(p) => p,
        Err(err) => {
            tracing::debug!(%err, "websocket first frame failed to parse");
            let _ = socket.close().await;
            return;
        }
    };

    let target = match dialer::dial(&parsed.host, parsed.port).await {
        Ok(t) => t,
        Err(err) => {
            tracing::debug!(%err, host = %parsed.host, port = parsed.port, "websocket dial failed");
            let _ = socket.close().await;
            return;
        }
    };
    let (mut target_read, mut target_write) = target.into_split();

    if parsed.needs_handshake() {
        if socket.send(Message::Binary(vec![0x00, 0x00])).await.is_err() {
            return;
        }
    }

    let payload = parsed.initial_payload(&first);
    if !payload.is_empty() && target_write.write_all(payload).await.is_err() {
        return;
    }

    let (mut ws_sink, mut ws_stream) = socket.split();

    let upload = async {
        loop {
            match ws_stream.next().await {
                Some(Ok(Message::Binary(b))) => {
                    if target_write.write_all(&b).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            }
        }
    };

    let download = async {
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            match target_read.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if ws_sink
                        .send(Message::Binary(buf[..n].to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    };

    tokio::select! {
        _ = upload => {}
        _ = download => {}
    }
}
