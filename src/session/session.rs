//! The per-session state machine (spec.md §3, §4.D) together with the
//! downlink routing policy (§4.E), which needs direct access to the same
//! bound-stream bookkeeping and so is implemented here as `Session` methods
//! rather than forced into a separate type.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::error::GatewayError;
use crate::protocol::ParsedHeader;

use super::registry;
use super::state::SessionState;
use super::MAX_PENDING_CHUNKS;

/// A stream currently bound to a role (GET/download or POST). The `token`
/// lets a handler tell, on exit, whether it is still the current occupant
/// of the slot or has already been replaced by a newer bind.
struct Bound {
    token: u64,
    tx: mpsc::UnboundedSender<Bytes>,
}

struct Inner {
    state: SessionState,
    download: Option<Bound>,
    post: Option<Bound>,
    get_token_seq: u64,
    post_token_seq: u64,
    target_tx: Option<OwnedWriteHalf>,
    pending_downlink: VecDeque<(Bytes, bool)>,
    pending_uplink: VecDeque<Bytes>,
}

pub struct Session {
    pub id: String,
    inner: Mutex<Inner>,
    /// Tripped to release any handler currently holding a response open for
    /// this session (on rebind or close).
    pub wait_signal: Notify,
}

impl Session {
    pub fn new(id: String) -> Arc<Self> {
        Arc::new(Session {
            id,
            inner: Mutex::new(Inner {
                state: SessionState::Idle,
                download: None,
                post: None,
                get_token_seq: 0,
                post_token_seq: 0,
                target_tx: None,
                pending_downlink: VecDeque::new(),
                pending_uplink: VecDeque::new(),
            }),
            wait_signal: Notify::new(),
        })
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    pub async fn has_download(&self) -> bool {
        self.inner.lock().await.download.is_some()
    }

    /// Suspends the caller until `wait_signal` trips (rebind elsewhere or
    /// session close), or returns immediately if the session is already
    /// closed. The `Notified` future is created before the state check so a
    /// `close()` racing in between the two is still observed — `Notify`
    /// guarantees a `notify_waiters()` call wakes any `Notified` future that
    /// existed before the call, even if it hasn't been polled yet.
    pub async fn wait_for_release(&self) {
        let notified = self.wait_signal.notified();
        tokio::pin!(notified);
        if self.state().await == SessionState::Closed {
            return;
        }
        notified.as_mut().await;
    }

    // ---- binding (component D: bind/unbind GET and POST) ----

    /// Binds `tx` as the current download (GET) stream, replacing and
    /// dropping any prior binding (which ends that handler's response
    /// stream). Returns the token this binding owns.
    pub async fn bind_get(&self, tx: mpsc::UnboundedSender<Bytes>) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.get_token_seq += 1;
        let token = inner.get_token_seq;
        inner.download = Some(Bound { token, tx });
        token
    }

    pub async fn bind_post(&self, tx: mpsc::UnboundedSender<Bytes>) -> u64 {
        let mut inner = self.inner.lock().await;
        inner.post_token_seq += 1;
        let token = inner.post_token_seq;
        inner.post = Some(Bound { token, tx });
        token
    }

    /// Clears the GET binding, but only if it still belongs to `token` —
    /// otherwise a newer bind has already taken the slot and must not be
    /// disturbed.
    pub async fn unbind_get_if_self(&self, token: u64) {
        let mut inner = self.inner.lock().await;
        if matches!(&inner.download, Some(b) if b.token == token) {
            inner.download = None;
        }
    }

    pub async fn unbind_post_if_self(&self, token: u64) {
        let mut inner = self.inner.lock().await;
        if matches!(&inner.post, Some(b) if b.token == token) {
            inner.post = None;
        }
    }

    // ---- downlink router (component E) ----

    async fn send_get(&self, chunk: &Bytes) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(bound) = &inner.download {
            if bound.tx.send(chunk.clone()).is_ok() {
                return true;
            }
            inner.download = None;
        }
        false
    }

    async fn send_post(&self, chunk: &Bytes) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(bound) = &inner.post {
            if bound.tx.send(chunk.clone()).is_ok() {
                return true;
            }
            inner.post = None;
        }
        false
    }

    async fn buffer_downlink(self: &Arc<Self>, chunk: Bytes, is_handshake: bool) {
        let overflow = {
            let mut inner = self.inner.lock().await;
            if inner.pending_downlink.len() >= MAX_PENDING_CHUNKS {
                true
            } else {
                inner.pending_downlink.push_back((chunk, is_handshake));
                false
            }
        };
        if overflow {
            tracing::warn!(session = %self.id, "pending_downlink overflowed, closing session");
            self.close().await;
        }
    }

    /// `route(chunk, is_handshake)`: handshake bytes broadcast to both
    /// bound streams; regular bytes try GET then POST; anything unsent is
    /// buffered for the next bind to flush.
    pub async fn route_downlink(self: &Arc<Self>, chunk: Bytes, is_handshake: bool) {
        let sent = if is_handshake {
            let to_get = self.send_get(&chunk).await;
            let to_post = self.send_post(&chunk).await;
            to_get || to_post
        } else {
            self.send_get(&chunk).await || self.send_post(&chunk).await
        };
        if !sent {
            self.buffer_downlink(chunk, is_handshake).await;
        }
    }

    /// Replays buffered downlink through the router, in order. Invoked on
    /// every new GET/POST binding.
    pub async fn flush_downlink(self: &Arc<Self>) {
        let drained: Vec<(Bytes, bool)> = {
            let mut inner = self.inner.lock().await;
            inner.pending_downlink.drain(..).collect()
        };
        for (chunk, is_handshake) in drained {
            self.route_downlink(chunk, is_handshake).await;
        }
    }

    // ---- uplink / target lifecycle (component D) ----

    pub async fn mark_connecting(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Idle {
            inner.state = SessionState::Connecting;
        }
    }

    /// Writes (or queues, while CONNECTING) an upstream chunk, preserving
    /// arrival order.
    pub async fn write_upstream(self: &Arc<Self>, chunk: Bytes) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Established => {
                let writer = inner
                    .target_tx
                    .as_mut()
                    .ok_or(GatewayError::TargetEof)?;
                writer
                    .write_all(&chunk)
                    .await
                    .map_err(GatewayError::StreamWriteFailure)
            }
            SessionState::Connecting => {
                if inner.pending_uplink.len() >= MAX_PENDING_CHUNKS {
                    drop(inner);
                    self.close().await;
                    return Err(GatewayError::UnexpectedFraming);
                }
                inner.pending_uplink.push_back(chunk);
                Ok(())
            }
            // A chunk reaching an IDLE or CLOSED session without going
            // through the CONNECTING handshake path is simply dropped;
            // callers are expected to route a session's first chunk through
            // `establish` instead of `write_upstream`.
            SessionState::Idle | SessionState::Closed => Ok(()),
        }
    }

    /// Transition CONNECTING -> ESTABLISHED: records the dialed target,
    /// sends the V-PROTO handshake (if applicable) ahead of any
    /// target-origin bytes, then drains `pending_uplink` in FIFO order
    /// before returning control to the caller (who writes the trailing
    /// initial payload next).
    pub async fn establish(
        self: &Arc<Self>,
        writer: OwnedWriteHalf,
        parsed: &ParsedHeader,
    ) -> Result<(), GatewayError> {
        let queued: VecDeque<Bytes> = {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Established;
            inner.target_tx = Some(writer);
            std::mem::take(&mut inner.pending_uplink)
        };

        if parsed.needs_handshake() {
            self.route_downlink(Bytes::from_static(&[0x00, 0x00]), true)
                .await;
        }

        for chunk in queued {
            self.write_upstream(chunk).await?;
        }
        Ok(())
    }

    // ---- close cascade (component D) ----

    /// Idempotent: trips `wait_signal`, closes the target writer, and
    /// removes the session from the registry. Safe to call more than once.
    pub async fn close(self: &Arc<Self>) {
        let (writer, already_closed) = {
            let mut inner = self.inner.lock().await;
            if inner.state == SessionState::Closed {
                (None, true)
            } else {
                inner.state = SessionState::Closed;
                inner.download = None;
                inner.post = None;
                (inner.target_tx.take(), false)
            }
        };
        if already_closed {
            return;
        }
        if let Some(mut w) = writer {
            let _ = w.shutdown().await;
        }
        self.wait_signal.notify_waiters();
        registry::REGISTRY.remove(&self.id);
    }
}

/// Spawns the background task that pumps target → downlink bytes for an
/// ESTABLISHED session, closing the session on target EOF or read error.
/// Downstream bytes are pushed through the same router used for the
/// handshake broadcast, so ordering and buffering rules apply uniformly.
pub fn spawn_downlink_pump(session: Arc<Session>, mut reader: tokio::net::tcp::OwnedReadHalf) {
    use tokio::io::AsyncReadExt;

    tokio::spawn(async move {
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    session
                        .route_downlink(Bytes::copy_from_slice(&buf[..n]), false)
                        .await;
                }
                Err(err) => {
                    tracing::debug!(session = %session.id, %err, "target read failed");
                    break;
                }
            }
        }
        session.close().await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(bytes: &[u8]) -> Bytes {
        Bytes::copy_from_slice(bytes)
    }

    #[tokio::test]
    async fn buffers_uplink_while_connecting() {
        let session = Session::new("s1".into());
        session.mark_connecting().await;
        session.write_upstream(chunk(b"a")).await.unwrap();
        session.write_upstream(chunk(b"b")).await.unwrap();
        assert_eq!(session.state().await, SessionState::Connecting);
        let inner = session.inner.lock().await;
        assert_eq!(inner.pending_uplink.len(), 2);
    }

    #[tokio::test]
    async fn route_buffers_when_no_stream_bound() {
        let session = Session::new("s2".into());
        session.route_downlink(chunk(b"hello"), false).await;
        let inner = session.inner.lock().await;
        assert_eq!(inner.pending_downlink.len(), 1);
        assert_eq!(inner.pending_downlink[0].0, chunk(b"hello"));
    }

    #[tokio::test]
    async fn flush_delivers_buffered_downlink_to_new_get_bind() {
        let session = Session::new("s3".into());
        session.route_downlink(chunk(b"x"), false).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        session.bind_get(tx).await;
        session.flush_downlink().await;

        let got = rx.recv().await.unwrap();
        assert_eq!(got, chunk(b"x"));
    }

    #[tokio::test]
    async fn handshake_broadcasts_to_both_streams() {
        let session = Session::new("s4".into());
        let (get_tx, mut get_rx) = mpsc::unbounded_channel();
        let (post_tx, mut post_rx) = mpsc::unbounded_channel();
        session.bind_get(get_tx).await;
        session.bind_post(post_tx).await;

        session
            .route_downlink(Bytes::from_static(&[0, 0]), true)
            .await;

        assert_eq!(get_rx.recv().await.unwrap().as_ref(), &[0, 0]);
        assert_eq!(post_rx.recv().await.unwrap().as_ref(), &[0, 0]);
    }

    #[tokio::test]
    async fn rebind_drops_prior_stream_without_racing_unbind() {
        let session = Session::new("s5".into());
        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let token1 = session.bind_get(tx1).await;

        let (tx2, _rx2) = mpsc::unbounded_channel();
        session.bind_get(tx2).await;

        // old sender was replaced and dropped, so its receiver observes closure
        assert!(rx1.recv().await.is_none());

        // the stale handler's unbind must not clobber the new binding
        session.unbind_get_if_self(token1).await;
        let inner = session.inner.lock().await;
        assert!(inner.download.is_some());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let session = Session::new("s6".into());
        session.close().await;
        session.close().await;
        assert_eq!(session.state().await, SessionState::Closed);
    }
}
