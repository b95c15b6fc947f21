//! Session multiplexer: binds a downstream GET, a downstream POST, and an
//! upstream target TCP connection into one logical full-duplex tunnel
//! addressed by a session id.

pub mod registry;
pub mod session;
pub mod state;

pub use session::{spawn_downlink_pump, Session};
pub use state::SessionState;

/// Cap on buffered chunks per direction. The legacy design buffers both
/// queues unboundedly (spec.md §9 flags this as a known gap); this
/// reimplementation closes the session instead of growing without bound.
pub const MAX_PENDING_CHUNKS: usize = 4096;
