//! HTTP surface: the root dispatcher (component H) and the three things it
//! can route a request to — the static landing page, the WebSocket upgrade,
//! and the XHTTP GET/POST handlers.

pub mod dispatch;
pub mod static_page;
pub mod ws;
pub mod xhttp;

pub use dispatch::root_handler;
