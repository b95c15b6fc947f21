//! Environment-driven configuration.
//!
//! Kept deliberately small: a tunnel gateway only has three knobs (the
//! shared identifier, the listen port, and the XHTTP path prefix), so this
//! reads them straight from the process environment rather than pulling in
//! a layered config system.

use std::env;

/// Fallback identifier used when `UUID` is unset. Not a secret — just a
/// stand-in so the binary is runnable out of the box.
const DEFAULT_UUID: &str = "0d336857-c2b9-45b0-8c67-0b0b58e9c9d2";
const DEFAULT_PORT: u16 = 3241;

#[derive(Debug, Clone)]
pub struct Config {
    /// The 36-char dashed identifier, verbatim (used for deriving `wspath`).
    pub uuid_str: String,
    /// The identifier decoded to 16 raw bytes, as V-PROTO compares it.
    pub uuid_bytes: [u8; 16],
    pub port: u16,
    pub wspath: String,
}

impl Config {
    pub fn from_env() -> Self {
        let uuid_str = env::var("UUID").unwrap_or_else(|_| DEFAULT_UUID.to_string());

        let uuid_bytes = parse_uuid(&uuid_str).unwrap_or_else(|| {
            tracing::warn!(uuid = %uuid_str, "UUID is not a valid dashed identifier, falling back to default");
            parse_uuid(DEFAULT_UUID).expect("DEFAULT_UUID is well-formed")
        });

        let port = env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let wspath = env::var("WSPATH").unwrap_or_else(|_| {
            uuid_str.chars().take(8).collect::<String>()
        });

        Config {
            uuid_str,
            uuid_bytes,
            port,
            wspath,
        }
    }
}

/// Parses a dashed UUID string into its 16 raw bytes, in the same byte
/// order V-PROTO compares against. Returns `None` on any malformed input
/// rather than panicking — config parsing is a startup-time best-effort,
/// not a protocol boundary.
fn parse_uuid(s: &str) -> Option<[u8; 16]> {
    uuid::Uuid::parse_str(s).ok().map(|u| u.into_bytes())
}
