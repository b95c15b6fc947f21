//! Error kinds for the tunnel gateway.
//!
//! Mirrors the error taxonomy the protocol/session design calls for: parser
//! and dial failures tear a session down silently (no diagnostic body ever
//! reaches the client — that opacity is a security property, not an
//! oversight), while stream-level failures are scoped to the individual
//! half that failed.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("malformed header")]
    MalformedHeader,

    #[error("identifier mismatch")]
    UnknownIdentifier,

    #[error("address resolution failed: {0}")]
    AddressResolutionFailure(#[source] io::Error),

    #[error("dial failed: {0}")]
    DialFailure(#[source] io::Error),

    #[error("stream write failed: {0}")]
    StreamWriteFailure(#[source] io::Error),

    #[error("target connection closed")]
    TargetEof,

    #[error("client disconnected")]
    ClientDisconnect,

    #[error("unexpected framing")]
    UnexpectedFraming,
}

pub type Result<T> = std::result::Result<T, GatewayError>;
