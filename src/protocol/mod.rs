//! Wire protocol decoding: the first upstream chunk of a tunnel is decoded
//! here into a target address, port, and initial payload offset, under one
//! of two supported header formats (V-PROTO, T-PROTO).

pub mod parser;

pub use parser::{parse_first_chunk, ParsedHeader, Variant};
