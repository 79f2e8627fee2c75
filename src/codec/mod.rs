//! Codec module - serialization of headers and bodies.
//!
//! Payloads are structured text. [`JsonCodec`] is the codec used by the
//! router and the correlation engine.
//!
//! # Design
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the payload type is fixed at the call site.

mod json;

pub use json::{JsonCodec, NULL_PAYLOAD};
