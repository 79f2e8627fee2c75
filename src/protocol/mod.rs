//! Protocol module - wire format, framing, and packet types.
//!
//! This module implements the binary protocol spoken over each connection:
//! - 4-byte length prefix encoding/decoding
//! - Frame buffer for reassembling fragmented reads
//! - Packet enum with field-level encode/decode

mod frame_buffer;
mod packet;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use packet::{Packet, PacketKind};
pub use wire_format::{
    decode_length_prefix, encode_length_prefix, validate_length, DEFAULT_MAX_PAYLOAD_SIZE,
    LENGTH_PREFIX_SIZE,
};
