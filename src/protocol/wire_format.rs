//! Wire format of a frame.
//!
//! Every packet travels as one frame:
//! ```text
//! ┌──────────┬──────┬──────────────────────┐
//! │ Length   │ Kind │ Kind-specific fields │
//! │ 4 bytes  │ 1    │ Length - 1 bytes     │
//! │ u32 LE   │      │                      │
//! └──────────┴──────┴──────────────────────┘
//! ```
//!
//! `Length` counts everything after itself, so it is never zero for a
//! well-formed frame. It is decoded as a signed value; zero or negative
//! lengths are protocol errors.

use crate::error::{PeerwireError, Result};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Encode a payload length as a prefix.
#[inline]
pub fn encode_length_prefix(payload_len: usize) -> [u8; LENGTH_PREFIX_SIZE] {
    (payload_len as u32).to_le_bytes()
}

/// Decode a length prefix.
///
/// Returns `None` if fewer than 4 bytes are available.
#[inline]
pub fn decode_length_prefix(bytes: &[u8]) -> Option<i32> {
    let raw: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(i32::from_le_bytes(raw))
}

/// Validate a declared payload length against the configured maximum.
pub fn validate_length(declared: i32, max_payload_size: usize) -> Result<usize> {
    if declared <= 0 {
        return Err(PeerwireError::Protocol(format!(
            "Invalid frame length {}",
            declared
        )));
    }
    let len = declared as usize;
    if len > max_payload_size {
        return Err(PeerwireError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            len, max_payload_size
        )));
    }
    Ok(len)
}
