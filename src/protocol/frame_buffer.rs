//! Reassembly of frames from a raw byte stream.
//!
//! Uses `bytes::BytesMut` for buffer management and a two-state machine:
//! - `WaitingForLength`: need the 4-byte length prefix (it may arrive split)
//! - `WaitingForPayload`: prefix parsed, need N more payload bytes
//!
//! # Example
//!
//! ```
//! use peerwire::protocol::{FrameBuffer, Packet};
//!
//! let frame = Packet::HealthCheck.to_frame();
//! let mut buffer = FrameBuffer::new();
//!
//! assert!(buffer.push(&frame[..2]).unwrap().is_empty());
//! let payloads = buffer.push(&frame[2..]).unwrap();
//! assert_eq!(Packet::decode(&payloads[0]).unwrap(), Packet::HealthCheck);
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{
    decode_length_prefix, validate_length, DEFAULT_MAX_PAYLOAD_SIZE, LENGTH_PREFIX_SIZE,
};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForLength,
    WaitingForPayload { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete payloads.
///
/// A payload is handed out only when exactly the declared number of bytes has
/// arrived. Each returned `Bytes` is one packet: kind byte plus fields, length
/// prefix stripped.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_payload_size: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default maximum payload size.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a new frame buffer with a custom maximum payload size.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8 * 1024),
            state: State::WaitingForLength,
            max_payload_size,
        }
    }

    /// Push data into the buffer and extract all complete payloads.
    ///
    /// # Errors
    ///
    /// Returns a protocol error if a declared length is zero, negative or
    /// above the maximum. The stream is desynchronized at that point and the
    /// caller is expected to close the connection. Callers that must still
    /// deliver the payloads completed before the bad prefix use
    /// [`extend`](Self::extend) and [`next_payload`](Self::next_payload).
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.extend(data);

        let mut payloads = Vec::new();
        while let Some(payload) = self.next_payload()? {
            payloads.push(payload);
        }
        Ok(payloads)
    }

    /// Append raw bytes without extracting anything.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Extract the next complete payload, if one is buffered.
    ///
    /// Payloads returned before an `Err` are intact. After an error the
    /// buffer should not be read again.
    pub fn next_payload(&mut self) -> Result<Option<Bytes>> {
        self.try_extract_one()
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForLength => {
                    let declared = match decode_length_prefix(&self.buffer) {
                        Some(declared) => declared,
                        None => return Ok(None),
                    };
                    let len = validate_length(declared, self.max_payload_size)?;

                    let _ = self.buffer.split_to(LENGTH_PREFIX_SIZE);
                    self.state = State::WaitingForPayload { remaining: len };
                }

                State::WaitingForPayload { remaining } => {
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let payload = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForLength;
                    return Ok(Some(payload));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encode_length_prefix;

    fn make_frame_bytes(payload: &[u8]) -> Vec<u8> {
        let mut bytes = encode_length_prefix(payload.len()).to_vec();
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frames = buffer.push(&make_frame_bytes(b"\x05")).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\x05");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();

        let mut combined = Vec::new();
        combined.extend(make_frame_bytes(b"first"));
        combined.extend(make_frame_bytes(b"second"));
        combined.extend(make_frame_bytes(b"third"));

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(&frames[2][..], b"third");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_split_length_prefix() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(b"test");

        let frames = buffer.push(&frame_bytes[..3]).unwrap();
        assert!(frames.is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let frames = buffer.push(&frame_bytes[3..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"test");
    }

    #[test]
    fn test_fragmented_payload() {
        let mut buffer = FrameBuffer::new();
        let payload = b"this is a longer payload that will be fragmented";
        let frame_bytes = make_frame_bytes(payload);

        let partial_len = LENGTH_PREFIX_SIZE + 10;
        assert!(buffer.push(&frame_bytes[..partial_len]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&frame_bytes[partial_len..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], payload);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_length_is_error() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&[0, 0, 0, 0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_negative_length_is_error() {
        let mut buffer = FrameBuffer::new();
        let result = buffer.push(&[0xFE, 0xFF, 0xFF, 0xFF, 1, 2, 3]);
        assert!(result.is_err());
    }

    #[test]
    fn test_frame_before_bad_length_still_extracted() {
        let mut buffer = FrameBuffer::new();
        let mut data = make_frame_bytes(b"\x05");
        data.extend_from_slice(&[0, 0, 0, 0]);

        buffer.extend(&data);
        let first = buffer.next_payload().unwrap();
        assert_eq!(first.as_deref(), Some(&b"\x05"[..]));
        assert!(buffer.next_payload().is_err());
    }

    #[test]
    fn test_max_payload_validation() {
        let mut buffer = FrameBuffer::with_max_payload(100);
        let result = buffer.push(&encode_length_prefix(1000));

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let frame_bytes = make_frame_bytes(b"test");

        buffer.push(&frame_bytes[..LENGTH_PREFIX_SIZE + 1]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForPayload");
        assert_eq!(buffer.len(), 1);

        buffer.clear();

        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();

        let frame1 = make_frame_bytes(b"first");
        let frame2 = make_frame_bytes(b"second");

        let mut data = frame1.clone();
        data.extend_from_slice(&frame2[..5]);

        let frames = buffer.push(&data).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(buffer.state_name(), "WaitingForPayload");

        let frames = buffer.push(&frame2[5..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"second");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut stream = make_frame_bytes(b"hi");
        stream.extend(make_frame_bytes(b"there"));

        let mut all_frames = Vec::new();
        for byte in &stream {
            all_frames.extend(buffer.push(&[*byte]).unwrap());
        }

        assert_eq!(all_frames.len(), 2);
        assert_eq!(&all_frames[0][..], b"hi");
        assert_eq!(&all_frames[1][..], b"there");
    }

    #[test]
    fn test_every_split_point_yields_same_frames() {
        let mut stream = Vec::new();
        for payload in [&b"a"[..], b"bcdef", b"ghij"] {
            stream.extend(make_frame_bytes(payload));
        }

        for split in 0..=stream.len() {
            let mut buffer = FrameBuffer::new();
            let mut frames = buffer.push(&stream[..split]).unwrap();
            frames.extend(buffer.push(&stream[split..]).unwrap());

            let got: Vec<&[u8]> = frames.iter().map(|f| &f[..]).collect();
            assert_eq!(got, vec![&b"a"[..], b"bcdef", b"ghij"], "split at {}", split);
        }
    }
}
