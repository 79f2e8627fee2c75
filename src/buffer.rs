//! Growable byte buffer with a typed read/write cursor.
//!
//! This is the primitive every packet is built from. All multi-byte integers
//! and floats are little-endian. Strings are UTF-8 followed by a single
//! [`STRING_TERMINATOR`] byte:
//!
//! ```text
//! ┌───────────────────────┬──────┐
//! │ UTF-8 bytes           │ 0xFF │
//! │ N bytes               │ 1    │
//! └───────────────────────┴──────┘
//! ```
//!
//! `0xFF` never occurs in well-formed UTF-8, so any `&str` can be written.
//! Peers that smuggle a raw `0xFF` inside string bytes will desynchronize the
//! field decoder; that is a limitation of the format.
//!
//! # Example
//!
//! ```
//! use peerwire::buffer::ByteBuffer;
//!
//! let mut buf = ByteBuffer::new();
//! buf.write_u32(0); // placeholder
//! buf.write_str("hello");
//! let len = (buf.len() - 4) as u32;
//! buf.write_u32_at(0, len).unwrap();
//!
//! let mut reader = ByteBuffer::from_vec(buf.into_vec());
//! assert_eq!(reader.read_u32().unwrap(), 6);
//! assert_eq!(reader.read_str().unwrap(), "hello");
//! ```

use crate::error::{PeerwireError, Result};

/// Byte that terminates every encoded string.
pub const STRING_TERMINATOR: u8 = 0xFF;

/// Default initial capacity.
const DEFAULT_CAPACITY: usize = 64;

/// A byte buffer with a single cursor shared by reads and writes.
///
/// Writes at the cursor overwrite existing bytes and extend the buffer when
/// they run past the end. When the backing storage is full its capacity is
/// doubled until the write fits; existing content and cursor are preserved.
#[derive(Debug, Clone, Default)]
pub struct ByteBuffer {
    data: Vec<u8>,
    position: usize,
}

macro_rules! primitive_rw {
    ($($write:ident, $read:ident, $ty:ty;)*) => {
        $(
            #[doc = concat!("Write a `", stringify!($ty), "` at the cursor.")]
            #[inline]
            pub fn $write(&mut self, value: $ty) {
                self.write_bytes(&value.to_le_bytes());
            }

            #[doc = concat!("Read a `", stringify!($ty), "` at the cursor.")]
            #[inline]
            pub fn $read(&mut self) -> Result<$ty> {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(self.take(std::mem::size_of::<$ty>())?);
                Ok(<$ty>::from_le_bytes(raw))
            }
        )*
    };
}

impl ByteBuffer {
    /// Create an empty buffer with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            position: 0,
        }
    }

    /// Wrap existing bytes for reading; the cursor starts at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, position: 0 }
    }

    /// Copy a slice into a new buffer for reading.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity of the backing storage.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Current cursor position.
    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes left between the cursor and the end.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to an absolute position within the written bytes.
    pub fn seek(&mut self, position: usize) -> Result<()> {
        if position > self.data.len() {
            return Err(PeerwireError::Protocol(format!(
                "Seek to {} beyond buffer length {}",
                position,
                self.data.len()
            )));
        }
        self.position = position;
        Ok(())
    }

    /// Borrow the written bytes.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the buffer, returning the written bytes.
    #[inline]
    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    primitive_rw! {
        write_u8, read_u8, u8;
        write_i8, read_i8, i8;
        write_u16, read_u16, u16;
        write_i16, read_i16, i16;
        write_u32, read_u32, u32;
        write_i32, read_i32, i32;
        write_u64, read_u64, u64;
        write_i64, read_i64, i64;
        write_f32, read_f32, f32;
    }

    /// Write raw bytes at the cursor.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        let end = self.position + bytes.len();
        self.reserve_doubling(end);

        let overlap = self.data.len().saturating_sub(self.position).min(bytes.len());
        self.data[self.position..self.position + overlap].copy_from_slice(&bytes[..overlap]);
        self.data.extend_from_slice(&bytes[overlap..]);
        self.position = end;
    }

    /// Write a terminated UTF-8 string at the cursor.
    pub fn write_str(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
        self.write_u8(STRING_TERMINATOR);
    }

    /// Read `len` raw bytes at the cursor.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    /// Read a terminated UTF-8 string at the cursor.
    ///
    /// The cursor ends up just past the terminator.
    pub fn read_str(&mut self) -> Result<String> {
        let rest = &self.data[self.position..];
        let len = rest
            .iter()
            .position(|&b| b == STRING_TERMINATOR)
            .ok_or_else(|| {
                PeerwireError::Protocol(format!(
                    "Unterminated string at offset {}",
                    self.position
                ))
            })?;

        let value = std::str::from_utf8(&rest[..len])
            .map_err(|e| PeerwireError::Protocol(format!("Invalid UTF-8 in string: {}", e)))?
            .to_string();
        self.position += len + 1;
        Ok(value)
    }

    /// Overwrite already-written bytes at `offset` without moving the cursor.
    pub fn overwrite_at(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset + bytes.len();
        if end > self.data.len() {
            return Err(PeerwireError::Protocol(format!(
                "Overwrite of {} bytes at {} exceeds buffer length {}",
                bytes.len(),
                offset,
                self.data.len()
            )));
        }
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Patch a `u32` at `offset`, typically a length prefix written as a placeholder.
    pub fn write_u32_at(&mut self, offset: usize, value: u32) -> Result<()> {
        self.overwrite_at(offset, &value.to_le_bytes())
    }

    /// Encoded size of a string, terminator included.
    #[inline]
    pub fn string_size(value: &str) -> usize {
        value.len() + 1
    }

    fn take(&mut self, len: usize) -> Result<&[u8]> {
        if self.remaining() < len {
            return Err(PeerwireError::Protocol(format!(
                "Read of {} bytes at offset {} exceeds buffer length {}",
                len,
                self.position,
                self.data.len()
            )));
        }
        let start = self.position;
        self.position += len;
        Ok(&self.data[start..start + len])
    }

    fn reserve_doubling(&mut self, needed: usize) {
        let capacity = self.data.capacity();
        if needed <= capacity {
            return;
        }
        let mut new_capacity = capacity.max(1);
        while new_capacity < needed {
            new_capacity *= 2;
        }
        self.data.reserve_exact(new_capacity - self.data.len());
    }
}
