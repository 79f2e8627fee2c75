//! Packet kinds and their field layouts.
//!
//! | Kind | Byte | Fields |
//! |------|------|--------|
//! | `BeginHandshake` | 0 | - |
//! | `IdToken` | 1 | token: string |
//! | `ClientIdentified` | 2 | client_id: u32, token: string |
//! | `Method` | 3 | seq: u32, path: string, headers: string, body: string |
//! | `MethodResponse` | 4 | seq: u32, status: i32, headers: string, body: string |
//! | `HealthCheck` | 5 | - |
//! | `HealthCheckResponse` | 6 | - |

use bytes::Bytes;

use super::wire_format::LENGTH_PREFIX_SIZE;
use crate::buffer::ByteBuffer;
use crate::error::{PeerwireError, Result};

/// One-byte packet discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketKind {
    BeginHandshake = 0,
    IdToken = 1,
    ClientIdentified = 2,
    Method = 3,
    MethodResponse = 4,
    HealthCheck = 5,
    HealthCheckResponse = 6,
}

impl TryFrom<u8> for PacketKind {
    type Error = PeerwireError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => PacketKind::BeginHandshake,
            1 => PacketKind::IdToken,
            2 => PacketKind::ClientIdentified,
            3 => PacketKind::Method,
            4 => PacketKind::MethodResponse,
            5 => PacketKind::HealthCheck,
            6 => PacketKind::HealthCheckResponse,
            other => {
                return Err(PeerwireError::Protocol(format!(
                    "Unknown packet kind {}",
                    other
                )))
            }
        })
    }
}

/// A decoded packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    BeginHandshake,
    IdToken {
        token: String,
    },
    ClientIdentified {
        client_id: u32,
        token: String,
    },
    Method {
        seq: u32,
        path: String,
        headers: String,
        body: String,
    },
    MethodResponse {
        seq: u32,
        status: i32,
        headers: String,
        body: String,
    },
    HealthCheck,
    HealthCheckResponse,
}

impl Packet {
    /// The discriminator of this packet.
    pub fn kind(&self) -> PacketKind {
        match self {
            Packet::BeginHandshake => PacketKind::BeginHandshake,
            Packet::IdToken { .. } => PacketKind::IdToken,
            Packet::ClientIdentified { .. } => PacketKind::ClientIdentified,
            Packet::Method { .. } => PacketKind::Method,
            Packet::MethodResponse { .. } => PacketKind::MethodResponse,
            Packet::HealthCheck => PacketKind::HealthCheck,
            Packet::HealthCheckResponse => PacketKind::HealthCheckResponse,
        }
    }

    /// Encode kind and fields into `buf` at its cursor.
    pub fn encode_into(&self, buf: &mut ByteBuffer) {
        buf.write_u8(self.kind() as u8);
        match self {
            Packet::BeginHandshake | Packet::HealthCheck | Packet::HealthCheckResponse => {}
            Packet::IdToken { token } => buf.write_str(token),
            Packet::ClientIdentified { client_id, token } => {
                buf.write_u32(*client_id);
                buf.write_str(token);
            }
            Packet::Method {
                seq,
                path,
                headers,
                body,
            } => {
                buf.write_u32(*seq);
                buf.write_str(path);
                buf.write_str(headers);
                buf.write_str(body);
            }
            Packet::MethodResponse {
                seq,
                status,
                headers,
                body,
            } => {
                buf.write_u32(*seq);
                buf.write_i32(*status);
                buf.write_str(headers);
                buf.write_str(body);
            }
        }
    }

    /// Build the complete frame: length prefix followed by the packet.
    pub fn to_frame(&self) -> Bytes {
        let mut buf = ByteBuffer::with_capacity(LENGTH_PREFIX_SIZE + self.encoded_size_hint());
        buf.write_u32(0);
        self.encode_into(&mut buf);

        let payload_len = (buf.len() - LENGTH_PREFIX_SIZE) as u32;
        // The placeholder was written above, so the patch is always in range.
        let _ = buf.write_u32_at(0, payload_len);
        Bytes::from(buf.into_vec())
    }

    /// Decode a packet from a reassembled payload (kind byte first).
    pub fn decode(payload: &[u8]) -> Result<Packet> {
        let mut buf = ByteBuffer::from_slice(payload);
        let kind = PacketKind::try_from(buf.read_u8()?)?;

        Ok(match kind {
            PacketKind::BeginHandshake => Packet::BeginHandshake,
            PacketKind::IdToken => Packet::IdToken {
                token: buf.read_str()?,
            },
            PacketKind::ClientIdentified => Packet::ClientIdentified {
                client_id: buf.read_u32()?,
                token: buf.read_str()?,
            },
            PacketKind::Method => Packet::Method {
                seq: buf.read_u32()?,
                path: buf.read_str()?,
                headers: buf.read_str()?,
                body: buf.read_str()?,
            },
            PacketKind::MethodResponse => Packet::MethodResponse {
                seq: buf.read_u32()?,
                status: buf.read_i32()?,
                headers: buf.read_str()?,
                body: buf.read_str()?,
            },
            PacketKind::HealthCheck => Packet::HealthCheck,
            PacketKind::HealthCheckResponse => Packet::HealthCheckResponse,
        })
    }

    fn encoded_size_hint(&self) -> usize {
        let strings = match self {
            Packet::IdToken { token } => ByteBuffer::string_size(token),
            Packet::ClientIdentified { token, .. } => 4 + ByteBuffer::string_size(token),
            Packet::Method {
                path,
                headers,
                body,
                ..
            } => {
                4 + ByteBuffer::string_size(path)
                    + ByteBuffer::string_size(headers)
                    + ByteBuffer::string_size(body)
            }
            Packet::MethodResponse { headers, body, .. } => {
                8 + ByteBuffer::string_size(headers) + ByteBuffer::string_size(body)
            }
            _ => 0,
        };
        1 + strings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_length_prefix;

    #[test]
    fn test_empty_packet_frame() {
        let frame = Packet::BeginHandshake.to_frame();
        assert_eq!(&frame[..], &[1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_length_counts_everything_after_prefix() {
        let packet = Packet::Method {
            seq: 7,
            path: "/a/b".into(),
            headers: "{}".into(),
            body: "null".into(),
        };
        let frame = packet.to_frame();

        let declared = decode_length_prefix(&frame).unwrap() as usize;
        assert_eq!(declared, frame.len() - LENGTH_PREFIX_SIZE);
        assert_eq!(frame[LENGTH_PREFIX_SIZE], PacketKind::Method as u8);
    }

    #[test]
    fn test_method_response_decodes() {
        let packet = Packet::MethodResponse {
            seq: u32::MAX,
            status: 404,
            headers: "{\"k\":\"v\"}".into(),
            body: "\"missing\"".into(),
        };
        let frame = packet.to_frame();
        let decoded = Packet::decode(&frame[LENGTH_PREFIX_SIZE..]).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_client_identified_layout() {
        let packet = Packet::ClientIdentified {
            client_id: 3,
            token: "ab".into(),
        };
        let frame = packet.to_frame();
        assert_eq!(&frame[LENGTH_PREFIX_SIZE..], &[2, 3, 0, 0, 0, b'a', b'b', 0xFF]);
    }

    #[test]
    fn test_unknown_kind() {
        let err = Packet::decode(&[42]).unwrap_err();
        assert!(err.to_string().contains("Unknown packet kind 42"));
    }

    #[test]
    fn test_truncated_fields() {
        // Method kind with only two bytes of the sequence number
        assert!(Packet::decode(&[3, 1, 0]).is_err());
        // IdToken without terminator
        assert!(Packet::decode(&[1, b'a', b'b']).is_err());
    }

    #[test]
    fn test_kind_discriminators() {
        for byte in 0u8..=6 {
            let kind = PacketKind::try_from(byte).unwrap();
            assert_eq!(kind as u8, byte);
        }
        assert!(PacketKind::try_from(7).is_err());
    }
}
