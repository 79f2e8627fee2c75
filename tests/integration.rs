//! Integration tests for the wire layer.
//!
//! These tests drive packets through the framer and JSON codec the way
//! they cross a socket, without a transport.

use std::collections::HashMap;

use peerwire::codec::JsonCodec;
use peerwire::protocol::{FrameBuffer, Packet, PacketKind, LENGTH_PREFIX_SIZE};

/// A method call with JSON headers and body survives framing.
#[test]
fn test_method_packet_with_json_payloads() {
    #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Order {
        id: i32,
        item: String,
    }

    let order = Order {
        id: 42,
        item: "tea".to_string(),
    };
    let mut headers = HashMap::new();
    headers.insert("trace".to_string(), "abc".to_string());

    let packet = Packet::Method {
        seq: 7,
        path: "/orders/place".into(),
        headers: JsonCodec::encode(&headers).unwrap(),
        body: JsonCodec::encode(&order).unwrap(),
    };
    let frame = packet.to_frame();

    let mut buffer = FrameBuffer::new();
    let payloads = buffer.push(&frame).unwrap();
    assert_eq!(payloads.len(), 1);

    match Packet::decode(&payloads[0]).unwrap() {
        Packet::Method {
            seq,
            path,
            headers: raw_headers,
            body,
        } => {
            assert_eq!(seq, 7);
            assert_eq!(path, "/orders/place");
            let decoded: HashMap<String, String> = JsonCodec::decode(&raw_headers).unwrap();
            assert_eq!(decoded, headers);
            assert_eq!(JsonCodec::decode::<Order>(&body).unwrap(), order);
        }
        other => panic!("unexpected packet {:?}", other),
    }
}

/// A whole handshake plus a call, concatenated and fed byte by byte.
#[test]
fn test_conversation_split_into_single_bytes() {
    let conversation = vec![
        Packet::BeginHandshake,
        Packet::IdToken {
            token: String::new(),
        },
        Packet::ClientIdentified {
            client_id: 1,
            token: "t0k3n".into(),
        },
        Packet::Method {
            seq: 0,
            path: "/echo".into(),
            headers: "{}".into(),
            body: "\"hi\"".into(),
        },
        Packet::MethodResponse {
            seq: 0,
            status: 200,
            headers: "{}".into(),
            body: "\"hi\"".into(),
        },
        Packet::HealthCheck,
        Packet::HealthCheckResponse,
    ];

    let stream: Vec<u8> = conversation
        .iter()
        .flat_map(|packet| packet.to_frame().to_vec())
        .collect();

    let mut buffer = FrameBuffer::new();
    let mut decoded = Vec::new();
    for byte in &stream {
        for payload in buffer.push(std::slice::from_ref(byte)).unwrap() {
            decoded.push(Packet::decode(&payload).unwrap());
        }
    }

    assert_eq!(decoded, conversation);
    assert!(buffer.is_empty());
}

/// An absent body travels as the JSON literal `null`.
#[test]
fn test_absent_body_is_null_literal() {
    let packet = Packet::MethodResponse {
        seq: 1,
        status: 404,
        headers: JsonCodec::encode_lenient::<HashMap<String, String>>(None, "headers"),
        body: "null".into(),
    };
    let frame = packet.to_frame();
    let payload = &frame[LENGTH_PREFIX_SIZE..];
    assert_eq!(payload[0], PacketKind::MethodResponse as u8);

    match Packet::decode(payload).unwrap() {
        Packet::MethodResponse { headers, body, .. } => {
            assert_eq!(headers, "null");
            assert_eq!(body, "null");
            assert_eq!(JsonCodec::decode_lenient::<String>(&body, "body"), None);
        }
        other => panic!("unexpected packet {:?}", other),
    }
}

/// An oversized length is rejected before any payload arrives.
#[test]
fn test_oversized_frame_rejected() {
    let mut buffer = FrameBuffer::with_max_payload(64);
    let prefix = 65u32.to_le_bytes();
    assert!(buffer.push(&prefix).is_err());
}

/// An unknown packet kind fails decoding but the framer stays usable.
#[test]
fn test_unknown_kind_does_not_poison_stream() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes());
    bytes.push(99);
    bytes.extend_from_slice(&Packet::HealthCheck.to_frame());

    let mut buffer = FrameBuffer::new();
    let payloads = buffer.push(&bytes).unwrap();
    assert_eq!(payloads.len(), 2);
    assert!(Packet::decode(&payloads[0]).is_err());
    assert_eq!(Packet::decode(&payloads[1]).unwrap(), Packet::HealthCheck);
}
