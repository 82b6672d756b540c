//! Connectionless packet framing.
//!
//! Every datagram in either direction starts with four `0xFF` bytes. Outbound
//! packets carry the command text terminated by a newline; inbound packets
//! carry a response-type token, a newline and the payload.

use crate::error::{ProtocolError, Result};

pub const PACKET_PREFIX: [u8; 4] = [0xFF; 4];

/// A validated inbound datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub response_type: String,
    pub payload: String,
}

/// Frames `command` for transmission as a single datagram.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut data = Vec::with_capacity(PACKET_PREFIX.len() + command.len() + 1);
    data.extend_from_slice(&PACKET_PREFIX);
    data.extend_from_slice(command.as_bytes());
    data.push(b'\n');
    data
}

/// Splits a received datagram into its response type and payload.
///
/// The prefix check happens before anything else is looked at, so a datagram
/// from a foreign source is rejected without being partially parsed.
pub fn parse_packet(data: &[u8]) -> Result<RawPacket> {
    if !data.starts_with(&PACKET_PREFIX) {
        return Err(ProtocolError::Malformed("missing packet prefix"));
    }

    let body = &data[PACKET_PREFIX.len()..];
    let newline = body
        .iter()
        .position(|&b| b == b'\n')
        .ok_or(ProtocolError::Malformed("missing line terminator"))?;

    Ok(RawPacket {
        response_type: String::from_utf8_lossy(&body[..newline]).into_owned(),
        payload: String::from_utf8_lossy(&body[newline + 1..]).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_command() {
        let data = encode_command("getstatus");
        assert_eq!(&data[..4], &PACKET_PREFIX);
        assert_eq!(&data[4..], b"getstatus\n");
    }

    #[test]
    fn test_parse_print_response() {
        let mut data = PACKET_PREFIX.to_vec();
        data.extend_from_slice(b"print\nmap: ut4_turnpike\n");

        let packet = parse_packet(&data).unwrap();
        assert_eq!(packet.response_type, "print");
        assert_eq!(packet.payload, "map: ut4_turnpike\n");
    }

    #[test]
    fn test_parse_empty_payload() {
        let mut data = PACKET_PREFIX.to_vec();
        data.extend_from_slice(b"print\n");

        let packet = parse_packet(&data).unwrap();
        assert_eq!(packet.response_type, "print");
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_missing_prefix_is_rejected() {
        let cases: Vec<&[u8]> = vec![
            b"print\nhello",
            b"\xff\xff\xffprint\nhello",
            b"",
            b"xxxx\xff\xff\xff\xffprint\nhello",
        ];

        for data in cases {
            match parse_packet(data) {
                Err(ProtocolError::Malformed(reason)) => {
                    assert_eq!(reason, "missing packet prefix")
                }
                other => panic!("expected Malformed for {:?}, got {:?}", data, other),
            }
        }
    }

    #[test]
    fn test_missing_line_terminator_is_rejected() {
        let mut data = PACKET_PREFIX.to_vec();
        data.extend_from_slice(b"statusResponse");

        match parse_packet(&data) {
            Err(ProtocolError::Malformed(reason)) => assert_eq!(reason, "missing line terminator"),
            other => panic!("expected Malformed, got {:?}", other),
        }
    }
}
