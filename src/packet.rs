use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::util;

pub const ECHO_REQUEST_V4: u8 = 8;
pub const ECHO_REPLY_V4: u8 = 0;

pub const ICMP_HEADER_LEN: usize = 8;
/// Replies are parsed assuming an IPv4 header without options.
pub const IPV4_HEADER_LEN: usize = 20;
/// Shortest datagram we will pull fields out of: IPv4 header + ICMP echo header.
pub const MIN_REPLY_LEN: usize = IPV4_HEADER_LEN + ICMP_HEADER_LEN;

#[derive(Serialize, Deserialize, Debug)]
pub struct ICMPEchoPacket {
    pub message_type: u8,
    pub message_code: u8,
    pub checksum: u16,
    pub identifier: u16,
    pub sequence_num: u16,
}

#[derive(Serialize, Deserialize)]
pub struct IPv4Header {
    pub version_and_header_len: u8,
    pub type_of_service: u8,
    pub datagram_length: u16,
    pub ip_identifier: u16,
    pub flags_and_5frag_offset: u8, // flags are u3
    pub rest_of_frag_offset: u8,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source_ip: u32,
    pub destination_ip: u32,
}

/// Fields pulled out of a received IPv4 + ICMP datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct EchoReply {
    pub size: usize,
    pub ttl: u8,
    pub message_type: u8,
    pub identifier: u16,
    pub sequence: u16,
}

#[derive(Debug)]
pub enum PacketError {
    Truncated { len: usize, needed: usize },
    Codec(bincode::Error),
}

impl fmt::Display for PacketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketError::Truncated { len, needed } => {
                write!(f, "truncated datagram: {} bytes, need at least {}", len, needed)
            }
            PacketError::Codec(e) => write!(f, "header codec error: {}", e),
        }
    }
}

impl std::error::Error for PacketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PacketError::Codec(e) => Some(e),
            PacketError::Truncated { .. } => None,
        }
    }
}

impl From<bincode::Error> for PacketError {
    fn from(e: bincode::Error) -> Self {
        PacketError::Codec(e)
    }
}

fn coder() -> bincode::Config {
    let mut coder = bincode::config();
    coder.big_endian(); // ICMP Packet Header uses big endian
    coder
}

/// Build a checksummed echo request whose payload is a send timestamp marker.
pub fn build_echo_request(sequence: u16, identifier: u16) -> Result<Vec<u8>, PacketError> {
    build_echo_request_with_payload(sequence, identifier, &timestamp_marker())
}

pub fn build_echo_request_with_payload(
    sequence: u16,
    identifier: u16,
    payload: &[u8],
) -> Result<Vec<u8>, PacketError> {
    let pack = ICMPEchoPacket {
        message_type: ECHO_REQUEST_V4,
        message_code: 0,
        checksum: 0,
        identifier,
        sequence_num: sequence,
    };

    let mut packet = coder().serialize(&pack)?;
    packet.extend_from_slice(payload);

    // Checksum is only defined over whole 16 bit words
    if packet.len() % 2 != 0 {
        packet.push(0);
    }

    util::set_checksum(&mut packet, 1);
    Ok(packet)
}

/// Wall clock marker carried as payload, `<fraction> <seconds>`.
/// Echoed back by the peer but never decoded; RTT comes from our own clock.
pub fn timestamp_marker() -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("0.{:06}00 {}", now.subsec_micros(), now.as_secs()).into_bytes()
}

fn ensure_reply_len(datagram: &[u8]) -> Result<(), PacketError> {
    if datagram.len() < MIN_REPLY_LEN {
        return Err(PacketError::Truncated { len: datagram.len(), needed: MIN_REPLY_LEN });
    }
    Ok(())
}

pub fn parse_reply(datagram: &[u8]) -> Result<EchoReply, PacketError> {
    ensure_reply_len(datagram)?;

    let coder = coder();
    let ip: IPv4Header = coder.deserialize(&datagram[..IPV4_HEADER_LEN])?;
    let icmp: ICMPEchoPacket = coder.deserialize(&datagram[IPV4_HEADER_LEN..MIN_REPLY_LEN])?;

    Ok(EchoReply {
        size: datagram.len(),
        ttl: ip.ttl,
        message_type: icmp.message_type,
        identifier: icmp.identifier,
        sequence: icmp.sequence_num,
    })
}

/// TTL lives at byte 9 of the IPv4 header.
pub fn extract_ttl(datagram: &[u8]) -> Result<u8, PacketError> {
    parse_reply(datagram).map(|reply| reply.ttl)
}

/// ICMP sequence number, bytes 27-28 of the datagram (20 byte IP header + ICMP bytes 7-8).
pub fn extract_sequence(datagram: &[u8]) -> Result<u16, PacketError> {
    parse_reply(datagram).map(|reply| reply.sequence)
}

/// Milliseconds between two readings of the same clock, rounded to 2 places.
pub fn elapsed_millis(sent_at: Duration, now: Duration) -> f64 {
    let elapsed = now.checked_sub(sent_at).unwrap_or_default();
    util::round_to(elapsed.as_secs_f64() * 1000.0, 2)
}
