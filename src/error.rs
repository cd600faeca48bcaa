use std::fmt;
use std::io;

use crate::packet::PacketError;

/// Failures that end a run. Timeouts and malformed replies are not errors;
/// they are counted as loss by the controller.
#[derive(Debug)]
pub enum PingError {
    Packet(PacketError),
    Send { sequence: u16, source: io::Error },
    Receive { sequence: u16, source: io::Error },
    Close(io::Error),
    Output(io::Error),
    InvalidConfig(&'static str),
}

impl fmt::Display for PingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingError::Packet(e) => write!(f, "Error building echo request: {}", e),
            PingError::Send { sequence, source } => {
                write!(f, "Error sending ping icmp_seq={}: {}", sequence, source)
            }
            PingError::Receive { sequence, source } => {
                write!(f, "Error receiving pong icmp_seq={}: {}", sequence, source)
            }
            PingError::Close(e) => write!(f, "Error closing socket: {}", e),
            PingError::Output(e) => write!(f, "Error writing report: {}", e),
            PingError::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for PingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PingError::Packet(e) => Some(e),
            PingError::Send { source, .. } | PingError::Receive { source, .. } => Some(source),
            PingError::Close(e) | PingError::Output(e) => Some(e),
            PingError::InvalidConfig(_) => None,
        }
    }
}

impl From<PacketError> for PingError {
    fn from(e: PacketError) -> Self {
        PingError::Packet(e)
    }
}
