use std::io::{Error, ErrorKind, Result};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};

/// Large enough for any reply we care about; anything longer is truncated by the kernel.
const RECV_BUFFER_LEN: usize = 4096;

/// Outcome of a bounded wait for a datagram.
#[derive(Debug, PartialEq)]
pub enum Received {
    Datagram(Vec<u8>),
    Timeout,
}

/// A connected datagram channel to a single destination.
///
/// `receive` must report an expired wait as `Received::Timeout`, never as an
/// `Err`; errors are reserved for failures that should end the run.
pub trait Transport {
    fn send(&mut self, packet: &[u8]) -> Result<usize>;
    fn receive(&mut self, timeout: Duration) -> Result<Received>;
    fn close(&mut self) -> Result<()>;
}

/// Raw ICMPv4 socket connected to one peer. Needs CAP_NET_RAW (or root).
pub struct RawSocketTransport {
    socket: Option<Socket>,
}

impl RawSocketTransport {
    pub fn connect(address: Ipv4Addr) -> Result<Self> {
        let stype = Type::raw().cloexec();
        let socket = Socket::new(Domain::ipv4(), stype, Some(Protocol::icmpv4()))?;

        let sock_addr = SockAddr::from(SocketAddr::from((address, 0)));
        socket.connect(&sock_addr)?;
        log::debug!("raw icmp socket connected to {}", address);

        Ok(RawSocketTransport { socket: Some(socket) })
    }

    pub fn set_ttl(&self, ttl: u32) -> Result<()> {
        self.socket()?.set_ttl(ttl)
    }

    fn socket(&self) -> Result<&Socket> {
        self.socket
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "transport already closed"))
    }
}

impl Transport for RawSocketTransport {
    fn send(&mut self, packet: &[u8]) -> Result<usize> {
        self.socket()?.send(packet)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Received> {
        // A zero read timeout means "block forever" to the socket layer
        if timeout == Duration::from_secs(0) {
            return Ok(Received::Timeout);
        }

        let socket = self.socket()?;
        socket.set_read_timeout(Some(timeout))?;

        let mut buf = [0; RECV_BUFFER_LEN];
        match socket.recv(&mut buf[..]) {
            Ok(n) => Ok(Received::Datagram(buf[..n].to_vec())),
            Err(e) if is_timeout(&e) => Ok(Received::Timeout),
            Err(e) => Err(e),
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.socket.take().is_some() {
            log::debug!("raw icmp socket closed");
        }
        Ok(())
    }
}

/// SO_RCVTIMEO expiry surfaces as EAGAIN/EWOULDBLOCK on Linux and ETIMEDOUT elsewhere.
fn is_timeout(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_kinds_are_recognised() {
        assert!(is_timeout(&Error::from(ErrorKind::WouldBlock)));
        assert!(is_timeout(&Error::from(ErrorKind::TimedOut)));
        assert!(!is_timeout(&Error::from(ErrorKind::ConnectionRefused)));
        assert!(!is_timeout(&Error::from(ErrorKind::PermissionDenied)));
    }

    #[test]
    fn closed_transport_refuses_io() {
        let mut transport = RawSocketTransport { socket: None };
        let err = transport.send(&[0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);
        assert!(transport.close().is_ok());
    }
}
