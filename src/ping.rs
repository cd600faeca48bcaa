use std::io::Write;
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use colored::*;
use rand::random;

use crate::error::PingError;
use crate::packet::{self, EchoReply, ECHO_REPLY_V4};
use crate::stats::RunStatistics;
use crate::transport::{Received, Transport};

/// Source of time for RTT measurement and the inter-packet pause.
pub trait Clock {
    /// Monotonic reading relative to an arbitrary origin.
    fn now(&self) -> Duration;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

#[derive(Debug, Clone)]
pub struct PingConfig {
    pub count: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub identifier: u16, // Used as 'identifier' word to match echo requests/replies
}

impl PingConfig {
    /// Reject settings that would make the run meaningless.
    pub fn validate(&self) -> Result<(), PingError> {
        if self.count == 0 {
            return Err(PingError::InvalidConfig("count must be at least 1"));
        }
        // A zero receive window would report every exchange as lost without waiting
        if self.timeout == Duration::from_secs(0) {
            return Err(PingError::InvalidConfig("timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for PingConfig {
    fn default() -> Self {
        PingConfig {
            count: 3,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            identifier: random::<u16>(),
        }
    }
}

/// What the user asked for and what it resolved to; only used for output.
#[derive(Debug, Clone)]
pub struct Target {
    pub hostname: String,
    pub address: Ipv4Addr,
}

impl Target {
    pub fn new(hostname: &str, address: Ipv4Addr) -> Self {
        Target { hostname: hostname.to_string(), address }
    }
}

/// One request and its fate. `rtt_ms` is `None` when no usable reply came back.
#[derive(Debug, Clone, PartialEq)]
pub struct Exchange {
    pub sequence: u16,
    pub sent_at: Duration,
    pub rtt_ms: Option<f64>,
}

enum Wait {
    Reply { reply: EchoReply, received_at: Duration },
    Timeout,
    Malformed(usize),
}

pub struct Pinger<T: Transport, C: Clock> {
    transport: T,
    clock: C,
    config: PingConfig,
    target: Target,
}

impl<T: Transport, C: Clock> Pinger<T, C> {
    pub fn new(transport: T, clock: C, config: PingConfig, target: Target) -> Self {
        Pinger { transport, clock, config, target }
    }

    /// Send `count` echo requests one after another, print a line per
    /// exchange and the closing statistics. The transport is closed before
    /// returning, whether or not the run succeeded.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<RunStatistics, PingError> {
        let exchanges = self.exchange_all(out);
        let closed = self.transport.close();

        let exchanges = match exchanges {
            Ok(e) => e,
            Err(e) => {
                if let Err(close_err) = closed {
                    log::warn!("error closing transport after failed run: {}", close_err);
                }
                return Err(e);
            }
        };
        closed.map_err(PingError::Close)?;

        let stats = RunStatistics::from_exchanges(&exchanges);
        stats.write_report(&self.target.hostname, out).map_err(PingError::Output)?;
        Ok(stats)
    }

    fn exchange_all<W: Write>(&mut self, out: &mut W) -> Result<Vec<Exchange>, PingError> {
        writeln!(out, "{} {} ({}).", "PING".cyan(), self.target.hostname.bold(), self.target.address)
            .map_err(PingError::Output)?;

        let mut exchanges = Vec::with_capacity(self.config.count as usize);
        for i in 0..self.config.count {
            // Sequence numbers are 0-based and wrap for very long runs
            exchanges.push(self.exchange(i as u16, out)?);

            if i + 1 < self.config.count {
                self.clock.sleep(self.config.interval);
            }
        }

        Ok(exchanges)
    }

    fn exchange<W: Write>(&mut self, sequence: u16, out: &mut W) -> Result<Exchange, PingError> {
        let request = packet::build_echo_request(sequence, self.config.identifier)?;
        self.transport
            .send(&request)
            .map_err(|source| PingError::Send { sequence, source })?;

        let sent_at = self.clock.now();
        log::debug!("sent {} byte echo request icmp_seq={} id={:#06x}",
            request.len(), sequence, self.config.identifier);

        let rtt_ms = match self.await_reply(sequence, sent_at)? {
            Wait::Reply { reply, received_at } => {
                let rtt = packet::elapsed_millis(sent_at, received_at);
                writeln!(out, "{} bytes from {} ({}): icmp_seq={} ttl={} time={} ms",
                    reply.size, self.target.hostname.yellow(), self.target.address,
                    reply.sequence.to_string().bold(), reply.ttl.to_string().bold(),
                    format!("{:.2}", rtt).bold())
                    .map_err(PingError::Output)?;
                Some(rtt)
            }

            Wait::Timeout => {
                writeln!(out, "Request timed out for icmp_seq={}", sequence.to_string().red())
                    .map_err(PingError::Output)?;
                None
            }

            Wait::Malformed(len) => {
                writeln!(out, "Malformed reply ({} bytes) for icmp_seq={}, counted as lost",
                    len, sequence.to_string().red())
                    .map_err(PingError::Output)?;
                None
            }
        };

        Ok(Exchange { sequence, sent_at, rtt_ms })
    }

    /// Wait until the matching echo reply arrives or the timeout window closes.
    /// Other ICMP traffic on the socket (our own requests on loopback, replies
    /// meant for other processes, stale replies) is skipped.
    fn await_reply(&mut self, sequence: u16, sent_at: Duration) -> Result<Wait, PingError> {
        let deadline = sent_at + self.config.timeout;

        loop {
            let remaining = match deadline.checked_sub(self.clock.now()) {
                Some(r) if r > Duration::from_secs(0) => r,
                _ => return Ok(Wait::Timeout),
            };

            let datagram = match self.transport.receive(remaining) {
                Ok(Received::Datagram(d)) => d,
                Ok(Received::Timeout) => return Ok(Wait::Timeout),
                Err(source) => return Err(PingError::Receive { sequence, source }),
            };
            let received_at = self.clock.now();

            let reply = match packet::parse_reply(&datagram) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("dropping reply for icmp_seq={}: {}", sequence, e);
                    return Ok(Wait::Malformed(datagram.len()));
                }
            };

            if reply.message_type != ECHO_REPLY_V4
                || reply.identifier != self.config.identifier
                || reply.sequence != sequence
            {
                log::debug!("ignoring icmp type={} id={:#06x} seq={} while waiting for seq={}",
                    reply.message_type, reply.identifier, reply.sequence, sequence);
                continue;
            }

            return Ok(Wait::Reply { reply, received_at });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct FakeClock {
        now: Rc<Cell<Duration>>,
        slept: Rc<Cell<Duration>>,
    }

    impl Clock for FakeClock {
        fn now(&self) -> Duration {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.now.set(self.now.get() + duration);
            self.slept.set(self.slept.get() + duration);
        }
    }

    /// Answers every request after a fixed delay, or fails sends once `fail_send_at` is reached.
    struct EchoTransport {
        clock: FakeClock,
        delay: Duration,
        pending: Option<Vec<u8>>,
        sent: usize,
        fail_send_at: Option<usize>,
        closed: Rc<Cell<bool>>,
    }

    impl EchoTransport {
        fn new(clock: &FakeClock, delay_ms: u64) -> Self {
            EchoTransport {
                clock: clock.clone(),
                delay: Duration::from_millis(delay_ms),
                pending: None,
                sent: 0,
                fail_send_at: None,
                closed: Rc::new(Cell::new(false)),
            }
        }
    }

    impl Transport for EchoTransport {
        fn send(&mut self, request: &[u8]) -> io::Result<usize> {
            if self.fail_send_at == Some(self.sent) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
            }
            self.sent += 1;

            let mut reply = vec![0u8; packet::IPV4_HEADER_LEN];
            reply[0] = 0x45;
            reply[8] = 64;
            reply.extend_from_slice(request);
            reply[packet::IPV4_HEADER_LEN] = ECHO_REPLY_V4;
            self.pending = Some(reply);
            Ok(request.len())
        }

        fn receive(&mut self, timeout: Duration) -> io::Result<Received> {
            match self.pending.take() {
                Some(reply) if self.delay <= timeout => {
                    self.clock.now.set(self.clock.now.get() + self.delay);
                    Ok(Received::Datagram(reply))
                }
                _ => {
                    self.clock.now.set(self.clock.now.get() + timeout);
                    Ok(Received::Timeout)
                }
            }
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed.set(true);
            Ok(())
        }
    }

    fn config(count: u32) -> PingConfig {
        PingConfig { count, identifier: 0x2107, ..PingConfig::default() }
    }

    fn target() -> Target {
        Target::new("localhost", Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn default_config() {
        let config = PingConfig::default();
        assert_eq!(config.count, 3);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.timeout, Duration::from_secs(1));
    }

    #[test]
    fn zero_count_or_timeout_is_rejected() {
        assert!(config(3).validate().is_ok());

        match config(0).validate() {
            Err(PingError::InvalidConfig(msg)) => assert!(msg.contains("count")),
            other => panic!("expected invalid count, got {:?}", other),
        }

        let zero_timeout = PingConfig { timeout: Duration::from_secs(0), ..config(3) };
        match zero_timeout.validate() {
            Err(PingError::InvalidConfig(msg)) => assert!(msg.contains("timeout")),
            other => panic!("expected invalid timeout, got {:?}", other),
        }
    }

    #[test]
    fn output_failure_is_reported_as_output_error() {
        struct BrokenPipe;

        impl Write for BrokenPipe {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        colored::control::set_override(false);
        let clock = FakeClock::default();
        let transport = EchoTransport::new(&clock, 5);
        let closed = transport.closed.clone();
        let mut pinger = Pinger::new(transport, clock, config(1), target());

        match pinger.run(&mut BrokenPipe) {
            Err(PingError::Output(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("expected output error, got {:?}", other.map(|s| s.received)),
        }
        assert!(closed.get());
    }

    #[test]
    fn sleeps_only_between_exchanges() {
        colored::control::set_override(false);
        let clock = FakeClock::default();
        let transport = EchoTransport::new(&clock, 5);
        let mut pinger = Pinger::new(transport, clock.clone(), config(4), target());

        let stats = pinger.run(&mut Vec::new()).unwrap();
        assert_eq!(stats.received, 4);
        assert_eq!(stats.rtts, vec![5.0; 4]);
        assert_eq!(clock.slept.get(), Duration::from_secs(3));
    }

    #[test]
    fn slow_replies_time_out() {
        colored::control::set_override(false);
        let clock = FakeClock::default();
        let transport = EchoTransport::new(&clock, 1500);
        let mut pinger = Pinger::new(transport, clock, config(2), target());

        let mut out = Vec::new();
        let stats = pinger.run(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert_eq!(stats.received, 0);
        assert_eq!(stats.loss_pct, 100.0);
        assert!(text.contains("Request timed out for icmp_seq=0"));
        assert!(text.contains("Request timed out for icmp_seq=1"));
        assert!(text.contains("unavailable (0 received)"));
    }

    #[test]
    fn send_failure_aborts_and_closes() {
        colored::control::set_override(false);
        let clock = FakeClock::default();
        let mut transport = EchoTransport::new(&clock, 5);
        transport.fail_send_at = Some(1);
        let closed = transport.closed.clone();
        let mut pinger = Pinger::new(transport, clock, config(3), target());

        let mut out = Vec::new();
        match pinger.run(&mut out) {
            Err(PingError::Send { sequence, .. }) => assert_eq!(sequence, 1),
            other => panic!("expected send failure, got {:?}", other.map(|s| s.received)),
        }
        assert!(closed.get());

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("icmp_seq=0 ttl=64 time=5.00 ms"));
        assert!(!text.contains("statistics"));
    }
}
