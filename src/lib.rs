//! ICMPv4 echo client: packet codec, raw socket transport, the ping loop and
//! its end-of-run statistics.

pub mod error;
pub mod packet;
pub mod ping;
pub mod stats;
pub mod transport;
pub mod util;

pub use error::PingError;
pub use ping::{Clock, Exchange, PingConfig, Pinger, SystemClock, Target};
pub use stats::RunStatistics;
pub use transport::{RawSocketTransport, Received, Transport};
