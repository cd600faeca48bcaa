use std::io::{Error, ErrorKind, Result};
use std::net::{IpAddr, Ipv4Addr};

use dns_lookup::lookup_host;

/// Resolve a hostname or dotted-quad literal to an IPv4 address.
/// Only the first IPv4 result is used; IPv6 answers are skipped.
pub fn resolve_dest(dest: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = dest.parse::<Ipv4Addr>() {
        return Ok(addr);
    }

    lookup_host(dest)?
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{}: Name or service not known", dest)))
}

/// Round `value` to `places` decimal places, half away from zero.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Zero the 16 bit word at word offset `location`, compute the checksum over
/// the whole buffer and write it back into that word (big endian).
#[allow(clippy::double_parens)] // For stylistic reasons
pub fn set_checksum(data: &mut [u8], location: usize) {
    data[location*2    ] = 0;
    data[location*2 + 1] = 0;

    let sum = checksum(data);
    data[location*2    ] = ((sum & 0xFF00) >> 8) as u8;
    data[location*2 + 1] = ((sum & 0x00FF)     ) as u8;
}

/// RFC 1071 Internet checksum: one's complement of the one's complement sum
/// of all big endian words. A trailing odd byte is padded with a zero.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum = sum_be_words(data);
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16) // The checksum field should be the ones complement of the sum
}

/// Sum all words (16 bit chunks) in the given data. Each word is treated as big endian.
/// The u64 accumulator cannot overflow for any buffer that fits in memory.
fn sum_be_words(data: &[u8]) -> u64 {
    data.chunks(2)
        .map(|word| match *word {
            [w] => u16::from_be_bytes([w, 0]),
            [wh, wl] => u16::from_be_bytes([wh, wl]),
            _ => unreachable!(),
        })
        .fold(0, |acc: u64, w| acc + w as u64)
}
