use std::io::{self, Write};

use colored::*;

use crate::ping::Exchange;
use crate::util::round_to;

/// Receive window assumed by the throughput estimate. Nothing is measured.
pub const ASSUMED_RWIN_BYTES: f64 = 65535.0;

#[derive(Debug, Clone, PartialEq)]
pub struct RttSummary {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

/// Aggregate view of one run. RTT derived fields are `None` when there are
/// not enough replies to compute them.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub transmitted: u32,
    pub received: u32,
    pub loss_pct: f64,
    pub rtts: Vec<f64>,
    pub total_time_ms: f64,
    pub rtt: Option<RttSummary>,
    pub jitter: Option<f64>,
    pub throughput_mbps: Option<f64>,
}

impl RunStatistics {
    pub fn from_exchanges(exchanges: &[Exchange]) -> Self {
        let rtts = exchanges.iter().filter_map(|e| e.rtt_ms).collect();
        Self::from_rtts(exchanges.len() as u32, rtts)
    }

    /// `rtts` holds only successful exchanges, in send order.
    pub fn from_rtts(transmitted: u32, rtts: Vec<f64>) -> Self {
        let received = rtts.len() as u32;

        let loss_pct = if transmitted == 0 {
            0.0
        } else {
            (1.0 - received as f64 / transmitted as f64) * 100.0
        };

        let rtt = summarize(&rtts);
        let throughput_mbps = rtt.as_ref().and_then(|s| throughput_estimate(s.avg));

        RunStatistics {
            transmitted,
            received,
            loss_pct,
            total_time_ms: rtts.iter().sum(),
            jitter: jitter(&rtts),
            rtt,
            throughput_mbps,
            rtts,
        }
    }

    pub fn write_report<W: Write>(&self, hostname: &str, out: &mut W) -> io::Result<()> {
        writeln!(out)?;
        writeln!(out, "{} {} {}", "---".yellow(), hostname.bold(), "statistics ---".yellow())?;
        writeln!(out, "{} packets transmitted, {} received, {}% packet loss, time {} ms",
            self.transmitted.to_string().bold(),
            self.received.to_string().bold(),
            round_to(self.loss_pct, 2).to_string().bold(),
            round_to(self.total_time_ms, 2))?;

        match &self.rtt {
            Some(s) => writeln!(out, "rtt min/avg/max = {}/{}/{} ms", s.min, s.avg, s.max)?,
            None => writeln!(out, "rtt min/avg/max unavailable ({} received)", self.received)?,
        }

        match self.jitter {
            Some(j) => writeln!(out, "jitter = {} ms", j)?,
            None => writeln!(out, "jitter unavailable (needs at least 2 replies)")?,
        }

        match self.throughput_mbps {
            Some(mbps) => writeln!(out, "throughput approximation = {} Mbps (assumes a fixed {} byte receive window)",
                mbps, ASSUMED_RWIN_BYTES)?,
            None => writeln!(out, "throughput approximation unavailable")?,
        }

        Ok(())
    }
}

fn summarize(rtts: &[f64]) -> Option<RttSummary> {
    if rtts.is_empty() {
        return None;
    }

    let sum: f64 = rtts.iter().sum();
    Some(RttSummary {
        min: rtts.iter().cloned().fold(f64::INFINITY, f64::min),
        avg: round_to(sum / rtts.len() as f64, 3),
        max: rtts.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// Mean absolute difference between consecutive RTTs.
fn jitter(rtts: &[f64]) -> Option<f64> {
    if rtts.len() < 2 {
        return None;
    }

    let deltas: f64 = rtts.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    Some(round_to(deltas / (rtts.len() - 1) as f64, 3))
}

/// Window / RTT, in megabits per second. A rough bound, not a measurement.
fn throughput_estimate(avg_ms: f64) -> Option<f64> {
    if avg_ms <= 0.0 {
        return None;
    }
    Some(round_to(((ASSUMED_RWIN_BYTES / (avg_ms / 1000.0)) * 8.0) / 1_000_000.0, 3))
}
