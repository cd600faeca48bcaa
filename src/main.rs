use std::io;
use std::process;

use anyhow::{Context, Result};
use clap::{App, AppSettings, Arg};
use colored::*;

use ring_ping::{util, PingConfig, Pinger, RawSocketTransport, SystemClock, Target};



fn main() {
    env_logger::init();

    if let Err(e) = run() {
        eprintln!("{} {:#}", "ring:".red().bold(), e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let matches = App::new("ring")
        .setting(AppSettings::ColoredHelp)
        .version("v2.0")
        .author("Bryan Becar <becar.bryan@gmail.com>")
        .about("A Rust clone of the `ping` utility.\nSends a fixed number of ICMP echo requests and reports latency statistics.")
        .arg(Arg::with_name("DESTINATION")
            .help("Hostname or IPv4 adddress")
            .required(true)
            .index(1))
        .arg(Arg::with_name("count")
            .help("Number of echo requests to send (Default 3)")
            .short("c")
            .takes_value(true))
        .arg(Arg::with_name("timeout")
            .help("Set how long to wait for each pong before timing out, must be non-zero (Default 1s)")
            .short("W")
            .takes_value(true))
        .arg(Arg::with_name("interval")
            .help("Set how long to wait in between ping (Default 1s)")
            .short("i")
            .takes_value(true))
        .arg(Arg::with_name("ttl")
            .help("Set ttl on outgoing packets")
            .short("t")
            .takes_value(true))
        .get_matches();

    let destination_host = matches.value_of("DESTINATION").context("missing destination")?;
    let destination = util::resolve_dest(destination_host)
        .with_context(|| format!("Error resolving destination {}", destination_host))?;

    let count = matches.value_of("count").unwrap_or("3");
    let count = count.parse::<u32>().context("Invalid count (ex: 3)")?;

    let timeout = matches.value_of("timeout").unwrap_or("1s");
    let timeout = humantime::parse_duration(timeout).context("Invalid duration for timeout (ex: 1s, 400ms, 1m)")?;

    let interval = matches.value_of("interval").unwrap_or("1s");
    let interval = humantime::parse_duration(interval).context("Invalid duration for interval (ex: 1s, 400ms, 1m)")?;

    let ttl = match matches.value_of("ttl") {
        Some(ttl) => Some(ttl.parse::<u32>().context("Invalid ttl (ex: 64)")?),
        None => None,
    };

    let config = PingConfig { count, interval, timeout, ..PingConfig::default() };
    config.validate()?;
    log::debug!("{:?}", config);

    let transport = RawSocketTransport::connect(destination)
        .context("Error opening raw ICMP socket (raw sockets need root or CAP_NET_RAW)")?;
    if let Some(t) = ttl {
        transport.set_ttl(t).context("Error setting ttl")?;
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut pinger = Pinger::new(transport, SystemClock::new(), config, Target::new(destination_host, destination));
    pinger.run(&mut out)?;

    Ok(())
}
