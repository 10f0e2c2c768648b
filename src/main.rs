//! `mpcap` command-line entry point
//!
//! ```text
//! mpcap record <file> [--packets N] [--max-file-size BYTES] [--snaplen BYTES]
//!                     [--segment BYTES] [--threads N] [--type NAME] [--config FILE]
//! mpcap inspect <file>
//! ```
//!
//! `record` feeds synthetic UDP traffic through a capture session until it
//! closes itself, then prints the session status as JSON. `inspect` maps a
//! finished capture file and prints its header and packet statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use mpcap::test_utils::PacketGenerator;
use mpcap::{init, map, CaptureConfig, PacketType};

const USAGE: &str = "usage:
  mpcap record <file> [--packets N] [--max-file-size BYTES] [--snaplen BYTES]
                      [--segment BYTES] [--threads N] [--type NAME] [--config FILE]
  mpcap inspect <file>";

/// Options for the `record` command.
#[derive(Debug)]
struct RecordOptions {
    config: CaptureConfig,
    snaplen: usize,
    segment: usize,
    threads: usize,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("record") => record(parse_record(&args[1..])?),
        Some("inspect") => {
            let path = args.get(1).ok_or_else(|| anyhow!("missing file\n{USAGE}"))?;
            inspect(PathBuf::from(path))
        }
        _ => bail!("{USAGE}"),
    }
}

fn parse_record(args: &[String]) -> Result<RecordOptions> {
    let mut path = None;
    let mut config_file = None;
    let mut packets = None;
    let mut max_file_size = None;
    let mut packet_type = None;
    let mut snaplen = 1500usize;
    let mut segment = 0usize;
    let mut threads = 1usize;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = || {
            it.next()
                .cloned()
                .ok_or_else(|| anyhow!("{arg} needs a value"))
        };
        match arg.as_str() {
            "--packets" => packets = Some(value()?.parse::<u32>()?),
            "--max-file-size" => max_file_size = Some(value()?.parse::<u64>()?),
            "--snaplen" => snaplen = value()?.parse()?,
            "--segment" => segment = value()?.parse()?,
            "--threads" => threads = value()?.parse()?,
            "--type" => packet_type = Some(value()?.parse::<PacketType>()?),
            "--config" => config_file = Some(PathBuf::from(value()?)),
            other if other.starts_with("--") => bail!("unknown option {other}\n{USAGE}"),
            other => path = Some(PathBuf::from(other)),
        }
    }

    let mut config = match config_file {
        Some(file) => CaptureConfig::from_json_file(&file)
            .with_context(|| format!("loading {}", file.display()))?,
        None => CaptureConfig::default(),
    };
    if let Some(path) = path {
        config.path = path;
    }
    if let Some(n) = packets {
        config.packets_to_capture = n;
    }
    if let Some(n) = max_file_size {
        config.max_file_size = n;
    }
    if let Some(t) = packet_type {
        config.packet_type = t;
    }
    let threads = threads.max(1);
    config.thread_safe = config.thread_safe || threads > 1;

    Ok(RecordOptions {
        config,
        snaplen,
        segment,
        threads,
    })
}

fn record(options: RecordOptions) -> Result<()> {
    let session = Arc::new(init(options.config).context("starting capture")?);
    let start = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let handles: Vec<_> = (0..options.threads)
        .map(|worker| {
            let session = Arc::clone(&session);
            let (snaplen, segment) = (options.snaplen, options.segment);
            thread::spawn(move || {
                let mut gen = PacketGenerator::new(40000 + (worker as u16) * 16);
                let mut i = 0u64;
                while session.is_open() {
                    let payload = 64 + ((i * 37) % 1400) as usize;
                    let chain = gen.udp_chain(payload, segment);
                    let timestamp = start + i as f64 * 1e-4;
                    session.add_buffer(timestamp, &chain[..], snaplen);
                    i += 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("capture worker panicked"))?;
    }

    session.close().context("closing capture")?;
    println!("{}", serde_json::to_string_pretty(&session.status())?);
    Ok(())
}

fn inspect(path: PathBuf) -> Result<()> {
    let capture = map(&path).with_context(|| format!("mapping {}", path.display()))?;
    let header = capture.header();

    println!("file:         {}", capture.path().display());
    println!("size:         {} bytes", capture.file_len());
    println!(
        "version:      {}.{}{}",
        header.major_version,
        header.minor_version,
        if header.byte_swapped { " (byte-swapped)" } else { "" }
    );
    println!("packet type:  {}", header.packet_type);
    println!("max packet:   {} bytes", header.max_packet_size);
    println!("packets:      {}", capture.packet_count());
    println!(
        "packet sizes: {}..={} bytes",
        capture.min_packet_bytes(),
        capture.max_packet_bytes()
    );
    if let Some((first, _)) = capture.records().next() {
        println!("first packet: {:.6}", first.timestamp());
    }
    Ok(())
}
