//! Live network-interface monitor for transport-stream flows.
//!
//! Opens the configured interface, feeds every UDP datagram through the flow
//! registry on the capture thread, and runs a stats thread that emits console
//! and file summaries on the configured intervals. Ctrl-C shuts down
//! cooperatively: the capture loop stops feeding packets, then the registry
//! drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use tsflow_core::config::{default_config, load_config};
use tsflow_core::protocols::packet::UdpFrame;
use tsflow_core::{CaptureStats, FlowRegistry, PayloadType};

use chrono::{DateTime, Utc};

#[derive(Parser, Debug)]
#[clap(name = "tsflow-monitor", about = "Passive TS/RTP/2110 flow monitor")]
struct Args {
    /// Path to a TOML configuration file.
    #[clap(short, long)]
    config: Option<String>,

    /// Network interface to monitor (overrides the configuration file).
    #[clap(short, long)]
    interface: Option<String>,

    /// Record every discovered stream (overrides the configuration file).
    #[clap(long)]
    record: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path),
        None => default_config(),
    };
    if let Some(interface) = args.interface {
        config.interface = interface;
    }
    if args.record {
        config.record_streams = true;
    }

    let registry = Arc::new(FlowRegistry::new(config.clone()));
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    let stats_thread = {
        let registry = Arc::clone(&registry);
        let running = Arc::clone(&running);
        let config = config.clone();
        thread::spawn(move || {
            let stats_every = Duration::from_secs(config.stats_interval_secs.max(1));
            let files_every = Duration::from_secs(config.file_summary_interval_secs.max(1));
            let writes_files =
                config.file_prefix.is_some() || config.detailed_file_prefix.is_some();
            let mut last_files = Instant::now();
            while running.load(Ordering::SeqCst) {
                thread::sleep(stats_every);
                registry.console_summary();
                if writes_files && last_files.elapsed() >= files_every {
                    if config.file_prefix.is_some() {
                        registry.file_summary();
                    }
                    if config.detailed_file_prefix.is_some() {
                        registry.detailed_file_summary();
                    }
                    last_files = Instant::now();
                }
            }
        })
    };

    log::info!("monitoring {}", config.interface);
    let mut capture = pcap::Capture::from_device(config.interface.as_str())
        .with_context(|| format!("opening {}", config.interface))?
        .promisc(config.promiscuous)
        .snaplen(config.snaplen)
        .timeout(100)
        .open()
        .with_context(|| format!("activating capture on {}", config.interface))?;
    capture.filter("udp").context("installing udp filter")?;

    let mut last_drop_poll = Instant::now();
    while running.load(Ordering::SeqCst) {
        match capture.next() {
            Ok(frame) => {
                let ts = frame.header.ts;
                let now = capture_time(ts.tv_sec as i64, ts.tv_usec as i64);
                process_frame(&registry, frame.data, now);
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(e) => {
                log::error!("capture error: {e}");
                break;
            }
        }
        if last_drop_poll.elapsed() >= Duration::from_secs(1) {
            if let Ok(stats) = capture.stats() {
                registry.set_capture_stats(CaptureStats {
                    dropped: stats.dropped,
                    if_dropped: stats.if_dropped,
                });
            }
            last_drop_poll = Instant::now();
        }
    }

    running.store(false, Ordering::SeqCst);
    if stats_thread.join().is_err() {
        log::error!("stats thread panicked");
    }

    // Final emission, then drain.
    registry.console_summary();
    if config.file_prefix.is_some() {
        registry.file_summary();
    }
    if config.detailed_file_prefix.is_some() {
        registry.detailed_file_summary();
    }
    let metrics = registry.cache_metrics();
    log::info!(
        "{} flows, cache {} hits / {} misses ({:.1}%)",
        registry.len(),
        metrics.hit,
        metrics.miss,
        metrics.hit_ratio
    );
    registry.free_all();
    Ok(())
}

/// Converts a capture timestamp to wallclock.
fn capture_time(sec: i64, usec: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(sec, (usec.clamp(0, 999_999) as u32) * 1000)
        .unwrap_or_else(Utc::now)
}

/// Parses one frame and drives the per-flow updates. Frames the parser
/// rejects are not of interest and are skipped.
fn process_frame(registry: &FlowRegistry, data: &[u8], now: DateTime<Utc>) {
    let parsed = match UdpFrame::parse(data) {
        Ok(parsed) => parsed,
        Err(_) => return,
    };
    let record = registry.find_or_create_at(&parsed.eth, &parsed.ipv4, &parsed.udp, now);
    record.observe_iat(now);

    let payload = parsed.payload(data);
    if record.payload_type() == PayloadType::Unknown && !payload.is_empty() {
        record.set_payload_type(PayloadType::sniff(payload));
    }
    record.feed(payload, now);
}
