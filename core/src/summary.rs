//! Per-flow summary emission: console tables and on-disk CSV-ish records.
//!
//! Each emission cycle appends one line per flow:
//!
//! ```text
//! time=YYYYMMDD-HHMMSS,nic=<ifname>,bps=<u32>,mbps=<f64.2>,tspacketcount=<u64>,ccerrors=<u64>[!],src=<a.b.c.d:port>,dst=<a.b.c.d:port>,dropped=<drop>/<ifdrop>
//! ```
//!
//! The `!` suffix marks a CC count that moved since the previous emission.
//! The detailed variant appends the per-PID table and the inter-arrival
//! histogram.

use crate::config::MonitorConfig;
use crate::flowtrack::flow::FlowRecord;

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

/// Interface drop counters published by the capture collaborator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureStats {
    /// Packets dropped because the capture buffer ran full.
    pub dropped: u32,
    /// Packets dropped by the network interface itself.
    pub if_dropped: u32,
}

/// Timestamp format used in summary lines, local time.
pub fn summary_timestamp(now: DateTime<Local>) -> String {
    now.format("%Y%m%d-%H%M%S").to_string()
}

/// Writes the single CSV-ish summary line for `record`.
pub(crate) fn write_summary_line(
    w: &mut impl Write,
    ifname: &str,
    record: &FlowRecord,
    capture: &CaptureStats,
    now: DateTime<Local>,
) -> io::Result<()> {
    let metrics = record.metrics.lock().unwrap();
    let stats = &metrics.stats;
    let marker = if stats.cc_errors() != metrics.stats_to_file.cc_errors {
        "!"
    } else {
        ""
    };
    writeln!(
        w,
        "time={},nic={},bps={},mbps={:.2},tspacketcount={},ccerrors={}{},src={},dst={},dropped={}/{}",
        summary_timestamp(now),
        ifname,
        stats.bps(),
        stats.mbps(),
        stats.packet_count(),
        stats.cc_errors(),
        marker,
        record.src_addr(),
        record.dst_addr(),
        capture.dropped,
        capture.if_dropped,
    )
}

/// Writes the human-readable block for `record`: the stream heading, the
/// per-PID table for transport streams, and the inter-arrival histogram.
pub(crate) fn write_flow_summary(w: &mut impl Write, record: &FlowRecord) -> io::Result<()> {
    let metrics = record.metrics.lock().unwrap();
    writeln!(
        w,
        "   PID   PID     PacketCount     CCErrors    TEIErrors @ {:6.2} : {} -> {} ({})",
        metrics.stats.mbps(),
        record.src_addr(),
        record.dst_addr(),
        metrics.payload_type.code(),
    )?;
    writeln!(
        w,
        "<---------------------------  ----------- ------------ ---Mb/ps------------------------------------------------>"
    )?;
    if let Some(pid_stats) = metrics.stats.as_ts() {
        for (pid, counters) in pid_stats.enabled_pids() {
            writeln!(
                w,
                "0x{:04x} ({:4}) {:14} {:12} {:12}   {:6.2}",
                pid,
                pid,
                counters.packet_count,
                counters.cc_errors,
                counters.tei_errors,
                counters.mbps(),
            )?;
        }
    }
    metrics.intervals.render(w)?;
    writeln!(w)
}

/// Appends one summary record for `record` to its on-disk file, resolving
/// and caching the filename on first use. Returns the error for the caller
/// to log; the emission cycle skips the record and continues.
pub(crate) fn append_file_summary(
    config: &MonitorConfig,
    record: &FlowRecord,
    capture: &CaptureStats,
    detailed: bool,
) -> Result<()> {
    let prefix = if detailed {
        config.detailed_file_prefix.as_deref()
    } else {
        config.file_prefix.as_deref()
    };
    let path = record.summary_path(prefix, detailed);
    let file = open_summary(&path).with_context(|| format!("open {}", path.display()))?;
    let mut w = BufWriter::new(file);
    write_summary_line(&mut w, &config.interface, record, capture, Local::now())?;
    if detailed {
        write_flow_summary(&mut w, record)?;
    }
    w.flush()?;
    Ok(())
}

/// Opens a summary file create|append|read-write, mode 0644, transferring
/// ownership to the invoking sudo user where applicable.
fn open_summary(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .mode(0o644)
        .open(path)?;
    transfer_sudo_ownership(&file, path);
    Ok(file)
}

/// When running as root under sudo, hands the file back to the invoking
/// user. Failure is logged and ignored.
fn transfer_sudo_ownership(file: &File, path: &Path) {
    if !nix::unistd::getuid().is_root() {
        return;
    }
    let (Ok(uid), Ok(gid)) = (std::env::var("SUDO_UID"), std::env::var("SUDO_GID")) else {
        return;
    };
    let (Ok(uid), Ok(gid)) = (uid.parse::<u32>(), gid.parse::<u32>()) else {
        return;
    };
    if let Err(e) = std::os::unix::fs::fchown(file, Some(uid), Some(gid)) {
        log::warn!(
            "error changing {} ownership to uid {uid} gid {gid}, ignoring: {e}",
            path.display()
        );
    }
}
