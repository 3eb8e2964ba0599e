//! Per-flow payload statistics.
//!
//! Each discovered flow carries one stats blob matching its payload
//! classification: a transport-stream blob with a per-PID table, a CTP/2110
//! packet blob, or a plain bytestream blob for unclassified traffic. All
//! three expose the same rate surface (`bps`/`mbps`/`reset`) used by the
//! summary emitters.

use chrono::{DateTime, Utc};

/// MPEG transport stream packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// MPEG transport stream sync byte.
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Number of 13-bit packet identifiers.
pub const MAX_PID: usize = 8192;

/// The null-packet PID; its continuity counter is undefined.
const NULL_PID: usize = 0x1fff;

/// One-second byte-rate window shared by the stats blobs.
///
/// Rates are reported for the last completed window, so a freshly created
/// blob reports zero until a full second of traffic has been seen.
#[derive(Debug, Clone, Copy, Default)]
struct RateWindow {
    window_start: Option<DateTime<Utc>>,
    window_bytes: u64,
    last_window_bits: u64,
}

impl RateWindow {
    fn add(&mut self, bytes: u64, now: DateTime<Utc>) {
        match self.window_start {
            None => {
                self.window_start = Some(now);
                self.window_bytes = bytes;
            }
            Some(start) => {
                if now.signed_duration_since(start).num_milliseconds() >= 1000 {
                    self.last_window_bits = self.window_bytes * 8;
                    self.window_start = Some(now);
                    self.window_bytes = bytes;
                } else {
                    self.window_bytes += bytes;
                }
            }
        }
    }

    fn bps(&self) -> u32 {
        self.last_window_bits.min(u32::MAX as u64) as u32
    }

    fn mbps(&self) -> f64 {
        self.last_window_bits as f64 / 1_000_000.0
    }

    fn reset(&mut self) {
        *self = RateWindow::default();
    }
}

/// Counters for a single transport-stream PID.
#[derive(Debug, Clone, Copy, Default)]
pub struct PidCounters {
    /// Set once the PID has been seen on the flow.
    pub enabled: bool,
    pub packet_count: u64,
    pub cc_errors: u64,
    pub tei_errors: u64,
    last_cc: u8,
    rate: RateWindow,
}

impl PidCounters {
    /// PID bitrate over the last completed one-second window.
    pub fn mbps(&self) -> f64 {
        self.rate.mbps()
    }
}

/// Transport-stream statistics with a direct-indexed per-PID table.
#[derive(Debug, Clone)]
pub struct PidStats {
    /// Total sync-aligned TS packets seen.
    pub packet_count: u64,
    /// Continuity-counter discontinuities across all PIDs.
    pub cc_errors: u64,
    /// Packets with the transport error indicator set, across all PIDs.
    pub tei_errors: u64,
    pids: Vec<PidCounters>,
    rate: RateWindow,
}

impl Default for PidStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PidStats {
    pub fn new() -> Self {
        PidStats {
            packet_count: 0,
            cc_errors: 0,
            tei_errors: 0,
            pids: vec![PidCounters::default(); MAX_PID],
            rate: RateWindow::default(),
        }
    }

    /// Walks the 188-byte sync-aligned TS packets in `payload`, maintaining
    /// per-PID packet counts, continuity-counter discontinuities and TEI
    /// totals. Bytes that do not start with the sync byte are skipped.
    pub fn update(&mut self, payload: &[u8], now: DateTime<Utc>) {
        self.rate.add(payload.len() as u64, now);
        for pkt in payload.chunks_exact(TS_PACKET_SIZE) {
            if pkt[0] != TS_SYNC_BYTE {
                continue;
            }
            let pid = (((pkt[1] & 0x1f) as usize) << 8) | pkt[2] as usize;
            let tei = pkt[1] & 0x80 != 0;
            let cc = pkt[3] & 0x0f;
            let has_payload = pkt[3] & 0x10 != 0;

            self.packet_count += 1;
            let entry = &mut self.pids[pid];
            let first = !entry.enabled;
            entry.enabled = true;
            entry.packet_count += 1;
            entry.rate.add(TS_PACKET_SIZE as u64, now);

            if tei {
                entry.tei_errors += 1;
                self.tei_errors += 1;
            }

            // The continuity counter advances only on packets carrying
            // payload; the null PID is exempt.
            if pid != NULL_PID && !first {
                let expected = if has_payload {
                    (entry.last_cc + 1) & 0x0f
                } else {
                    entry.last_cc
                };
                if cc != expected {
                    entry.cc_errors += 1;
                    self.cc_errors += 1;
                }
            }
            entry.last_cc = cc;
        }
    }

    /// Stream bitrate over the last completed one-second window.
    pub fn mbps(&self) -> f64 {
        self.rate.mbps()
    }

    /// Stream bitrate in bits per second.
    pub fn bps(&self) -> u32 {
        self.rate.bps()
    }

    /// Bitrate of a single PID.
    pub fn pid_mbps(&self, pid: usize) -> f64 {
        self.pids.get(pid).map(|p| p.mbps()).unwrap_or(0.0)
    }

    /// The counters for `pid`, when it has been seen on the flow.
    pub fn pid(&self, pid: usize) -> Option<&PidCounters> {
        self.pids.get(pid).filter(|p| p.enabled)
    }

    /// Iterates the enabled PIDs in ascending order.
    pub fn enabled_pids(&self) -> impl Iterator<Item = (usize, &PidCounters)> {
        self.pids
            .iter()
            .enumerate()
            .filter(|(_, p)| p.enabled)
    }

    pub fn reset(&mut self) {
        *self = PidStats::new();
    }
}

/// ATSC 3.0 CTP / SMPTE 2110 packet statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CtpStats {
    /// Datagrams seen.
    pub packet_count: u64,
    rate: RateWindow,
}

impl CtpStats {
    pub fn new() -> Self {
        CtpStats::default()
    }

    /// Accounts one datagram payload of `len` bytes.
    pub fn update(&mut self, len: usize, now: DateTime<Utc>) {
        self.packet_count += 1;
        self.rate.add(len as u64, now);
    }

    pub fn mbps(&self) -> f64 {
        self.rate.mbps()
    }

    pub fn bps(&self) -> u32 {
        self.rate.bps()
    }

    pub fn reset(&mut self) {
        *self = CtpStats::default();
    }
}

/// Statistics for flows with no recognized structure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytestreamStats {
    /// Datagrams seen.
    pub packet_count: u64,
    rate: RateWindow,
}

impl BytestreamStats {
    pub fn new() -> Self {
        BytestreamStats::default()
    }

    /// Accounts one datagram payload of `len` bytes.
    pub fn update(&mut self, len: usize, now: DateTime<Utc>) {
        self.packet_count += 1;
        self.rate.add(len as u64, now);
    }

    pub fn mbps(&self) -> f64 {
        self.rate.mbps()
    }

    pub fn bps(&self) -> u32 {
        self.rate.bps()
    }

    pub fn reset(&mut self) {
        *self = BytestreamStats::default();
    }
}

/// The per-flow stats blob; the variant follows the payload classification.
#[derive(Debug, Clone)]
pub enum PayloadStats {
    Ts(PidStats),
    Ctp(CtpStats),
    Bytestream(BytestreamStats),
}

impl PayloadStats {
    pub fn mbps(&self) -> f64 {
        match self {
            PayloadStats::Ts(s) => s.mbps(),
            PayloadStats::Ctp(s) => s.mbps(),
            PayloadStats::Bytestream(s) => s.mbps(),
        }
    }

    pub fn bps(&self) -> u32 {
        match self {
            PayloadStats::Ts(s) => s.bps(),
            PayloadStats::Ctp(s) => s.bps(),
            PayloadStats::Bytestream(s) => s.bps(),
        }
    }

    /// TS packets for transport streams, datagrams otherwise.
    pub fn packet_count(&self) -> u64 {
        match self {
            PayloadStats::Ts(s) => s.packet_count,
            PayloadStats::Ctp(s) => s.packet_count,
            PayloadStats::Bytestream(s) => s.packet_count,
        }
    }

    /// Continuity errors; zero for payloads without a continuity counter.
    pub fn cc_errors(&self) -> u64 {
        match self {
            PayloadStats::Ts(s) => s.cc_errors,
            _ => 0,
        }
    }

    /// The transport-stream view of the blob, when the flow carries TS.
    pub fn as_ts(&self) -> Option<&PidStats> {
        match self {
            PayloadStats::Ts(s) => Some(s),
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        match self {
            PayloadStats::Ts(s) => s.reset(),
            PayloadStats::Ctp(s) => s.reset(),
            PayloadStats::Bytestream(s) => s.reset(),
        }
    }
}

/// Totals captured at the last file emission; the summary lines flag CC-count
/// movement against this.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub packet_count: u64,
    pub cc_errors: u64,
}

impl From<&PayloadStats> for StatsSnapshot {
    fn from(stats: &PayloadStats) -> Self {
        StatsSnapshot {
            packet_count: stats.packet_count(),
            cc_errors: stats.cc_errors(),
        }
    }
}
