//! Per-flow state.
//!
//! A [`FlowRecord`] is created the first time a 4-tuple is seen and lives in
//! the registry until shutdown. Identity is immutable after construction;
//! mutable state is split by writer so the capture thread can update counters
//! and the inter-arrival histogram without holding the registry lock, while
//! the stats/UI thread toggles flags and reads summaries.

use crate::analyze::{AnalyzerFactory, LatencyProbe, PcapRecorder, StreamModel};
use crate::histogram::{delta_us, Histogram};
use crate::protocols::packet::ethernet::EthernetHeader;
use crate::protocols::packet::ipv4::Ipv4Header;
use crate::protocols::packet::udp::UdpHeader;
use crate::stats::{
    BytestreamStats, CtpStats, PayloadStats, PidStats, StatsSnapshot, TS_PACKET_SIZE, TS_SYNC_BYTE,
};

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use bitmask_enum::bitmask;
use chrono::{DateTime, Utc};

/// Low-watermark sentinel a fresh record starts from.
const IAT_LWM_INIT_US: i64 = 50_000_000;

/// Watermark values a stats reset restores.
pub(crate) const IAT_LWM_RESET_US: i64 = 5_000_000;
pub(crate) const IAT_HWM_RESET_US: i64 = -1;

/// Fixed RTP header length; TS packets follow it in RTP-encapsulated flows.
const RTP_HEADER_LEN: usize = 12;

/// Per-flow state flags.
///
/// Flag combinations are free at this layer; rules such as "no hiding while
/// recording" are enforced by the registry commands that apply them.
#[bitmask(u32)]
pub enum FlowState {
    /// Another discovered flow shares this destination address and port.
    DstDuplicate,
    /// The recorder collaborator is writing segments for this flow.
    PcapRecording,
    /// Recording was requested; the recorder worker picks this up.
    PcapRecordStart,
    /// Recording stop was requested; the recorder worker winds down.
    PcapRecordStop,
    /// Highlighted in the UI; bulk toggles apply to selected flows.
    Selected,
    /// Omitted from UI display and selection traversal.
    Hidden,
    /// UI detail: show the per-PID table.
    ShowPids,
    /// UI detail: show TR 101 290 findings.
    ShowTr101290,
    /// UI detail: show the inter-arrival histogram.
    ShowIatHistogram,
    /// UI detail: show the stream model.
    ShowStreamModel,
}

/// Payload classification for a discovered flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Not yet classified.
    Unknown,
    /// Raw transport stream over UDP.
    UdpTs,
    /// RTP-encapsulated transport stream.
    RtpTs,
    /// Smoothed transport layer.
    Stl,
    /// Examined but unrecognized.
    Unclassified,
    /// SMPTE 2110-20 uncompressed video.
    Smpte2110Video,
    /// SMPTE 2110-30 PCM audio.
    Smpte2110Audio,
    /// ATSC 3.0 A/324 common transport protocol.
    A324Ctp,
}

/// Which stats blob a classification needs.
#[derive(PartialEq, Eq)]
enum StatsKind {
    Ts,
    Ctp,
    Bytestream,
}

impl PayloadType {
    /// Three-character code used in summary lines.
    pub fn code(&self) -> &'static str {
        match self {
            PayloadType::Unknown => "???",
            PayloadType::UdpTs => "UDP",
            PayloadType::RtpTs => "RTP",
            PayloadType::Stl => "STL",
            PayloadType::Unclassified => "UNK",
            PayloadType::Smpte2110Video => "21V",
            PayloadType::Smpte2110Audio => "21A",
            PayloadType::A324Ctp => "CTP",
        }
    }

    /// Whether the payload carries sync-aligned transport-stream packets.
    pub fn is_ts(&self) -> bool {
        matches!(self, PayloadType::UdpTs | PayloadType::RtpTs)
    }

    fn stats_kind(&self) -> StatsKind {
        match self {
            PayloadType::UdpTs | PayloadType::RtpTs => StatsKind::Ts,
            PayloadType::Smpte2110Video | PayloadType::Smpte2110Audio | PayloadType::A324Ctp => {
                StatsKind::Ctp
            }
            PayloadType::Unknown | PayloadType::Stl | PayloadType::Unclassified => {
                StatsKind::Bytestream
            }
        }
    }

    /// Guesses the classification of a datagram payload: sync-aligned TS,
    /// RTP-wrapped TS, or unrecognized.
    pub fn sniff(payload: &[u8]) -> PayloadType {
        if !payload.is_empty() && payload.len() % TS_PACKET_SIZE == 0 && payload[0] == TS_SYNC_BYTE
        {
            return PayloadType::UdpTs;
        }
        if payload.len() > RTP_HEADER_LEN
            && payload[0] >> 6 == 2
            && (payload.len() - RTP_HEADER_LEN) % TS_PACKET_SIZE == 0
            && payload[RTP_HEADER_LEN] == TS_SYNC_BYTE
        {
            return PayloadType::RtpTs;
        }
        PayloadType::Unclassified
    }
}

/// Capture-thread-owned mutable state, guarded by the record's own mutex so
/// hot-path updates do not take the registry lock.
pub struct FlowMetrics {
    /// Wallclock of the most recent packet.
    pub last_updated: DateTime<Utc>,
    /// Lowest inter-arrival time seen, in microseconds.
    pub iat_lwm_us: i64,
    /// Highest inter-arrival time seen, in microseconds.
    pub iat_hwm_us: i64,
    /// Most recent inter-arrival time, in microseconds.
    pub iat_cur_us: i64,
    /// Inter-arrival histogram, video preset.
    pub intervals: Histogram,
    /// Current payload classification.
    pub payload_type: PayloadType,
    /// Stats blob matching the classification.
    pub stats: PayloadStats,
    /// Totals at the last file emission.
    pub(crate) stats_to_file: StatsSnapshot,
    packets_seen: u64,
}

/// Opaque analyzer handles owned by the record.
#[derive(Default)]
pub struct Analyzers {
    pub stream_model: Option<Box<dyn StreamModel>>,
    pub latency_probe: Option<Box<dyn LatencyProbe>>,
    pub pcap_recorder: Option<Box<dyn PcapRecorder>>,
}

/// Lazily-resolved on-disk summary filenames.
#[derive(Debug, Default)]
pub(crate) struct SummaryPaths {
    pub(crate) summary: Option<PathBuf>,
    pub(crate) detailed: Option<PathBuf>,
}

/// State for one discovered `(src, dst)` UDP flow.
pub struct FlowRecord {
    eth: EthernetHeader,
    ipv4: Ipv4Header,
    udp: UdpHeader,
    src_addr: String,
    dst_addr: String,
    first_seen: DateTime<Utc>,
    suppress_first_interval: bool,
    state: AtomicU32,
    pub(crate) metrics: Mutex<FlowMetrics>,
    pub(crate) analyzers: Mutex<Analyzers>,
    pub(crate) paths: Mutex<SummaryPaths>,
}

impl FlowRecord {
    /// Snapshots the packet headers and prepares the flow's histogram, stats
    /// blob and analyzers. Analyzer allocation failures are logged and
    /// tolerated; the record still functions without them.
    pub(crate) fn new(
        eth: &EthernetHeader,
        ipv4: &Ipv4Header,
        udp: &UdpHeader,
        factory: &dyn AnalyzerFactory,
        now: DateTime<Utc>,
        suppress_first_interval: bool,
    ) -> Self {
        let src_addr = format!("{}:{}", ipv4.src_addr(), udp.src_port());
        let dst_addr = format!("{}:{}", ipv4.dst_addr(), udp.dst_port());

        let intervals = Histogram::video_defaults("IAT Intervals")
            .expect("video preset bounds are valid");

        let stream_model = match factory.stream_model() {
            Ok(model) => Some(model),
            Err(e) => {
                log::warn!("unable to allocate stream model for {dst_addr}, continuing: {e}");
                None
            }
        };
        let latency_probe = match factory.latency_probe() {
            Ok(probe) => Some(probe),
            Err(e) => {
                log::warn!("unable to allocate latency probe for {dst_addr}, continuing: {e}");
                None
            }
        };

        FlowRecord {
            eth: *eth,
            ipv4: *ipv4,
            udp: *udp,
            src_addr,
            dst_addr,
            first_seen: now,
            suppress_first_interval,
            state: AtomicU32::new(0),
            metrics: Mutex::new(FlowMetrics {
                last_updated: now,
                iat_lwm_us: IAT_LWM_INIT_US,
                iat_hwm_us: -1,
                iat_cur_us: 0,
                intervals,
                payload_type: PayloadType::Unknown,
                stats: PayloadStats::Bytestream(BytestreamStats::new()),
                stats_to_file: StatsSnapshot::default(),
                packets_seen: 0,
            }),
            analyzers: Mutex::new(Analyzers {
                stream_model,
                latency_probe,
                pcap_recorder: None,
            }),
            paths: Mutex::new(SummaryPaths::default()),
        }
    }

    /// `"a.b.c.d:port"` of the flow source.
    pub fn src_addr(&self) -> &str {
        &self.src_addr
    }

    /// `"a.b.c.d:port"` of the flow destination.
    pub fn dst_addr(&self) -> &str {
        &self.dst_addr
    }

    /// Ethernet header of the first packet.
    pub fn eth(&self) -> &EthernetHeader {
        &self.eth
    }

    /// IPv4 header of the first packet.
    pub fn ipv4(&self) -> &Ipv4Header {
        &self.ipv4
    }

    /// UDP header of the first packet.
    pub fn udp(&self) -> &UdpHeader {
        &self.udp
    }

    /// Wallclock of the first packet.
    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    /// Exact 4-tuple comparison against a packet's IP and UDP headers.
    pub fn matches(&self, ipv4: &Ipv4Header, udp: &UdpHeader) -> bool {
        self.ipv4.src_addr() == ipv4.src_addr()
            && self.ipv4.dst_addr() == ipv4.dst_addr()
            && self.udp.src_port() == udp.src_port()
            && self.udp.dst_port() == udp.dst_port()
    }

    /// Ordering key for the registry list: destination address in host order
    /// shifted over the destination port.
    pub(crate) fn dst_key(&self) -> u64 {
        flow_sort_key(&self.ipv4, &self.udp)
    }

    /// Sets the flags in `mask`.
    pub fn state_set(&self, mask: FlowState) {
        self.state.fetch_or(mask.bits, Ordering::Relaxed);
    }

    /// Clears the flags in `mask`.
    pub fn state_clr(&self, mask: FlowState) {
        self.state.fetch_and(!mask.bits, Ordering::Relaxed);
    }

    /// Returns `true` when any flag in `mask` is set.
    pub fn state_get(&self, mask: FlowState) -> bool {
        self.state.load(Ordering::Relaxed) & mask.bits != 0
    }

    /// Current payload classification.
    pub fn payload_type(&self) -> PayloadType {
        self.metrics.lock().unwrap().payload_type
    }

    /// Reclassifies the flow. When the classification needs a different
    /// stats blob kind, the blob is replaced and its counters restart.
    pub fn set_payload_type(&self, payload_type: PayloadType) {
        let mut metrics = self.metrics.lock().unwrap();
        if metrics.payload_type == payload_type {
            return;
        }
        if metrics.payload_type.stats_kind() != payload_type.stats_kind() {
            metrics.stats = match payload_type.stats_kind() {
                StatsKind::Ts => PayloadStats::Ts(PidStats::new()),
                StatsKind::Ctp => PayloadStats::Ctp(CtpStats::new()),
                StatsKind::Bytestream => PayloadStats::Bytestream(BytestreamStats::new()),
            };
        }
        metrics.payload_type = payload_type;
    }

    /// Records one packet arrival: maintains the inter-arrival watermarks and
    /// histogram and advances `last_updated`.
    pub fn observe_iat(&self, now: DateTime<Utc>) {
        let mut metrics = self.metrics.lock().unwrap();
        let first = metrics.packets_seen == 0;
        metrics.packets_seen += 1;
        let iat_us = delta_us(now, metrics.last_updated);
        metrics.last_updated = now;

        if first && self.suppress_first_interval {
            metrics.intervals.restart_interval_at(now);
            return;
        }
        metrics.iat_cur_us = iat_us;
        if iat_us < metrics.iat_lwm_us {
            metrics.iat_lwm_us = iat_us;
        }
        if iat_us > metrics.iat_hwm_us {
            metrics.iat_hwm_us = iat_us;
        }
        metrics.intervals.interval_update_at(now);
    }

    /// Feeds one datagram payload to the flow's stats blob, and for
    /// transport streams to the stream-model and latency-probe analyzers.
    pub fn feed(&self, payload: &[u8], now: DateTime<Utc>) {
        let payload_type = {
            let mut metrics = self.metrics.lock().unwrap();
            let payload_type = metrics.payload_type;
            match &mut metrics.stats {
                PayloadStats::Ts(stats) => stats.update(ts_packets(payload, payload_type), now),
                PayloadStats::Ctp(stats) => stats.update(payload.len(), now),
                PayloadStats::Bytestream(stats) => stats.update(payload.len(), now),
            }
            payload_type
        };

        if payload_type.is_ts() {
            let packets = ts_packets(payload, payload_type);
            let mut analyzers = self.analyzers.lock().unwrap();
            if let Some(model) = analyzers.stream_model.as_mut() {
                model.consume(packets, now);
            }
            if let Some(probe) = analyzers.latency_probe.as_mut() {
                probe.consume(packets, now);
            }
        }
    }

    /// Resets the stats blob, the inter-arrival watermarks and the histogram.
    pub fn reset_stats_at(&self, now: DateTime<Utc>) {
        let mut metrics = self.metrics.lock().unwrap();
        metrics.stats.reset();
        metrics.iat_lwm_us = IAT_LWM_RESET_US;
        metrics.iat_hwm_us = IAT_HWM_RESET_US;
        metrics.intervals.reset_at(now);
    }

    /// Captures the current totals as the file-emission baseline.
    pub(crate) fn snapshot_file_stats(&self) {
        let mut metrics = self.metrics.lock().unwrap();
        let snapshot = StatsSnapshot::from(&metrics.stats);
        metrics.stats_to_file = snapshot;
    }

    /// Hands a recorder to the record; driven by the external recorder
    /// worker when it honors a record-start request.
    pub fn attach_recorder(&self, recorder: Box<dyn PcapRecorder>) {
        self.analyzers.lock().unwrap().pcap_recorder = Some(recorder);
    }

    /// Removes the recorder, if any; dropping it flushes pending segments.
    pub fn detach_recorder(&self) -> Option<Box<dyn PcapRecorder>> {
        self.analyzers.lock().unwrap().pcap_recorder.take()
    }

    /// Resolves (and caches) the summary filename for this flow:
    /// the configured prefix followed by the destination address.
    pub(crate) fn summary_path(&self, prefix: Option<&str>, detailed: bool) -> PathBuf {
        let mut paths = self.paths.lock().unwrap();
        let slot = if detailed {
            &mut paths.detailed
        } else {
            &mut paths.summary
        };
        slot.get_or_insert_with(|| {
            let mut name = prefix.unwrap_or("").to_string();
            name.push_str(&self.dst_addr);
            PathBuf::from(name)
        })
        .clone()
    }
}

impl fmt::Display for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src_addr, self.dst_addr)
    }
}

impl Drop for FlowRecord {
    fn drop(&mut self) {
        if let Ok(analyzers) = self.analyzers.get_mut() {
            if let Some(recorder) = analyzers.pcap_recorder.as_mut() {
                if let Err(e) = recorder.flush() {
                    log::warn!("recorder flush failed for {}: {e}", self.dst_addr);
                }
            }
        }
    }
}

/// The sync-aligned TS packet region of a datagram payload.
fn ts_packets(payload: &[u8], payload_type: PayloadType) -> &[u8] {
    match payload_type {
        PayloadType::RtpTs if payload.len() > RTP_HEADER_LEN => &payload[RTP_HEADER_LEN..],
        _ => payload,
    }
}

/// Ordering key shared by the registry list and duplicate detection.
pub(crate) fn flow_sort_key(ipv4: &Ipv4Header, udp: &UdpHeader) -> u64 {
    ((u32::from(ipv4.dst_addr()) as u64) << 16) | udp.dst_port() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::NullAnalyzerFactory;
    use crate::protocols::packet::{build_udp_frame, UdpFrame};
    use std::net::Ipv4Addr;

    fn t(offset_ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + offset_ms).unwrap()
    }

    fn record(dst: (Ipv4Addr, u16)) -> FlowRecord {
        let frame = build_udp_frame((Ipv4Addr::new(192, 168, 0, 1), 5004), dst, &[]);
        let parsed = UdpFrame::parse(&frame).unwrap();
        FlowRecord::new(
            &parsed.eth,
            &parsed.ipv4,
            &parsed.udp,
            &NullAnalyzerFactory,
            t(0),
            false,
        )
    }

    #[test]
    fn identity_strings_and_display() {
        let record = record((Ipv4Addr::new(239, 10, 10, 1), 4001));
        assert_eq!(record.src_addr(), "192.168.0.1:5004");
        assert_eq!(record.dst_addr(), "239.10.10.1:4001");
        assert_eq!(record.to_string(), "192.168.0.1:5004 -> 239.10.10.1:4001");
    }

    #[test]
    fn state_flags_set_clear_get() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        assert!(!record.state_get(FlowState::Selected));
        record.state_set(FlowState::Selected | FlowState::ShowPids);
        assert!(record.state_get(FlowState::Selected));
        assert!(record.state_get(FlowState::ShowPids));
        assert!(!record.state_get(FlowState::Hidden));
        record.state_clr(FlowState::Selected);
        assert!(!record.state_get(FlowState::Selected));
        assert!(record.state_get(FlowState::ShowPids));
    }

    #[test]
    fn iat_watermarks_bracket_current() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.observe_iat(t(5));
        record.observe_iat(t(25)); // 20 ms
        record.observe_iat(t(26)); // 1 ms
        let metrics = record.metrics.lock().unwrap();
        assert!(metrics.iat_lwm_us <= metrics.iat_cur_us);
        assert!(metrics.iat_cur_us <= metrics.iat_hwm_us);
        assert_eq!(metrics.iat_cur_us, 1_000);
        assert_eq!(metrics.iat_hwm_us, 20_000);
        assert_eq!(metrics.intervals.total_measurements(), 3);
    }

    #[test]
    fn first_interval_can_be_suppressed() {
        let frame = build_udp_frame(
            (Ipv4Addr::new(192, 168, 0, 1), 5004),
            (Ipv4Addr::new(10, 9, 9, 9), 4009),
            &[],
        );
        let parsed = UdpFrame::parse(&frame).unwrap();
        let record = FlowRecord::new(
            &parsed.eth,
            &parsed.ipv4,
            &parsed.udp,
            &NullAnalyzerFactory,
            t(0),
            true,
        );
        record.observe_iat(t(5000));
        {
            let metrics = record.metrics.lock().unwrap();
            assert_eq!(metrics.intervals.total_measurements(), 0);
            assert_eq!(metrics.iat_hwm_us, -1);
        }
        record.observe_iat(t(5020));
        let metrics = record.metrics.lock().unwrap();
        assert_eq!(metrics.intervals.total_measurements(), 1);
        assert_eq!(metrics.intervals.bucket(20).unwrap().count(), 1);
    }

    #[test]
    fn payload_sniffing() {
        let mut ts = vec![0u8; TS_PACKET_SIZE * 7];
        for chunk in ts.chunks_exact_mut(TS_PACKET_SIZE) {
            chunk[0] = TS_SYNC_BYTE;
        }
        assert_eq!(PayloadType::sniff(&ts), PayloadType::UdpTs);

        let mut rtp = vec![0u8; RTP_HEADER_LEN];
        rtp[0] = 0x80; // version 2
        rtp.extend_from_slice(&ts);
        assert_eq!(PayloadType::sniff(&rtp), PayloadType::RtpTs);

        assert_eq!(PayloadType::sniff(&[1, 2, 3]), PayloadType::Unclassified);
    }

    #[test]
    fn reclassification_switches_blob_kind() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        assert!(matches!(
            record.metrics.lock().unwrap().stats,
            PayloadStats::Bytestream(_)
        ));
        record.set_payload_type(PayloadType::UdpTs);
        assert!(matches!(
            record.metrics.lock().unwrap().stats,
            PayloadStats::Ts(_)
        ));
        // Same blob kind: counters survive.
        let mut pkt = [0xffu8; TS_PACKET_SIZE];
        pkt[0] = TS_SYNC_BYTE;
        pkt[3] = 0x10;
        record.feed(&pkt, t(1));
        record.set_payload_type(PayloadType::RtpTs);
        assert_eq!(record.metrics.lock().unwrap().stats.packet_count(), 1);
    }

    #[test]
    fn feed_counts_ts_packets_behind_rtp() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.set_payload_type(PayloadType::RtpTs);
        let mut payload = vec![0x80u8, 33, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        for cc in 0..3u8 {
            let mut pkt = [0xffu8; TS_PACKET_SIZE];
            pkt[0] = TS_SYNC_BYTE;
            pkt[1] = 0x01;
            pkt[2] = 0x00;
            pkt[3] = 0x10 | cc;
            payload.extend_from_slice(&pkt);
        }
        record.feed(&payload, t(1));
        let metrics = record.metrics.lock().unwrap();
        assert_eq!(metrics.stats.packet_count(), 3);
        assert_eq!(metrics.stats.cc_errors(), 0);
    }

    #[test]
    fn stats_reset_restores_watermark_sentinels() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.observe_iat(t(5));
        record.observe_iat(t(30));
        record.reset_stats_at(t(40));
        let metrics = record.metrics.lock().unwrap();
        assert_eq!(metrics.iat_lwm_us, IAT_LWM_RESET_US);
        assert_eq!(metrics.iat_hwm_us, IAT_HWM_RESET_US);
        assert_eq!(metrics.intervals.total_measurements(), 0);
    }

    #[test]
    fn recorders_attach_and_detach() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        let recorder = NullAnalyzerFactory
            .pcap_recorder(record.dst_addr())
            .unwrap();
        record.attach_recorder(recorder);
        assert!(record.detach_recorder().is_some());
        assert!(record.detach_recorder().is_none());
    }

    #[test]
    fn summary_paths_cache_prefix_and_destination() {
        let record = record((Ipv4Addr::new(10, 0, 0, 1), 4000));
        let path = record.summary_path(Some("/tmp/nic-"), false);
        assert_eq!(path.to_str().unwrap(), "/tmp/nic-10.0.0.1:4000");
        // Cached: a later prefix change does not rename the file.
        let again = record.summary_path(Some("/other/"), false);
        assert_eq!(again, path);
        let detailed = record.summary_path(Some("/tmp/det-"), true);
        assert_eq!(detailed.to_str().unwrap(), "/tmp/det-10.0.0.1:4000");
    }
}
