//! Flow discovery and state management.
//!
//! The [`FlowRegistry`] owns every discovered flow twice over: an ordered
//! list (sorted by destination address and port) that gives the UI and the
//! summary emitters a deterministic iteration order, and a 16-bit hash index
//! that keeps per-packet lookup off the capture thread's critical path. A
//! single coarse mutex serializes list traversal, list and index mutation,
//! and cache metrics; per-flow counter updates happen against the record's
//! own lock once `find_or_create` has returned.

pub mod flow;
pub mod hash_index;

use self::flow::{FlowRecord, FlowState};
use self::hash_index::{flow_hash, HashIndex};
use crate::analyze::{AnalyzerFactory, NullAnalyzerFactory};
use crate::config::MonitorConfig;
use crate::protocols::packet::ethernet::EthernetHeader;
use crate::protocols::packet::ipv4::Ipv4Header;
use crate::protocols::packet::udp::UdpHeader;
use crate::summary::{self, CaptureStats};

use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

/// Flow-cache hit/miss counters and the derived ratio.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheMetrics {
    pub hit: u64,
    pub miss: u64,
    /// `100.0 - miss/hit*100.0`. Relative to hits, not to total probes:
    /// undefined (non-finite) until the first hit and able to leave
    /// `[0, 100]`. Displayed as-is.
    pub hit_ratio: f64,
}

struct RegistryInner {
    /// Flows ordered by `(dst address << 16) | dst port`, ascending.
    flows: Vec<Arc<FlowRecord>>,
    /// Hash index over the same records; chains hold shared handles, so a
    /// dangling back-reference is impossible by construction.
    index: HashIndex<Arc<FlowRecord>>,
    cache_hit: u64,
    cache_miss: u64,
    cache_hit_ratio: f64,
    capture_stats: CaptureStats,
}

/// Registry of every flow discovered on the monitored interface.
pub struct FlowRegistry {
    config: MonitorConfig,
    factory: Box<dyn AnalyzerFactory>,
    inner: Mutex<RegistryInner>,
}

impl FlowRegistry {
    /// Creates a registry with inert analyzers.
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_factory(config, Box::new(NullAnalyzerFactory))
    }

    /// Creates a registry whose new flows get analyzers from `factory`.
    pub fn with_factory(config: MonitorConfig, factory: Box<dyn AnalyzerFactory>) -> Self {
        FlowRegistry {
            config,
            factory,
            inner: Mutex::new(RegistryInner {
                flows: Vec::new(),
                index: HashIndex::new(),
                cache_hit: 0,
                cache_miss: 0,
                cache_hit_ratio: 0.0,
                capture_stats: CaptureStats::default(),
            }),
        }
    }

    /// The configuration the registry was built with.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Number of discovered flows.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().flows.len()
    }

    /// Whether any flow has been discovered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the record for the packet's 4-tuple, discovering the flow on
    /// first sight.
    pub fn find_or_create(
        &self,
        eth: &EthernetHeader,
        ipv4: &Ipv4Header,
        udp: &UdpHeader,
    ) -> Arc<FlowRecord> {
        self.find_or_create_at(eth, ipv4, udp, Utc::now())
    }

    /// As [`FlowRegistry::find_or_create`], against an explicit wallclock
    /// reading (e.g. the capture timestamp) used for a new record's
    /// discovery time.
    pub fn find_or_create_at(
        &self,
        eth: &EthernetHeader,
        ipv4: &Ipv4Header,
        udp: &UdpHeader,
        now: DateTime<Utc>,
    ) -> Arc<FlowRecord> {
        let hash = flow_hash(u32::from(ipv4.dst_addr()), udp.dst_port());
        if self.config.verbose > 2 {
            log::debug!(
                "cache srch on {}:{} -> {}:{}",
                ipv4.src_addr(),
                udp.src_port(),
                ipv4.dst_addr(),
                udp.dst_port()
            );
        }

        let mut inner = self.inner.lock().unwrap();

        if self.config.verbose > 3 {
            let mut buf = Vec::new();
            if inner.index.dump(hash, &mut buf).is_ok() {
                log::debug!("{}", String::from_utf8_lossy(&buf).trim_end());
            }
        }

        // The hash has reasonable selectivity but collides by design; the
        // chain is matched exactly on the full 4-tuple.
        let mut found = None;
        if inner.index.len(hash) >= 1 {
            for item in inner.index.iter(hash) {
                if item.matches(ipv4, udp) {
                    found = Some(Arc::clone(item));
                    break;
                }
            }
        }

        match &found {
            Some(record) => {
                inner.cache_hit += 1;
                if self.config.verbose > 3 {
                    log::debug!("cache  hit on {record}");
                }
            }
            None => {
                inner.cache_miss += 1;
                if self.config.verbose > 3 {
                    log::debug!(
                        "cache miss on {}:{} -> {}:{}",
                        ipv4.src_addr(),
                        udp.src_port(),
                        ipv4.dst_addr(),
                        udp.dst_port()
                    );
                }
            }
        }
        // Ratio is relative to hits; non-finite until the first hit.
        inner.cache_hit_ratio =
            100.0 - (inner.cache_miss as f64 / inner.cache_hit as f64) * 100.0;

        match found {
            Some(record) => record,
            None => {
                let record = Arc::new(FlowRecord::new(
                    eth,
                    ipv4,
                    udp,
                    self.factory.as_ref(),
                    now,
                    self.config.suppress_first_interval,
                ));
                Self::insert_ordered(&mut inner.flows, &record);
                inner.index.insert(hash, Arc::clone(&record));
                if self.config.record_streams {
                    record.state_set(FlowState::PcapRecordStart);
                }
                record
            }
        }
    }

    /// Walks the ordered list and inserts `record` before the first entry
    /// with an equal or greater key, marking both as destination duplicates
    /// on an exact key match.
    fn insert_ordered(flows: &mut Vec<Arc<FlowRecord>>, record: &Arc<FlowRecord>) {
        let key = record.dst_key();
        for (i, entry) in flows.iter().enumerate() {
            let entry_key = entry.dst_key();
            if entry_key < key {
                continue;
            }
            if entry_key == key {
                record.state_set(FlowState::DstDuplicate);
                entry.state_set(FlowState::DstDuplicate);
            }
            flows.insert(i, Arc::clone(record));
            return;
        }
        flows.push(Arc::clone(record));
    }

    /// Cache hit/miss counters.
    pub fn cache_metrics(&self) -> CacheMetrics {
        let inner = self.inner.lock().unwrap();
        CacheMetrics {
            hit: inner.cache_hit,
            miss: inner.cache_miss,
            hit_ratio: inner.cache_hit_ratio,
        }
    }

    /// Publishes interface drop counters for the summary lines.
    pub fn set_capture_stats(&self, stats: CaptureStats) {
        self.inner.lock().unwrap().capture_stats = stats;
    }

    /// The most recently published interface drop counters.
    pub fn capture_stats(&self) -> CaptureStats {
        self.inner.lock().unwrap().capture_stats
    }

    /// A point-in-time copy of the ordered flow list.
    pub fn flows(&self) -> Vec<Arc<FlowRecord>> {
        self.inner.lock().unwrap().flows.clone()
    }

    /// Writes the per-flow summary blocks to stdout.
    pub fn console_summary(&self) {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        if let Err(e) = self.write_summaries(&mut out) {
            log::error!("console summary failed: {e}");
        }
    }

    /// Writes the per-flow summary blocks to `w`, in list order.
    pub fn write_summaries(&self, w: &mut impl Write) -> io::Result<()> {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            summary::write_flow_summary(w, record)?;
        }
        Ok(())
    }

    /// Appends one summary line per flow to its on-disk file, then snapshots
    /// the totals the next cycle's CC-delta marker compares against. A flow
    /// whose file cannot be opened is logged and skipped for this cycle.
    pub fn file_summary(&self) {
        self.emit_file_summaries(false)
    }

    /// As [`FlowRegistry::file_summary`], additionally appending the per-PID
    /// table and histogram render to each record.
    pub fn detailed_file_summary(&self) {
        self.emit_file_summaries(true)
    }

    fn emit_file_summaries(&self, detailed: bool) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            match summary::append_file_summary(
                &self.config,
                record,
                &inner.capture_stats,
                detailed,
            ) {
                Ok(()) => record.snapshot_file_stats(),
                Err(e) => {
                    log::error!("summary write failed for {}: {e}", record.dst_addr());
                }
            }
        }
    }

    /// Resets every flow's protocol stats, inter-arrival watermarks and
    /// histogram.
    pub fn stats_reset(&self) {
        self.stats_reset_at(Utc::now());
    }

    /// As [`FlowRegistry::stats_reset`], with an explicit wallclock.
    pub fn stats_reset_at(&self, now: DateTime<Utc>) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            record.reset_stats_at(now);
        }
    }

    /// Selects the first flow in list order.
    pub fn select_first(&self) {
        let inner = self.inner.lock().unwrap();
        if let Some(first) = inner.flows.first() {
            first.state_set(FlowState::Selected);
        }
    }

    /// Moves the selection to the next non-hidden flow. The selection stays
    /// put when it already sits on the last non-hidden entry; there is no
    /// wrap-around.
    pub fn select_next(&self) {
        let inner = self.inner.lock().unwrap();
        let visible: Vec<&Arc<FlowRecord>> = inner
            .flows
            .iter()
            .filter(|r| !r.state_get(FlowState::Hidden))
            .collect();
        for (i, entry) in visible.iter().enumerate() {
            if entry.state_get(FlowState::Selected) {
                if let Some(next) = visible.get(i + 1) {
                    entry.state_clr(FlowState::Selected);
                    next.state_set(FlowState::Selected);
                }
                break;
            }
        }
    }

    /// Moves the selection to the previous non-hidden flow; no wrap-around.
    pub fn select_prev(&self) {
        let inner = self.inner.lock().unwrap();
        let mut prev: Option<&Arc<FlowRecord>> = None;
        for entry in inner
            .flows
            .iter()
            .filter(|r| !r.state_get(FlowState::Hidden))
        {
            if entry.state_get(FlowState::Selected) {
                if let Some(prev) = prev {
                    entry.state_clr(FlowState::Selected);
                    prev.state_set(FlowState::Selected);
                }
                break;
            }
            prev = Some(entry);
        }
    }

    /// Selects every flow.
    pub fn select_all(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            record.state_set(FlowState::Selected);
        }
    }

    /// Deselects every flow.
    pub fn select_none(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            record.state_clr(FlowState::Selected);
        }
    }

    /// Hides every selected flow. A flow being recorded stays visible.
    pub fn select_hide(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            if !record.state_get(FlowState::Selected) {
                continue;
            }
            if record.state_get(FlowState::PcapRecording) {
                continue;
            }
            record.state_set(FlowState::Hidden);
        }
    }

    /// Clears the hidden flag on every flow.
    pub fn unhide_all(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            record.state_clr(FlowState::Hidden);
        }
    }

    /// For each selected flow, requests a recording stop when recording is
    /// active or starting, otherwise requests a start. The recorder worker
    /// performs the actual transitions asynchronously.
    pub fn select_record_toggle(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            if !record.state_get(FlowState::Selected) {
                continue;
            }
            if record.state_get(FlowState::PcapRecording)
                || record.state_get(FlowState::PcapRecordStart)
            {
                record.state_set(FlowState::PcapRecordStop);
            } else {
                record.state_set(FlowState::PcapRecordStart);
            }
        }
    }

    /// Requests a recording stop on every flow that is recording or about to
    /// record, selected or not.
    pub fn record_abort(&self) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            if record.state_get(FlowState::PcapRecording)
                || record.state_get(FlowState::PcapRecordStart)
            {
                record.state_set(FlowState::PcapRecordStop);
            }
        }
    }

    /// Flips the per-PID table display on every selected flow.
    pub fn select_show_pids_toggle(&self) {
        self.toggle_selected(FlowState::ShowPids);
    }

    /// Flips the TR 101 290 display on every selected flow.
    pub fn select_show_tr101290_toggle(&self) {
        self.toggle_selected(FlowState::ShowTr101290);
    }

    /// Flips the inter-arrival histogram display on every selected flow.
    pub fn select_show_iats_toggle(&self) {
        self.toggle_selected(FlowState::ShowIatHistogram);
    }

    /// Flips the stream-model display on every selected flow.
    pub fn select_show_streammodel_toggle(&self) {
        self.toggle_selected(FlowState::ShowStreamModel);
    }

    fn toggle_selected(&self, mask: FlowState) {
        let inner = self.inner.lock().unwrap();
        for record in &inner.flows {
            if !record.state_get(FlowState::Selected) {
                continue;
            }
            if record.state_get(mask) {
                record.state_clr(mask);
            } else {
                record.state_set(mask);
            }
        }
    }

    /// Drains the registry, releasing every record. Recorders flush as their
    /// records drop. Called at shutdown with the packet feed stopped.
    pub fn free_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.index.clear();
        inner.flows.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::packet::{build_udp_frame, UdpFrame};
    use std::net::Ipv4Addr;
    use std::thread;

    fn t(offset_ms: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(1_700_000_000_000 + offset_ms).unwrap()
    }

    fn registry() -> FlowRegistry {
        FlowRegistry::new(MonitorConfig::default())
    }

    fn feed(
        registry: &FlowRegistry,
        src: (Ipv4Addr, u16),
        dst: (Ipv4Addr, u16),
    ) -> Arc<FlowRecord> {
        let frame = build_udp_frame(src, dst, &[]);
        let parsed = UdpFrame::parse(&frame).unwrap();
        registry.find_or_create_at(&parsed.eth, &parsed.ipv4, &parsed.udp, t(0))
    }

    const SRC: (Ipv4Addr, u16) = (Ipv4Addr::new(192, 168, 1, 1), 5004);

    #[test]
    fn repeat_tuples_return_the_same_record() {
        let registry = registry();
        let a1 = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4001));
        let b = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4002));
        let a2 = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4001));

        assert_eq!(registry.len(), 2);
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));

        let flows = registry.flows();
        assert_eq!(flows[0].dst_addr(), "10.0.0.1:4001");
        assert_eq!(flows[1].dst_addr(), "10.0.0.1:4002");

        let metrics = registry.cache_metrics();
        assert_eq!(metrics.hit, 1);
        assert_eq!(metrics.miss, 2);
    }

    #[test]
    fn distinct_sources_to_one_destination_are_distinct_flows() {
        let registry = registry();
        let dst = (Ipv4Addr::new(10, 0, 0, 1), 4000);
        let a = feed(&registry, (Ipv4Addr::new(192, 168, 1, 1), 5004), dst);
        let b = feed(&registry, (Ipv4Addr::new(192, 168, 1, 2), 5004), dst);

        assert_eq!(registry.len(), 2);
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(a.state_get(FlowState::DstDuplicate));
        assert!(b.state_get(FlowState::DstDuplicate));
    }

    #[test]
    fn list_stays_sorted_by_destination_key() {
        let registry = registry();
        for (ip, port) in [
            (Ipv4Addr::new(10, 0, 0, 9), 4000),
            (Ipv4Addr::new(10, 0, 0, 1), 4002),
            (Ipv4Addr::new(10, 0, 0, 1), 4001),
            (Ipv4Addr::new(10, 0, 0, 3), 1),
        ] {
            feed(&registry, SRC, (ip, port));
        }
        let keys: Vec<u64> = registry.flows().iter().map(|r| r.dst_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        assert_eq!(registry.flows()[0].dst_addr(), "10.0.0.1:4001");
    }

    #[test]
    fn contiguous_port_block_probes_cleanly() {
        let registry = registry();
        let dst_ip = Ipv4Addr::new(10, 0, 0, 1);
        for port in 4000..4256u16 {
            feed(&registry, SRC, (dst_ip, port));
        }
        assert_eq!(registry.len(), 256);
        assert_eq!(registry.cache_metrics().miss, 256);

        // Second pass: every flow resolves from the index.
        for port in 4000..4256u16 {
            feed(&registry, SRC, (dst_ip, port));
        }
        let metrics = registry.cache_metrics();
        assert_eq!(metrics.miss, 256);
        assert_eq!(metrics.hit, 256);

        // The fingerprint folds 16 contiguous ports per slot at most.
        let inner = registry.inner.lock().unwrap();
        for port in 4000..4256u16 {
            let hash = flow_hash(u32::from(dst_ip), port);
            assert!(inner.index.len(hash) <= 16);
        }
    }

    #[test]
    fn hit_ratio_follows_the_hits_formula() {
        let registry = registry();
        let dst = (Ipv4Addr::new(10, 0, 0, 1), 4000);
        feed(&registry, SRC, dst);
        // One miss, zero hits: the ratio is not finite yet.
        assert!(!registry.cache_metrics().hit_ratio.is_finite());

        feed(&registry, SRC, dst);
        feed(&registry, SRC, dst);
        // One miss, two hits: 100 - (1/2)*100 = 50.
        let metrics = registry.cache_metrics();
        assert!((metrics.hit_ratio - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn auto_record_marks_new_flows_once() {
        let mut config = MonitorConfig::default();
        config.record_streams = true;
        let registry = FlowRegistry::new(config);
        let record = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        assert!(record.state_get(FlowState::PcapRecordStart));

        // A later lookup does not re-request recording.
        record.state_clr(FlowState::PcapRecordStart);
        let again = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        assert!(!again.state_get(FlowState::PcapRecordStart));
    }

    #[test]
    fn selection_skips_hidden_flows() {
        let registry = registry();
        for port in 4001..4006u16 {
            feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), port));
        }
        let flows = registry.flows();

        // Select flows 2 and 4, hide them, then step from flow 1.
        flows[1].state_set(FlowState::Selected);
        flows[3].state_set(FlowState::Selected);
        registry.select_hide();
        assert!(flows[1].state_get(FlowState::Hidden));
        assert!(flows[3].state_get(FlowState::Hidden));
        flows[1].state_clr(FlowState::Selected);
        flows[3].state_clr(FlowState::Selected);

        registry.select_first();
        assert!(flows[0].state_get(FlowState::Selected));
        registry.select_next();
        assert!(!flows[0].state_get(FlowState::Selected));
        assert!(flows[2].state_get(FlowState::Selected));

        registry.select_next();
        assert!(flows[4].state_get(FlowState::Selected));
        // Last non-hidden entry: the selection stays put.
        registry.select_next();
        assert!(flows[4].state_get(FlowState::Selected));

        registry.select_prev();
        assert!(flows[2].state_get(FlowState::Selected));
        assert!(!flows[4].state_get(FlowState::Selected));
    }

    #[test]
    fn select_prev_stops_at_the_first_visible_flow() {
        let registry = registry();
        for port in 4001..4004u16 {
            feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), port));
        }
        registry.select_first();
        registry.select_prev();
        assert!(registry.flows()[0].state_get(FlowState::Selected));
    }

    #[test]
    fn recording_flows_cannot_be_hidden() {
        let registry = registry();
        let record = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.state_set(FlowState::Selected | FlowState::PcapRecording);
        registry.select_hide();
        assert!(!record.state_get(FlowState::Hidden));

        registry.unhide_all();
        record.state_clr(FlowState::PcapRecording);
        registry.select_hide();
        assert!(record.state_get(FlowState::Hidden));
    }

    #[test]
    fn record_toggle_requests_start_then_stop() {
        let registry = registry();
        let record = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.state_set(FlowState::Selected);

        registry.select_record_toggle();
        assert!(record.state_get(FlowState::PcapRecordStart));
        assert!(!record.state_get(FlowState::PcapRecordStop));

        registry.select_record_toggle();
        assert!(record.state_get(FlowState::PcapRecordStop));
    }

    #[test]
    fn record_abort_stops_active_and_pending_recordings() {
        let registry = registry();
        let a = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4001));
        let b = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4002));
        let idle = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4003));
        a.state_set(FlowState::PcapRecording);
        b.state_set(FlowState::PcapRecordStart);

        registry.record_abort();
        assert!(a.state_get(FlowState::PcapRecordStop));
        assert!(b.state_get(FlowState::PcapRecordStop));
        assert!(!idle.state_get(FlowState::PcapRecordStop));
    }

    #[test]
    fn show_toggles_flip_only_selected_flows() {
        let registry = registry();
        let selected = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4001));
        let other = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4002));
        selected.state_set(FlowState::Selected);

        registry.select_show_pids_toggle();
        registry.select_show_iats_toggle();
        assert!(selected.state_get(FlowState::ShowPids));
        assert!(selected.state_get(FlowState::ShowIatHistogram));
        assert!(!other.state_get(FlowState::ShowPids));

        registry.select_show_pids_toggle();
        assert!(!selected.state_get(FlowState::ShowPids));
    }

    #[test]
    fn stats_reset_touches_every_flow() {
        let registry = registry();
        let record = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        record.observe_iat(t(10));
        record.observe_iat(t(30));
        registry.stats_reset_at(t(50));
        let metrics = record.metrics.lock().unwrap();
        assert_eq!(metrics.intervals.total_measurements(), 0);
        assert_eq!(metrics.iat_lwm_us, flow::IAT_LWM_RESET_US);
        assert_eq!(metrics.iat_hwm_us, flow::IAT_HWM_RESET_US);
    }

    #[test]
    fn free_all_releases_records() {
        let registry = registry();
        feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4001));
        assert_eq!(registry.len(), 2);
        registry.free_all();
        assert!(registry.is_empty());

        // Rediscovery after a drain starts clean.
        let record = feed(&registry, SRC, (Ipv4Addr::new(10, 0, 0, 1), 4000));
        assert_eq!(registry.len(), 1);
        assert!(!record.state_get(FlowState::DstDuplicate));
    }

    #[test]
    fn capture_and_stats_threads_share_the_registry() {
        let registry = Arc::new(registry());
        let dst_ip = Ipv4Addr::new(239, 1, 2, 3);

        let capture = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for round in 0..50i64 {
                    for port in 4000..4064u16 {
                        let frame = build_udp_frame(SRC, (dst_ip, port), &[]);
                        let parsed = UdpFrame::parse(&frame).unwrap();
                        let record = registry.find_or_create_at(
                            &parsed.eth,
                            &parsed.ipv4,
                            &parsed.udp,
                            t(round * 10),
                        );
                        record.observe_iat(t(round * 10));
                    }
                }
            })
        };

        let ui = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut sink = Vec::new();
                    registry.write_summaries(&mut sink).unwrap();
                    registry.select_first();
                    registry.select_next();
                    registry.select_none();
                }
            })
        };

        capture.join().unwrap();
        ui.join().unwrap();

        assert_eq!(registry.len(), 64);
        let keys: Vec<u64> = registry.flows().iter().map(|r| r.dst_key()).collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
        let metrics = registry.cache_metrics();
        assert_eq!(metrics.miss, 64);
        assert_eq!(metrics.hit as usize, 50 * 64 - 64);
    }
}
