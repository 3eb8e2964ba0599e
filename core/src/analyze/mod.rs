//! Seams for the per-flow analyzer collaborators.
//!
//! The registry treats analyzers as opaque handles: a stream-model tracker
//! and an encoder-latency probe are attached when a flow is discovered, and a
//! forensic pcap recorder is attached by an external recorder worker driven
//! through the flow-state flags. Implementations are replaceable; the
//! defaults here keep flows fully functional with the analyzer features
//! disabled.

use anyhow::Result;
use chrono::{DateTime, Utc};

/// PAT/PMT stream-model tracker fed by the transport-stream path.
pub trait StreamModel: Send {
    /// Consumes sync-aligned TS packets.
    fn consume(&mut self, packets: &[u8], now: DateTime<Utc>);
}

/// Encoder-latency probe. Stays dormant until it recognizes the matching
/// encoder signature in the stream.
pub trait LatencyProbe: Send {
    /// Consumes sync-aligned TS packets.
    fn consume(&mut self, packets: &[u8], now: DateTime<Utc>);

    /// Most recent latency estimate, once the probe has locked on.
    fn latency_ms(&self) -> Option<i64>;
}

/// Forensic pcap segment writer. Start/stop is driven externally through the
/// flow-state flags; dropping a recorder flushes any pending segment.
pub trait PcapRecorder: Send {
    /// Appends one captured frame to the current segment.
    fn write_frame(&mut self, frame: &[u8], now: DateTime<Utc>) -> Result<()>;

    /// Flushes buffered frames to disk.
    fn flush(&mut self) -> Result<()>;
}

/// Constructs analyzer handles for newly discovered flows. Any error is
/// logged by the caller and tolerated; the flow simply runs without that
/// analyzer.
pub trait AnalyzerFactory: Send + Sync {
    fn stream_model(&self) -> Result<Box<dyn StreamModel>>;

    fn latency_probe(&self) -> Result<Box<dyn LatencyProbe>>;

    /// Recorders are created on demand when recording starts, not at flow
    /// discovery; `dst_addr` names the segment files.
    fn pcap_recorder(&self, dst_addr: &str) -> Result<Box<dyn PcapRecorder>>;
}

struct NullStreamModel;

impl StreamModel for NullStreamModel {
    fn consume(&mut self, _packets: &[u8], _now: DateTime<Utc>) {}
}

struct NullLatencyProbe;

impl LatencyProbe for NullLatencyProbe {
    fn consume(&mut self, _packets: &[u8], _now: DateTime<Utc>) {}

    fn latency_ms(&self) -> Option<i64> {
        None
    }
}

struct NullPcapRecorder;

impl PcapRecorder for NullPcapRecorder {
    fn write_frame(&mut self, _frame: &[u8], _now: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory handing out inert analyzers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAnalyzerFactory;

impl AnalyzerFactory for NullAnalyzerFactory {
    fn stream_model(&self) -> Result<Box<dyn StreamModel>> {
        Ok(Box::new(NullStreamModel))
    }

    fn latency_probe(&self) -> Result<Box<dyn LatencyProbe>> {
        Ok(Box::new(NullLatencyProbe))
    }

    fn pcap_recorder(&self, _dst_addr: &str) -> Result<Box<dyn PcapRecorder>> {
        Ok(Box::new(NullPcapRecorder))
    }
}
