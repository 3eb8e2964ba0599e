//! Passive monitoring for MPEG transport-stream and related real-time media
//! flows on a live network interface.
//!
//! The monitor observes UDP datagrams carrying raw TS, RTP-encapsulated TS,
//! SMPTE 2110-20/30 or ATSC 3.0 CTP payloads and maintains per-flow
//! statistics (bitrate, continuity-counter and TEI errors, inter-arrival
//! jitter) suitable for operational display and forensic capture.
//!
//! The crate is built around two hot-path pieces:
//!
//! - [`FlowRegistry`]: a concurrent cache mapping a packet's
//!   `(src IP, src port, dst IP, dst port)` 4-tuple to its per-flow state,
//!   allocating on first sight. Lookup goes through a 16-bit
//!   [`HashIndex`](flowtrack::hash_index::HashIndex) fingerprint into a short
//!   collision chain matched exactly, keeping discovery off the capture
//!   thread's critical path at multi-gigabit rates.
//! - [`Histogram`]: a bounded millisecond-bucket inter-arrival histogram
//!   updated on every packet.
//!
//! Collaborators are replaceable: packet capture feeds header snapshots in
//! (see [`protocols::packet::UdpFrame`]), and analyzers attach through the
//! seams in [`analyze`]. A capturing application typically runs one capture
//! thread calling [`FlowRegistry::find_or_create`] plus per-record updates,
//! and one stats/UI thread iterating the registry for summaries and
//! selection toggles:
//!
//! ```no_run
//! use tsflow_core::config::default_config;
//! use tsflow_core::protocols::packet::UdpFrame;
//! use tsflow_core::FlowRegistry;
//!
//! let registry = FlowRegistry::new(default_config());
//! # let frame: &[u8] = &[];
//! if let Ok(parsed) = UdpFrame::parse(frame) {
//!     let record = registry.find_or_create(&parsed.eth, &parsed.ipv4, &parsed.udp);
//!     record.observe_iat(chrono::Utc::now());
//!     record.feed(parsed.payload(frame), chrono::Utc::now());
//! }
//! registry.console_summary();
//! ```

pub mod analyze;
pub mod config;
pub mod flowtrack;
pub mod histogram;
pub mod protocols;
pub mod stats;
pub mod summary;
pub mod utils;

pub use self::flowtrack::flow::{FlowRecord, FlowState, PayloadType};
pub use self::flowtrack::hash_index::{flow_hash, HashIndex};
pub use self::flowtrack::{CacheMetrics, FlowRegistry};
pub use self::histogram::{Histogram, HistogramError};
pub use self::protocols::packet::UdpFrame;
pub use self::summary::CaptureStats;
