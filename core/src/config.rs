//! Configuration options.
//!
//! Applications are free to define their own command line arguments; the
//! monitor itself is configured from a TOML file whose path is typically one
//! of those arguments. The configuration covers the monitored interface,
//! summary-file prefixes, diagnostic verbosity and capture tuning for the
//! host application.
//!
//! ## Example
//! ```toml
//! interface = "eno2"
//! file_prefix = "/var/log/tsflow/summary-"
//! detailed_file_prefix = "/var/log/tsflow/detail-"
//! verbose = 1
//! record_streams = false
//!
//! promiscuous = true
//! snaplen = 2048
//! stats_interval_secs = 5
//! file_summary_interval_secs = 60
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Loads a configuration file from `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> MonitorConfig {
    let config_str = fs::read_to_string(path).expect("ERROR: File read failed");
    let config: MonitorConfig = toml::from_str(&config_str).expect("Invalid config file");
    if config.verbose > 4 {
        log::warn!("verbose level {} exceeds 4; treating as 4", config.verbose);
    }
    config
}

/// Returns the default configuration.
pub fn default_config() -> MonitorConfig {
    MonitorConfig::default()
}

/// Monitor configuration options.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MonitorConfig {
    /// Network interface the monitor observes.
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Prefix for per-flow summary files; the flow's destination address is
    /// appended. No summary files are written when unset.
    #[serde(default = "default_file_prefix")]
    pub file_prefix: Option<String>,

    /// Prefix for per-flow detailed summary files (per-PID table and
    /// inter-arrival histogram appended to each record).
    #[serde(default = "default_file_prefix")]
    pub detailed_file_prefix: Option<String>,

    /// Diagnostic verbosity, `0..=4`. Levels 3 and 4 trace flow-cache
    /// probes on the debug log.
    #[serde(default = "default_verbose")]
    pub verbose: u8,

    /// Mark every newly discovered flow for forensic recording.
    #[serde(default = "default_record_streams")]
    pub record_streams: bool,

    /// Discard the first inter-arrival observation of each flow. The first
    /// interval measures the time since the flow was discovered rather than
    /// a packet gap, which can plant one spurious large bucket.
    #[serde(default = "default_suppress_first_interval")]
    pub suppress_first_interval: bool,

    /// Whether the capturing application should open the interface in
    /// promiscuous mode. Defaults to `true`.
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Capture snapshot length in bytes.
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    /// Seconds between console summaries.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Seconds between file summary emissions.
    #[serde(default = "default_file_summary_interval_secs")]
    pub file_summary_interval_secs: u64,
}

fn default_interface() -> String {
    "eth0".to_string()
}

fn default_file_prefix() -> Option<String> {
    None
}

fn default_verbose() -> u8 {
    0
}

fn default_record_streams() -> bool {
    false
}

fn default_suppress_first_interval() -> bool {
    false
}

fn default_promiscuous() -> bool {
    true
}

fn default_snaplen() -> i32 {
    2048
}

fn default_stats_interval_secs() -> u64 {
    5
}

fn default_file_summary_interval_secs() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            interface: default_interface(),
            file_prefix: None,
            detailed_file_prefix: None,
            verbose: 0,
            record_streams: false,
            suppress_first_interval: false,
            promiscuous: true,
            snaplen: default_snaplen(),
            stats_interval_secs: default_stats_interval_secs(),
            file_summary_interval_secs: default_file_summary_interval_secs(),
        }
    }
}
