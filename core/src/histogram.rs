//! Bounded millisecond-resolution histogram geared towards real-time media
//! monitoring, where observations span 0-N milliseconds and the finest
//! granularity is 1 ms.
//!
//! The histogram deliberately trades memory for fast bucket updates: one
//! bucket per integer millisecond, updated with a single bounds check on the
//! hot path. The video preset spans `[0, 16000)`, i.e. 16,000 buckets.
//!
//! Two measurement modes are supported:
//!
//! - *Interval* mode records the elapsed time between consecutive calls to
//!   [`Histogram::interval_update`]. Packet inter-arrival times are measured
//!   this way.
//! - *Cumulative* mode aggregates several short begin/end measurements into a
//!   single observation, flushed with [`Histogram::cumulative_finalize`].
//!
//! The first interval after construction or reset measures the time since
//! that construction or reset rather than an external phenomenon; callers may
//! discard it.

use std::io::{self, Write};

use chrono::{DateTime, Local, Utc};
use thiserror::Error;

/// Longest histogram name retained, in bytes.
const NAME_MAX: usize = 127;

/// Histogram construction errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistogramError {
    /// The bucket range is empty or inverted.
    #[error("invalid bucket range")]
    InvalidRange,

    /// A histogram must carry a name.
    #[error("histogram name required")]
    EmptyName,
}

/// One millisecond bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bucket {
    count: u64,
    last_update: Option<DateTime<Utc>>,
}

impl Bucket {
    /// Number of observations that landed in this bucket.
    #[inline]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Wallclock time of the most recent observation, if any.
    #[inline]
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }
}

/// Millisecond-bucket histogram with interval and cumulative modes.
#[derive(Debug, Clone)]
pub struct Histogram {
    name: String,
    min_ms: u64,
    max_ms: u64,
    buckets: Vec<Bucket>,
    bucket_miss_count: u64,
    interval_last: DateTime<Utc>,
    cumulative_ms: u64,
    cumulative_last: DateTime<Utc>,
}

/// Wallclock subtraction in whole milliseconds; negative intervals collapse
/// to zero.
#[inline]
fn delta_ms(now: DateTime<Utc>, then: DateTime<Utc>) -> u64 {
    now.signed_duration_since(then).num_milliseconds().max(0) as u64
}

/// Wallclock subtraction in whole microseconds; negative intervals collapse
/// to zero.
#[inline]
pub(crate) fn delta_us(now: DateTime<Utc>, then: DateTime<Utc>) -> i64 {
    now.signed_duration_since(then)
        .num_microseconds()
        .unwrap_or(i64::MAX)
        .max(0)
}

impl Histogram {
    /// Creates a histogram covering the half-open range `[min_ms, max_ms)`
    /// with one bucket per integer millisecond. The name is truncated to 127
    /// bytes.
    pub fn new(name: &str, min_ms: u64, max_ms: u64) -> Result<Self, HistogramError> {
        Self::new_at(name, min_ms, max_ms, Utc::now())
    }

    /// As [`Histogram::new`], with an explicit construction time seeding the
    /// interval clock.
    pub fn new_at(
        name: &str,
        min_ms: u64,
        max_ms: u64,
        now: DateTime<Utc>,
    ) -> Result<Self, HistogramError> {
        if max_ms == 0 || max_ms <= min_ms {
            return Err(HistogramError::InvalidRange);
        }
        if name.is_empty() {
            return Err(HistogramError::EmptyName);
        }
        let mut name = name.to_owned();
        if name.len() > NAME_MAX {
            let mut end = NAME_MAX;
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            name.truncate(end);
        }
        let bucket_count = (max_ms - min_ms) as usize;
        Ok(Histogram {
            name,
            min_ms,
            max_ms,
            buckets: vec![Bucket::default(); bucket_count],
            bucket_miss_count: 0,
            interval_last: now,
            cumulative_ms: 0,
            cumulative_last: now,
        })
    }

    /// Creates a histogram with the video preset range `[0, 16000)`.
    pub fn video_defaults(name: &str) -> Result<Self, HistogramError> {
        Self::new(name, 0, 16 * 1000)
    }

    /// Histogram name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower bound of the bucket range, inclusive.
    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    /// Upper bound of the bucket range, exclusive.
    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Number of buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Observations that fell outside the bucket range.
    pub fn bucket_miss_count(&self) -> u64 {
        self.bucket_miss_count
    }

    /// The bucket holding observations of `ms`, or `None` when `ms` is
    /// outside the range.
    pub fn bucket(&self, ms: u64) -> Option<&Bucket> {
        if ms < self.min_ms || ms >= self.max_ms {
            return None;
        }
        Some(&self.buckets[(ms - self.min_ms) as usize])
    }

    /// Total in-range observations across all buckets.
    pub fn total_measurements(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }

    /// Counts `value` as one observation: an in-range value increments
    /// exactly one bucket, anything else increments the miss counter.
    fn observe(&mut self, value: u64, now: DateTime<Utc>) -> Option<u64> {
        if value < self.min_ms || value >= self.max_ms {
            self.bucket_miss_count += 1;
            return None;
        }
        let bucket = &mut self.buckets[(value - self.min_ms) as usize];
        bucket.count += 1;
        bucket.last_update = Some(now);
        Some(value)
    }

    /// Records the interval since the previous call (or since construction /
    /// reset for the first call) and restarts the interval clock. Returns the
    /// interval in milliseconds, or `None` when it missed the bucket range.
    pub fn interval_update(&mut self) -> Option<u64> {
        self.interval_update_at(Utc::now())
    }

    /// As [`Histogram::interval_update`], against an explicit wallclock
    /// reading (e.g. a capture timestamp).
    pub fn interval_update_at(&mut self, now: DateTime<Utc>) -> Option<u64> {
        let diff_ms = delta_ms(now, self.interval_last);
        self.interval_last = now;
        self.observe(diff_ms, now)
    }

    /// Restarts the interval clock without recording an observation.
    pub fn restart_interval_at(&mut self, now: DateTime<Utc>) {
        self.interval_last = now;
    }

    /// Starts a new cumulative aggregation window.
    pub fn cumulative_initialize(&mut self) {
        self.cumulative_ms = 0;
    }

    /// Marks the start of one measured span within the window.
    pub fn cumulative_begin(&mut self) {
        self.cumulative_begin_at(Utc::now());
    }

    /// As [`Histogram::cumulative_begin`], with an explicit wallclock.
    pub fn cumulative_begin_at(&mut self, now: DateTime<Utc>) {
        self.cumulative_last = now;
    }

    /// Marks the end of the span opened by the matching begin, accumulating
    /// its duration into the window. Returns the span in milliseconds.
    pub fn cumulative_end(&mut self) -> u64 {
        self.cumulative_end_at(Utc::now())
    }

    /// As [`Histogram::cumulative_end`], with an explicit wallclock.
    pub fn cumulative_end_at(&mut self, now: DateTime<Utc>) -> u64 {
        let diff_ms = delta_ms(now, self.cumulative_last);
        self.cumulative_ms += diff_ms;
        diff_ms
    }

    /// Flushes the aggregation window into the buckets as one observation
    /// (in-range / miss logic as interval updates). Returns the aggregate
    /// milliseconds.
    pub fn cumulative_finalize(&mut self) -> u64 {
        self.cumulative_finalize_at(Utc::now())
    }

    /// As [`Histogram::cumulative_finalize`], with an explicit wallclock.
    pub fn cumulative_finalize_at(&mut self, now: DateTime<Utc>) -> u64 {
        let total = self.cumulative_ms;
        self.observe(total, now);
        total
    }

    /// Zeros every bucket, the miss counter and the cumulative window, and
    /// restarts the interval clock.
    pub fn reset(&mut self) {
        self.reset_at(Utc::now());
    }

    /// As [`Histogram::reset`], with an explicit wallclock.
    pub fn reset_at(&mut self, now: DateTime<Utc>) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
        self.bucket_miss_count = 0;
        self.cumulative_ms = 0;
        self.interval_last = now;
    }

    /// Writes one line per non-empty bucket plus a summary trailer. The
    /// column layout is for human consumption and is not a stable contract.
    pub fn render(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "Histogram '{}' (ms, count, last update time)", self.name)?;
        let mut distinct: u64 = 0;
        let mut measurements: u64 = 0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if bucket.count == 0 {
                continue;
            }
            // A non-empty bucket always has an update time.
            let last = match bucket.last_update {
                Some(ts) => ts,
                None => continue,
            };
            writeln!(
                w,
                "-> {:5} {:8}  {} ({}.{:06})",
                self.min_ms + i as u64,
                bucket.count,
                last.with_timezone(&Local).format("%a %b %e %H:%M:%S %Y"),
                last.timestamp(),
                last.timestamp_subsec_micros(),
            )?;
            distinct += 1;
            measurements += bucket.count;
        }
        if self.bucket_miss_count != 0 {
            writeln!(w, "{} out-of-range bucket misses", self.bucket_miss_count)?;
        }
        writeln!(
            w,
            "{} distinct buckets with {} total measurements, range: {} -> {} ms",
            distinct, measurements, self.min_ms, self.max_ms
        )
    }
}
