//! Latency recording.
//!
//! `LatencyRecorder` keeps every raw sample alongside an HDR histogram. The
//! aggregate fields of [`TimingSummary`] (count, total, min, max, mean) are
//! computed from the raw samples; percentiles come from the histogram.

use hdrhistogram::Histogram;
use serde::{Serialize, Serializer};
use std::time::{Duration, Instant};

const MAX_TRACKABLE_NS: u64 = 60_000_000_000;

pub struct LatencyRecorder {
    hist: Option<Histogram<u64>>,
    samples: Vec<Duration>,
    total: Duration,
}

impl LatencyRecorder {
    pub fn new() -> Self {
        Self {
            hist: Histogram::<u64>::new_with_bounds(1, MAX_TRACKABLE_NS, 3).ok(),
            samples: Vec::new(),
            total: Duration::ZERO,
        }
    }

    /// Start a latency measurement.
    #[inline(always)]
    pub fn start(&self) -> Instant {
        Instant::now()
    }

    /// Record the elapsed time since `start`.
    #[inline(always)]
    pub fn record(&mut self, start: Instant) {
        self.record_duration(start.elapsed());
    }

    pub fn record_duration(&mut self, elapsed: Duration) {
        if let Some(hist) = self.hist.as_mut() {
            let nanos = (elapsed.as_nanos() as u64).clamp(1, MAX_TRACKABLE_NS);
            let _ = hist.record(nanos);
        }
        self.samples.push(elapsed);
        self.total += elapsed;
    }

    pub fn ops(&self) -> u64 {
        self.samples.len() as u64
    }

    pub fn samples(&self) -> &[Duration] {
        &self.samples
    }

    pub fn total_secs(&self) -> f64 {
        self.total.as_secs_f64()
    }

    pub fn throughput(&self) -> f64 {
        if self.total.as_secs_f64() > 0.0 {
            self.ops() as f64 / self.total.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Percentile in nanoseconds.
    pub fn percentile_ns(&self, p: f64) -> u64 {
        match &self.hist {
            Some(hist) if !hist.is_empty() => hist.value_at_percentile(p),
            _ => 0,
        }
    }

    /// Percentile in microseconds.
    pub fn percentile_us(&self, p: f64) -> f64 {
        self.percentile_ns(p) as f64 / 1_000.0
    }

    pub fn summary(&self) -> TimingSummary {
        let mut summary = TimingSummary::from_samples(&self.samples);
        summary.p50 = Duration::from_nanos(self.percentile_ns(50.0));
        summary.p99 = Duration::from_nanos(self.percentile_ns(99.0));
        summary
    }
}

impl Default for LatencyRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple aggregate timings over a set of per-operation samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct TimingSummary {
    pub samples: u64,
    #[serde(serialize_with = "as_secs")]
    pub total: Duration,
    #[serde(serialize_with = "as_secs")]
    pub min: Duration,
    #[serde(serialize_with = "as_secs")]
    pub max: Duration,
    #[serde(serialize_with = "as_secs")]
    pub mean: Duration,
    #[serde(serialize_with = "as_secs")]
    pub p50: Duration,
    #[serde(serialize_with = "as_secs")]
    pub p99: Duration,
}

impl TimingSummary {
    /// Exact aggregates of `samples`. Percentiles use nearest rank.
    pub fn from_samples(samples: &[Duration]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let total: Duration = samples.iter().sum();
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let count = sorted.len();
        let mean = Duration::from_nanos((total.as_nanos() / count as u128) as u64);
        Self {
            samples: count as u64,
            total,
            min: sorted[0],
            max: sorted[count - 1],
            mean,
            p50: nearest_rank(&sorted, 50.0),
            p99: nearest_rank(&sorted, 99.0),
        }
    }

    /// Combine summaries of disjoint sample sets. Count, total, min, max and
    /// mean stay exact; percentiles are the largest of the parts.
    pub fn combine(parts: &[TimingSummary]) -> Self {
        let parts: Vec<&TimingSummary> = parts.iter().filter(|p| p.samples > 0).collect();
        if parts.is_empty() {
            return Self::default();
        }
        let samples: u64 = parts.iter().map(|p| p.samples).sum();
        let total: Duration = parts.iter().map(|p| p.total).sum();
        Self {
            samples,
            total,
            min: parts.iter().map(|p| p.min).min().unwrap_or_default(),
            max: parts.iter().map(|p| p.max).max().unwrap_or_default(),
            mean: Duration::from_nanos((total.as_nanos() / samples as u128) as u64),
            p50: parts.iter().map(|p| p.p50).max().unwrap_or_default(),
            p99: parts.iter().map(|p| p.p99).max().unwrap_or_default(),
        }
    }
}

fn nearest_rank(sorted: &[Duration], p: f64) -> Duration {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

pub(crate) fn as_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_summary_from_raw_samples() {
        let s = TimingSummary::from_samples(&[ms(30), ms(10), ms(20), ms(40)]);
        assert_eq!(s.samples, 4);
        assert_eq!(s.total, ms(100));
        assert_eq!(s.min, ms(10));
        assert_eq!(s.max, ms(40));
        assert_eq!(s.mean, ms(25));
        assert_eq!(s.p50, ms(20));
        assert_eq!(s.p99, ms(40));
    }

    #[test]
    fn test_summary_of_no_samples_is_zero() {
        let s = TimingSummary::from_samples(&[]);
        assert_eq!(s, TimingSummary::default());
    }

    #[test]
    fn test_recorder_summary_matches_samples() {
        let mut rec = LatencyRecorder::new();
        for v in [5, 15, 25] {
            rec.record_duration(ms(v));
        }
        let s = rec.summary();
        assert_eq!(s.samples, 3);
        assert_eq!(s.min, ms(5));
        assert_eq!(s.max, ms(25));
        assert_eq!(s.mean, ms(15));
        assert_eq!(s.total, ms(45));
        // HDR percentiles are within 0.1% of the recorded value.
        let p50 = s.p50.as_nanos() as f64;
        assert!((p50 - 15_000_000.0).abs() / 15_000_000.0 < 0.001);
    }

    #[test]
    fn test_combine_keeps_exact_fields() {
        let a = TimingSummary::from_samples(&[ms(10), ms(30)]);
        let b = TimingSummary::from_samples(&[ms(50)]);
        let c = TimingSummary::combine(&[a, b, TimingSummary::default()]);
        assert_eq!(c.samples, 3);
        assert_eq!(c.total, ms(90));
        assert_eq!(c.min, ms(10));
        assert_eq!(c.max, ms(50));
        assert_eq!(c.mean, ms(30));
    }
}
