use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

const MAX_LATENCY_US: u64 = 3_600_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: u64,
    pub p50: u64,
    pub p90: u64,
    pub p99: u64,
    pub max: u64,
}

/// Per-call search latencies in microseconds.
pub struct LatencyRecorder {
    histogram: Histogram<u64>,
}

impl LatencyRecorder {
    pub fn new() -> Result<Self, hdrhistogram::CreationError> {
        Ok(Self {
            histogram: Histogram::new_with_bounds(1, MAX_LATENCY_US, 3)?,
        })
    }

    pub fn record(&mut self, latency: Duration) {
        let micros = latency.as_micros() as u64;
        let value = micros.clamp(1, MAX_LATENCY_US);
        let _ = self.histogram.record(value);
    }

    pub fn summary(&self) -> Option<LatencySummary> {
        if self.histogram.len() == 0 {
            return None;
        }
        Some(LatencySummary {
            samples: self.histogram.len(),
            p50: self.histogram.value_at_quantile(0.50),
            p90: self.histogram.value_at_quantile(0.90),
            p99: self.histogram.value_at_quantile(0.99),
            max: self.histogram.max(),
        })
    }
}
