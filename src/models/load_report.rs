//! Client-side load statistics

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics produced by one load generator run.
///
/// Passed through to the result bundle unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    pub url: String,
    pub connections: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// The run ended because a stop was requested
    pub stopped_early: bool,
    pub requests: RequestStats,
    pub latency: LatencyStats,
    pub throughput: ThroughputStats,
    pub errors: u64,
    pub timeouts: u64,
    pub non2xx: u64,
    /// Responses per HTTP status code
    pub status_code_stats: BTreeMap<u16, u64>,
    /// Responses per request path and status code
    pub path_stats: BTreeMap<String, BTreeMap<u16, u64>>,
}

/// Request counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RequestStats {
    /// Requests issued, including failed ones
    pub sent: u64,
    /// Requests that produced a response
    pub total: u64,
    /// Responses per second
    pub average: f64,
}

/// Latency summary in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub average: f64,
    pub stddev: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p99: f64,
}

/// Response body throughput
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThroughputStats {
    /// Bytes per second
    pub average: f64,
    pub total: u64,
}

impl LatencyStats {
    /// Summarize latency samples (milliseconds)
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let n = sorted.len() as f64;
        let average = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - average).powi(2)).sum::<f64>() / n;

        Self {
            average,
            stddev: variance.sqrt(),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p50: percentile(&sorted, 0.50),
            p90: percentile(&sorted, 0.90),
            p99: percentile(&sorted, 0.99),
        }
    }
}

/// Linear-interpolated percentile over sorted samples
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let idx = p * (len - 1) as f64;
            let lower = idx.floor() as usize;
            let upper = (idx.ceil() as usize).min(len - 1);
            let frac = idx - lower as f64;
            sorted[lower] * (1.0 - frac) + sorted[upper] * frac
        }
    }
}

impl LoadReport {
    /// Number of distinct request paths that received a response
    pub fn distinct_paths(&self) -> usize {
        self.path_stats.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_from_samples() {
        let stats = LatencyStats::from_samples(&[4.0, 1.0, 3.0, 2.0, 5.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert_eq!(stats.average, 3.0);
        assert_eq!(stats.p50, 3.0);
        assert!((stats.p90 - 4.6).abs() < 1e-9);
    }

    #[test]
    fn test_latency_from_no_samples() {
        assert_eq!(LatencyStats::from_samples(&[]), LatencyStats::default());
        let single = LatencyStats::from_samples(&[7.5]);
        assert_eq!(single.p99, 7.5);
        assert_eq!(single.stddev, 0.0);
    }

    #[test]
    fn test_status_codes_serialize_as_keys() {
        let mut codes = BTreeMap::new();
        codes.insert(200u16, 4u64);
        let json = serde_json::to_value(&codes).unwrap();
        assert_eq!(json, serde_json::json!({"200": 4}));
    }
}
