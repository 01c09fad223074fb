//! HTTP load generation
//!
//! Workers share one request counter; request `i` is `requests[i % len]`,
//! so every path in the list gets an even share of the load.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use tokio_util::sync::CancellationToken;

use crate::config::LoadConfig;
use crate::error::{AppError, AppResult};
use crate::models::{LatencyStats, LoadReport, RequestSpec, RequestStats, ThroughputStats};

/// Drives load against a target URL
#[async_trait]
pub trait LoadGenerator: Send + Sync {
    /// Run the request list against `target` until done or `stop` fires
    async fn run(
        &self,
        target: &str,
        requests: &[RequestSpec],
        stop: CancellationToken,
    ) -> AppResult<LoadReport>;
}

/// Per-worker counters, merged once every worker has finished
#[derive(Debug, Default)]
struct WorkerStats {
    sent: u64,
    latencies: Vec<f64>,
    bytes: u64,
    errors: u64,
    timeouts: u64,
    status_codes: BTreeMap<u16, u64>,
    paths: BTreeMap<String, BTreeMap<u16, u64>>,
}

impl WorkerStats {
    fn record_response(&mut self, path: &str, status: u16, bytes: u64, latency_ms: f64) {
        self.latencies.push(latency_ms);
        self.bytes += bytes;
        *self.status_codes.entry(status).or_default() += 1;
        *self
            .paths
            .entry(path.to_string())
            .or_default()
            .entry(status)
            .or_default() += 1;
    }

    fn merge(&mut self, other: WorkerStats) {
        self.sent += other.sent;
        self.latencies.extend(other.latencies);
        self.bytes += other.bytes;
        self.errors += other.errors;
        self.timeouts += other.timeouts;
        for (code, count) in other.status_codes {
            *self.status_codes.entry(code).or_default() += count;
        }
        for (path, codes) in other.paths {
            let entry = self.paths.entry(path).or_default();
            for (code, count) in codes {
                *entry.entry(code).or_default() += count;
            }
        }
    }
}

/// Prepared request: parsed method and absolute URL
struct Prepared<'a> {
    spec: &'a RequestSpec,
    method: Method,
    url: String,
}

/// Load generator over a pooled `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpLoadGenerator {
    client: reqwest::Client,
    config: LoadConfig,
}

impl HttpLoadGenerator {
    pub fn new(config: LoadConfig) -> AppResult<Self> {
        if config.connections == 0 {
            return Err(AppError::Validation("connections must be at least 1".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(config.connections)
            .build()?;

        Ok(Self { client, config })
    }

    async fn worker(
        &self,
        prepared: &[Prepared<'_>],
        counter: &AtomicUsize,
        deadline: Instant,
        stop: &CancellationToken,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();

        loop {
            if stop.is_cancelled() || Instant::now() >= deadline {
                break;
            }
            let i = counter.fetch_add(1, Ordering::Relaxed);
            if self.config.amount.is_some_and(|max| i >= max) {
                break;
            }

            let request = &prepared[i % prepared.len()];
            let mut builder = self.client.request(request.method.clone(), &request.url);
            for (name, value) in &request.spec.headers {
                builder = builder.header(name, value);
            }
            if let Some(body) = &request.spec.body {
                builder = builder.body(body.clone());
            }

            stats.sent += 1;
            let started = Instant::now();
            let result = match builder.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    response.bytes().await.map(|body| (status, body.len() as u64))
                }
                Err(e) => Err(e),
            };

            match result {
                Ok((status, bytes)) => {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    stats.record_response(&request.spec.path, status, bytes, latency_ms);
                }
                Err(e) => {
                    stats.errors += 1;
                    if e.is_timeout() {
                        stats.timeouts += 1;
                    }
                    tracing::trace!(url = %request.url, error = %e, "Request failed");
                }
            }
        }

        stats
    }
}

#[async_trait]
impl LoadGenerator for HttpLoadGenerator {
    async fn run(
        &self,
        target: &str,
        requests: &[RequestSpec],
        stop: CancellationToken,
    ) -> AppResult<LoadReport> {
        if requests.is_empty() {
            return Err(AppError::Validation("request list is empty".to_string()));
        }

        let base = target.trim_end_matches('/');
        let prepared = requests
            .iter()
            .map(|spec| {
                let method = Method::from_bytes(spec.method.to_ascii_uppercase().as_bytes())
                    .map_err(|_| AppError::Validation(format!("invalid HTTP method '{}'", spec.method)))?;
                Ok(Prepared {
                    spec,
                    method,
                    url: format!("{}{}", base, spec.path),
                })
            })
            .collect::<AppResult<Vec<_>>>()?;

        tracing::info!(
            target = %target,
            connections = self.config.connections,
            duration_secs = self.config.duration.as_secs(),
            amount = ?self.config.amount,
            "Starting load"
        );

        let started_at = Utc::now();
        let clock = Instant::now();
        let deadline = clock + self.config.duration;
        let counter = AtomicUsize::new(0);

        let workers = (0..self.config.connections)
            .map(|_| self.worker(&prepared, &counter, deadline, &stop));
        let mut totals = WorkerStats::default();
        for stats in futures::future::join_all(workers).await {
            totals.merge(stats);
        }

        let elapsed = clock.elapsed();
        let secs = elapsed.as_secs_f64().max(f64::EPSILON);
        let responses = totals.latencies.len() as u64;
        let non2xx = totals
            .status_codes
            .iter()
            .filter(|(code, _)| !(200..300).contains(*code))
            .map(|(_, count)| count)
            .sum();

        let report = LoadReport {
            url: target.to_string(),
            connections: self.config.connections,
            started_at,
            finished_at: Utc::now(),
            duration_ms: elapsed.as_millis() as u64,
            stopped_early: stop.is_cancelled(),
            requests: RequestStats {
                sent: totals.sent,
                total: responses,
                average: responses as f64 / secs,
            },
            latency: LatencyStats::from_samples(&totals.latencies),
            throughput: ThroughputStats {
                average: totals.bytes as f64 / secs,
                total: totals.bytes,
            },
            errors: totals.errors,
            timeouts: totals.timeouts,
            non2xx,
            status_code_stats: totals.status_codes,
            path_stats: totals.paths,
        };

        tracing::info!(
            responses,
            errors = report.errors,
            p99_ms = report.latency.p99,
            "Load finished"
        );

        Ok(report)
    }
}
