// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Load driver: dispatches requests against one endpoint.
//!
//! A batch is bounded either by a request count or by wall-clock time.
//! Small counted batches run sequentially. Larger ones use a bounded pool of
//! workers that claim request tickets from an atomic counter. Timed batches
//! run a fixed number of users until a deadline. Either way every outcome is
//! funnelled through a channel to a single collector, and a failed request
//! is recorded, never raised.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::{Client, Method};
use tokio::sync::mpsc;

use crate::config::{EndpointConfig, OrchestratorConfig, TargetConfig};
use crate::error::BenchResult;
use crate::metrics::LatencyStats;
use crate::types::RequestCount;

/// One endpoint call, fully resolved.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            body: None,
        }
    }

    /// Resolve `endpoint` against `target`.
    pub fn for_endpoint(target: &TargetConfig, endpoint: &EndpointConfig) -> Self {
        Self {
            method: endpoint.method.as_reqwest(),
            url: target.url(&endpoint.path),
            body: endpoint.body.clone(),
        }
    }
}

/// Result of a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub success: bool,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
}

/// Tunables of the load driver.
#[derive(Debug, Clone, Copy)]
pub struct LoadSettings {
    pub max_workers: usize,
    /// Batches of at most this many requests run sequentially.
    pub sequential_threshold: u64,
    pub request_timeout: Duration,
}

impl Default for LoadSettings {
    fn default() -> Self {
        Self {
            max_workers: 100,
            sequential_threshold: 100,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&OrchestratorConfig> for LoadSettings {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            sequential_threshold: config.sequential_threshold,
            request_timeout: config.request_timeout,
        }
    }
}

/// How a batch is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Sequential,
    Concurrent { workers: usize },
    /// Fixed number of users looping until a deadline.
    Timed { users: usize },
}

impl ExecutionMode {
    pub fn for_count(count: RequestCount, settings: &LoadSettings) -> Self {
        let count = count.value();
        if count <= settings.sequential_threshold {
            ExecutionMode::Sequential
        } else {
            let workers = (settings.max_workers as u64).min(count).max(1) as usize;
            ExecutionMode::Concurrent { workers }
        }
    }

    pub fn workers(&self) -> usize {
        match self {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Concurrent { workers } => *workers,
            ExecutionMode::Timed { users } => *users,
        }
    }
}

/// Outcomes of one measured batch, in completion order.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub outcomes: Vec<RequestOutcome>,
    /// From dispatch of the first request to completion of the last.
    pub duration: Duration,
    pub mode: ExecutionMode,
}

/// Aggregate figures derived from a `LoadReport`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStatistics {
    pub success_count: u64,
    pub error_count: u64,
    /// Percentage, 0 to 100.
    pub success_rate: f64,
    pub requests_per_second: f64,
    pub latency: LatencyStats,
}

impl LoadStatistics {
    pub fn from_report(report: &LoadReport) -> Self {
        let total = report.outcomes.len() as u64;
        let latencies: Vec<f64> = report
            .outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.latency_ms)
            .collect();
        let success_count = latencies.len() as u64;
        let duration_secs = report.duration.as_secs_f64();

        Self {
            success_count,
            error_count: total - success_count,
            success_rate: if total == 0 {
                0.0
            } else {
                success_count as f64 / total as f64 * 100.0
            },
            requests_per_second: if duration_secs > 0.0 {
                success_count as f64 / duration_secs
            } else {
                0.0
            },
            latency: LatencyStats::from_latencies(latencies),
        }
    }
}

/// Warmup tallies; warmup outcomes are otherwise discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmupSummary {
    pub successes: u64,
    pub failures: u64,
}

/// HTTP load driver.
#[derive(Debug, Clone)]
pub struct LoadDriver {
    client: Client,
    settings: LoadSettings,
}

impl LoadDriver {
    pub fn new(settings: LoadSettings) -> BenchResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(settings.max_workers)
            .build()?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &LoadSettings {
        &self.settings
    }

    /// Issue a single request and time it, body download included.
    pub async fn send(&self, spec: &RequestSpec) -> RequestOutcome {
        send_request(&self.client, spec, self.settings.request_timeout).await
    }

    /// Poll `url` until it answers with a success status.
    pub async fn check_health(&self, url: &str, retries: u32, delay: Duration) -> bool {
        let spec = RequestSpec::get(url);
        for attempt in 1..=retries.max(1) {
            if self.send(&spec).await.success {
                return true;
            }
            tracing::debug!(url = %url, attempt, "Health check failed");
            if attempt < retries {
                tokio::time::sleep(delay).await;
            }
        }
        false
    }

    /// Send `count` throwaway requests sequentially.
    pub async fn warmup(&self, spec: &RequestSpec, count: u64) -> WarmupSummary {
        let mut summary = WarmupSummary::default();
        for _ in 0..count {
            if self.send(spec).await.success {
                summary.successes += 1;
            } else {
                summary.failures += 1;
            }
        }
        if summary.failures > 0 {
            tracing::warn!(
                url = %spec.url,
                failures = summary.failures,
                total = count,
                "Warmup requests failed"
            );
        }
        summary
    }

    /// Run one measured batch of `count` requests.
    pub async fn run(&self, spec: &RequestSpec, count: RequestCount) -> LoadReport {
        let mode = ExecutionMode::for_count(count, &self.settings);
        tracing::debug!(url = %spec.url, count = count.value(), ?mode, "Dispatching batch");

        let start = Instant::now();
        let outcomes = match mode {
            ExecutionMode::Sequential => {
                let mut outcomes = Vec::with_capacity(count.value() as usize);
                for _ in 0..count.value() {
                    outcomes.push(self.send(spec).await);
                }
                outcomes
            }
            ExecutionMode::Concurrent { workers } | ExecutionMode::Timed { users: workers } => {
                self.run_concurrent(spec, count.value(), workers).await
            }
        };
        let duration = start.elapsed().max(Duration::from_nanos(1));

        LoadReport {
            outcomes,
            duration,
            mode,
        }
    }

    /// Run `users` concurrent users against `spec` until `duration` elapses.
    ///
    /// Every user sends at least one request. Requests still in flight at the
    /// deadline complete and are counted, so the report duration can exceed
    /// `duration` by up to one request latency.
    pub async fn run_for(&self, spec: &RequestSpec, duration: Duration, users: usize) -> LoadReport {
        let users = users.max(1);
        let mode = ExecutionMode::Timed { users };
        tracing::debug!(
            url = %spec.url,
            duration_ms = duration.as_millis() as u64,
            users,
            "Dispatching timed batch"
        );

        let start = Instant::now();
        let deadline = start + duration;
        let spec = Arc::new(spec.clone());
        let (tx, mut rx) = mpsc::channel::<RequestOutcome>(users * 4);

        let mut handles = Vec::with_capacity(users);
        for _ in 0..users {
            let spec = Arc::clone(&spec);
            let client = self.client.clone();
            let tx = tx.clone();
            let timeout = self.settings.request_timeout;

            handles.push(tokio::spawn(async move {
                loop {
                    let outcome = send_request(&client, &spec, timeout).await;
                    if tx.send(outcome).await.is_err() || Instant::now() >= deadline {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Load user panicked");
            }
        }
        let elapsed = start.elapsed().max(Duration::from_nanos(1));

        LoadReport {
            outcomes,
            duration: elapsed,
            mode,
        }
    }

    async fn run_concurrent(
        &self,
        spec: &RequestSpec,
        total: u64,
        workers: usize,
    ) -> Vec<RequestOutcome> {
        let tickets = Arc::new(AtomicU64::new(0));
        let spec = Arc::new(spec.clone());
        let (tx, mut rx) = mpsc::channel::<RequestOutcome>(workers * 4);

        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let tickets = Arc::clone(&tickets);
            let spec = Arc::clone(&spec);
            let client = self.client.clone();
            let tx = tx.clone();
            let timeout = self.settings.request_timeout;

            handles.push(tokio::spawn(async move {
                while tickets.fetch_add(1, Ordering::Relaxed) < total {
                    let outcome = send_request(&client, &spec, timeout).await;
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total as usize);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Load worker panicked");
            }
        }

        // A panicked worker loses its in-flight ticket; record it as a failure
        // so success + error always equals the dispatched count.
        while (outcomes.len() as u64) < total {
            outcomes.push(RequestOutcome {
                success: false,
                latency_ms: 0.0,
                timestamp: Utc::now(),
            });
        }

        outcomes
    }
}

async fn send_request(client: &Client, spec: &RequestSpec, timeout: Duration) -> RequestOutcome {
    let mut request = client
        .request(spec.method.clone(), &spec.url)
        .timeout(timeout);
    if let Some(body) = &spec.body {
        request = request
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.clone());
    }

    let timestamp = Utc::now();
    let start = Instant::now();
    let success = match request.send().await {
        Ok(response) => {
            let ok = response.status().is_success();
            // The body counts towards latency; a broken body is a failure.
            response.bytes().await.is_ok() && ok
        }
        Err(e) => {
            tracing::trace!(url = %spec.url, error = %e, "Request failed");
            false
        }
    };

    RequestOutcome {
        success,
        latency_ms: start.elapsed().as_secs_f64() * 1_000.0,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool, latency_ms: f64) -> RequestOutcome {
        RequestOutcome {
            success,
            latency_ms,
            timestamp: Utc::now(),
        }
    }

    fn closed_port_url() -> String {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        format!("http://127.0.0.1:{}/api/v1/health", port)
    }

    #[test]
    fn test_execution_mode_threshold() {
        let settings = LoadSettings::default();
        let mode = |n| ExecutionMode::for_count(RequestCount::new(n).unwrap(), &settings);

        assert_eq!(mode(1), ExecutionMode::Sequential);
        assert_eq!(mode(100), ExecutionMode::Sequential);
        assert_eq!(mode(101), ExecutionMode::Concurrent { workers: 100 });
        assert_eq!(mode(10_000), ExecutionMode::Concurrent { workers: 100 });
    }

    #[test]
    fn test_execution_mode_caps_workers_at_count() {
        let settings = LoadSettings {
            max_workers: 500,
            sequential_threshold: 10,
            ..LoadSettings::default()
        };
        let mode = ExecutionMode::for_count(RequestCount::new(50).unwrap(), &settings);
        assert_eq!(mode, ExecutionMode::Concurrent { workers: 50 });
        assert_eq!(mode.workers(), 50);
        assert_eq!(ExecutionMode::Timed { users: 8 }.workers(), 8);
    }

    #[test]
    fn test_statistics_from_report() {
        let report = LoadReport {
            outcomes: vec![
                outcome(true, 10.0),
                outcome(false, 0.0),
                outcome(true, 30.0),
                outcome(true, 20.0),
            ],
            duration: Duration::from_secs(2),
            mode: ExecutionMode::Sequential,
        };
        let stats = LoadStatistics::from_report(&report);

        assert_eq!(stats.success_count + stats.error_count, 4);
        assert_eq!(stats.error_count, 1);
        assert!((stats.success_rate - 75.0).abs() < 1e-9);
        assert!((stats.requests_per_second - 1.5).abs() < 1e-9);
        assert_eq!(stats.latency.median_ms, Some(20.0));
        assert_eq!(stats.latency.min_ms, Some(10.0));
    }

    #[test]
    fn test_statistics_all_failed_has_null_latency() {
        let report = LoadReport {
            outcomes: vec![outcome(false, 5.0), outcome(false, 7.0)],
            duration: Duration::from_millis(500),
            mode: ExecutionMode::Sequential,
        };
        let stats = LoadStatistics::from_report(&report);

        assert_eq!(stats.success_count, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.requests_per_second, 0.0);
        assert!(stats.latency.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failures_recorded_not_raised() {
        let settings = LoadSettings {
            max_workers: 4,
            sequential_threshold: 5,
            request_timeout: Duration::from_secs(2),
        };
        let driver = LoadDriver::new(settings).unwrap();
        let spec = RequestSpec::get(closed_port_url());

        let report = driver.run(&spec, RequestCount::new(20).unwrap()).await;
        assert_eq!(report.mode, ExecutionMode::Concurrent { workers: 4 });
        assert_eq!(report.outcomes.len(), 20);
        assert!(report.outcomes.iter().all(|o| !o.success));
        assert!(report.duration > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_timed_batch_stops_at_deadline() {
        let settings = LoadSettings {
            request_timeout: Duration::from_secs(2),
            ..LoadSettings::default()
        };
        let driver = LoadDriver::new(settings).unwrap();
        let spec = RequestSpec::get(closed_port_url());

        let report = driver.run_for(&spec, Duration::from_millis(200), 3).await;
        assert_eq!(report.mode, ExecutionMode::Timed { users: 3 });
        assert!(report.outcomes.len() >= 3);
        assert!(report.outcomes.iter().all(|o| !o.success));
        assert!(report.duration >= Duration::from_millis(200));
        assert!(report.duration < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_health_check_against_closed_port() {
        let driver = LoadDriver::new(LoadSettings::default()).unwrap();
        let healthy = driver
            .check_health(&closed_port_url(), 2, Duration::from_millis(10))
            .await;
        assert!(!healthy);
    }

    #[tokio::test]
    async fn test_warmup_failures_are_counted() {
        let driver = LoadDriver::new(LoadSettings::default()).unwrap();
        let summary = driver.warmup(&RequestSpec::get(closed_port_url()), 3).await;
        assert_eq!(summary, WarmupSummary { successes: 0, failures: 3 });
    }
}
