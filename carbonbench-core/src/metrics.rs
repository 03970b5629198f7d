// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Persisted measurement types.
//!
//! This module defines the artifact schema written once per completed test
//! configuration, plus the advisory suite aggregate. Optional fields are
//! serialized as `null` so every artifact carries the same set of keys.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;
use uuid::Uuid;

use crate::types::{ConfigurationKey, EndpointId, RequestCount, RunIndex, TargetId};

/// Confidence in an energy figure given how long the session was.
///
/// Energy providers sample at coarse granularity, so short sessions are
/// dominated by quantisation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reliability {
    Unreliable,
    Marginal,
    Reliable,
}

impl Reliability {
    /// Below this a measurement is unreliable.
    pub const MARGINAL_FROM: Duration = Duration::from_secs(5);
    /// At or above this a measurement is reliable.
    pub const RELIABLE_FROM: Duration = Duration::from_secs(15);

    /// Classify a measured session duration.
    pub fn classify(duration: Duration) -> Self {
        if duration < Self::MARGINAL_FROM {
            Reliability::Unreliable
        } else if duration < Self::RELIABLE_FROM {
            Reliability::Marginal
        } else {
            Reliability::Reliable
        }
    }
}

impl std::fmt::Display for Reliability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reliability::Unreliable => write!(f, "unreliable"),
            Reliability::Marginal => write!(f, "marginal"),
            Reliability::Reliable => write!(f, "reliable"),
        }
    }
}

/// Response time distribution of the successful requests, in milliseconds.
///
/// Every field is `None` when the batch had no successful request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub mean_ms: Option<f64>,
    pub median_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

impl LatencyStats {
    /// Calculate the distribution from successful-request latencies.
    pub fn from_latencies(mut latencies: Vec<f64>) -> Self {
        latencies.retain(|l| l.is_finite());
        if latencies.is_empty() {
            return Self::default();
        }

        latencies.sort_by(|a, b| a.total_cmp(b));
        let len = latencies.len();

        let mean = latencies.iter().sum::<f64>() / len as f64;
        let median = if len % 2 == 0 {
            (latencies[len / 2 - 1] + latencies[len / 2]) / 2.0
        } else {
            latencies[len / 2]
        };

        Self {
            min_ms: Some(latencies[0]),
            max_ms: Some(latencies[len - 1]),
            mean_ms: Some(mean),
            median_ms: Some(median),
            p95_ms: Some(percentile_sorted(&latencies, 0.95)),
            p99_ms: Some(percentile_sorted(&latencies, 0.99)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.min_ms.is_none()
    }
}

/// Nearest-rank percentile over an ascending slice.
fn percentile_sorted(sorted: &[f64], fraction: f64) -> f64 {
    let index = ((sorted.len() as f64 * fraction) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Resource usage of the service under test during the load phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub avg_cpu: Option<f64>,
    pub peak_cpu: Option<f64>,
    /// Memory figures are in MB
    pub avg_mem: Option<f64>,
    pub peak_mem: Option<f64>,
    pub baseline_mem: Option<f64>,
    pub sample_count: u64,
}

/// Provider-reported context for an energy figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyMetadata {
    pub provider: String,
    /// `machine` (whole host) or `process`
    pub tracking_mode: String,
    pub method: String,
    pub cpu_model: Option<String>,
    pub cpu_count: Option<usize>,
    pub ram_total_gb: Option<f64>,
    pub carbon_intensity_g_per_kwh: f64,
    pub country_iso_code: Option<String>,
    pub measured_duration_seconds: f64,
}

/// Bounds of a duration-limited batch. For such a batch `request_count` is
/// the number of requests actually sent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedLoad {
    pub target_duration_seconds: f64,
    pub users: usize,
}

/// One completed test configuration. Written once, never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub target: TargetId,
    pub target_name: String,
    pub request_count: RequestCount,
    pub endpoint: EndpointId,
    pub endpoint_path: String,
    pub run_index: RunIndex,
    pub timestamp: DateTime<Utc>,
    /// Load phase only; throughput is derived from this.
    pub duration_seconds: f64,
    /// Idle time added to reach the minimum energy session length.
    pub padding_seconds: f64,
    pub emissions_grams: Option<f64>,
    pub energy_kwh: Option<f64>,
    pub emissions_per_request_mg: Option<f64>,
    pub energy_metadata: Option<EnergyMetadata>,
    pub success_count: u64,
    pub error_count: u64,
    /// Percentage, 0 to 100.
    pub success_rate: f64,
    pub requests_per_second: f64,
    pub response_time_stats: LatencyStats,
    pub container_metrics: ContainerMetrics,
    pub reliability_classification: Reliability,
    /// Present only for duration-limited batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timed_load: Option<TimedLoad>,
}

impl TestResult {
    pub fn key(&self) -> ConfigurationKey {
        ConfigurationKey {
            target: self.target.clone(),
            request_count: self.request_count,
            endpoint: self.endpoint.clone(),
            run_index: self.run_index,
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.success_count + self.error_count
    }
}

/// Discriminator carried by every aggregate artifact.
///
/// Individual test artifacts have no `kind` field; that absence is what the
/// analysis loader relies on to avoid counting a measurement twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Suite,
    Startup,
}

/// A configuration that produced no result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedConfiguration {
    pub key: ConfigurationKey,
    pub reason: String,
}

/// Host information captured alongside a suite run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub os_version: String,
    pub kernel_version: Option<String>,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub memory_bytes: u64,
    pub hostname: String,
}

impl SystemInfo {
    /// Collect current system information.
    pub fn collect() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();

        Self {
            os: System::name().unwrap_or_else(|| "Unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "Unknown".to_string()),
            kernel_version: System::kernel_version(),
            cpu_model: sys
                .cpus()
                .first()
                .map(|cpu| cpu.brand().to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cpu_cores: sys.cpus().len(),
            memory_bytes: sys.total_memory(),
            hostname: System::host_name().unwrap_or_else(|| "Unknown".to_string()),
        }
    }
}

/// Aggregate of one orchestrator invocation. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteResult {
    pub kind: ArtifactKind,
    pub suite_id: Uuid,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub system_info: SystemInfo,
    pub min_duration_seconds: Option<f64>,
    pub artifacts: Vec<PathBuf>,
    pub failed: Vec<FailedConfiguration>,
    pub results: Vec<TestResult>,
}

impl SuiteResult {
    pub fn new(min_duration: Option<Duration>) -> Self {
        let now = Utc::now();
        Self {
            kind: ArtifactKind::Suite,
            suite_id: Uuid::new_v4(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: now,
            finished_at: now,
            system_info: SystemInfo::collect(),
            min_duration_seconds: min_duration.map(|d| d.as_secs_f64()),
            artifacts: Vec::new(),
            failed: Vec::new(),
            results: Vec::new(),
        }
    }
}

/// Format an optional millisecond figure for humans.
pub fn format_ms(value: Option<f64>) -> String {
    match value {
        Some(ms) if ms < 1.0 => format!("{:.3}ms", ms),
        Some(ms) if ms < 1_000.0 => format!("{:.2}ms", ms),
        Some(ms) => format!("{:.2}s", ms / 1_000.0),
        None => "n/a".to_string(),
    }
}
