// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Background resource sampling of the service under test.
//!
//! A `ResourceMonitor` takes a baseline sample before the load starts, then
//! polls a `MetricsSource` on a fixed interval from its own task while the
//! load driver runs. Failed samples are skipped, so a flaky source degrades
//! to a partial (or empty) summary instead of an error.

use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::System;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::MonitorSourceKind;
use crate::error::{BenchError, BenchResult};
use crate::metrics::ContainerMetrics;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Upper bound on how long `stop` waits for a sample already in flight.
/// `docker stats --no-stream` typically needs one to two seconds.
const STOP_GRACE: Duration = Duration::from_secs(3);

/// A point-in-time reading for one service instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
}

/// Point-sample source of CPU and memory figures for a named instance.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, instance: &str) -> BenchResult<ResourceSample>;
}

/// Samples a container through `docker stats --no-stream`.
#[derive(Debug, Clone)]
pub struct DockerStatsSource {
    program: String,
}

impl DockerStatsSource {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }

    /// Use a different docker-compatible CLI (e.g. `podman`).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerStatsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for DockerStatsSource {
    fn sample(&self, instance: &str) -> BenchResult<ResourceSample> {
        let output = Command::new(&self.program)
            .args([
                "stats",
                "--no-stream",
                "--format",
                "{{.CPUPerc}}|{{.MemUsage}}",
                instance,
            ])
            .output()
            .map_err(|e| BenchError::Command {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(BenchError::MetricsSource {
                instance: instance.to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .find_map(parse_docker_stats)
            .ok_or_else(|| BenchError::MetricsSource {
                instance: instance.to_string(),
                reason: format!("unparseable stats output: {:?}", stdout.trim()),
            })
    }
}

/// Parse one `CPUPerc|MemUsage` line, e.g. `1.25%|12.5MiB / 7.6GiB`.
pub fn parse_docker_stats(line: &str) -> Option<ResourceSample> {
    let (cpu, mem) = line.trim().split_once('|')?;
    let cpu_percent = cpu.trim().trim_end_matches('%').trim().parse::<f64>().ok()?;
    let used = mem.split('/').next()?.trim();
    let memory_mb = parse_memory_mb(used)?;
    Some(ResourceSample {
        cpu_percent,
        memory_mb,
    })
}

/// Parse a docker memory figure into MB (binary megabytes).
fn parse_memory_mb(value: &str) -> Option<f64> {
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match unit.trim() {
        "B" | "" => 1.0,
        "KiB" => 1024.0,
        "kB" | "KB" => 1_000.0,
        "MiB" => BYTES_PER_MB,
        "MB" => 1_000_000.0,
        "GiB" => 1024.0 * BYTES_PER_MB,
        "GB" => 1_000_000_000.0,
        "TiB" => 1024.0 * 1024.0 * BYTES_PER_MB,
        _ => return None,
    };

    Some(number * multiplier / BYTES_PER_MB)
}

/// Samples local processes by executable name via `sysinfo`.
///
/// CPU usage is relative to the previous refresh, so the first sample after
/// construction always reports 0%.
pub struct ProcessSource {
    system: Mutex<System>,
}

impl ProcessSource {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSource for ProcessSource {
    fn sample(&self, instance: &str) -> BenchResult<ResourceSample> {
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes();

        let mut found = false;
        let mut cpu_percent = 0.0;
        let mut memory_bytes = 0u64;
        for process in system.processes_by_name(instance) {
            found = true;
            cpu_percent += process.cpu_usage() as f64;
            memory_bytes += process.memory();
        }

        if !found {
            return Err(BenchError::MetricsSource {
                instance: instance.to_string(),
                reason: "process not found".to_string(),
            });
        }

        Ok(ResourceSample {
            cpu_percent,
            memory_mb: memory_bytes as f64 / BYTES_PER_MB,
        })
    }
}

/// Build the configured metrics source, if any.
pub fn select_source(kind: MonitorSourceKind) -> Option<Arc<dyn MetricsSource>> {
    match kind {
        MonitorSourceKind::Docker => Some(Arc::new(DockerStatsSource::new())),
        MonitorSourceKind::Process => Some(Arc::new(ProcessSource::new())),
        MonitorSourceKind::None => None,
    }
}

/// Summarise samples; the first sample is the baseline.
pub fn summarize(samples: &[ResourceSample]) -> ContainerMetrics {
    let Some(first) = samples.first() else {
        return ContainerMetrics::default();
    };

    let n = samples.len() as f64;
    let cpu = samples.iter().map(|s| s.cpu_percent);
    let mem = samples.iter().map(|s| s.memory_mb);

    ContainerMetrics {
        avg_cpu: Some(cpu.clone().sum::<f64>() / n),
        peak_cpu: cpu.fold(None, |peak: Option<f64>, v| Some(peak.map_or(v, |p| p.max(v)))),
        avg_mem: Some(mem.clone().sum::<f64>() / n),
        peak_mem: mem.fold(None, |peak: Option<f64>, v| Some(peak.map_or(v, |p| p.max(v)))),
        baseline_mem: Some(first.memory_mb),
        sample_count: samples.len() as u64,
    }
}

/// A running background sampler. Dropping it without `stop` aborts sampling.
pub struct ResourceMonitor {
    instance: String,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<Vec<ResourceSample>>>,
}

type PendingSample = JoinHandle<BenchResult<ResourceSample>>;

fn spawn_sample(source: &Arc<dyn MetricsSource>, instance: &str) -> PendingSample {
    let source = Arc::clone(source);
    let name = instance.to_string();
    tokio::task::spawn_blocking(move || source.sample(&name))
}

fn record(
    joined: Result<BenchResult<ResourceSample>, JoinError>,
    instance: &str,
    samples: &mut Vec<ResourceSample>,
) {
    match joined {
        Ok(Ok(sample)) => samples.push(sample),
        Ok(Err(e)) => {
            tracing::debug!(instance = %instance, error = %e, "Skipping failed resource sample");
        }
        Err(e) => {
            tracing::warn!(instance = %instance, error = %e, "Resource sampler task failed");
        }
    }
}

impl ResourceMonitor {
    /// Take the baseline sample of `instance`, then keep sampling every
    /// `interval` in the background until `stop`.
    ///
    /// Returns once the baseline attempt has finished, so a caller that starts
    /// its load afterwards never overlaps the baseline.
    pub async fn start(
        source: Arc<dyn MetricsSource>,
        instance: impl Into<String>,
        interval: Duration,
    ) -> Self {
        let instance = instance.into();
        let mut baseline = Vec::with_capacity(1);
        record(spawn_sample(&source, &instance).await, &instance, &mut baseline);

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let task_instance = instance.clone();

        let handle = tokio::spawn(async move {
            let mut samples = baseline;
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            'sampling: loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break 'sampling,
                    _ = ticker.tick() => {}
                }

                let mut pending = spawn_sample(&source, &task_instance);
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => {
                        // A sample already in flight still counts if it lands soon.
                        match tokio::time::timeout(STOP_GRACE, &mut pending).await {
                            Ok(joined) => record(joined, &task_instance, &mut samples),
                            Err(_) => {
                                pending.abort();
                                tracing::debug!(instance = %task_instance, "Dropping resource sample still in flight at stop");
                            }
                        }
                        break 'sampling;
                    }
                    joined = &mut pending => record(joined, &task_instance, &mut samples),
                }
            }

            samples
        });

        tracing::debug!(instance = %instance, interval_ms = interval.as_millis() as u64, "Resource monitor started");
        Self {
            instance,
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop sampling and summarise what was collected.
    ///
    /// Waits at most `STOP_GRACE` for a sample that is already in flight.
    pub async fn stop(mut self) -> ContainerMetrics {
        let _ = self.stop_tx.send(true);
        let joined = match self.handle.take() {
            Some(handle) => handle.await,
            None => Ok(Vec::new()),
        };
        let samples = match joined {
            Ok(samples) => samples,
            Err(e) => {
                tracing::warn!(instance = %self.instance, error = %e, "Resource monitor task failed");
                Vec::new()
            }
        };

        tracing::debug!(instance = %self.instance, samples = samples.len(), "Resource monitor stopped");
        if samples.is_empty() {
            tracing::warn!(instance = %self.instance, "No resource samples collected");
        }
        summarize(&samples)
    }
}

impl Drop for ResourceMonitor {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}
