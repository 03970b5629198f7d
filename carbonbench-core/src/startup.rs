// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Startup latency measurement.
//!
//! The lifecycle of a target is owned by an external command (for example
//! `docker restart gin-app`). Startup latency is the time from issuing that
//! command until the health endpoint first answers with a success status.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::time::Instant;

use crate::config::TargetConfig;
use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::load::LoadDriver;
use crate::metrics::ArtifactKind;
use crate::stats;
use crate::types::TargetId;

/// How startup is measured.
#[derive(Debug, Clone)]
pub struct StartupSettings {
    pub repetitions: u32,
    pub health_path: String,
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Pause between repetitions so the previous instance fully settles.
    pub pause: Duration,
}

impl Default for StartupSettings {
    fn default() -> Self {
        Self {
            repetitions: 5,
            health_path: "/api/v1/health".to_string(),
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(120),
            pause: Duration::from_secs(2),
        }
    }
}

/// Startup figures for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupMeasurement {
    pub target: TargetId,
    pub target_name: String,
    pub samples_ms: Vec<f64>,
    pub mean_ms: Option<f64>,
    pub min_ms: Option<f64>,
    pub max_ms: Option<f64>,
    pub std_dev_ms: Option<f64>,
    /// Repetitions that never became healthy or whose command failed.
    pub failures: u32,
}

impl StartupMeasurement {
    pub fn from_samples(target: &TargetConfig, samples_ms: Vec<f64>, failures: u32) -> Self {
        Self {
            target: target.id.clone(),
            target_name: target.name.clone(),
            mean_ms: stats::mean(&samples_ms),
            min_ms: samples_ms.iter().copied().reduce(f64::min),
            max_ms: samples_ms.iter().copied().reduce(f64::max),
            std_dev_ms: stats::sample_std_dev(&samples_ms),
            samples_ms,
            failures,
        }
    }
}

/// Aggregate artifact of one `startup` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartupReport {
    pub kind: ArtifactKind,
    pub timestamp: DateTime<Utc>,
    pub targets: Vec<StartupMeasurement>,
}

impl StartupReport {
    pub fn new(targets: Vec<StartupMeasurement>) -> Self {
        Self {
            kind: ArtifactKind::Startup,
            timestamp: Utc::now(),
            targets,
        }
    }
}

/// Run `argv` to completion, failing on a non-zero exit status.
pub async fn run_command(argv: &[String]) -> BenchResult<()> {
    let (program, args) = argv.split_first().ok_or_else(|| BenchError::Command {
        program: String::new(),
        reason: "empty command".to_string(),
    })?;

    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| BenchError::Command {
            program: program.clone(),
            reason: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(BenchError::Command {
            program: program.clone(),
            reason: format!(
                "exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }
    Ok(())
}

/// Poll `url` until it is healthy. Returns the time taken, or `None` on timeout.
pub async fn wait_until_healthy(
    driver: &LoadDriver,
    url: &str,
    started: Instant,
    poll_interval: Duration,
    timeout: Duration,
) -> Option<Duration> {
    loop {
        if driver.check_health(url, 1, Duration::ZERO).await {
            return Some(started.elapsed());
        }
        if started.elapsed() >= timeout {
            return None;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Restart `target` `settings.repetitions` times and time each restart.
pub async fn measure_target(
    driver: &LoadDriver,
    target: &TargetConfig,
    settings: &StartupSettings,
) -> BenchResult<StartupMeasurement> {
    if target.restart_command.is_empty() {
        return Err(HardValidationError::MissingRequiredField {
            field: "restart_command",
            context: format!("target '{}'", target.id),
        }
        .into());
    }

    let url = target.url(&settings.health_path);
    let mut samples = Vec::with_capacity(settings.repetitions as usize);
    let mut failures = 0;

    for repetition in 1..=settings.repetitions {
        if repetition > 1 && !settings.pause.is_zero() {
            tokio::time::sleep(settings.pause).await;
        }

        let started = Instant::now();
        if let Err(e) = run_command(&target.restart_command).await {
            tracing::warn!(target = %target.id, repetition, error = %e, "Restart command failed");
            failures += 1;
            continue;
        }

        match wait_until_healthy(driver, &url, started, settings.poll_interval, settings.timeout).await {
            Some(elapsed) => {
                let ms = elapsed.as_secs_f64() * 1000.0;
                tracing::info!(target = %target.id, repetition, startup_ms = ms, "Target healthy");
                samples.push(ms);
            }
            None => {
                tracing::warn!(
                    target = %target.id,
                    repetition,
                    timeout_secs = settings.timeout.as_secs(),
                    "Target did not become healthy"
                );
                failures += 1;
            }
        }
    }

    Ok(StartupMeasurement::from_samples(target, samples, failures))
}
