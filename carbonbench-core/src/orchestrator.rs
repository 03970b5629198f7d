// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Test orchestrator.
//!
//! Runs one configuration at a time through the measurement pipeline:
//!
//! 1. health check (unhealthy targets are skipped, not fatal)
//! 2. warmup against the health endpoint, then a short settle pause
//! 3. take the resource baseline, then start the emissions session
//! 4. measured load batch
//! 5. stop the monitor, so idle padding never reaches the resource figures
//! 6. pad the emissions session to the minimum duration, then close it
//! 7. assemble the result and persist it atomically
//!
//! Overlapping configurations would make energy attribution meaningless, so
//! nothing here runs concurrently with another configuration.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::{Config, EndpointConfig, TargetConfig};
use crate::emissions::{select_provider, EmissionsOutcome, EmissionsTracker, EnergyProvider};
use crate::error::{BenchResult, StorageError};
use crate::load::{LoadDriver, LoadSettings, LoadStatistics, RequestSpec};
use crate::metrics::{ContainerMetrics, FailedConfiguration, SuiteResult, TestResult, TimedLoad};
use crate::monitor::{select_source, MetricsSource, ResourceMonitor};
use crate::schedule::RoundRobinPlan;
use crate::store::ResultStore;
use crate::types::{EndpointId, RequestCount, RunIndex, TargetId, TestConfiguration};

/// What happened to one configuration.
#[derive(Debug)]
pub enum ConfigurationOutcome {
    /// Measured and persisted.
    Completed { result: TestResult, path: PathBuf },
    /// Health check never succeeded; nothing was measured.
    Unhealthy { reason: String },
    /// Measured, but the artifact could not be written.
    PersistFailed {
        result: TestResult,
        error: StorageError,
    },
}

impl ConfigurationOutcome {
    pub fn result(&self) -> Option<&TestResult> {
        match self {
            ConfigurationOutcome::Completed { result, .. }
            | ConfigurationOutcome::PersistFailed { result, .. } => Some(result),
            ConfigurationOutcome::Unhealthy { .. } => None,
        }
    }
}

/// How a measured batch is bounded.
#[derive(Debug, Clone, Copy, PartialEq)]
enum BatchShape {
    Requests(RequestCount),
    Timed { duration: Duration, users: usize },
}

impl BatchShape {
    fn timed_load(&self) -> Option<TimedLoad> {
        match self {
            BatchShape::Requests(_) => None,
            BatchShape::Timed { duration, users } => Some(TimedLoad {
                target_duration_seconds: duration.as_secs_f64(),
                users: *users,
            }),
        }
    }
}

impl fmt::Display for BatchShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchShape::Requests(count) => write!(f, "{}", count),
            BatchShape::Timed { duration, users } => {
                write!(f, "{:.0}s x{}", duration.as_secs_f64(), users)
            }
        }
    }
}

/// Drives configurations through measurement and persistence.
pub struct Orchestrator {
    config: Config,
    store: ResultStore,
    driver: LoadDriver,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    tracker: EmissionsTracker,
    min_duration: Option<Duration>,
}

impl Orchestrator {
    /// Build an orchestrator with the sources named in `config`.
    pub fn new(config: Config, store: ResultStore) -> BenchResult<Self> {
        let driver = LoadDriver::new(LoadSettings::from(&config.orchestrator))?;
        let metrics_source = select_source(config.monitor.source);
        let tracker = EmissionsTracker::new(select_provider(&config.energy));
        let min_duration = config.orchestrator.min_duration;

        if let Some(provider) = tracker.provider_name() {
            tracing::info!(provider, "Energy provider selected");
        } else {
            tracing::warn!("No energy provider; emissions will not be recorded");
        }

        Ok(Self {
            config,
            store,
            driver,
            metrics_source,
            tracker,
            min_duration,
        })
    }

    /// Replace the resource metrics source.
    pub fn with_metrics_source(mut self, source: Option<Arc<dyn MetricsSource>>) -> Self {
        self.metrics_source = source;
        self
    }

    /// Replace the energy provider.
    pub fn with_energy_provider(mut self, provider: Option<Box<dyn EnergyProvider>>) -> Self {
        self.tracker = EmissionsTracker::new(provider);
        self
    }

    /// Override the configured minimum energy session length.
    pub fn with_min_duration(mut self, min_duration: Option<Duration>) -> Self {
        self.min_duration = min_duration;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Measure and persist a single configuration.
    ///
    /// Errors are reserved for configurations that name an unknown target or
    /// endpoint. Everything that can go wrong during measurement is reported
    /// through the outcome instead.
    pub async fn run_configuration(
        &mut self,
        configuration: &TestConfiguration,
    ) -> BenchResult<ConfigurationOutcome> {
        self.measure(
            &configuration.target,
            &configuration.endpoint,
            configuration.run_index,
            BatchShape::Requests(configuration.request_count),
        )
        .await
    }

    /// Measure `target` and `endpoint` with `users` concurrent users for a
    /// fixed wall-clock `duration`.
    ///
    /// The persisted result's `request_count` is the number of requests
    /// actually sent, and `timed_load` records the bounds.
    pub async fn run_timed(
        &mut self,
        target: &TargetId,
        endpoint: &EndpointId,
        run_index: RunIndex,
        duration: Duration,
        users: usize,
    ) -> BenchResult<ConfigurationOutcome> {
        self.measure(target, endpoint, run_index, BatchShape::Timed { duration, users })
            .await
    }

    async fn measure(
        &mut self,
        target_id: &TargetId,
        endpoint_id: &EndpointId,
        run_index: RunIndex,
        shape: BatchShape,
    ) -> BenchResult<ConfigurationOutcome> {
        let target = self.config.target(target_id.as_str())?.clone();
        let endpoint = self.config.endpoint(endpoint_id.as_str())?.clone();
        let settings = &self.config.orchestrator;
        let label = format!("{}/{}/{}/run{}", target_id, shape, endpoint_id, run_index);

        let health_url = target.url(&settings.health_path);
        if !self
            .driver
            .check_health(&health_url, settings.health_retries, settings.health_retry_delay)
            .await
        {
            let reason = format!("health check failed at {}", health_url);
            tracing::warn!(configuration = %label, %reason, "Skipping configuration");
            return Ok(ConfigurationOutcome::Unhealthy { reason });
        }

        if settings.warmup_requests > 0 {
            self.driver
                .warmup(&RequestSpec::get(&health_url), settings.warmup_requests)
                .await;
        }
        if !settings.warmup_settle.is_zero() {
            tokio::time::sleep(settings.warmup_settle).await;
        }

        let spec = RequestSpec::for_endpoint(&target, &endpoint);
        let instance = target.instance_name(self.config.monitor.source).to_string();
        let sample_interval = settings.sample_interval;

        tracing::info!(configuration = %label, url = %spec.url, "Starting measured batch");

        let monitor = match &self.metrics_source {
            Some(source) => {
                Some(ResourceMonitor::start(Arc::clone(source), instance, sample_interval).await)
            }
            None => None,
        };
        self.tracker.begin();
        let timestamp = Utc::now();

        let report = match shape {
            BatchShape::Requests(count) => self.driver.run(&spec, count).await,
            BatchShape::Timed { duration, users } => {
                self.driver.run_for(&spec, duration, users).await
            }
        };

        let container_metrics = match monitor {
            Some(monitor) => monitor.stop().await,
            None => ContainerMetrics::default(),
        };
        let emissions = self.tracker.finish(report.duration, self.min_duration).await;
        let statistics = LoadStatistics::from_report(&report);

        let request_count = match shape {
            BatchShape::Requests(count) => count,
            BatchShape::Timed { .. } => RequestCount::new(report.outcomes.len() as u64)?,
        };
        let configuration = TestConfiguration {
            target: target_id.clone(),
            request_count,
            endpoint: endpoint_id.clone(),
            run_index,
        };

        let mut result = assemble_result(
            &configuration,
            &target,
            &endpoint,
            timestamp,
            report.duration,
            &statistics,
            container_metrics,
            emissions,
        );
        result.timed_load = shape.timed_load();

        tracing::info!(
            configuration = %configuration,
            success = result.success_count,
            errors = result.error_count,
            rps = result.requests_per_second,
            reliability = %result.reliability_classification,
            "Batch finished"
        );

        match self.store.save_result(&result) {
            Ok(path) => Ok(ConfigurationOutcome::Completed { result, path }),
            Err(error) => {
                tracing::error!(configuration = %configuration, error = %error, "Failed to persist result");
                Ok(ConfigurationOutcome::PersistFailed { result, error })
            }
        }
    }

    /// Run every configuration of `plan` in order and write the suite artifact.
    pub async fn run_plan(&mut self, plan: RoundRobinPlan) -> SuiteResult {
        let mut suite = SuiteResult::new(self.min_duration);
        let total = plan.len();
        let cooldown = self.config.orchestrator.cooldown;
        let mut previous_measured = false;

        for (index, configuration) in plan.enumerate() {
            if previous_measured && !cooldown.is_zero() {
                tracing::debug!(cooldown_ms = cooldown.as_millis() as u64, "Cooling down");
                tokio::time::sleep(cooldown).await;
            }
            tracing::info!(
                "[{}/{}] {}",
                index + 1,
                total,
                configuration
            );

            let outcome = self.run_configuration(&configuration).await;
            previous_measured = matches!(outcome, Ok(ref o) if o.result().is_some());

            match outcome {
                Ok(ConfigurationOutcome::Completed { result, path }) => {
                    suite.artifacts.push(path);
                    suite.results.push(result);
                }
                Ok(ConfigurationOutcome::Unhealthy { reason }) => {
                    suite.failed.push(FailedConfiguration {
                        key: configuration.key(),
                        reason,
                    });
                }
                Ok(ConfigurationOutcome::PersistFailed { error, .. }) => {
                    suite.failed.push(FailedConfiguration {
                        key: configuration.key(),
                        reason: format!("persist failed: {}", error),
                    });
                }
                Err(e) => {
                    tracing::error!(configuration = %configuration, error = %e, "Configuration rejected");
                    suite.failed.push(FailedConfiguration {
                        key: configuration.key(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        suite.finished_at = Utc::now();
        match self.store.save_suite(&suite) {
            Ok(path) => tracing::info!(path = %path.display(), "Suite summary written"),
            Err(e) => tracing::warn!(error = %e, "Failed to write suite summary"),
        }

        tracing::info!(
            completed = suite.results.len(),
            failed = suite.failed.len(),
            "Suite finished"
        );
        suite
    }
}

#[allow(clippy::too_many_arguments)]
fn assemble_result(
    configuration: &TestConfiguration,
    target: &TargetConfig,
    endpoint: &EndpointConfig,
    timestamp: DateTime<Utc>,
    load_duration: Duration,
    statistics: &LoadStatistics,
    container_metrics: ContainerMetrics,
    emissions: EmissionsOutcome,
) -> TestResult {
    let request_count = configuration.request_count.value() as f64;
    let (emissions_grams, energy_kwh, energy_metadata) = match emissions.reading {
        Some(reading) => (
            Some(reading.emissions_grams),
            Some(reading.energy_kwh),
            Some(reading.metadata),
        ),
        None => (None, None, None),
    };

    TestResult {
        target: configuration.target.clone(),
        target_name: target.name.clone(),
        request_count: configuration.request_count,
        endpoint: configuration.endpoint.clone(),
        endpoint_path: endpoint.path.clone(),
        run_index: configuration.run_index,
        timestamp,
        duration_seconds: load_duration.as_secs_f64(),
        padding_seconds: emissions.padding.as_secs_f64(),
        emissions_grams,
        energy_kwh,
        emissions_per_request_mg: emissions_grams.map(|g| g * 1000.0 / request_count),
        energy_metadata,
        success_count: statistics.success_count,
        error_count: statistics.error_count,
        success_rate: statistics.success_rate,
        requests_per_second: statistics.requests_per_second,
        response_time_stats: statistics.latency.clone(),
        container_metrics,
        reliability_classification: emissions.reliability,
        timed_load: None,
    }
}
