// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for carbonbench.
//!
//! A local axum service stands in for the framework under test, so these
//! tests cover the full path from configuration to persisted artifacts and
//! analysis without Docker or energy counters.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use tempfile::TempDir;

use carbonbench_core::emissions::{EnergyProvider, EnergyReading};
use carbonbench_core::load::ExecutionMode;
use carbonbench_core::metrics::{ContainerMetrics, EnergyMetadata, LatencyStats};
use carbonbench_core::stats::Scope;
use carbonbench_core::{
    analyze, BenchResult, ConfigLoader, EndpointId, LoadDriver, LoadSettings, LoadStatistics,
    Metric, MetricsSource, Orchestrator, Reliability, RequestCount, RequestSpec, ResourceSample,
    ResultStore, RoundRobinPlan, RunIndex, SuiteResult, TargetId, TestResult,
};

#[derive(Clone, Default)]
struct MockState {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    hits: Arc<AtomicUsize>,
}

struct MockServer {
    addr: SocketAddr,
    state: MockState,
}

impl MockServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn work(State(state): State<MockState>) -> &'static str {
    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(5)).await;
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
    state.hits.fetch_add(1, Ordering::SeqCst);
    "{\"status\":\"ok\"}"
}

async fn spawn_mock() -> MockServer {
    let state = MockState::default();
    let app = Router::new()
        .route("/api/v1/health", get(|| async { "healthy" }))
        .route("/work", get(work))
        .route("/fail", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockServer { addr, state }
}

struct FixedSource;

impl MetricsSource for FixedSource {
    fn sample(&self, _instance: &str) -> BenchResult<ResourceSample> {
        Ok(ResourceSample {
            cpu_percent: 25.0,
            memory_mb: 64.0,
        })
    }
}

/// Records when each sample was taken.
#[derive(Default)]
struct RecordingSource {
    taken_at: Mutex<Vec<Instant>>,
}

impl MetricsSource for RecordingSource {
    fn sample(&self, _instance: &str) -> BenchResult<ResourceSample> {
        self.taken_at.lock().unwrap().push(Instant::now());
        Ok(ResourceSample {
            cpu_percent: 10.0,
            memory_mb: 32.0,
        })
    }
}

/// Reports a fixed 1 Wh per session.
struct FixedEnergy {
    running: bool,
}

impl EnergyProvider for FixedEnergy {
    fn name(&self) -> &'static str {
        "fixed"
    }

    fn begin(&mut self) -> BenchResult<()> {
        self.running = true;
        Ok(())
    }

    fn end(&mut self) -> BenchResult<EnergyReading> {
        assert!(self.running, "end without begin");
        self.running = false;
        Ok(EnergyReading {
            energy_kwh: 0.001,
            emissions_grams: 0.475,
            metadata: EnergyMetadata {
                provider: "fixed".to_string(),
                tracking_mode: "machine".to_string(),
                method: "constant".to_string(),
                cpu_model: None,
                cpu_count: Some(4),
                ram_total_gb: Some(8.0),
                carbon_intensity_g_per_kwh: 475.0,
                country_iso_code: None,
                measured_duration_seconds: 1.0,
            },
        })
    }
}

fn config_for(server: &MockServer) -> String {
    format!(
        r#"
orchestrator:
  warmup_requests: 5
  warmup_settle_ms: 0
  health_retries: 2
  health_retry_delay_ms: 10
  cooldown_secs: 0
  sample_interval_ms: 100
energy:
  provider: none
monitor:
  source: none
targets:
  - id: alpha
    name: Alpha
    base_url: "http://{addr}"
  - id: beta
    name: Beta
    base_url: "http://{addr}/"
  - id: offline
    name: Offline
    base_url: "http://127.0.0.1:1"
endpoints:
  - id: work
    path: /work
loads: [20]
"#,
        addr = server.addr
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batch_all_success() {
    let server = spawn_mock().await;
    let driver = LoadDriver::new(LoadSettings::default()).unwrap();

    let report = driver
        .run(&RequestSpec::get(server.url("/work")), RequestCount::new(1000).unwrap())
        .await;
    let stats = LoadStatistics::from_report(&report);

    assert_eq!(report.mode, ExecutionMode::Concurrent { workers: 100 });
    assert_eq!(stats.success_count, 1000);
    assert_eq!(stats.error_count, 0);
    assert_eq!(stats.success_rate, 100.0);
    assert_eq!(server.state.hits.load(Ordering::SeqCst), 1000);

    let expected_rps = 1000.0 / report.duration.as_secs_f64();
    assert!((stats.requests_per_second - expected_rps).abs() < 1e-6);
    // One worker can do at most 200 req/s against a 5ms handler
    assert!(stats.requests_per_second > 200.0);

    let peak = server.state.peak.load(Ordering::SeqCst);
    assert!(peak > 1 && peak <= 100, "peak in-flight {}", peak);

    let latency = &stats.latency;
    assert!(latency.min_ms.unwrap() <= latency.median_ms.unwrap());
    assert!(latency.median_ms.unwrap() <= latency.p95_ms.unwrap());
    assert!(latency.p95_ms.unwrap() <= latency.p99_ms.unwrap());
    assert!(latency.p99_ms.unwrap() <= latency.max_ms.unwrap());
}

#[tokio::test]
async fn test_small_batch_runs_sequentially() {
    let server = spawn_mock().await;
    let driver = LoadDriver::new(LoadSettings::default()).unwrap();

    let report = driver
        .run(&RequestSpec::get(server.url("/work")), RequestCount::new(50).unwrap())
        .await;

    assert_eq!(report.mode, ExecutionMode::Sequential);
    assert_eq!(report.outcomes.len(), 50);
    assert_eq!(server.state.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_requests_are_recorded() {
    let server = spawn_mock().await;
    let driver = LoadDriver::new(LoadSettings::default()).unwrap();

    let report = driver
        .run(&RequestSpec::get(server.url("/fail")), RequestCount::new(150).unwrap())
        .await;
    let stats = LoadStatistics::from_report(&report);

    assert_eq!(stats.success_count + stats.error_count, 150);
    assert_eq!(stats.error_count, 150);
    assert_eq!(stats.requests_per_second, 0.0);
    assert!(stats.latency.is_empty());
}

#[tokio::test]
async fn test_health_check() {
    let server = spawn_mock().await;
    let driver = LoadDriver::new(LoadSettings::default()).unwrap();

    assert!(
        driver
            .check_health(&server.url("/api/v1/health"), 1, Duration::ZERO)
            .await
    );
    assert!(
        !driver
            .check_health(&server.url("/fail"), 2, Duration::from_millis(5))
            .await
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orchestrator_round_robin_suite() {
    let server = spawn_mock().await;
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_string(&config_for(&server)).unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();

    let mut orchestrator = Orchestrator::new(config, store)
        .unwrap()
        .with_metrics_source(Some(Arc::new(FixedSource)))
        .with_energy_provider(Some(Box::new(FixedEnergy { running: false })));

    let plan = RoundRobinPlan::new(
        vec![
            TargetId::new("alpha").unwrap(),
            TargetId::new("offline").unwrap(),
            TargetId::new("beta").unwrap(),
        ],
        vec![RequestCount::new(20).unwrap()],
        vec![EndpointId::new("work").unwrap()],
        2,
    );
    let suite = orchestrator.run_plan(plan).await;

    assert_eq!(suite.results.len(), 4);
    assert_eq!(suite.failed.len(), 2);
    assert!(suite
        .failed
        .iter()
        .all(|f| f.key.target.as_str() == "offline"));

    // Round-robin: run 1 for every target before run 2
    let order: Vec<(String, u32)> = suite
        .results
        .iter()
        .map(|r| (r.target.to_string(), r.run_index.value()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("alpha".to_string(), 1),
            ("beta".to_string(), 1),
            ("alpha".to_string(), 2),
            ("beta".to_string(), 2),
        ]
    );

    for result in &suite.results {
        assert_eq!(result.total_requests(), 20);
        assert_eq!(result.success_rate, 100.0);
        assert_eq!(result.emissions_grams, Some(0.475));
        assert!((result.emissions_per_request_mg.unwrap() - 23.75).abs() < 1e-9);
        assert_eq!(result.container_metrics.avg_cpu, Some(25.0));
        assert!(result.container_metrics.sample_count >= 1);
        assert_eq!(result.padding_seconds, 0.0);
        assert_eq!(result.reliability_classification, Reliability::Unreliable);
    }

    // Four individual artifacts plus the advisory suite artifact
    let artifacts = orchestrator.store().list_artifacts().unwrap();
    assert_eq!(artifacts.len(), 5);

    let loaded = orchestrator.store().load_results().unwrap();
    assert_eq!(loaded.results.len(), 4);
    assert_eq!(loaded.skipped_aggregates, 1);

    let analysis = analyze(&loaded.results);
    assert_eq!(analysis.sample_count, 4);
    assert!(analysis
        .summaries
        .iter()
        .any(|s| s.scope == Scope::Pooled && s.metric == Metric::RequestsPerSecond));
}

#[tokio::test]
async fn test_padding_excluded_from_throughput() {
    let server = spawn_mock().await;
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_string(&config_for(&server)).unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();

    let mut orchestrator = Orchestrator::new(config, store)
        .unwrap()
        .with_energy_provider(Some(Box::new(FixedEnergy { running: false })))
        .with_min_duration(Some(Duration::from_millis(1500)));

    let plan = RoundRobinPlan::new(
        vec![TargetId::new("alpha").unwrap()],
        vec![RequestCount::new(10).unwrap()],
        vec![EndpointId::new("work").unwrap()],
        1,
    );
    let suite = orchestrator.run_plan(plan).await;
    let result = &suite.results[0];

    assert!(result.duration_seconds < 1.5);
    assert!((result.duration_seconds + result.padding_seconds - 1.5).abs() < 0.01);
    let expected_rps = result.success_count as f64 / result.duration_seconds;
    assert!((result.requests_per_second - expected_rps).abs() < 1e-6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resource_sampling_stops_before_padding() {
    let server = spawn_mock().await;
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_string(&config_for(&server)).unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();
    let source = Arc::new(RecordingSource::default());
    let metrics_source: Arc<dyn MetricsSource> = source.clone();

    let mut orchestrator = Orchestrator::new(config, store)
        .unwrap()
        .with_metrics_source(Some(metrics_source))
        .with_energy_provider(Some(Box::new(FixedEnergy { running: false })))
        .with_min_duration(Some(Duration::from_millis(1500)));

    let plan = RoundRobinPlan::new(
        vec![TargetId::new("alpha").unwrap()],
        vec![RequestCount::new(10).unwrap()],
        vec![EndpointId::new("work").unwrap()],
        1,
    );
    let started = Instant::now();
    let suite = orchestrator.run_plan(plan).await;
    let finished = Instant::now();
    let result = &suite.results[0];

    assert!(result.padding_seconds > 1.0, "padding {}", result.padding_seconds);
    assert!(finished - started >= Duration::from_millis(1500));

    let taken_at = source.taken_at.lock().unwrap().clone();
    assert_eq!(result.container_metrics.sample_count, taken_at.len() as u64);
    assert!(result.container_metrics.sample_count >= 1);
    assert_eq!(result.container_metrics.baseline_mem, Some(32.0));

    // Sampling every 100ms through 1.5s of padding would add a dozen samples
    let last = *taken_at.last().unwrap();
    let load_window = Duration::from_secs_f64(result.duration_seconds) + Duration::from_millis(500);
    assert!(last - started < load_window, "last sample {:?} after start", last - started);
    assert!(finished - last > Duration::from_millis(1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_timed_batch_against_service() {
    let server = spawn_mock().await;
    let driver = LoadDriver::new(LoadSettings::default()).unwrap();

    let report = driver
        .run_for(&RequestSpec::get(server.url("/work")), Duration::from_millis(300), 4)
        .await;
    let stats = LoadStatistics::from_report(&report);

    assert_eq!(report.mode, ExecutionMode::Timed { users: 4 });
    assert!(report.duration >= Duration::from_millis(300));
    assert_eq!(stats.error_count, 0);
    assert_eq!(server.state.hits.load(Ordering::SeqCst), report.outcomes.len());
    // 4 users against a 5ms handler for 300ms
    assert!(report.outcomes.len() >= 40, "sent {}", report.outcomes.len());

    let peak = server.state.peak.load(Ordering::SeqCst);
    assert!(peak >= 1 && peak <= 4, "peak in-flight {}", peak);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_orchestrator_timed_run() {
    let server = spawn_mock().await;
    let temp_dir = TempDir::new().unwrap();
    let config = ConfigLoader::load_string(&config_for(&server)).unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();

    let mut orchestrator = Orchestrator::new(config, store)
        .unwrap()
        .with_energy_provider(Some(Box::new(FixedEnergy { running: false })));

    let outcome = orchestrator
        .run_timed(
            &TargetId::new("beta").unwrap(),
            &EndpointId::new("work").unwrap(),
            RunIndex::new(1).unwrap(),
            Duration::from_millis(250),
            3,
        )
        .await
        .unwrap();
    let result = outcome.result().unwrap().clone();

    let timed = result.timed_load.unwrap();
    assert_eq!(timed.users, 3);
    assert_eq!(timed.target_duration_seconds, 0.25);
    assert_eq!(result.request_count.value(), result.total_requests());
    assert!(result.duration_seconds >= 0.25);
    let expected_mg = 0.475 * 1000.0 / result.total_requests() as f64;
    assert!((result.emissions_per_request_mg.unwrap() - expected_mg).abs() < 1e-9);

    // The persisted artifact keeps the timed bounds
    let loaded = orchestrator.store().load_results().unwrap();
    assert_eq!(loaded.results, vec![result]);

    let offline = orchestrator
        .run_timed(
            &TargetId::new("offline").unwrap(),
            &EndpointId::new("work").unwrap(),
            RunIndex::new(1).unwrap(),
            Duration::from_millis(250),
            3,
        )
        .await
        .unwrap();
    assert!(offline.result().is_none());
}

#[tokio::test]
async fn test_analysis_ignores_suite_duplicate() {
    let temp_dir = TempDir::new().unwrap();
    let store = ResultStore::new(temp_dir.path()).unwrap();
    let result = synthetic_result("alpha", 1, 12.0);
    store.save_result(&result).unwrap();

    let mut suite = SuiteResult::new(None);
    suite.results.push(result.clone());
    store.save_suite(&suite).unwrap();

    let loaded = store.load_results().unwrap();
    assert_eq!(loaded.results, vec![result]);
    assert_eq!(analyze(&loaded.results).sample_count, 1);

    // Running the pass again sees the same inputs
    let again = store.load_results().unwrap();
    assert_eq!(analyze(&again.results).sample_count, 1);
}

fn synthetic_result(target: &str, run: u32, mean_latency: f64) -> TestResult {
    TestResult {
        target: TargetId::new(target).unwrap(),
        target_name: target.to_string(),
        request_count: RequestCount::new(1000).unwrap(),
        endpoint: EndpointId::new("light").unwrap(),
        endpoint_path: "/light".to_string(),
        run_index: RunIndex::new(run).unwrap(),
        timestamp: Utc::now(),
        duration_seconds: 2.0,
        padding_seconds: 0.0,
        emissions_grams: None,
        energy_kwh: None,
        emissions_per_request_mg: None,
        energy_metadata: None,
        success_count: 1000,
        error_count: 0,
        success_rate: 100.0,
        requests_per_second: 500.0,
        response_time_stats: LatencyStats::from_latencies(vec![mean_latency]),
        container_metrics: ContainerMetrics::default(),
        reliability_classification: Reliability::Unreliable,
        timed_load: None,
    }
}

#[test]
fn test_identical_targets_rarely_differ() {
    let mut rng = StdRng::seed_from_u64(2025);
    let latency = Normal::new(20.0, 3.0).unwrap();
    let trials = 100;

    let mut accepted = 0;
    for _ in 0..trials {
        let mut results = Vec::new();
        for target in ["alpha", "beta", "gamma"] {
            for run in 1..=5 {
                results.push(synthetic_result(target, run, latency.sample(&mut rng)));
            }
        }

        let analysis = analyze(&results);
        let row = analysis
            .pooled_anova
            .iter()
            .find(|row| row.metric == Metric::MeanLatencyMs)
            .unwrap();
        if row.result.p_value > 0.05 {
            accepted += 1;
        }
    }

    assert!(accepted >= 85, "accepted {} of {}", accepted, trials);
}
