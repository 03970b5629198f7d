//! Carbonbench Core Library
//!
//! Benchmark orchestration and statistical comparison of web services.
//! Provides the load driver, resource monitor, emissions tracking,
//! round-robin orchestration, artifact storage, statistical analysis
//! and report generation.

pub mod config;
pub mod emissions;
pub mod error;
pub mod load;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod report;
pub mod schedule;
pub mod startup;
pub mod stats;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, EndpointConfig, OrchestratorConfig, TargetConfig};
pub use emissions::{EmissionsTracker, EnergyProvider, EnergyReading};
pub use error::{BenchError, BenchResult, EnergyError, HardValidationError, StorageError};
pub use load::{LoadDriver, LoadSettings, LoadStatistics, RequestSpec};
pub use metrics::{Reliability, SuiteResult, TestResult};
pub use monitor::{MetricsSource, ResourceMonitor, ResourceSample};
pub use orchestrator::{ConfigurationOutcome, Orchestrator};
pub use schedule::RoundRobinPlan;
pub use stats::{analyze, Analysis, Metric};
pub use store::ResultStore;
pub use types::{ConfigurationKey, EndpointId, RequestCount, RunIndex, TargetId, TestConfiguration};
