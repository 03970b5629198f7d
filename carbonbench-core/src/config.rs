// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Describes the services under test, the endpoints and load levels to drive
//! against them, and how resources and energy are sampled. Any invalid field
//! results in a HardValidationError before a single request is sent.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, BenchResult, HardValidationError};
use crate::types::{EndpointId, RequestCount, TargetId};

/// Raw target as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
struct RawTargetConfig {
    id: String,
    #[serde(default)]
    name: Option<String>,
    base_url: String,
    #[serde(default)]
    container: Option<String>,
    #[serde(default)]
    process_name: Option<String>,
    #[serde(default)]
    restart_command: Vec<String>,
}

/// Raw endpoint as parsed from YAML.
#[derive(Debug, Deserialize)]
struct RawEndpointConfig {
    id: String,
    path: String,
    #[serde(default)]
    method: HttpMethod,
    #[serde(default)]
    body: Option<String>,
}

/// Raw orchestrator settings.
#[derive(Debug, Deserialize)]
struct RawOrchestratorConfig {
    #[serde(default = "default_results_dir")]
    results_dir: String,
    #[serde(default = "default_warmup_requests")]
    warmup_requests: u64,
    #[serde(default = "default_warmup_settle_ms")]
    warmup_settle_ms: u64,
    #[serde(default = "default_health_path")]
    health_path: String,
    #[serde(default = "default_health_retries")]
    health_retries: u32,
    #[serde(default = "default_health_retry_delay_ms")]
    health_retry_delay_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    request_timeout_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    cooldown_secs: u64,
    #[serde(default = "default_max_workers")]
    max_workers: usize,
    #[serde(default = "default_sequential_threshold")]
    sequential_threshold: u64,
    #[serde(default = "default_sample_interval_ms")]
    sample_interval_ms: u64,
    #[serde(default)]
    min_duration_secs: Option<f64>,
}

fn default_results_dir() -> String {
    "test_results".to_string()
}

fn default_warmup_requests() -> u64 {
    50
}

fn default_warmup_settle_ms() -> u64 {
    2000
}

fn default_health_path() -> String {
    "/api/v1/health".to_string()
}

fn default_health_retries() -> u32 {
    3
}

fn default_health_retry_delay_ms() -> u64 {
    2000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_cooldown_secs() -> u64 {
    5
}

fn default_max_workers() -> usize {
    100
}

fn default_sequential_threshold() -> u64 {
    100
}

fn default_sample_interval_ms() -> u64 {
    1000
}

impl Default for RawOrchestratorConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            warmup_requests: default_warmup_requests(),
            warmup_settle_ms: default_warmup_settle_ms(),
            health_path: default_health_path(),
            health_retries: default_health_retries(),
            health_retry_delay_ms: default_health_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            cooldown_secs: default_cooldown_secs(),
            max_workers: default_max_workers(),
            sequential_threshold: default_sequential_threshold(),
            sample_interval_ms: default_sample_interval_ms(),
            min_duration_secs: None,
        }
    }
}

/// Raw energy provider settings.
#[derive(Debug, Deserialize)]
struct RawEnergyConfig {
    #[serde(default)]
    provider: EnergyProviderKind,
    #[serde(default = "default_carbon_intensity")]
    carbon_intensity_g_per_kwh: f64,
    #[serde(default)]
    country_iso_code: Option<String>,
    #[serde(default = "default_cpu_tdp_watts")]
    cpu_tdp_watts: f64,
    #[serde(default = "default_rapl_root")]
    rapl_root: String,
}

fn default_carbon_intensity() -> f64 {
    475.0 // world average grid, gCO2eq/kWh
}

fn default_cpu_tdp_watts() -> f64 {
    65.0
}

fn default_rapl_root() -> String {
    "/sys/class/powercap".to_string()
}

impl Default for RawEnergyConfig {
    fn default() -> Self {
        Self {
            provider: EnergyProviderKind::default(),
            carbon_intensity_g_per_kwh: default_carbon_intensity(),
            country_iso_code: None,
            cpu_tdp_watts: default_cpu_tdp_watts(),
            rapl_root: default_rapl_root(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    orchestrator: RawOrchestratorConfig,
    #[serde(default)]
    energy: RawEnergyConfig,
    #[serde(default)]
    monitor: MonitorConfig,
    targets: Vec<RawTargetConfig>,
    endpoints: Vec<RawEndpointConfig>,
    #[serde(default = "default_loads")]
    loads: Vec<u64>,
}

fn default_loads() -> Vec<u64> {
    vec![100, 1000, 10_000]
}

/// HTTP method used for a benchmarked endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Which energy provider backs the emissions tracker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnergyProviderKind {
    /// RAPL when the counters are readable, TDP estimation otherwise
    #[default]
    Auto,
    Rapl,
    Tdp,
    None,
}

/// Which point-sample source backs the resource monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorSourceKind {
    #[default]
    Docker,
    Process,
    None,
}

/// Resource monitor settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub source: MonitorSourceKind,
}

/// Validated service under test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub id: TargetId,
    pub name: String,
    pub base_url: String,
    pub container: Option<String>,
    pub process_name: Option<String>,
    pub restart_command: Vec<String>,
}

impl TargetConfig {
    /// Absolute URL of `path` on this target.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Name the resource monitor should sample for this target.
    pub fn instance_name(&self, source: MonitorSourceKind) -> &str {
        let preferred = match source {
            MonitorSourceKind::Process => self.process_name.as_deref(),
            _ => self.container.as_deref(),
        };
        preferred.unwrap_or(self.id.as_str())
    }
}

/// Validated benchmarked endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub id: EndpointId,
    pub path: String,
    pub method: HttpMethod,
    pub body: Option<String>,
}

/// Validated orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub results_dir: PathBuf,
    pub warmup_requests: u64,
    pub warmup_settle: Duration,
    pub health_path: String,
    pub health_retries: u32,
    pub health_retry_delay: Duration,
    pub request_timeout: Duration,
    pub cooldown: Duration,
    pub max_workers: usize,
    pub sequential_threshold: u64,
    pub sample_interval: Duration,
    pub min_duration: Option<Duration>,
}

/// Validated energy provider settings.
#[derive(Debug, Clone)]
pub struct EnergyConfig {
    pub provider: EnergyProviderKind,
    pub carbon_intensity_g_per_kwh: f64,
    pub country_iso_code: Option<String>,
    pub cpu_tdp_watts: f64,
    pub rapl_root: PathBuf,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    pub energy: EnergyConfig,
    pub monitor: MonitorConfig,
    pub targets: Vec<TargetConfig>,
    pub endpoints: Vec<EndpointConfig>,
    pub loads: Vec<RequestCount>,
}

impl Config {
    /// Look up a target by id.
    pub fn target(&self, id: &str) -> BenchResult<&TargetConfig> {
        self.targets
            .iter()
            .find(|t| t.id.as_str() == id)
            .ok_or_else(|| BenchError::UnknownTarget(id.to_string()))
    }

    /// Look up an endpoint by id.
    pub fn endpoint(&self, id: &str) -> BenchResult<&EndpointConfig> {
        self.endpoints
            .iter()
            .find(|e| e.id.as_str() == id)
            .ok_or_else(|| BenchError::UnknownEndpoint(id.to_string()))
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> BenchResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(BenchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| BenchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> BenchResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| BenchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> BenchResult<Config> {
        let orchestrator = Self::validate_orchestrator(raw.orchestrator)?;
        let energy = Self::validate_energy(raw.energy)?;

        let mut targets = Vec::with_capacity(raw.targets.len());
        let mut seen_targets = HashSet::new();
        for (index, raw_target) in raw.targets.into_iter().enumerate() {
            let target = Self::validate_target(raw_target, index)?;
            if !seen_targets.insert(target.id.clone()) {
                return Err(HardValidationError::DuplicateId {
                    kind: "target",
                    id: target.id.to_string(),
                }
                .into());
            }
            targets.push(target);
        }

        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        let mut seen_endpoints = HashSet::new();
        for raw_endpoint in raw.endpoints {
            let endpoint = Self::validate_endpoint(raw_endpoint)?;
            if !seen_endpoints.insert(endpoint.id.clone()) {
                return Err(HardValidationError::DuplicateId {
                    kind: "endpoint",
                    id: endpoint.id.to_string(),
                }
                .into());
            }
            endpoints.push(endpoint);
        }

        if targets.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one target must be defined".to_string(),
            }
            .into());
        }

        if endpoints.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one endpoint must be defined".to_string(),
            }
            .into());
        }

        if raw.loads.is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "At least one load level must be defined".to_string(),
            }
            .into());
        }

        let loads = raw
            .loads
            .into_iter()
            .map(RequestCount::new)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            orchestrator,
            energy,
            monitor: raw.monitor,
            targets,
            endpoints,
            loads,
        })
    }

    fn validate_orchestrator(raw: RawOrchestratorConfig) -> BenchResult<OrchestratorConfig> {
        if raw.max_workers == 0 || raw.max_workers > 1000 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_workers",
                value: raw.max_workers.to_string(),
                reason: "Must be between 1 and 1000".to_string(),
            }
            .into());
        }

        // Sub-100ms polling of `docker stats` just queues up processes
        if raw.sample_interval_ms < 100 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "sample_interval_ms",
                value: raw.sample_interval_ms.to_string(),
                reason: "Sampling interval must be at least 100ms".to_string(),
            }
            .into());
        }

        if raw.request_timeout_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "request_timeout_ms",
                value: "0".to_string(),
                reason: "Timeout must be greater than 0".to_string(),
            }
            .into());
        }

        if !raw.health_path.starts_with('/') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "health_path",
                value: raw.health_path,
                reason: "Path must start with '/'".to_string(),
            }
            .into());
        }

        let min_duration = match raw.min_duration_secs {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "min_duration_secs",
                    value: secs.to_string(),
                    reason: "Minimum duration must be a non-negative number of seconds"
                        .to_string(),
                }
                .into());
            }
            Some(secs) => Some(Duration::from_secs_f64(secs)),
            None => None,
        };

        Ok(OrchestratorConfig {
            results_dir: PathBuf::from(raw.results_dir),
            warmup_requests: raw.warmup_requests,
            warmup_settle: Duration::from_millis(raw.warmup_settle_ms),
            health_path: raw.health_path,
            health_retries: raw.health_retries.max(1),
            health_retry_delay: Duration::from_millis(raw.health_retry_delay_ms),
            request_timeout: Duration::from_millis(raw.request_timeout_ms),
            cooldown: Duration::from_secs(raw.cooldown_secs),
            max_workers: raw.max_workers,
            sequential_threshold: raw.sequential_threshold,
            sample_interval: Duration::from_millis(raw.sample_interval_ms),
            min_duration,
        })
    }

    fn validate_energy(raw: RawEnergyConfig) -> BenchResult<EnergyConfig> {
        if !(raw.carbon_intensity_g_per_kwh.is_finite() && raw.carbon_intensity_g_per_kwh > 0.0) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "carbon_intensity_g_per_kwh",
                value: raw.carbon_intensity_g_per_kwh.to_string(),
                reason: "Carbon intensity must be positive".to_string(),
            }
            .into());
        }

        if !(raw.cpu_tdp_watts.is_finite() && raw.cpu_tdp_watts > 0.0) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "cpu_tdp_watts",
                value: raw.cpu_tdp_watts.to_string(),
                reason: "CPU TDP must be positive".to_string(),
            }
            .into());
        }

        Ok(EnergyConfig {
            provider: raw.provider,
            carbon_intensity_g_per_kwh: raw.carbon_intensity_g_per_kwh,
            country_iso_code: raw.country_iso_code,
            cpu_tdp_watts: raw.cpu_tdp_watts,
            rapl_root: PathBuf::from(raw.rapl_root),
        })
    }

    fn validate_target(raw: RawTargetConfig, index: usize) -> BenchResult<TargetConfig> {
        let id = TargetId::new(&raw.id)?;

        if raw.base_url.is_empty() {
            return Err(HardValidationError::MissingRequiredField {
                field: "base_url",
                context: format!("target at index {}", index),
            }
            .into());
        }

        if !(raw.base_url.starts_with("http://") || raw.base_url.starts_with("https://")) {
            return Err(HardValidationError::InvalidFieldValue {
                field: "base_url",
                value: raw.base_url,
                reason: "Base URL must start with http:// or https://".to_string(),
            }
            .into());
        }

        Ok(TargetConfig {
            name: raw.name.unwrap_or_else(|| id.to_string()),
            id,
            base_url: raw.base_url,
            container: raw.container,
            process_name: raw.process_name,
            restart_command: raw.restart_command,
        })
    }

    fn validate_endpoint(raw: RawEndpointConfig) -> BenchResult<EndpointConfig> {
        let id = EndpointId::new(&raw.id)?;

        if !raw.path.starts_with('/') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "path",
                value: raw.path,
                reason: format!("Path of endpoint '{}' must start with '/'", id),
            }
            .into());
        }

        Ok(EndpointConfig {
            id,
            path: raw.path,
            method: raw.method,
            body: raw.body,
        })
    }
}
