// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Emissions tracking around one load phase.
//!
//! An `EnergyProvider` exposes begin/end semantics over some external energy
//! source. The `EmissionsTracker` adapter brackets the load phase with it,
//! optionally holds the session open until a minimum duration has elapsed,
//! and classifies how far the resulting figure can be trusted. A provider
//! failure never fails the test; the emissions fields are simply absent.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sysinfo::System;
use tokio::time::Instant;

use crate::config::{EnergyConfig, EnergyProviderKind};
use crate::error::{BenchResult, EnergyError};
use crate::metrics::{EnergyMetadata, Reliability};

const MICROJOULES_PER_KWH: f64 = 3.6e12;
const WATT_SECONDS_PER_KWH: f64 = 3.6e6;

/// Energy consumed during one session.
#[derive(Debug, Clone, PartialEq)]
pub struct EnergyReading {
    pub energy_kwh: f64,
    pub emissions_grams: f64,
    pub metadata: EnergyMetadata,
}

/// External energy measurement with begin/end semantics.
///
/// `end` must return everything the caller needs, metadata included, since
/// the next `begin` resets the provider's state.
pub trait EnergyProvider: Send {
    fn name(&self) -> &'static str;
    fn begin(&mut self) -> BenchResult<()>;
    fn end(&mut self) -> BenchResult<EnergyReading>;
}

/// Static description of the measuring host.
#[derive(Debug, Clone, PartialEq)]
struct HostDescriptor {
    cpu_model: Option<String>,
    cpu_count: Option<usize>,
    ram_total_gb: Option<f64>,
}

impl HostDescriptor {
    fn collect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        sys.refresh_memory();
        let cpus = sys.cpus();
        Self {
            cpu_model: cpus.first().map(|c| c.brand().trim().to_string()),
            cpu_count: (!cpus.is_empty()).then_some(cpus.len()),
            ram_total_gb: Some(sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0)),
        }
    }
}

/// Grid figures used to convert energy into emissions.
#[derive(Debug, Clone, PartialEq)]
struct CarbonContext {
    intensity_g_per_kwh: f64,
    country_iso_code: Option<String>,
}

impl CarbonContext {
    fn from_config(config: &EnergyConfig) -> Self {
        Self {
            intensity_g_per_kwh: config.carbon_intensity_g_per_kwh,
            country_iso_code: config.country_iso_code.clone(),
        }
    }

    fn reading(
        &self,
        energy_kwh: f64,
        provider: &str,
        method: &str,
        host: &HostDescriptor,
        duration: Duration,
    ) -> EnergyReading {
        EnergyReading {
            energy_kwh,
            emissions_grams: energy_kwh * self.intensity_g_per_kwh,
            metadata: EnergyMetadata {
                provider: provider.to_string(),
                tracking_mode: "machine".to_string(),
                method: method.to_string(),
                cpu_model: host.cpu_model.clone(),
                cpu_count: host.cpu_count,
                ram_total_gb: host.ram_total_gb,
                carbon_intensity_g_per_kwh: self.intensity_g_per_kwh,
                country_iso_code: self.country_iso_code.clone(),
                measured_duration_seconds: duration.as_secs_f64(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct RaplZone {
    energy_path: PathBuf,
    max_range_uj: Option<u64>,
}

/// Package-level Intel RAPL counters from the Linux powercap interface.
pub struct RaplProvider {
    zones: Vec<RaplZone>,
    carbon: CarbonContext,
    host: HostDescriptor,
    session: Option<(Instant, Vec<u64>)>,
}

impl RaplProvider {
    /// Find readable package zones (`intel-rapl:N`) under `config.rapl_root`.
    pub fn discover(config: &EnergyConfig) -> BenchResult<Self> {
        let zones = discover_zones(&config.rapl_root)?;
        Ok(Self {
            zones,
            carbon: CarbonContext::from_config(config),
            host: HostDescriptor::collect(),
            session: None,
        })
    }

    fn read_counters(&self) -> BenchResult<Vec<u64>> {
        self.zones
            .iter()
            .map(|zone| read_counter(&zone.energy_path).map_err(Into::into))
            .collect()
    }
}

fn discover_zones(root: &Path) -> Result<Vec<RaplZone>, EnergyError> {
    let unavailable = || EnergyError::CountersUnavailable {
        path: root.to_path_buf(),
    };

    let mut zones = Vec::new();
    for entry in fs::read_dir(root).map_err(|_| unavailable())?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        // Sub-zones (`intel-rapl:0:1`) are already included in their package
        let is_package = name
            .strip_prefix("intel-rapl:")
            .map(|rest| !rest.is_empty() && !rest.contains(':'))
            .unwrap_or(false);
        if !is_package {
            continue;
        }

        let energy_path = entry.path().join("energy_uj");
        if read_counter(&energy_path).is_err() {
            tracing::debug!(path = %energy_path.display(), "RAPL counter not readable");
            continue;
        }

        let max_range_uj = fs::read_to_string(entry.path().join("max_energy_range_uj"))
            .ok()
            .and_then(|s| s.trim().parse().ok());
        zones.push(RaplZone {
            energy_path,
            max_range_uj,
        });
    }

    if zones.is_empty() {
        return Err(unavailable());
    }
    zones.sort_by(|a, b| a.energy_path.cmp(&b.energy_path));
    Ok(zones)
}

fn read_counter(path: &Path) -> Result<u64, EnergyError> {
    let raw = fs::read_to_string(path).map_err(|e| EnergyError::CounterRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    raw.trim().parse().map_err(|e: std::num::ParseIntError| EnergyError::CounterRead {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Counter delta that tolerates a single wrap-around.
fn counter_delta(start: u64, end: u64, max_range: Option<u64>) -> u64 {
    if end >= start {
        end - start
    } else {
        match max_range {
            Some(max) => max.saturating_sub(start) + end,
            None => end,
        }
    }
}

impl EnergyProvider for RaplProvider {
    fn name(&self) -> &'static str {
        "rapl"
    }

    fn begin(&mut self) -> BenchResult<()> {
        if self.session.is_some() {
            return Err(EnergyError::AlreadyStarted.into());
        }
        let counters = self.read_counters()?;
        self.session = Some((Instant::now(), counters));
        Ok(())
    }

    fn end(&mut self) -> BenchResult<EnergyReading> {
        let (started, start_counters) = self.session.take().ok_or(EnergyError::NotStarted)?;
        let end_counters = self.read_counters()?;
        let duration = started.elapsed();

        let microjoules: u64 = self
            .zones
            .iter()
            .zip(start_counters.iter().zip(end_counters.iter()))
            .map(|(zone, (&start, &end))| counter_delta(start, end, zone.max_range_uj))
            .sum();

        let energy_kwh = microjoules as f64 / MICROJOULES_PER_KWH;
        Ok(self
            .carbon
            .reading(energy_kwh, self.name(), "rapl_powercap", &self.host, duration))
    }
}

/// Estimates energy as CPU TDP scaled by machine-wide CPU utilisation.
///
/// This is the fallback when no hardware counters are readable.
pub struct TdpProvider {
    tdp_watts: f64,
    system: System,
    carbon: CarbonContext,
    host: HostDescriptor,
    started: Option<Instant>,
}

impl TdpProvider {
    pub fn new(config: &EnergyConfig) -> Self {
        Self {
            tdp_watts: config.cpu_tdp_watts,
            system: System::new(),
            carbon: CarbonContext::from_config(config),
            host: HostDescriptor::collect(),
            started: None,
        }
    }
}

impl EnergyProvider for TdpProvider {
    fn name(&self) -> &'static str {
        "tdp"
    }

    fn begin(&mut self) -> BenchResult<()> {
        if self.started.is_some() {
            return Err(EnergyError::AlreadyStarted.into());
        }
        // Usage is reported relative to the previous refresh
        self.system.refresh_cpu();
        self.started = Some(Instant::now());
        Ok(())
    }

    fn end(&mut self) -> BenchResult<EnergyReading> {
        let started = self.started.take().ok_or(EnergyError::NotStarted)?;
        self.system.refresh_cpu();
        let duration = started.elapsed();
        let utilisation = (self.system.global_cpu_info().cpu_usage() as f64 / 100.0).clamp(0.0, 1.0);

        let energy_kwh = self.tdp_watts * utilisation * duration.as_secs_f64() / WATT_SECONDS_PER_KWH;
        Ok(self
            .carbon
            .reading(energy_kwh, self.name(), "tdp_estimation", &self.host, duration))
    }
}

/// Build the configured provider. `None` means emissions are not measured.
pub fn select_provider(config: &EnergyConfig) -> Option<Box<dyn EnergyProvider>> {
    match config.provider {
        EnergyProviderKind::None => None,
        EnergyProviderKind::Tdp => Some(Box::new(TdpProvider::new(config))),
        EnergyProviderKind::Rapl => match RaplProvider::discover(config) {
            Ok(provider) => Some(Box::new(provider)),
            Err(e) => {
                tracing::warn!(error = %e, "RAPL unavailable, emissions will not be recorded");
                None
            }
        },
        EnergyProviderKind::Auto => match RaplProvider::discover(config) {
            Ok(provider) => Some(Box::new(provider)),
            Err(e) => {
                tracing::info!(error = %e, "RAPL unavailable, falling back to TDP estimation");
                Some(Box::new(TdpProvider::new(config)))
            }
        },
    }
}

/// What the tracker hands back once a session is closed.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionsOutcome {
    pub reading: Option<EnergyReading>,
    /// Idle time added after the load phase; never part of throughput.
    pub padding: Duration,
    /// Whole session length, padding included.
    pub measured_duration: Duration,
    pub reliability: Reliability,
}

/// Adapter that brackets a load phase with an energy provider session.
pub struct EmissionsTracker {
    provider: Option<Box<dyn EnergyProvider>>,
    session_start: Option<Instant>,
    provider_active: bool,
}

impl EmissionsTracker {
    pub fn new(provider: Option<Box<dyn EnergyProvider>>) -> Self {
        Self {
            provider,
            session_start: None,
            provider_active: false,
        }
    }

    pub fn provider_name(&self) -> Option<&'static str> {
        self.provider.as_ref().map(|p| p.name())
    }

    /// Open a session. Provider errors are logged and the session continues
    /// without energy figures.
    pub fn begin(&mut self) {
        self.session_start = Some(Instant::now());
        self.provider_active = match self.provider.as_mut() {
            Some(provider) => match provider.begin() {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Energy provider failed to start");
                    false
                }
            },
            None => false,
        };
    }

    /// Pad the session up to `min_duration` (measured against the load phase
    /// alone), then close it and capture the provider's reading.
    pub async fn finish(
        &mut self,
        load_duration: Duration,
        min_duration: Option<Duration>,
    ) -> EmissionsOutcome {
        let padding = min_duration
            .map(|min| min.saturating_sub(load_duration))
            .unwrap_or(Duration::ZERO);
        if !padding.is_zero() {
            tracing::info!(
                padding_secs = padding.as_secs_f64(),
                "Padding energy session to minimum duration"
            );
            tokio::time::sleep(padding).await;
        }

        let measured_duration = self
            .session_start
            .take()
            .map(|start| start.elapsed())
            .unwrap_or(load_duration + padding);

        let reading = match (self.provider.as_mut(), self.provider_active) {
            (Some(provider), true) => match provider.end() {
                Ok(reading) => Some(reading),
                Err(e) => {
                    tracing::warn!(provider = provider.name(), error = %e, "Energy provider failed to stop");
                    None
                }
            },
            _ => None,
        };
        self.provider_active = false;

        EmissionsOutcome {
            reading,
            padding,
            measured_duration,
            reliability: Reliability::classify(measured_duration),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BenchError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn energy_config(root: &Path) -> EnergyConfig {
        EnergyConfig {
            provider: EnergyProviderKind::Rapl,
            carbon_intensity_g_per_kwh: 500.0,
            country_iso_code: Some("LKA".to_string()),
            cpu_tdp_watts: 65.0,
            rapl_root: root.to_path_buf(),
        }
    }

    fn write_zone(root: &Path, name: &str, energy: u64, max: u64) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("energy_uj"), format!("{}\n", energy)).unwrap();
        fs::write(dir.join("max_energy_range_uj"), format!("{}\n", max)).unwrap();
    }

    struct CountingProvider {
        ends: Arc<AtomicU32>,
        fail_begin: bool,
    }

    impl EnergyProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn begin(&mut self) -> BenchResult<()> {
            if self.fail_begin {
                return Err(EnergyError::CountersUnavailable {
                    path: PathBuf::from("/nowhere"),
                }
                .into());
            }
            Ok(())
        }

        fn end(&mut self) -> BenchResult<EnergyReading> {
            self.ends.fetch_add(1, Ordering::SeqCst);
            let carbon = CarbonContext {
                intensity_g_per_kwh: 400.0,
                country_iso_code: None,
            };
            let host = HostDescriptor {
                cpu_model: None,
                cpu_count: Some(4),
                ram_total_gb: None,
            };
            Ok(carbon.reading(0.001, "counting", "fixed", &host, Duration::from_secs(1)))
        }
    }

    #[test]
    fn test_counter_delta_wraps() {
        assert_eq!(counter_delta(100, 250, Some(1_000)), 150);
        assert_eq!(counter_delta(900, 100, Some(1_000)), 200);
        assert_eq!(counter_delta(900, 100, None), 100);
    }

    #[test]
    fn test_discover_only_package_zones() {
        let temp_dir = TempDir::new().unwrap();
        write_zone(temp_dir.path(), "intel-rapl:0", 1_000, 10_000);
        write_zone(temp_dir.path(), "intel-rapl:0:0", 500, 10_000);
        write_zone(temp_dir.path(), "intel-rapl:1", 2_000, 10_000);

        let zones = discover_zones(temp_dir.path()).unwrap();
        assert_eq!(zones.len(), 2);
        assert!(zones.iter().all(|z| z.max_range_uj == Some(10_000)));
    }

    #[test]
    fn test_discover_empty_root_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let result = RaplProvider::discover(&energy_config(temp_dir.path()));
        assert!(matches!(
            result,
            Err(BenchError::Energy(EnergyError::CountersUnavailable { .. }))
        ));
    }

    #[test]
    fn test_rapl_reading_converts_to_grams() {
        let temp_dir = TempDir::new().unwrap();
        write_zone(temp_dir.path(), "intel-rapl:0", 1_000_000, u64::MAX);
        let mut provider = RaplProvider::discover(&energy_config(temp_dir.path())).unwrap();

        provider.begin().unwrap();
        // 3.6e9 uJ = 1 Wh = 0.001 kWh
        write_zone(temp_dir.path(), "intel-rapl:0", 1_000_000 + 3_600_000_000, u64::MAX);
        let reading = provider.end().unwrap();

        assert!((reading.energy_kwh - 0.001).abs() < 1e-12);
        assert!((reading.emissions_grams - 0.5).abs() < 1e-9);
        assert_eq!(reading.metadata.provider, "rapl");
        assert_eq!(reading.metadata.tracking_mode, "machine");
        assert_eq!(reading.metadata.country_iso_code.as_deref(), Some("LKA"));
    }

    #[test]
    fn test_rapl_vanished_counter_is_energy_error() {
        let temp_dir = TempDir::new().unwrap();
        write_zone(temp_dir.path(), "intel-rapl:0", 1_000, 10_000);
        write_zone(temp_dir.path(), "intel-rapl:1", 2_000, 10_000);
        let mut provider = RaplProvider::discover(&energy_config(temp_dir.path())).unwrap();

        provider.begin().unwrap();
        fs::remove_file(temp_dir.path().join("intel-rapl:1").join("energy_uj")).unwrap();
        assert!(matches!(
            provider.end(),
            Err(BenchError::Energy(EnergyError::CounterRead { .. }))
        ));
    }

    #[test]
    fn test_rapl_end_without_begin() {
        let temp_dir = TempDir::new().unwrap();
        write_zone(temp_dir.path(), "intel-rapl:0", 1, 10);
        let mut provider = RaplProvider::discover(&energy_config(temp_dir.path())).unwrap();
        assert!(matches!(
            provider.end(),
            Err(BenchError::Energy(EnergyError::NotStarted))
        ));
    }

    #[test]
    fn test_select_provider_modes() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = energy_config(temp_dir.path());

        config.provider = EnergyProviderKind::None;
        assert!(select_provider(&config).is_none());

        config.provider = EnergyProviderKind::Rapl;
        assert!(select_provider(&config).is_none());

        config.provider = EnergyProviderKind::Auto;
        assert_eq!(select_provider(&config).map(|p| p.name()), Some("tdp"));

        write_zone(temp_dir.path(), "intel-rapl:0", 1, 10);
        assert_eq!(select_provider(&config).map(|p| p.name()), Some("rapl"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_padding_to_minimum_duration() {
        let ends = Arc::new(AtomicU32::new(0));
        let mut tracker = EmissionsTracker::new(Some(Box::new(CountingProvider {
            ends: ends.clone(),
            fail_begin: false,
        })));

        tracker.begin();
        let load_start = Instant::now();
        tokio::time::sleep(Duration::from_secs(2)).await;
        let load_duration = load_start.elapsed();

        let outcome = tracker
            .finish(load_duration, Some(Duration::from_secs(15)))
            .await;

        assert!((outcome.padding.as_secs_f64() - 13.0).abs() < 1.0);
        assert!(outcome.measured_duration >= Duration::from_secs(15));
        assert_eq!(outcome.reliability, Reliability::Reliable);
        assert!(outcome.reading.is_some());
        assert_eq!(ends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_padding_when_load_is_long_enough() {
        let mut tracker = EmissionsTracker::new(None);
        tracker.begin();
        tokio::time::sleep(Duration::from_secs(20)).await;

        let outcome = tracker
            .finish(Duration::from_secs(20), Some(Duration::from_secs(15)))
            .await;
        assert_eq!(outcome.padding, Duration::ZERO);
        assert!(outcome.reading.is_none());
        assert_eq!(outcome.reliability, Reliability::Reliable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_unpadded_session_is_unreliable() {
        let mut tracker = EmissionsTracker::new(None);
        tracker.begin();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let outcome = tracker.finish(Duration::from_secs(2), None).await;
        assert_eq!(outcome.padding, Duration::ZERO);
        assert_eq!(outcome.reliability, Reliability::Unreliable);
    }

    #[tokio::test]
    async fn test_failed_provider_start_yields_no_reading() {
        let ends = Arc::new(AtomicU32::new(0));
        let mut tracker = EmissionsTracker::new(Some(Box::new(CountingProvider {
            ends: ends.clone(),
            fail_begin: true,
        })));

        tracker.begin();
        let outcome = tracker.finish(Duration::from_millis(5), None).await;
        assert!(outcome.reading.is_none());
        assert_eq!(ends.load(Ordering::SeqCst), 0);
    }
}
