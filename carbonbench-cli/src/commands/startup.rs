// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `carbonbench startup` command - Measure restart-to-healthy latency.

use carbonbench_core::load::LoadSettings;
use carbonbench_core::startup::{measure_target, StartupReport, StartupSettings};
use carbonbench_core::{ConfigLoader, LoadDriver, ResultStore, TargetConfig};

use super::CommandError;
use crate::summary;

pub async fn execute(
    config_path: &str,
    target: Option<&str>,
    repetitions: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if repetitions == 0 {
        return Err(CommandError::EmptySelection("--repetitions must be at least 1").into());
    }

    let config = ConfigLoader::load_file(config_path)?;
    let selected: Vec<&TargetConfig> = match target {
        Some(id) => vec![config.target(id)?],
        None => config.targets.iter().collect(),
    };

    let settings = StartupSettings {
        repetitions,
        health_path: config.orchestrator.health_path.clone(),
        ..StartupSettings::default()
    };
    let driver = LoadDriver::new(LoadSettings::from(&config.orchestrator))?;

    let mut measurements = Vec::with_capacity(selected.len());
    for target in selected {
        if target.restart_command.is_empty() {
            tracing::warn!(target = %target.id, "No restart_command configured, skipping");
            continue;
        }
        println!("Measuring startup of {} ({} restarts)...", target.name, repetitions);
        measurements.push(measure_target(&driver, target, &settings).await?);
    }

    if measurements.is_empty() {
        return Err(CommandError::EmptySelection("no selected target has a restart_command").into());
    }

    let report = StartupReport::new(measurements);
    let store = ResultStore::new(&config.orchestrator.results_dir)?;
    let path = store.save_startup(&report)?;

    summary::print_startup(&report);
    println!();
    println!("✓ Startup report saved to {}", path.display());
    Ok(())
}
