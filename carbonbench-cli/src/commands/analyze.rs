// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `carbonbench analyze` command - Compare persisted results and write the report.

use std::path::{Path, PathBuf};

use carbonbench_core::report::{render_markdown, write_report};
use carbonbench_core::stats::Scope;
use carbonbench_core::{analyze, BenchError, ConfigLoader, LoadSettings, ResultStore};

use super::CommandError;

const DEFAULT_RESULTS_DIR: &str = "test_results";

/// Resolve the results directory (flag, then config, then the default)
/// and the load settings the report describes.
fn resolve_inputs(
    config_path: &str,
    flag: Option<PathBuf>,
) -> Result<(PathBuf, LoadSettings), BenchError> {
    match ConfigLoader::load_file(config_path) {
        Ok(config) => {
            let load = LoadSettings::from(&config.orchestrator);
            Ok((flag.unwrap_or(config.orchestrator.results_dir), load))
        }
        Err(BenchError::ConfigNotFound { .. }) => Ok((
            flag.unwrap_or_else(|| PathBuf::from(DEFAULT_RESULTS_DIR)),
            LoadSettings::default(),
        )),
        Err(e) => Err(e),
    }
}

fn default_report_path(results_dir: &Path) -> PathBuf {
    results_dir.join("REPORT.md")
}

pub async fn execute(
    config_path: &str,
    results_dir: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (results_dir, load_settings) = resolve_inputs(config_path, results_dir)?;
    if !results_dir.is_dir() {
        return Err(CommandError::NoResults(results_dir).into());
    }

    let store = ResultStore::new(&results_dir)?;
    let loaded = store.load_results()?;
    tracing::info!(
        dir = %results_dir.display(),
        results = loaded.results.len(),
        aggregates = loaded.skipped_aggregates,
        duplicates = loaded.duplicates_dropped,
        unreadable = loaded.unreadable.len(),
        "Loaded results"
    );

    if loaded.results.is_empty() {
        return Err(CommandError::NoResults(results_dir).into());
    }

    let analysis = analyze(&loaded.results);
    for warning in &analysis.warnings {
        tracing::warn!("{}", warning);
    }

    let report = render_markdown(&loaded.results, &analysis, &load_settings);
    let output = output.unwrap_or_else(|| default_report_path(&results_dir));
    write_report(&output, &report)?;

    println!("Analyzed {} test results", loaded.results.len());
    println!();
    println!("Overall winners:");
    for winner in analysis.winners_in(&Scope::Pooled) {
        println!(
            "  {:<28} {:<16} {:.4} (runner-up {} {:.4}) {}",
            winner.metric.label(),
            winner.target.as_str(),
            winner.mean,
            winner.runner_up,
            winner.runner_up_mean,
            winner.tag()
        );
    }
    println!();
    println!("✓ Report written to {}", output.display());
    Ok(())
}
