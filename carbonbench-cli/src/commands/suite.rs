// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `carbonbench suite` command - Run every configuration round-robin.

use std::time::Duration;

use carbonbench_core::{
    BenchResult, Config, ConfigLoader, EndpointId, Orchestrator, RequestCount, ResultStore,
    RoundRobinPlan, TargetId,
};

use super::CommandError;
use crate::summary;

/// Optional restrictions on the configured suite. Empty means "all".
#[derive(Debug, Default)]
pub struct SuiteFilter {
    pub targets: Vec<String>,
    pub loads: Vec<u64>,
    pub endpoints: Vec<String>,
}

impl SuiteFilter {
    fn targets(&self, config: &Config) -> BenchResult<Vec<TargetId>> {
        if self.targets.is_empty() {
            return Ok(config.targets.iter().map(|t| t.id.clone()).collect());
        }
        self.targets
            .iter()
            .map(|id| config.target(id).map(|t| t.id.clone()))
            .collect()
    }

    fn endpoints(&self, config: &Config) -> BenchResult<Vec<EndpointId>> {
        if self.endpoints.is_empty() {
            return Ok(config.endpoints.iter().map(|e| e.id.clone()).collect());
        }
        self.endpoints
            .iter()
            .map(|id| config.endpoint(id).map(|e| e.id.clone()))
            .collect()
    }

    fn loads(&self, config: &Config) -> BenchResult<Vec<RequestCount>> {
        if self.loads.is_empty() {
            return Ok(config.loads.clone());
        }
        Ok(self
            .loads
            .iter()
            .map(|n| RequestCount::new(*n))
            .collect::<Result<Vec<_>, _>>()?)
    }
}

pub async fn execute(
    config_path: &str,
    runs: u32,
    min_duration: Option<Duration>,
    filter: SuiteFilter,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let targets = filter.targets(&config)?;
    let loads = filter.loads(&config)?;
    let endpoints = filter.endpoints(&config)?;

    let plan = RoundRobinPlan::new(targets.clone(), loads.clone(), endpoints.clone(), runs);
    let total = plan.len();
    if total == 0 {
        return Err(CommandError::EmptySelection("the selection contains no configurations").into());
    }

    let store = ResultStore::new(&config.orchestrator.results_dir)?;
    let min_duration = min_duration.or(config.orchestrator.min_duration);
    let mut orchestrator = Orchestrator::new(config, store)?.with_min_duration(min_duration);

    let join = |items: Vec<String>| items.join(", ");
    println!("COMPREHENSIVE CARBON FOOTPRINT COMPARISON");
    println!("Frameworks: {}", join(targets.iter().map(|t| t.to_string()).collect()));
    println!("Load Sizes: {}", join(loads.iter().map(|l| l.to_string()).collect()));
    println!("Endpoints:  {}", join(endpoints.iter().map(|e| e.to_string()).collect()));
    println!("Runs:       {} ({} tests, round-robin)", runs, total);
    if let Some(min) = min_duration {
        println!("Minimum energy session: {:.1}s", min.as_secs_f64());
    }
    println!();

    let suite = orchestrator.run_plan(plan).await;

    for result in &suite.results {
        summary::print_result(result);
    }
    summary::print_suite(&suite);

    if suite.results.is_empty() {
        return Err(CommandError::ConfigurationsFailed {
            failed: suite.failed.len(),
            total,
        }
        .into());
    }
    Ok(())
}
