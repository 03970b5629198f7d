// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `carbonbench run` command - Run one configuration, possibly repeated.

use std::time::Duration;

use carbonbench_core::{
    ConfigLoader, ConfigurationOutcome, EndpointId, Orchestrator, RequestCount, ResultStore,
    RoundRobinPlan, RunIndex, TargetId,
};

use super::CommandError;
use crate::summary;

/// How each measured batch is bounded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Batch {
    Requests(u64),
    Timed { duration: Duration, users: usize },
}

pub async fn execute(
    config_path: &str,
    target: &str,
    endpoint: &str,
    batch: Batch,
    runs: u32,
    min_duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;
    let target_id = config.target(target)?.id.clone();
    let endpoint_id = config.endpoint(endpoint)?.id.clone();

    if runs == 0 {
        return Err(CommandError::EmptySelection("--runs must be at least 1").into());
    }

    let store = ResultStore::new(&config.orchestrator.results_dir)?;
    let min_duration = min_duration.or(config.orchestrator.min_duration);
    let cooldown = config.orchestrator.cooldown;
    let mut orchestrator = Orchestrator::new(config, store)?.with_min_duration(min_duration);

    match batch {
        Batch::Requests(load) => run_counted(&mut orchestrator, target_id, endpoint_id, load, runs).await,
        Batch::Timed { duration, users } => {
            run_timed(&mut orchestrator, &target_id, &endpoint_id, duration, users, runs, cooldown).await
        }
    }
}

async fn run_counted(
    orchestrator: &mut Orchestrator,
    target_id: TargetId,
    endpoint_id: EndpointId,
    load: u64,
    runs: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    let load = RequestCount::new(load)?;
    tracing::info!(
        target = %target_id,
        endpoint = %endpoint_id,
        load = load.value(),
        runs,
        "Running test"
    );

    let plan = RoundRobinPlan::new(vec![target_id], vec![load], vec![endpoint_id], runs);
    let suite = orchestrator.run_plan(plan).await;

    for result in &suite.results {
        summary::print_result(result);
    }
    summary::print_suite(&suite);

    if suite.results.is_empty() {
        return Err(CommandError::ConfigurationsFailed {
            failed: suite.failed.len(),
            total: runs as usize,
        }
        .into());
    }
    Ok(())
}

async fn run_timed(
    orchestrator: &mut Orchestrator,
    target_id: &TargetId,
    endpoint_id: &EndpointId,
    duration: Duration,
    users: usize,
    runs: u32,
    cooldown: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    if duration.is_zero() || users == 0 {
        return Err(CommandError::EmptySelection("--duration and --users must be positive").into());
    }
    tracing::info!(
        target = %target_id,
        endpoint = %endpoint_id,
        duration_secs = duration.as_secs_f64(),
        users,
        runs,
        "Running timed test"
    );

    let mut completed = 0;
    let mut previous_measured = false;
    for run in 1..=runs {
        if previous_measured && !cooldown.is_zero() {
            tokio::time::sleep(cooldown).await;
        }
        let outcome = orchestrator
            .run_timed(target_id, endpoint_id, RunIndex::new(run)?, duration, users)
            .await?;
        previous_measured = outcome.result().is_some();

        match outcome {
            ConfigurationOutcome::Completed { result, path } => {
                summary::print_result(&result);
                println!("Saved to {}", path.display());
                completed += 1;
            }
            ConfigurationOutcome::PersistFailed { result, error } => {
                summary::print_result(&result);
                eprintln!("✗ Run {}: result not saved: {}", run, error);
            }
            ConfigurationOutcome::Unhealthy { reason } => {
                eprintln!("✗ Run {}: {}", run, reason);
            }
        }
    }

    if completed == 0 {
        return Err(CommandError::ConfigurationsFailed {
            failed: runs as usize,
            total: runs as usize,
        }
        .into());
    }
    Ok(())
}
