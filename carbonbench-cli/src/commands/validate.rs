// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `carbonbench validate` command - Validate configuration file.

use carbonbench_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let orch = &config.orchestrator;
            println!("✓ Configuration is valid");
            println!();
            println!("Orchestrator Settings:");
            println!("  Results Directory:  {}", orch.results_dir.display());
            println!(
                "  Warmup:             {} requests, {}ms settle",
                orch.warmup_requests,
                orch.warmup_settle.as_millis()
            );
            println!(
                "  Health Check:       {} ({} retries, {}ms apart)",
                orch.health_path,
                orch.health_retries,
                orch.health_retry_delay.as_millis()
            );
            println!("  Request Timeout:    {}ms", orch.request_timeout.as_millis());
            println!("  Cooldown:           {}s", orch.cooldown.as_secs());
            println!(
                "  Workers:            up to {} (sequential at or below {} requests)",
                orch.max_workers, orch.sequential_threshold
            );
            println!("  Sample Interval:    {}ms", orch.sample_interval.as_millis());
            match orch.min_duration {
                Some(min) => println!("  Min Duration:       {:.1}s", min.as_secs_f64()),
                None => println!("  Min Duration:       none"),
            }
            println!();
            println!("Energy:");
            println!("  Provider:           {:?}", config.energy.provider);
            println!(
                "  Carbon Intensity:   {} gCO2eq/kWh",
                config.energy.carbon_intensity_g_per_kwh
            );
            println!("  CPU TDP:            {}W", config.energy.cpu_tdp_watts);
            println!("Monitor:              {:?}", config.monitor.source);
            println!();
            println!("Targets ({}):", config.targets.len());
            for target in &config.targets {
                println!(
                    "  - {} [{}] {} (restart: {})",
                    target.id,
                    target.name,
                    target.base_url,
                    if target.restart_command.is_empty() { "no" } else { "yes" }
                );
            }
            println!();
            println!("Endpoints ({}):", config.endpoints.len());
            for endpoint in &config.endpoints {
                println!("  - {} {:?} {}", endpoint.id, endpoint.method, endpoint.path);
            }
            println!();
            let loads: Vec<String> = config.loads.iter().map(|l| l.to_string()).collect();
            println!("Loads: {}", loads.join(", "));
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
