// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Human-readable console summaries.

use carbonbench_core::metrics::format_ms;
use carbonbench_core::startup::StartupReport;
use carbonbench_core::{SuiteResult, TestResult};

const RULE: &str = "================================================================================";

fn grams(value: Option<f64>, unit: &str) -> String {
    value
        .map(|v| format!("{:.4}{} CO2eq", v, unit))
        .unwrap_or_else(|| "not measured".to_string())
}

/// Print one test's figures.
pub fn print_result(result: &TestResult) {
    let stats = &result.response_time_stats;

    println!("{}", RULE);
    println!("TEST SUMMARY");
    println!("{}", RULE);
    println!("Framework:              {}", result.target_name);
    match result.timed_load {
        Some(timed) => println!(
            "Load:                   {} requests ({:.0}s with {} users)",
            result.request_count, timed.target_duration_seconds, timed.users
        ),
        None => println!("Load:                   {} requests", result.request_count),
    }
    println!("Endpoint:               {} ({})", result.endpoint, result.endpoint_path);
    println!("Run:                    {}", result.run_index);
    println!("Duration:               {:.2}s", result.duration_seconds);
    if result.padding_seconds > 0.0 {
        println!("Padding:                {:.2}s", result.padding_seconds);
    }
    println!("Requests/sec:           {:.2}", result.requests_per_second);
    println!();
    println!(
        "Success:                {} ({:.2}%)",
        result.success_count, result.success_rate
    );
    println!("Errors:                 {}", result.error_count);
    println!();
    println!("Carbon Emissions:");
    println!("  Total:                {}", grams(result.emissions_grams, "g"));
    println!(
        "  Per Request:          {}",
        grams(result.emissions_per_request_mg, "mg")
    );
    println!("  Reliability:          {}", result.reliability_classification);
    println!();
    println!("Response Times:");
    println!("  Min:                  {}", format_ms(stats.min_ms));
    println!("  Mean:                 {}", format_ms(stats.mean_ms));
    println!("  Median:               {}", format_ms(stats.median_ms));
    println!("  P95:                  {}", format_ms(stats.p95_ms));
    println!("  P99:                  {}", format_ms(stats.p99_ms));
    println!("  Max:                  {}", format_ms(stats.max_ms));
    if result.container_metrics.sample_count > 0 {
        let m = &result.container_metrics;
        println!();
        println!("Resources ({} samples):", m.sample_count);
        println!(
            "  CPU avg/peak:         {:.1}% / {:.1}%",
            m.avg_cpu.unwrap_or(0.0),
            m.peak_cpu.unwrap_or(0.0)
        );
        println!(
            "  Memory avg/peak:      {:.1}MB / {:.1}MB",
            m.avg_mem.unwrap_or(0.0),
            m.peak_mem.unwrap_or(0.0)
        );
    }
    println!("{}", RULE);
}

/// Print the outcome of a whole plan.
pub fn print_suite(suite: &SuiteResult) {
    println!();
    println!("{}", RULE);
    println!(
        "Completed: {}   Failed: {}",
        suite.results.len(),
        suite.failed.len()
    );
    for failure in &suite.failed {
        println!("  ✗ {}: {}", failure.key, failure.reason);
    }
    println!("{}", RULE);
}

/// Print a startup latency table.
pub fn print_startup(report: &StartupReport) {
    println!();
    println!(
        "{:<16} {:>8} {:>12} {:>12} {:>12} {:>12} {:>9}",
        "Framework", "Samples", "Mean", "Min", "Max", "Std Dev", "Failures"
    );
    println!("{}", "-".repeat(87));
    for m in &report.targets {
        println!(
            "{:<16} {:>8} {:>12} {:>12} {:>12} {:>12} {:>9}",
            m.target_name,
            m.samples_ms.len(),
            format_ms(m.mean_ms),
            format_ms(m.min_ms),
            format_ms(m.max_ms),
            format_ms(m.std_dev_ms),
            m.failures
        );
    }
}
