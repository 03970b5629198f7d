// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Carbonbench CLI
//!
//! Command-line interface for running carbon footprint benchmarks against
//! web frameworks and comparing the results statistically.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

mod commands;
mod summary;

/// Carbonbench - energy and performance benchmarking for web frameworks
#[derive(Parser)]
#[command(name = "carbonbench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "carbonbench.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a single test configuration
    Run {
        /// Target id from the configuration
        target: String,

        /// Number of requests in the measured batch
        #[arg(short, long, default_value_t = 100)]
        load: u64,

        /// Endpoint id from the configuration
        #[arg(short, long, default_value = "light")]
        endpoint: String,

        /// Number of repetitions
        #[arg(short, long, default_value_t = 1)]
        runs: u32,

        /// Pad each energy session to at least this many seconds
        #[arg(long, value_parser = parse_seconds)]
        min_duration: Option<Duration>,

        /// Run for this many seconds instead of a fixed request count
        #[arg(short, long, value_parser = parse_seconds, conflicts_with = "load")]
        duration: Option<Duration>,

        /// Concurrent users for a timed run
        #[arg(short, long, default_value_t = 10, requires = "duration")]
        users: usize,
    },

    /// Run the full round-robin suite
    Suite {
        /// Number of repetitions of every configuration
        #[arg(short, long, default_value_t = 1)]
        runs: u32,

        /// Pad each energy session to at least this many seconds
        #[arg(long, value_parser = parse_seconds)]
        min_duration: Option<Duration>,

        /// Restrict to these targets (repeatable)
        #[arg(short, long)]
        target: Vec<String>,

        /// Restrict to these load levels (repeatable)
        #[arg(short, long)]
        load: Vec<u64>,

        /// Restrict to these endpoints (repeatable)
        #[arg(short, long)]
        endpoint: Vec<String>,
    },

    /// Analyze persisted results and write the comparison report
    Analyze {
        /// Results directory (defaults to the configured one)
        #[arg(long)]
        results_dir: Option<PathBuf>,

        /// Report path (defaults to REPORT.md in the results directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure startup latency through each target's restart command
    Startup {
        /// Only measure this target
        #[arg(short, long)]
        target: Option<String>,

        /// Restarts per target
        #[arg(short, long, default_value_t = 5)]
        repetitions: u32,
    },

    /// Validate a configuration file
    Validate {
        /// Path to the configuration file (defaults to --config)
        file: Option<String>,
    },
}

fn parse_seconds(value: &str) -> Result<Duration, String> {
    let secs: f64 = value
        .parse()
        .map_err(|e| format!("invalid number of seconds '{}': {}", value, e))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Dispatch to command handlers
    match cli.command {
        Commands::Run {
            target,
            load,
            endpoint,
            runs,
            min_duration,
            duration,
            users,
        } => {
            let batch = match duration {
                Some(duration) => commands::run::Batch::Timed { duration, users },
                None => commands::run::Batch::Requests(load),
            };
            commands::run::execute(&cli.config, &target, &endpoint, batch, runs, min_duration).await
        }
        Commands::Suite {
            runs,
            min_duration,
            target,
            load,
            endpoint,
        } => {
            let filter = commands::suite::SuiteFilter {
                targets: target,
                loads: load,
                endpoints: endpoint,
            };
            commands::suite::execute(&cli.config, runs, min_duration, filter).await
        }
        Commands::Analyze {
            results_dir,
            output,
        } => commands::analyze::execute(&cli.config, results_dir, output).await,
        Commands::Startup {
            target,
            repetitions,
        } => commands::startup::execute(&cli.config, target.as_deref(), repetitions).await,
        Commands::Validate { file } => {
            commands::validate::execute(file.as_deref().unwrap_or(&cli.config)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_seconds("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_seconds("2.5").unwrap(), Duration::from_millis(2500));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("soon").is_err());
    }

    #[test]
    fn test_cli_parses_suite_filters() {
        let cli = Cli::try_parse_from([
            "carbonbench",
            "suite",
            "--runs",
            "5",
            "--min-duration",
            "15",
            "--target",
            "gin",
            "--target",
            "chi",
            "--load",
            "1000",
        ])
        .unwrap();

        match cli.command {
            Commands::Suite {
                runs,
                min_duration,
                target,
                load,
                endpoint,
            } => {
                assert_eq!(runs, 5);
                assert_eq!(min_duration, Some(Duration::from_secs(15)));
                assert_eq!(target, vec!["gin", "chi"]);
                assert_eq!(load, vec![1000]);
                assert!(endpoint.is_empty());
            }
            _ => panic!("expected suite command"),
        }
    }

    #[test]
    fn test_cli_run_defaults() {
        let cli = Cli::try_parse_from(["carbonbench", "run", "gin"]).unwrap();
        assert_eq!(cli.config, "carbonbench.yaml");
        match cli.command {
            Commands::Run {
                target,
                load,
                endpoint,
                runs,
                min_duration,
                duration,
                users,
            } => {
                assert_eq!(target, "gin");
                assert_eq!(load, 100);
                assert_eq!(endpoint, "light");
                assert_eq!(runs, 1);
                assert!(min_duration.is_none());
                assert!(duration.is_none());
                assert_eq!(users, 10);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_cli_timed_run() {
        let cli = Cli::try_parse_from([
            "carbonbench",
            "run",
            "fastapi",
            "--duration",
            "60",
            "--users",
            "50",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { duration, users, .. } => {
                assert_eq!(duration, Some(Duration::from_secs(60)));
                assert_eq!(users, 50);
            }
            _ => panic!("expected run command"),
        }

        assert!(
            Cli::try_parse_from(["carbonbench", "run", "gin", "--load", "1000", "--duration", "5"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["carbonbench", "run", "gin", "--users", "5"]).is_err());
    }
}
