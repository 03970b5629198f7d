// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

use std::path::PathBuf;

use thiserror::Error;

pub mod analyze;
pub mod run;
pub mod startup;
pub mod suite;
pub mod validate;

/// Failures that only exist at the command surface.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("No test results found in {0}")]
    NoResults(PathBuf),

    #[error("Nothing to run: {0}")]
    EmptySelection(&'static str),

    #[error("{failed} of {total} configurations failed")]
    ConfigurationsFailed { failed: usize, total: usize },
}
