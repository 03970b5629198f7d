//! Custom error types for carbonbench.
//!
//! Explicit enum error types throughout the library. No `Box<dyn Error>`,
//! no `anyhow::Result`; the CLI is the only place errors are type-erased.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for the benchmark engine.
#[derive(Debug, Error)]
pub enum BenchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    #[error("Unknown target: {0}")]
    UnknownTarget(String),

    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),

    // =========================================================================
    // Measurement Errors - Logged and Tolerated by the Orchestrator
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Metrics source error for '{instance}': {reason}")]
    MetricsSource { instance: String, reason: String },

    #[error("Energy provider error: {0}")]
    Energy(#[from] EnergyError),

    #[error("External command '{program}' failed: {reason}")]
    Command { program: String, reason: String },

    // =========================================================================
    // Persistence Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors abort before any measurement starts.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Duplicate {kind} ID: {id}")]
    DuplicateId { kind: &'static str, id: String },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Energy measurement provider failures.
#[derive(Debug, Error)]
pub enum EnergyError {
    #[error("No energy counters found under {path}")]
    CountersUnavailable { path: PathBuf },

    #[error("Failed to read energy counter {path}: {reason}")]
    CounterRead { path: PathBuf, reason: String },

    #[error("Energy session was not started")]
    NotStarted,

    #[error("Energy session is already running")]
    AlreadyStarted,
}

/// Artifact persistence errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to create results directory {path}: {source}")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read artifact {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize artifact: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "base_url",
            context: "target 'fastapi'".to_string(),
        };
        assert!(err.to_string().contains("base_url"));
        assert!(err.to_string().contains("fastapi"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::DuplicateId {
            kind: "target",
            id: "gin".to_string(),
        };
        let bench_err: BenchError = validation_err.into();
        assert!(matches!(bench_err, BenchError::HardValidation(_)));

        let energy_err: BenchError = EnergyError::NotStarted.into();
        assert!(matches!(energy_err, BenchError::Energy(EnergyError::NotStarted)));
    }
}
