// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Append-only JSON artifact store.
//!
//! Every artifact is written to a temporary file in the results directory,
//! synced, then renamed onto a fresh timestamped name with a rename that
//! refuses to replace an existing file. A crash mid-write leaves at most a
//! stray temporary file; existing artifacts are never opened for writing.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::StorageError;
use crate::metrics::{SuiteResult, TestResult};
use crate::startup::StartupReport;
use crate::types::ConfigurationKey;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

/// Outcome of scanning the results directory for analysis.
#[derive(Debug, Default)]
pub struct LoadedResults {
    /// One result per configuration key, ordered by key.
    pub results: Vec<TestResult>,
    /// Suite and startup aggregates that were not counted.
    pub skipped_aggregates: usize,
    /// Older artifacts superseded by a newer one with the same key.
    pub duplicates_dropped: usize,
    /// Files that could not be read or parsed.
    pub unreadable: Vec<PathBuf>,
}

/// JSON artifact store rooted at a results directory.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    /// Open a store, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StorageError::DirectoryCreation {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one test result.
    pub fn save_result(&self, result: &TestResult) -> Result<PathBuf, StorageError> {
        let stem = format!(
            "{}_{}_{}_run{}_{}",
            result.target,
            result.endpoint,
            result.request_count,
            result.run_index,
            result.timestamp.format(TIMESTAMP_FORMAT)
        );
        self.write_json(&stem, result)
    }

    /// Persist the advisory suite aggregate.
    pub fn save_suite(&self, suite: &SuiteResult) -> Result<PathBuf, StorageError> {
        let stem = format!("suite_{}", suite.finished_at.format(TIMESTAMP_FORMAT));
        self.write_json(&stem, suite)
    }

    /// Persist a startup latency report.
    pub fn save_startup(&self, report: &StartupReport) -> Result<PathBuf, StorageError> {
        let stem = format!("startup_{}", report.timestamp.format(TIMESTAMP_FORMAT));
        self.write_json(&stem, report)
    }

    /// List all JSON artifacts, sorted by file name.
    pub fn list_artifacts(&self) -> Result<Vec<PathBuf>, StorageError> {
        let read_err = |source| StorageError::Read {
            path: self.dir.clone(),
            source,
        };

        let mut artifacts = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(read_err)? {
            let path = entry.map_err(read_err)?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                artifacts.push(path);
            }
        }
        artifacts.sort();
        Ok(artifacts)
    }

    /// Load every individual test result, ignoring aggregates and keeping
    /// only the newest artifact per configuration key.
    pub fn load_results(&self) -> Result<LoadedResults, StorageError> {
        let mut loaded = LoadedResults::default();
        let mut by_key: BTreeMap<ConfigurationKey, TestResult> = BTreeMap::new();

        for path in self.list_artifacts()? {
            let value = match read_json(&path) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable artifact");
                    loaded.unreadable.push(path);
                    continue;
                }
            };

            if is_aggregate(&value) {
                tracing::debug!(path = %path.display(), "Skipping aggregate artifact");
                loaded.skipped_aggregates += 1;
                continue;
            }

            let result: TestResult = match serde_json::from_value(value) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Artifact is not a test result");
                    loaded.unreadable.push(path);
                    continue;
                }
            };

            match by_key.entry(result.key()) {
                Entry::Vacant(slot) => {
                    slot.insert(result);
                }
                Entry::Occupied(mut slot) => {
                    tracing::warn!(
                        key = %slot.key(),
                        path = %path.display(),
                        "Duplicate configuration key, keeping the newest artifact"
                    );
                    loaded.duplicates_dropped += 1;
                    if result.timestamp > slot.get().timestamp {
                        slot.insert(result);
                    }
                }
            }
        }

        loaded.results = by_key.into_values().collect();
        Ok(loaded)
    }

    fn write_json<T: Serialize>(&self, stem: &str, value: &T) -> Result<PathBuf, StorageError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let mut staged = stage(&self.dir, &bytes)?;

        // The rename refuses to replace an existing file, so a name taken
        // between attempts moves on to the next suffix instead.
        let mut suffix = 0;
        loop {
            let candidate = self.candidate_path(stem, suffix);
            match staged.persist_noclobber(&candidate) {
                Ok(_) => return Ok(candidate),
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    staged = e.file;
                    suffix += 1;
                }
                Err(e) => {
                    return Err(StorageError::Write {
                        path: candidate,
                        source: e.error,
                    })
                }
            }
        }
    }

    fn candidate_path(&self, stem: &str, suffix: u32) -> PathBuf {
        match suffix {
            0 => self.dir.join(format!("{}.json", stem)),
            n => self.dir.join(format!("{}_{}.json", stem, n)),
        }
    }
}

/// Write `bytes` to a synced temporary file in `dir`.
fn stage(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, StorageError> {
    let write_err = |source| StorageError::Write {
        path: dir.to_path_buf(),
        source,
    };

    let mut staged = tempfile::Builder::new()
        .prefix(".carbonbench-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    staged.write_all(bytes).map_err(write_err)?;
    staged.as_file().sync_all().map_err(write_err)?;
    Ok(staged)
}

/// Replace `path` with `bytes` via a synced temporary file and a rename.
///
/// Used for derived files such as the report; artifacts go through the
/// store, which never replaces an existing file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    stage(dir, bytes)?
        .persist(path)
        .map_err(|e| StorageError::Write {
            path: path.to_path_buf(),
            source: e.error,
        })?;
    Ok(())
}

fn read_json(path: &Path) -> Result<serde_json::Value, StorageError> {
    let file = File::open(path).map_err(|source| StorageError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
}

/// Suite/startup artifacts carry `kind`; legacy aggregates are bare arrays.
fn is_aggregate(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Array(_) => true,
        serde_json::Value::Object(map) => map.contains_key("kind"),
        _ => false,
    }
}
