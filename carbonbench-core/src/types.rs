// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! All types validate their invariants at creation time, so a
//! `TestConfiguration` can only ever describe a runnable measurement.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

const MAX_ID_LEN: usize = 64;

fn validate_id(field: &'static str, id: &str) -> Result<(), HardValidationError> {
    if id.is_empty() {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: "Identifier cannot be empty".to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: format!("Identifier too long: {} chars (max {})", id.len(), MAX_ID_LEN),
        });
    }

    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value: id.to_string(),
            reason: "Identifier must contain only alphanumeric characters, hyphens, and underscores"
                .to_string(),
        });
    }

    Ok(())
}

/// Validated identifier of a service under test (e.g. `fastapi`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId(String);

impl TargetId {
    /// Create a new TargetId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();
        validate_id("target", &id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for TargetId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.0
    }
}

/// Validated identifier of a benchmarked endpoint (e.g. `light`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new EndpointId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();
        validate_id("endpoint", &id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EndpointId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EndpointId> for String {
    fn from(id: EndpointId) -> Self {
        id.0
    }
}

/// Number of measured requests in one batch. Must be non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct RequestCount(u64);

impl RequestCount {
    /// Create a new RequestCount with validation.
    pub fn new(count: u64) -> Result<Self, HardValidationError> {
        if count == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "request_count",
                value: "0".to_string(),
                reason: "Request count must be at least 1".to_string(),
            });
        }
        Ok(Self(count))
    }

    /// Get the inner count.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u64> for RequestCount {
    type Error = HardValidationError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RequestCount> for u64 {
    fn from(count: RequestCount) -> Self {
        count.0
    }
}

/// One-based repetition index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RunIndex(u32);

impl RunIndex {
    /// Create a new RunIndex with validation.
    pub fn new(index: u32) -> Result<Self, HardValidationError> {
        if index == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "run_index",
                value: "0".to_string(),
                reason: "Run indices start at 1".to_string(),
            });
        }
        Ok(Self(index))
    }

    /// Get the inner index.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for RunIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for RunIndex {
    type Error = HardValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RunIndex> for u32 {
    fn from(index: RunIndex) -> Self {
        index.0
    }
}

/// Natural key of a single measurement.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigurationKey {
    pub target: TargetId,
    pub request_count: RequestCount,
    pub endpoint: EndpointId,
    pub run_index: RunIndex,
}

impl fmt::Display for ConfigurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}#{}",
            self.target, self.endpoint, self.request_count, self.run_index
        )
    }
}

/// One measurement to perform: a target, a load level, an endpoint, a repetition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestConfiguration {
    pub target: TargetId,
    pub request_count: RequestCount,
    pub endpoint: EndpointId,
    pub run_index: RunIndex,
}

impl TestConfiguration {
    /// The natural key identifying this configuration's artifact.
    pub fn key(&self) -> ConfigurationKey {
        ConfigurationKey {
            target: self.target.clone(),
            request_count: self.request_count,
            endpoint: self.endpoint.clone(),
            run_index: self.run_index,
        }
    }
}

impl fmt::Display for TestConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_id_valid() {
        assert!(TargetId::new("fastapi").is_ok());
        assert!(TargetId::new("spring-boot").is_ok());
        assert!(TargetId::new("chi_v5").is_ok());
    }

    #[test]
    fn test_target_id_invalid() {
        assert!(TargetId::new("").is_err());
        assert!(TargetId::new("a".repeat(65)).is_err());
        assert!(TargetId::new("gin/v1").is_err());
        assert!(TargetId::new("my target").is_err());
    }

    #[test]
    fn test_endpoint_id_invalid() {
        assert!(EndpointId::new("heavy").is_ok());
        assert!(EndpointId::new("../heavy").is_err());
    }

    #[test]
    fn test_request_count_and_run_index() {
        assert!(RequestCount::new(0).is_err());
        assert_eq!(RequestCount::new(100).unwrap().value(), 100);
        assert!(RunIndex::new(0).is_err());
        assert_eq!(RunIndex::new(3).unwrap().value(), 3);
    }

    #[test]
    fn test_serde_rejects_invalid_ids() {
        let parsed: Result<TargetId, _> = serde_json::from_str("\"bad id\"");
        assert!(parsed.is_err());
        let parsed: Result<RequestCount, _> = serde_json::from_str("0");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_configuration_key_display() {
        let config = TestConfiguration {
            target: TargetId::new("gin").unwrap(),
            request_count: RequestCount::new(1000).unwrap(),
            endpoint: EndpointId::new("light").unwrap(),
            run_index: RunIndex::new(2).unwrap(),
        };
        assert_eq!(config.to_string(), "gin/light/1000#2");
        assert_eq!(config.key().run_index.value(), 2);
    }
}
