// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Execution order of a suite.
//!
//! Configurations are interleaved by run index: every (target, load, endpoint)
//! combination runs once for run 1 before any of them runs for run 2. Drift
//! over the course of a suite (thermal state, background load) is therefore
//! spread across all configurations instead of landing on one of them.

use crate::types::{EndpointId, RequestCount, RunIndex, TargetId, TestConfiguration};

/// Round-robin sequence over targets × loads × endpoints × runs.
#[derive(Debug, Clone)]
pub struct RoundRobinPlan {
    targets: Vec<TargetId>,
    loads: Vec<RequestCount>,
    endpoints: Vec<EndpointId>,
    runs: u32,
    position: usize,
}

impl RoundRobinPlan {
    pub fn new(
        targets: Vec<TargetId>,
        loads: Vec<RequestCount>,
        endpoints: Vec<EndpointId>,
        runs: u32,
    ) -> Self {
        Self {
            targets,
            loads,
            endpoints,
            runs,
            position: 0,
        }
    }

    fn per_run(&self) -> usize {
        self.targets.len() * self.loads.len() * self.endpoints.len()
    }

    fn total(&self) -> usize {
        self.per_run() * self.runs as usize
    }

    fn configuration_at(&self, position: usize) -> Option<TestConfiguration> {
        let per_run = self.per_run();
        if per_run == 0 || position >= self.total() {
            return None;
        }

        let run = (position / per_run) as u32 + 1;
        let within = position % per_run;
        let per_target = self.loads.len() * self.endpoints.len();
        let target = &self.targets[within / per_target];
        let load = self.loads[(within % per_target) / self.endpoints.len()];
        let endpoint = &self.endpoints[within % self.endpoints.len()];

        Some(TestConfiguration {
            target: target.clone(),
            request_count: load,
            endpoint: endpoint.clone(),
            run_index: RunIndex::new(run).ok()?,
        })
    }
}

impl Iterator for RoundRobinPlan {
    type Item = TestConfiguration;

    fn next(&mut self) -> Option<Self::Item> {
        let configuration = self.configuration_at(self.position)?;
        self.position += 1;
        Some(configuration)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.total().saturating_sub(self.position);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RoundRobinPlan {}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(ids: &[&str]) -> Vec<TargetId> {
        ids.iter().map(|id| TargetId::new(*id).unwrap()).collect()
    }

    fn endpoints(ids: &[&str]) -> Vec<EndpointId> {
        ids.iter().map(|id| EndpointId::new(*id).unwrap()).collect()
    }

    fn loads(counts: &[u64]) -> Vec<RequestCount> {
        counts.iter().map(|c| RequestCount::new(*c).unwrap()).collect()
    }

    #[test]
    fn test_len_is_cartesian_product() {
        let plan = RoundRobinPlan::new(
            targets(&["gin", "fastapi", "actix"]),
            loads(&[100, 1000]),
            endpoints(&["light", "heavy"]),
            5,
        );
        assert_eq!(plan.len(), 60);
        assert_eq!(plan.count(), 60);
    }

    #[test]
    fn test_run_major_order() {
        let plan = RoundRobinPlan::new(
            targets(&["a", "b"]),
            loads(&[100]),
            endpoints(&["light"]),
            3,
        );
        let order: Vec<String> = plan.map(|c| c.to_string()).collect();
        assert_eq!(
            order,
            vec![
                "a/light/100#1",
                "b/light/100#1",
                "a/light/100#2",
                "b/light/100#2",
                "a/light/100#3",
                "b/light/100#3",
            ]
        );
    }

    #[test]
    fn test_inner_order_targets_loads_endpoints() {
        let plan = RoundRobinPlan::new(
            targets(&["a", "b"]),
            loads(&[10, 20]),
            endpoints(&["x", "y"]),
            1,
        );
        let order: Vec<(String, u64, String)> = plan
            .map(|c| {
                (
                    c.target.to_string(),
                    c.request_count.value(),
                    c.endpoint.to_string(),
                )
            })
            .collect();
        assert_eq!(order[0], ("a".to_string(), 10, "x".to_string()));
        assert_eq!(order[1], ("a".to_string(), 10, "y".to_string()));
        assert_eq!(order[2], ("a".to_string(), 20, "x".to_string()));
        assert_eq!(order[4], ("b".to_string(), 10, "x".to_string()));
        assert_eq!(order[7], ("b".to_string(), 20, "y".to_string()));
    }

    #[test]
    fn test_every_run_completes_before_next() {
        let plan = RoundRobinPlan::new(
            targets(&["a", "b", "c"]),
            loads(&[1, 2]),
            endpoints(&["x"]),
            4,
        );
        let runs: Vec<u32> = plan.map(|c| c.run_index.value()).collect();
        assert!(runs.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(runs.iter().filter(|r| **r == 1).count(), 6);
    }

    #[test]
    fn test_empty_dimension_yields_nothing() {
        let mut plan = RoundRobinPlan::new(targets(&["a"]), Vec::new(), endpoints(&["x"]), 3);
        assert_eq!(plan.len(), 0);
        assert!(plan.next().is_none());

        let mut plan = RoundRobinPlan::new(targets(&["a"]), loads(&[1]), endpoints(&["x"]), 0);
        assert!(plan.next().is_none());
    }

    #[test]
    fn test_size_hint_shrinks() {
        let mut plan = RoundRobinPlan::new(targets(&["a"]), loads(&[1]), endpoints(&["x"]), 2);
        assert_eq!(plan.len(), 2);
        plan.next();
        assert_eq!(plan.len(), 1);
        plan.next();
        assert_eq!(plan.len(), 0);
    }
}
