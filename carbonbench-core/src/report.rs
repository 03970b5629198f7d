// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Markdown comparison report.
//!
//! `render_markdown` is a pure function of its inputs: no clock reads and
//! only ordered collections, so the same results always render the same
//! document.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::StorageError;
use crate::load::LoadSettings;
use crate::metrics::{Reliability, TestResult};
use crate::stats::{Analysis, AnovaRow, Metric, Scope, ALPHA, CONFIDENCE};
use crate::store::write_atomic;
use crate::types::{EndpointId, RequestCount, TargetId};

/// Mean of the values that are present.
fn average<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, n) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn num(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:.*}", precision, v),
        Some(v) if v > 0.0 => "inf".to_string(),
        Some(v) if v < 0.0 => "-inf".to_string(),
        _ => "n/a".to_string(),
    }
}

fn p_value(p: f64) -> String {
    if p < 0.0001 {
        "<0.0001".to_string()
    } else {
        format!("{:.4}", p)
    }
}

/// Per-group averages shared by the summary tables.
struct GroupAverages {
    tests: usize,
    emissions_g: Option<f64>,
    per_request_mg: Option<f64>,
    rps: Option<f64>,
    mean_ms: Option<f64>,
    cpu: Option<f64>,
    mem: Option<f64>,
}

impl GroupAverages {
    fn of(results: &[&TestResult]) -> Self {
        Self {
            tests: results.len(),
            emissions_g: average(results.iter().map(|r| r.emissions_grams)),
            per_request_mg: average(results.iter().map(|r| r.emissions_per_request_mg)),
            rps: average(results.iter().map(|r| Some(r.requests_per_second))),
            mean_ms: average(results.iter().map(|r| r.response_time_stats.mean_ms)),
            cpu: average(results.iter().map(|r| r.container_metrics.avg_cpu)),
            mem: average(results.iter().map(|r| r.container_metrics.avg_mem)),
        }
    }
}

/// Render the full comparison report. `load` is described in the
/// methodology section.
pub fn render_markdown(results: &[TestResult], analysis: &Analysis, load: &LoadSettings) -> String {
    let mut sorted: Vec<&TestResult> = results.iter().collect();
    sorted.sort_by_key(|r| r.key());

    let mut names: BTreeMap<&TargetId, &str> = BTreeMap::new();
    for r in &sorted {
        names.entry(&r.target).or_insert(r.target_name.as_str());
    }

    let mut out = String::new();
    write_header(&mut out, &sorted, analysis);
    write_framework_summary(&mut out, &sorted, &names);
    write_detailed_results(&mut out, &sorted);
    write_load_scaling(&mut out, &sorted, &names);
    write_endpoint_analysis(&mut out, &sorted, &names);
    write_statistical_summary(&mut out, analysis);
    write_anova(&mut out, analysis);
    write_pairwise(&mut out, analysis);
    write_winners(&mut out, analysis, &names);
    write_reliability(&mut out, &sorted);
    write_methodology(&mut out, load);
    write_limitations(&mut out);
    write_warnings(&mut out, analysis);
    out
}

fn write_header(out: &mut String, results: &[&TestResult], analysis: &Analysis) {
    let _ = writeln!(out, "# Carbon Footprint Comparison Report\n");
    let first = results.iter().map(|r| r.timestamp).min();
    let last = results.iter().map(|r| r.timestamp).max();
    if let (Some(first), Some(last)) = (first, last) {
        let _ = writeln!(
            out,
            "Measurements from {} to {} (UTC)\n",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let _ = writeln!(out, "Total tests: {}\n", analysis.sample_count);
}

fn write_framework_summary(out: &mut String, results: &[&TestResult], names: &BTreeMap<&TargetId, &str>) {
    let mut by_target: BTreeMap<&TargetId, Vec<&TestResult>> = BTreeMap::new();
    for r in results {
        by_target.entry(&r.target).or_default().push(r);
    }

    let _ = writeln!(out, "## Framework Summary\n");
    let _ = writeln!(
        out,
        "| Framework | Tests | Avg Emissions (g CO2eq) | Per Request (mg CO2eq) | Avg RPS | Avg Response Time (ms) | Avg CPU (%) | Avg Memory (MB) |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|");
    for (target, items) in &by_target {
        let avg = GroupAverages::of(items);
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {} | {} |",
            names.get(target).copied().unwrap_or(target.as_str()),
            avg.tests,
            num(avg.emissions_g, 4),
            num(avg.per_request_mg, 4),
            num(avg.rps, 2),
            num(avg.mean_ms, 2),
            num(avg.cpu, 1),
            num(avg.mem, 1),
        );
    }
    let _ = writeln!(out);
}

fn write_detailed_results(out: &mut String, results: &[&TestResult]) {
    let _ = writeln!(out, "## Per-Configuration Results\n");
    let _ = writeln!(
        out,
        "| Framework | Endpoint | Load | Run | Emissions (g) | Per Req (mg) | RPS | Mean (ms) | p95 (ms) | Success (%) | Padding (s) | Reliability |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|---|---|---|");
    for r in results {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {} | {:.2} | {} | {} | {:.1} | {:.1} | {} |",
            r.target_name,
            r.endpoint,
            r.request_count,
            r.run_index,
            num(r.emissions_grams, 4),
            num(r.emissions_per_request_mg, 4),
            r.requests_per_second,
            num(r.response_time_stats.mean_ms, 2),
            num(r.response_time_stats.p95_ms, 2),
            r.success_rate,
            r.padding_seconds,
            r.reliability_classification,
        );
    }
    let _ = writeln!(out);
}

fn write_load_scaling(out: &mut String, results: &[&TestResult], names: &BTreeMap<&TargetId, &str>) {
    let mut grouped: BTreeMap<&TargetId, BTreeMap<RequestCount, Vec<&TestResult>>> = BTreeMap::new();
    for r in results {
        grouped
            .entry(&r.target)
            .or_default()
            .entry(r.request_count)
            .or_default()
            .push(r);
    }

    let _ = writeln!(out, "## Load Scaling\n");
    for (target, loads) in &grouped {
        let _ = writeln!(out, "### {}\n", names.get(target).copied().unwrap_or(target.as_str()));
        let _ = writeln!(out, "| Load | Tests | Emissions (g) | Per Req (mg) | RPS | Mean (ms) |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for (load, items) in loads {
            let avg = GroupAverages::of(items);
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                load,
                avg.tests,
                num(avg.emissions_g, 4),
                num(avg.per_request_mg, 4),
                num(avg.rps, 2),
                num(avg.mean_ms, 2),
            );
        }
        let _ = writeln!(out);
    }
}

fn write_endpoint_analysis(out: &mut String, results: &[&TestResult], names: &BTreeMap<&TargetId, &str>) {
    let mut grouped: BTreeMap<&EndpointId, BTreeMap<&TargetId, Vec<&TestResult>>> = BTreeMap::new();
    for r in results {
        grouped
            .entry(&r.endpoint)
            .or_default()
            .entry(&r.target)
            .or_default()
            .push(r);
    }

    let _ = writeln!(out, "## Endpoint Analysis\n");
    for (endpoint, targets) in &grouped {
        let _ = writeln!(out, "### {}\n", endpoint);
        let _ = writeln!(out, "| Framework | Tests | Emissions (g) | Per Req (mg) | RPS | Mean (ms) |");
        let _ = writeln!(out, "|---|---|---|---|---|---|");
        for (target, items) in targets {
            let avg = GroupAverages::of(items);
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} | {} | {} |",
                names.get(target).copied().unwrap_or(target.as_str()),
                avg.tests,
                num(avg.emissions_g, 4),
                num(avg.per_request_mg, 4),
                num(avg.rps, 2),
                num(avg.mean_ms, 2),
            );
        }
        let _ = writeln!(out);
    }
}

fn write_statistical_summary(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Statistical Summary\n");
    if analysis.summaries.is_empty() {
        let _ = writeln!(out, "No group had at least two runs; statistics omitted.\n");
        return;
    }

    let mut grouped: BTreeMap<(&Scope, Metric), Vec<_>> = BTreeMap::new();
    for row in &analysis.summaries {
        grouped.entry((&row.scope, row.metric)).or_default().push(row);
    }

    for ((scope, metric), rows) in &grouped {
        let _ = writeln!(out, "### {} ({})\n", metric.label(), scope);
        let _ = writeln!(
            out,
            "| Framework | n | Mean | Std Dev | {:.0}% CI |",
            CONFIDENCE * 100.0
        );
        let _ = writeln!(out, "|---|---|---|---|---|");
        for row in rows {
            let s = &row.summary;
            let _ = writeln!(
                out,
                "| {} | {} | {:.4} | {:.4} | [{:.4}, {:.4}] |",
                row.target, s.n, s.mean, s.std_dev, s.ci_low, s.ci_high
            );
        }
        let _ = writeln!(out);
    }
}

fn write_anova_rows(out: &mut String, rows: &[AnovaRow]) {
    let _ = writeln!(out, "| Scope | Metric | Targets | F | df | p | Significant |");
    let _ = writeln!(out, "|---|---|---|---|---|---|---|");
    for row in rows {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | ({}, {}) | {} | {} |",
            row.scope,
            row.metric.label(),
            row.targets,
            num(Some(row.result.f_statistic), 3),
            row.result.df_between,
            row.result.df_within,
            p_value(row.result.p_value),
            if row.result.significant() { "yes" } else { "no" },
        );
    }
    let _ = writeln!(out);
}

fn write_anova(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## One-Way ANOVA\n");
    if analysis.anova.is_empty() && analysis.pooled_anova.is_empty() {
        let _ = writeln!(out, "Not enough comparable groups for ANOVA.\n");
        return;
    }
    if !analysis.pooled_anova.is_empty() {
        let _ = writeln!(out, "### Pooled across configurations\n");
        write_anova_rows(out, &analysis.pooled_anova);
    }
    if !analysis.anova.is_empty() {
        let _ = writeln!(out, "### Per configuration\n");
        write_anova_rows(out, &analysis.anova);
    }
}

fn write_pairwise(out: &mut String, analysis: &Analysis) {
    let _ = writeln!(out, "## Pairwise Comparisons (Welch t-test, Bonferroni)\n");
    if analysis.pairwise.is_empty() {
        let _ = writeln!(out, "No pairwise comparisons available.\n");
        return;
    }
    let _ = writeln!(
        out,
        "| Scope | Metric | A | B | t | df | p | alpha (adj) | Cohen's d | Effect | Significant |"
    );
    let _ = writeln!(out, "|---|---|---|---|---|---|---|---|---|---|---|");
    for c in &analysis.pairwise {
        let t = &c.test;
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {:.1} | {} | {:.4} | {} | {} | {} |",
            c.scope,
            c.metric.label(),
            c.first,
            c.second,
            num(Some(t.t_statistic), 3),
            t.degrees_of_freedom,
            p_value(t.p_value),
            t.alpha_adjusted,
            num(Some(t.cohens_d), 2),
            t.effect_size,
            if t.significant { "yes" } else { "no" },
        );
    }
    let _ = writeln!(out);
}

fn write_winners(out: &mut String, analysis: &Analysis, names: &BTreeMap<&TargetId, &str>) {
    let _ = writeln!(out, "## Winners\n");
    if analysis.winners.is_empty() {
        let _ = writeln!(out, "No winners could be determined.\n");
        return;
    }

    let name = |id: &TargetId| -> String {
        names
            .get(id)
            .map(|n| n.to_string())
            .unwrap_or_else(|| id.to_string())
    };

    let mut by_scope: BTreeMap<&Scope, Vec<_>> = BTreeMap::new();
    for w in &analysis.winners {
        by_scope.entry(&w.scope).or_default().push(w);
    }
    // Overall verdict first
    let mut scopes: Vec<_> = by_scope.into_iter().collect();
    scopes.sort_by_key(|(scope, _)| **scope != Scope::Pooled);

    for (scope, winners) in scopes {
        let _ = writeln!(out, "### {}\n", scope);
        for w in winners {
            let _ = writeln!(
                out,
                "- **{}**: {} ({:.4}) ahead of {} ({:.4}) {}",
                w.metric.label(),
                name(&w.target),
                w.mean,
                name(&w.runner_up),
                w.runner_up_mean,
                w.tag(),
            );
        }
        let _ = writeln!(out);
    }
}

fn write_reliability(out: &mut String, results: &[&TestResult]) {
    let _ = writeln!(out, "## Energy Measurement Reliability\n");
    let mut counts: BTreeMap<Reliability, usize> = BTreeMap::new();
    for r in results {
        *counts.entry(r.reliability_classification).or_default() += 1;
    }
    let missing = results.iter().filter(|r| r.emissions_grams.is_none()).count();

    let _ = writeln!(out, "| Classification | Tests |");
    let _ = writeln!(out, "|---|---|");
    for class in [Reliability::Reliable, Reliability::Marginal, Reliability::Unreliable] {
        let _ = writeln!(out, "| {} | {} |", class, counts.get(&class).copied().unwrap_or(0));
    }
    let _ = writeln!(out);
    if missing > 0 {
        let _ = writeln!(out, "{} test(s) have no energy figure.\n", missing);
    }
}

fn write_methodology(out: &mut String, load: &LoadSettings) {
    let _ = writeln!(out, "## Methodology\n");
    let _ = writeln!(
        out,
        "- Configurations run one at a time in round-robin order: every configuration runs once before any runs again."
    );
    let _ = writeln!(
        out,
        "- Each test is preceded by a health check and a warmup; warmup requests are not measured."
    );
    let _ = writeln!(
        out,
        "- Batches of at most {} requests run sequentially; larger batches use up to {} concurrent workers.",
        load.sequential_threshold, load.max_workers
    );
    let _ = writeln!(
        out,
        "- Throughput is successful requests divided by load duration; padding is excluded."
    );
    let _ = writeln!(
        out,
        "- Energy sessions shorter than 5 s are unreliable and 5 to 15 s marginal; short sessions can be padded to a minimum duration."
    );
    let _ = writeln!(
        out,
        "- Confidence intervals use Student t at {:.0}%; ANOVA and Welch t-tests use alpha = {}, Bonferroni-corrected per family of pairs.",
        CONFIDENCE * 100.0,
        ALPHA
    );
    let _ = writeln!(
        out,
        "- Effect sizes use Cohen's d: negligible < 0.2, small < 0.5, medium < 0.8, large otherwise.\n"
    );
}

fn write_limitations(out: &mut String) {
    let _ = writeln!(out, "## Known Limitations\n");
    let _ = writeln!(
        out,
        "- Energy is measured for the whole machine, so the load generator's own consumption is included."
    );
    let _ = writeln!(
        out,
        "- TDP-based estimates scale a nominal figure by CPU utilisation and are less precise than hardware counters."
    );
    let _ = writeln!(
        out,
        "- Resource samples are taken once per second, so short batches may have few or no samples."
    );
    let _ = writeln!(
        out,
        "- Pooled statistics mix load levels and endpoints; per-configuration tables are the stricter comparison.\n"
    );
}

fn write_warnings(out: &mut String, analysis: &Analysis) {
    if analysis.warnings.is_empty() {
        return;
    }
    let _ = writeln!(out, "## Analysis Warnings\n");
    for warning in &analysis.warnings {
        let _ = writeln!(out, "- {}", warning);
    }
    let _ = writeln!(out);
}

/// Write the rendered report, creating the parent directory if needed.
pub fn write_report(path: &Path, contents: &str) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StorageError::DirectoryCreation {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    write_atomic(path, contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::analyze;
    use crate::store::tests::sample_result;
    use tempfile::TempDir;

    fn results() -> Vec<TestResult> {
        let mut results = Vec::new();
        for run in 1..=3 {
            let mut gin = sample_result("gin", run);
            gin.requests_per_second = 900.0 + run as f64;
            let mut django = sample_result("django", run);
            django.requests_per_second = 150.0 + run as f64;
            django.emissions_grams = None;
            results.push(django);
            results.push(gin);
        }
        results
    }

    #[test]
    fn test_render_is_deterministic() {
        let results = results();
        let analysis = analyze(&results);

        let mut reversed = results.clone();
        reversed.reverse();

        assert_eq!(
            render_markdown(&results, &analysis, &LoadSettings::default()),
            render_markdown(&reversed, &analysis, &LoadSettings::default())
        );
    }

    #[test]
    fn test_render_contains_sections() {
        let results = results();
        let report = render_markdown(&results, &analyze(&results), &LoadSettings::default());

        for heading in [
            "# Carbon Footprint Comparison Report",
            "## Framework Summary",
            "## Per-Configuration Results",
            "## Load Scaling",
            "## Endpoint Analysis",
            "## Statistical Summary",
            "## One-Way ANOVA",
            "## Pairwise Comparisons",
            "## Winners",
            "## Energy Measurement Reliability",
            "## Methodology",
            "## Known Limitations",
        ] {
            assert!(report.contains(heading), "missing {}", heading);
        }
        assert!(report.contains("Total tests: 6"));
        assert!(report.contains("[SIG]") || report.contains("[N.S.]"));
        assert!(report.contains("3 test(s) have no energy figure."));
    }

    #[test]
    fn test_methodology_shows_configured_dispatch() {
        let results = results();
        let load = LoadSettings {
            max_workers: 250,
            sequential_threshold: 40,
            ..LoadSettings::default()
        };
        let report = render_markdown(&results, &analyze(&results), &load);

        assert!(report.contains(
            "Batches of at most 40 requests run sequentially; larger batches use up to 250 concurrent workers."
        ));
        assert!(!report.contains("at most 100 requests"));
    }

    #[test]
    fn test_render_empty_input() {
        let report = render_markdown(&[], &Analysis::default(), &LoadSettings::default());
        assert!(report.contains("Total tests: 0"));
        assert!(report.contains("statistics omitted"));
        assert!(!report.contains("## Analysis Warnings"));
    }

    #[test]
    fn test_average_skips_missing() {
        assert_eq!(average([Some(1.0), None, Some(3.0)]), Some(2.0));
        assert_eq!(average([None, None]), None);
    }

    #[test]
    fn test_write_report_creates_parent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("reports").join("REPORT.md");
        write_report(&path, "# hello\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "# hello\n");
    }
}
