// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Statistical comparison of targets across repeated runs.
//!
//! Results are grouped per configuration (endpoint and load level) and pooled
//! across all configurations. For every group and metric the engine reports:
//!
//! - mean, sample standard deviation and a 95% confidence interval (Student t)
//! - one-way ANOVA across targets
//! - pairwise Welch t-tests with a Bonferroni-corrected threshold
//! - Cohen's d effect sizes
//! - the winning target, qualified by significance against the runner-up
//!
//! Groups with fewer than two runs are omitted with a warning.
//!
//! The distribution functions are evaluated with the regularized incomplete
//! beta function (continued fraction) and a Lanczos log-gamma.

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::fmt;

use crate::metrics::TestResult;
use crate::types::{ConfigurationKey, EndpointId, RequestCount, TargetId};

/// Family-wise significance level.
pub const ALPHA: f64 = 0.05;

/// Confidence level of reported intervals.
pub const CONFIDENCE: f64 = 0.95;

// ============================================================================
// Numeric core
// ============================================================================

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Sample (n - 1) standard deviation.
pub fn sample_std_dev(samples: &[f64]) -> Option<f64> {
    if samples.len() < 2 {
        return None;
    }
    let m = mean(samples)?;
    let ss: f64 = samples.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (samples.len() - 1) as f64).sqrt())
}

/// Natural log of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const G: f64 = 7.0;
    const COEFFICIENTS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        // Reflection formula
        return (PI / (PI * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let t = x + G + 0.5;
    let series = COEFFICIENTS
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEFFICIENTS[0], |acc, (i, c)| acc + c / (x + i as f64));

    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + series.ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn regularized_incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges quickly only on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Modified Lentz evaluation of the incomplete beta continued fraction.
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 300;
    const EPSILON: f64 = 1e-14;
    const TINY: f64 = 1e-300;

    let guard = |v: f64| if v.abs() < TINY { TINY } else { v };

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / guard(1.0 - qab * x / qap);
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let even = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / guard(1.0 + even * d);
        c = guard(1.0 + even / c);
        h *= d * c;

        let odd = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / guard(1.0 + odd * d);
        c = guard(1.0 + odd / c);
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Two-sided p-value of a Student t statistic.
pub fn student_t_p_value(t: f64, df: f64) -> f64 {
    if t.is_nan() || df <= 0.0 {
        return 1.0;
    }
    if t.is_infinite() {
        return 0.0;
    }
    regularized_incomplete_beta(df / 2.0, 0.5, df / (df + t * t)).clamp(0.0, 1.0)
}

/// Two-sided critical value of Student t for the given confidence level.
pub fn t_critical(df: f64, confidence: f64) -> f64 {
    let target = 1.0 - confidence;
    let (mut lo, mut hi) = (0.0_f64, 1_000.0_f64);
    // p-value decreases monotonically in |t|
    for _ in 0..200 {
        let mid = (lo + hi) / 2.0;
        if student_t_p_value(mid, df) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}

/// Upper tail probability of the F distribution.
pub fn f_upper_tail(f: f64, df_between: f64, df_within: f64) -> f64 {
    if f.is_nan() || f <= 0.0 {
        return 1.0;
    }
    if f.is_infinite() {
        return 0.0;
    }
    let x = df_within / (df_within + df_between * f);
    regularized_incomplete_beta(df_within / 2.0, df_between / 2.0, x).clamp(0.0, 1.0)
}

// ============================================================================
// Metrics
// ============================================================================

/// Which way a metric improves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    LowerIsBetter,
    HigherIsBetter,
}

impl Direction {
    /// Whether `a` is strictly better than `b`.
    pub fn is_better(&self, a: f64, b: f64) -> bool {
        match self {
            Direction::LowerIsBetter => a < b,
            Direction::HigherIsBetter => a > b,
        }
    }
}

/// A per-test figure that targets are compared on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Metric {
    EmissionsGrams,
    EmissionsPerRequestMg,
    RequestsPerSecond,
    MeanLatencyMs,
    P95LatencyMs,
    AvgCpuPercent,
    AvgMemoryMb,
}

impl Metric {
    pub const ALL: [Metric; 7] = [
        Metric::EmissionsGrams,
        Metric::EmissionsPerRequestMg,
        Metric::RequestsPerSecond,
        Metric::MeanLatencyMs,
        Metric::P95LatencyMs,
        Metric::AvgCpuPercent,
        Metric::AvgMemoryMb,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Metric::EmissionsGrams => "emissions_grams",
            Metric::EmissionsPerRequestMg => "emissions_per_request_mg",
            Metric::RequestsPerSecond => "requests_per_second",
            Metric::MeanLatencyMs => "mean_latency_ms",
            Metric::P95LatencyMs => "p95_latency_ms",
            Metric::AvgCpuPercent => "avg_cpu_percent",
            Metric::AvgMemoryMb => "avg_memory_mb",
        }
    }

    /// Human label including the unit.
    pub fn label(&self) -> &'static str {
        match self {
            Metric::EmissionsGrams => "Emissions (g CO2eq)",
            Metric::EmissionsPerRequestMg => "Emissions per request (mg CO2eq)",
            Metric::RequestsPerSecond => "Throughput (req/s)",
            Metric::MeanLatencyMs => "Mean latency (ms)",
            Metric::P95LatencyMs => "p95 latency (ms)",
            Metric::AvgCpuPercent => "Average CPU (%)",
            Metric::AvgMemoryMb => "Average memory (MB)",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            Metric::RequestsPerSecond => Direction::HigherIsBetter,
            _ => Direction::LowerIsBetter,
        }
    }

    /// The metric's value in `result`, if it was measured.
    pub fn extract(&self, result: &TestResult) -> Option<f64> {
        let value = match self {
            Metric::EmissionsGrams => result.emissions_grams,
            Metric::EmissionsPerRequestMg => result.emissions_per_request_mg,
            Metric::RequestsPerSecond => Some(result.requests_per_second),
            Metric::MeanLatencyMs => result.response_time_stats.mean_ms,
            Metric::P95LatencyMs => result.response_time_stats.p95_ms,
            Metric::AvgCpuPercent => result.container_metrics.avg_cpu,
            Metric::AvgMemoryMb => result.container_metrics.avg_mem,
        };
        value.filter(|v| v.is_finite())
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Tests and summaries
// ============================================================================

/// Descriptive statistics of one group.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticalSummary {
    pub n: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    pub min: f64,
    pub max: f64,
}

/// Mean, standard deviation and 95% CI. `None` below two samples.
pub fn describe(samples: &[f64]) -> Option<StatisticalSummary> {
    let std_dev = sample_std_dev(samples)?;
    let mean = mean(samples)?;
    let n = samples.len();
    let half_width = t_critical((n - 1) as f64, CONFIDENCE) * std_dev / (n as f64).sqrt();

    Some(StatisticalSummary {
        n,
        mean,
        std_dev,
        ci_low: mean - half_width,
        ci_high: mean + half_width,
        min: samples.iter().copied().fold(f64::INFINITY, f64::min),
        max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    })
}

/// One-way ANOVA outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct AnovaResult {
    pub f_statistic: f64,
    pub p_value: f64,
    pub df_between: usize,
    pub df_within: usize,
}

impl AnovaResult {
    pub fn significant(&self) -> bool {
        self.p_value < ALPHA
    }
}

/// Test equality of group means. Needs two non-empty groups and at least one
/// residual degree of freedom.
pub fn one_way_anova(groups: &[Vec<f64>]) -> Option<AnovaResult> {
    let groups: Vec<&Vec<f64>> = groups.iter().filter(|g| !g.is_empty()).collect();
    let k = groups.len();
    let total: usize = groups.iter().map(|g| g.len()).sum();
    if k < 2 || total <= k {
        return None;
    }

    let grand_mean = groups.iter().flat_map(|g| g.iter()).sum::<f64>() / total as f64;
    let mut ss_between = 0.0;
    let mut ss_within = 0.0;
    for group in &groups {
        let m = mean(group)?;
        ss_between += group.len() as f64 * (m - grand_mean).powi(2);
        ss_within += group.iter().map(|x| (x - m).powi(2)).sum::<f64>();
    }

    let df_between = k - 1;
    let df_within = total - k;
    let ms_between = ss_between / df_between as f64;
    let ms_within = ss_within / df_within as f64;

    let (f_statistic, p_value) = if ms_within > 0.0 {
        let f = ms_between / ms_within;
        (f, f_upper_tail(f, df_between as f64, df_within as f64))
    } else if ss_between <= f64::EPSILON * grand_mean.abs().max(1.0).powi(2) * total as f64 {
        // Every observation identical
        (0.0, 1.0)
    } else {
        (f64::INFINITY, 0.0)
    };

    Some(AnovaResult {
        f_statistic,
        p_value,
        df_between,
        df_within,
    })
}

/// Magnitude label for Cohen's d.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EffectSize {
    Negligible,
    Small,
    Medium,
    Large,
}

impl EffectSize {
    pub fn classify(d: f64) -> Self {
        let d = d.abs();
        if d.is_nan() || d < 0.2 {
            EffectSize::Negligible
        } else if d < 0.5 {
            EffectSize::Small
        } else if d < 0.8 {
            EffectSize::Medium
        } else {
            EffectSize::Large
        }
    }
}

impl fmt::Display for EffectSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EffectSize::Negligible => write!(f, "negligible"),
            EffectSize::Small => write!(f, "small"),
            EffectSize::Medium => write!(f, "medium"),
            EffectSize::Large => write!(f, "large"),
        }
    }
}

/// Cohen's d with the pooled standard deviation. `None` below two samples per side.
pub fn cohens_d(a: &[f64], b: &[f64]) -> Option<f64> {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (sa, sb) = (sample_std_dev(a)?, sample_std_dev(b)?);
    let diff = mean(a)? - mean(b)?;
    let pooled = (((na - 1.0) * sa * sa + (nb - 1.0) * sb * sb) / (na + nb - 2.0)).sqrt();

    if pooled > 0.0 {
        Some(diff / pooled)
    } else if diff == 0.0 {
        Some(0.0)
    } else {
        Some(f64::INFINITY.copysign(diff))
    }
}

/// Welch t-test between two groups.
#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseTest {
    pub mean_a: f64,
    pub mean_b: f64,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// `ALPHA` divided by the number of comparisons in the family.
    pub alpha_adjusted: f64,
    pub significant: bool,
    pub cohens_d: f64,
    pub effect_size: EffectSize,
}

/// Welch's unequal-variance t-test of `a` against `b`, Bonferroni-corrected
/// for `comparisons` tests. `None` below two samples per side.
pub fn welch_t_test(a: &[f64], b: &[f64], comparisons: usize) -> Option<PairwiseTest> {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mean_a, mean_b) = (mean(a)?, mean(b)?);
    let (sa, sb) = (sample_std_dev(a)?, sample_std_dev(b)?);
    let cohens_d = cohens_d(a, b)?;

    let va = sa * sa / na;
    let vb = sb * sb / nb;
    let se = (va + vb).sqrt();
    let diff = mean_a - mean_b;

    let (t_statistic, degrees_of_freedom, p_value) = if se > 0.0 {
        let t = diff / se;
        let df = (va + vb).powi(2) / (va * va / (na - 1.0) + vb * vb / (nb - 1.0));
        (t, df, student_t_p_value(t, df))
    } else if diff == 0.0 {
        (0.0, na + nb - 2.0, 1.0)
    } else {
        (f64::INFINITY.copysign(diff), na + nb - 2.0, 0.0)
    };

    let alpha_adjusted = ALPHA / comparisons.max(1) as f64;
    Some(PairwiseTest {
        mean_a,
        mean_b,
        t_statistic,
        degrees_of_freedom,
        p_value,
        alpha_adjusted,
        significant: p_value < alpha_adjusted,
        cohens_d,
        effect_size: EffectSize::classify(cohens_d),
    })
}

// ============================================================================
// Analysis
// ============================================================================

/// The slice of results a statistic was computed over.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    Configuration {
        endpoint: EndpointId,
        request_count: RequestCount,
    },
    /// Every configuration combined.
    Pooled,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Configuration {
                endpoint,
                request_count,
            } => write!(f, "{}/{}", endpoint, request_count),
            Scope::Pooled => write!(f, "all configurations"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub scope: Scope,
    pub metric: Metric,
    pub target: TargetId,
    pub summary: StatisticalSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnovaRow {
    pub scope: Scope,
    pub metric: Metric,
    pub targets: usize,
    pub result: AnovaResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairwiseComparison {
    pub scope: Scope,
    pub metric: Metric,
    pub first: TargetId,
    pub second: TargetId,
    pub test: PairwiseTest,
}

/// Best target for a metric within a scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Winner {
    pub metric: Metric,
    pub scope: Scope,
    pub target: TargetId,
    pub mean: f64,
    pub runner_up: TargetId,
    pub runner_up_mean: f64,
    /// Whether the lead over the runner-up survives Bonferroni correction.
    pub significant: bool,
}

impl Winner {
    pub fn tag(&self) -> &'static str {
        if self.significant {
            "[SIG]"
        } else {
            "[N.S.]"
        }
    }
}

/// Everything the analysis pass derives from a result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    /// Distinct tests counted after deduplication.
    pub sample_count: usize,
    pub summaries: Vec<SummaryRow>,
    pub anova: Vec<AnovaRow>,
    pub pooled_anova: Vec<AnovaRow>,
    pub pairwise: Vec<PairwiseComparison>,
    pub winners: Vec<Winner>,
    pub warnings: Vec<String>,
}

impl Analysis {
    pub fn winners_in(&self, scope: &Scope) -> impl Iterator<Item = &Winner> {
        let scope = scope.clone();
        self.winners.iter().filter(move |w| w.scope == scope)
    }

    pub fn summary(&self, scope: &Scope, metric: Metric, target: &TargetId) -> Option<&StatisticalSummary> {
        self.summaries
            .iter()
            .find(|r| &r.scope == scope && r.metric == metric && &r.target == target)
            .map(|r| &r.summary)
    }
}

/// Run the full analysis over a result set.
///
/// Results sharing a configuration key are counted once (newest timestamp wins).
pub fn analyze(results: &[TestResult]) -> Analysis {
    let mut analysis = Analysis::default();

    let mut unique: BTreeMap<ConfigurationKey, &TestResult> = BTreeMap::new();
    for result in results {
        let key = result.key();
        match unique.get(&key) {
            Some(existing) if existing.timestamp >= result.timestamp => {}
            _ => {
                unique.insert(key, result);
            }
        }
    }
    let duplicates = results.len() - unique.len();
    if duplicates > 0 {
        analysis
            .warnings
            .push(format!("{} duplicate result(s) ignored", duplicates));
    }
    analysis.sample_count = unique.len();

    let mut scopes: BTreeMap<Scope, BTreeMap<TargetId, Vec<&TestResult>>> = BTreeMap::new();
    for result in unique.values() {
        let scope = Scope::Configuration {
            endpoint: result.endpoint.clone(),
            request_count: result.request_count,
        };
        for scope in [scope, Scope::Pooled] {
            scopes
                .entry(scope)
                .or_default()
                .entry(result.target.clone())
                .or_default()
                .push(*result);
        }
    }

    for (scope, by_target) in &scopes {
        analyze_scope(scope, by_target, &mut analysis);
    }

    analysis
}

fn analyze_scope(
    scope: &Scope,
    by_target: &BTreeMap<TargetId, Vec<&TestResult>>,
    analysis: &mut Analysis,
) {
    let mut eligible: Vec<(&TargetId, &Vec<&TestResult>)> = Vec::new();
    for (target, results) in by_target {
        if results.len() < 2 {
            analysis.warnings.push(format!(
                "{} at {}: {} run(s), statistics omitted (need at least 2)",
                target,
                scope,
                results.len()
            ));
        } else {
            eligible.push((target, results));
        }
    }

    for metric in Metric::ALL {
        let mut samples: Vec<(TargetId, Vec<f64>)> = Vec::new();
        let mut reported = false;
        for (target, results) in &eligible {
            let values: Vec<f64> = results.iter().filter_map(|r| metric.extract(r)).collect();
            reported |= !values.is_empty();
            if values.len() < 2 {
                if !values.is_empty() {
                    analysis.warnings.push(format!(
                        "{} at {}: only {} run(s) report {}, statistics omitted",
                        target,
                        scope,
                        values.len(),
                        metric
                    ));
                }
                continue;
            }
            samples.push(((*target).clone(), values));
        }

        if !reported {
            if *scope == Scope::Pooled && !eligible.is_empty() {
                analysis
                    .warnings
                    .push(format!("No results report {}; metric skipped", metric));
            }
            continue;
        }

        let mut described: Vec<(TargetId, StatisticalSummary)> = Vec::new();
        for (target, values) in &samples {
            if let Some(summary) = describe(values) {
                analysis.summaries.push(SummaryRow {
                    scope: scope.clone(),
                    metric,
                    target: target.clone(),
                    summary: summary.clone(),
                });
                described.push((target.clone(), summary));
            }
        }

        if samples.len() < 2 {
            continue;
        }

        let groups: Vec<Vec<f64>> = samples.iter().map(|(_, v)| v.clone()).collect();
        if let Some(result) = one_way_anova(&groups) {
            let row = AnovaRow {
                scope: scope.clone(),
                metric,
                targets: samples.len(),
                result,
            };
            match scope {
                Scope::Pooled => analysis.pooled_anova.push(row),
                Scope::Configuration { .. } => analysis.anova.push(row),
            }
        }

        let comparisons = samples.len() * (samples.len() - 1) / 2;
        let mut tests: Vec<PairwiseComparison> = Vec::with_capacity(comparisons);
        for (i, (first, a)) in samples.iter().enumerate() {
            for (second, b) in samples.iter().skip(i + 1) {
                if let Some(test) = welch_t_test(a, b, comparisons) {
                    tests.push(PairwiseComparison {
                        scope: scope.clone(),
                        metric,
                        first: first.clone(),
                        second: second.clone(),
                        test,
                    });
                }
            }
        }

        if let Some(winner) = pick_winner(scope, metric, &described, &tests) {
            analysis.winners.push(winner);
        }
        analysis.pairwise.extend(tests);
    }
}

fn pick_winner(
    scope: &Scope,
    metric: Metric,
    described: &[(TargetId, StatisticalSummary)],
    tests: &[PairwiseComparison],
) -> Option<Winner> {
    let direction = metric.direction();
    let mut ranked: Vec<&(TargetId, StatisticalSummary)> = described.iter().collect();
    // Stable: ties keep target order
    ranked.sort_by(|(_, a), (_, b)| {
        if direction.is_better(a.mean, b.mean) {
            std::cmp::Ordering::Less
        } else if direction.is_better(b.mean, a.mean) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });

    let (best, best_summary) = ranked.first()?;
    let (runner_up, runner_summary) = ranked.get(1)?;
    let significant = tests
        .iter()
        .find(|t| {
            (&t.first == best && &t.second == runner_up)
                || (&t.first == runner_up && &t.second == best)
        })
        .map(|t| t.test.significant)
        .unwrap_or(false);

    Some(Winner {
        metric,
        scope: scope.clone(),
        target: best.clone(),
        mean: best_summary.mean,
        runner_up: runner_up.clone(),
        runner_up_mean: runner_summary.mean,
        significant,
    })
}
