//! Fuses a list of [`AlgorithmResult`]s into one allocation, identifying
//! outliers and emitting consensus warnings.
//!
//! Structurally grounded in an orchestrator pattern: a fixed set of
//! independent voters combined by confidence/weight into one fused
//! decision, with an explicit exclusion path and a human-readable
//! reasoning string.

use crate::config::defaults::ENSEMBLE_V_MAX;
use crate::types::{
    AlgorithmResult, Allocation, Channel, ChannelMap, ConsensusMetrics, Severity, ValidationWarning, WarningCode,
};

pub struct FusionOutput {
    pub allocation: Allocation,
    pub weighted_performance: f64,
    pub consensus: ConsensusMetrics,
    pub warnings: Vec<ValidationWarning>,
    pub outlier_names: Vec<String>,
}

fn euclidean_distance(a: &Allocation, b: &Allocation) -> f64 {
    Channel::ALL.iter().map(|&c| (a.share(c) - b.share(c)).powi(2)).sum::<f64>().sqrt()
}

/// Mean pairwise distance of result `i` to every other result.
fn mean_pairwise_distances(allocations: &[Allocation]) -> Vec<f64> {
    let n = allocations.len();
    allocations
        .iter()
        .enumerate()
        .map(|(i, a)| {
            if n <= 1 {
                return 0.0;
            }
            let total: f64 = allocations
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, b)| euclidean_distance(a, b))
                .sum();
            total / (n - 1) as f64
        })
        .collect()
}

/// Tukey-rule outlier count on the distance distribution: values above
/// `Q3 + 1.5 * IQR`.
fn tukey_outlier_count(distances: &[f64]) -> usize {
    if distances.len() < 4 {
        return 0;
    }
    let mut sorted = distances.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let q1 = crate::forward_model::percentile(&sorted, 0.25);
    let q3 = crate::forward_model::percentile(&sorted, 0.75);
    let iqr = q3 - q1;
    let threshold = q3 + 1.5 * iqr;
    distances.iter().filter(|&&d| d > threshold).count()
}

/// Fuses `results` into one allocation. Never panics: a single input is
/// passed straight through; an empty input yields a degenerate zero-weight
/// fusion (callers should treat that as a programmer error upstream —
/// stage-level validation rejects it before reaching here).
///
/// `algorithm_weights`, when `Some`, overrides the default
/// confidence-derived fusion weight (`w_i = max(0, confidence_i)`) with a
/// fixed weight per algorithm, indexed by [`AlgorithmName`]'s declaration
/// order (`monteCarlo`, `gradient`, `bayesian`); an out-of-range or missing
/// entry falls back to that result's confidence. Outliers are still
/// excluded before weighting, regardless of any override.
pub fn combine(results: &[AlgorithmResult], outlier_threshold: f64, algorithm_weights: Option<&[f64]>) -> FusionOutput {
    if results.is_empty() {
        return FusionOutput {
            allocation: Allocation::new(ChannelMap::filled(1.0 / Channel::COUNT as f64)),
            weighted_performance: 0.0,
            consensus: ConsensusMetrics { agreement: 0.0, channel_variance: ChannelMap::zero(), outlier_count: 0 },
            warnings: Vec::new(),
            outlier_names: Vec::new(),
        };
    }

    let allocations: Vec<Allocation> = results.iter().map(|r| r.allocation).collect();

    if results.len() == 1 {
        return FusionOutput {
            allocation: allocations[0],
            weighted_performance: results[0].performance,
            consensus: ConsensusMetrics { agreement: 1.0, channel_variance: ChannelMap::zero(), outlier_count: 0 },
            warnings: Vec::new(),
            outlier_names: Vec::new(),
        };
    }

    let mut warnings = Vec::new();
    let distances = mean_pairwise_distances(&allocations);

    let mut is_outlier: Vec<bool> = distances.iter().map(|&d| d > outlier_threshold).collect();
    let all_flagged = is_outlier.iter().all(|&f| f);
    let many_outliers_fallback = results.len() > 2 && all_flagged;
    if many_outliers_fallback {
        is_outlier = vec![false; results.len()];
        warnings.push(ValidationWarning::new(
            WarningCode::ManyOutliers,
            Severity::Medium,
            "every algorithm result was flagged as an outlier; outlier exclusion was skipped for this run",
        ));
    }

    // Two results are too few for a robust outlier distribution.
    if results.len() <= 2 {
        is_outlier = vec![false; results.len()];
    }

    let outlier_names: Vec<String> = results
        .iter()
        .zip(is_outlier.iter())
        .filter(|(_, &flagged)| flagged)
        .map(|(r, _)| r.name.to_string())
        .collect();

    if !outlier_names.is_empty() {
        warnings.push(ValidationWarning::new(
            WarningCode::OutlierDetected,
            Severity::Medium,
            format!("excluded {} algorithm result(s) as outliers: {}", outlier_names.len(), outlier_names.join(", ")),
        ));
    }

    let surviving: Vec<&AlgorithmResult> = results
        .iter()
        .zip(is_outlier.iter())
        .filter(|(_, &flagged)| !flagged)
        .map(|(r, _)| r)
        .collect();

    let mut weights: Vec<f64> = surviving
        .iter()
        .map(|r| {
            algorithm_weights
                .and_then(|w| w.get(r.name as usize))
                .copied()
                .map(|w| w.max(0.0))
                .unwrap_or_else(|| r.confidence.max(0.0))
        })
        .collect();
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        weights = vec![1.0; surviving.len()];
    }
    let weight_sum: f64 = weights.iter().sum();

    let fused_shares = ChannelMap::from_fn(|c| {
        let numerator: f64 = surviving.iter().zip(weights.iter()).map(|(r, w)| w * r.allocation.share(c)).sum();
        numerator / weight_sum
    });
    let fused_allocation = Allocation::new(fused_shares).normalized();

    let weighted_performance =
        surviving.iter().zip(weights.iter()).map(|(r, w)| w * r.performance).sum::<f64>() / weight_sum;

    let survivor_allocations: Vec<Allocation> = surviving.iter().map(|r| r.allocation).collect();
    let channel_variance = ChannelMap::from_fn(|c| {
        let mean = survivor_allocations.iter().map(|a| a.share(c)).sum::<f64>() / survivor_allocations.len() as f64;
        survivor_allocations.iter().map(|a| (a.share(c) - mean).powi(2)).sum::<f64>() / survivor_allocations.len() as f64
    });

    let mean_variance = channel_variance.sum() / Channel::COUNT as f64;
    let agreement = 1.0 - (mean_variance.min(ENSEMBLE_V_MAX) / ENSEMBLE_V_MAX);

    let retained_distances: Vec<f64> = distances
        .iter()
        .zip(is_outlier.iter())
        .filter(|(_, &flagged)| !flagged)
        .map(|(&d, _)| d)
        .collect();
    let outlier_count = tukey_outlier_count(&retained_distances);

    if agreement < 0.5 {
        let severity = if agreement < 0.3 { Severity::High } else { Severity::Medium };
        warnings.push(ValidationWarning::new(WarningCode::LowConsensus, severity, format!("ensemble agreement is low ({agreement:.2})")));
    }
    for c in Channel::ALL {
        let variance = *channel_variance.get(c);
        if variance > 0.05 {
            let severity = if variance > 0.10 { Severity::High } else { Severity::Medium };
            warnings.push(
                ValidationWarning::new(WarningCode::HighChannelVariance, severity, format!("{c} allocation variance is high ({variance:.3})"))
                    .with_channel(c),
            );
        }
    }

    FusionOutput {
        allocation: fused_allocation,
        weighted_performance,
        consensus: ConsensusMetrics { agreement: agreement.clamp(0.0, 1.0), channel_variance, outlier_count },
        warnings,
        outlier_names,
    }
}
