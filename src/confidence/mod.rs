//! Fuses algorithm consensus, stability across runs, and benchmark
//! deviation into one calibrated overall score plus per-channel scores.
//!
//! Generalized from a fixed multi-factor weighted breakdown: a breakdown
//! struct with a `.compute()` method producing a `[0, 1]` score and a
//! `.percent()` convenience accessor.

use crate::config::defaults::{
    CONFIDENCE_WEIGHTS_NO_LLM, CONFIDENCE_WEIGHTS_WITH_LLM, DEFAULT_BENCHMARK_CONFIDENCE, DEFAULT_LLM_CONFIDENCE,
};
use crate::types::{
    AlgorithmResult, Allocation, BenchmarkAnalysis, Channel, ChannelMap, ChannelPriors, ConsensusMetrics, Severity,
    StabilityMetrics, ValidationWarning, WarningCode,
};

/// The five weighted factors fused into the overall confidence score.
/// Mirrors the teacher's breakdown-struct-with-`.compute()` idiom.
pub struct ConfidenceBreakdown {
    pub consensus: f64,
    pub stability: f64,
    pub benchmark: f64,
    pub performance_convergence: f64,
    pub llm: f64,
    weights: [f64; 5],
}

impl ConfidenceBreakdown {
    pub fn compute(&self) -> f64 {
        let [wc, ws, wb, wp, wl] = self.weights;
        (wc * self.consensus + ws * self.stability + wb * self.benchmark + wp * self.performance_convergence + wl * self.llm)
            .clamp(0.0, 1.0)
    }

    pub fn percent(&self) -> f64 {
        self.compute() * 100.0
    }
}

/// Per-channel allocation variance across algorithm results, plus the
/// derived stability metrics (§4.5). An empty `results` slice is a
/// programmer error upstream — stage-level validation rejects an empty
/// ensemble before confidence scoring runs.
pub fn compute_stability(results: &[AlgorithmResult]) -> StabilityMetrics {
    if results.len() <= 1 {
        return StabilityMetrics {
            overall_stability: 1.0,
            channel_stability: ChannelMap::filled(1.0),
            convergence_score: 1.0,
        };
    }
    let n = results.len() as f64;
    let channel_variance = ChannelMap::from_fn(|c| {
        let mean = results.iter().map(|r| r.allocation.share(c)).sum::<f64>() / n;
        results.iter().map(|r| (r.allocation.share(c) - mean).powi(2)).sum::<f64>() / n
    });
    let channel_stability = channel_variance.map(|_, &v| (1.0 - 10.0 * v).clamp(0.0, 1.0));
    let mean_variance = channel_variance.sum() / Channel::COUNT as f64;
    let overall_stability = (1.0 - 10.0 * mean_variance).clamp(0.0, 1.0);

    let perf_mean = results.iter().map(|r| r.performance).sum::<f64>() / n;
    let perf_variance = results.iter().map(|r| (r.performance - perf_mean).powi(2)).sum::<f64>() / n;
    let convergence_score = (1.0 - 0.1 * perf_variance).clamp(0.0, 1.0);

    StabilityMetrics { overall_stability, channel_stability, convergence_score }
}

/// `score_c = CTR_mid * CVR_mid / CPM_mid`; the benchmark-expected
/// allocation is that score normalized across channels (falling back to an
/// even split if every score is zero).
pub fn benchmark_expected_allocation(priors: &ChannelPriors) -> Allocation {
    let scores = priors.map(|_, p| {
        let cpm_mid = p.cpm.midpoint();
        if cpm_mid > 0.0 {
            p.ctr.midpoint() * p.cvr.midpoint() / cpm_mid
        } else {
            0.0
        }
    });
    let total = scores.sum();
    let shares = if total > 0.0 {
        scores.map(|_, &s| s / total)
    } else {
        ChannelMap::filled(1.0 / Channel::COUNT as f64)
    };
    Allocation::new(shares)
}

pub fn compare_to_benchmark(allocation: &Allocation, priors: &ChannelPriors) -> BenchmarkAnalysis {
    let expected = benchmark_expected_allocation(priors);
    let channel_deviations = ChannelMap::from_fn(|c| (allocation.share(c) - expected.share(c)).abs());
    let deviation_score = (channel_deviations.sum() / 2.0).min(1.0);

    let mut warnings = Vec::new();
    for c in Channel::ALL {
        let deviation = *channel_deviations.get(c);
        if deviation > 0.2 {
            let severity = if deviation > 0.3 { Severity::High } else { Severity::Medium };
            warnings.push(
                ValidationWarning::new(
                    WarningCode::BenchmarkDeviation,
                    severity,
                    format!("{c} allocation deviates {deviation:.2} from the benchmark-expected share"),
                )
                .with_channel(c),
            );
        }
    }

    BenchmarkAnalysis { deviation_score, channel_deviations, warnings }
}

/// Weighted overall confidence, optionally incorporating an external (LLM)
/// validation score; see `confidence::benchmark` for the deviation-score
/// input and `confidence::compute_stability` for the stability input.
pub fn overall_confidence(
    consensus: &ConsensusMetrics,
    stability: &StabilityMetrics,
    benchmark: Option<&BenchmarkAnalysis>,
    llm_score: Option<f64>,
) -> ConfidenceBreakdown {
    let weights = if llm_score.is_some() { CONFIDENCE_WEIGHTS_WITH_LLM } else { CONFIDENCE_WEIGHTS_NO_LLM };
    let benchmark_confidence = benchmark.map(|b| 1.0 - b.deviation_score).unwrap_or(DEFAULT_BENCHMARK_CONFIDENCE);
    ConfidenceBreakdown {
        consensus: consensus.agreement,
        stability: stability.overall_stability,
        benchmark: benchmark_confidence,
        performance_convergence: stability.convergence_score,
        llm: llm_score.unwrap_or(DEFAULT_LLM_CONFIDENCE),
        weights,
    }
}

/// Per-channel confidence using the same weight split as [`overall_confidence`].
pub fn channel_confidence(
    consensus: &ConsensusMetrics,
    stability: &StabilityMetrics,
    benchmark: Option<&BenchmarkAnalysis>,
    llm_score: Option<f64>,
) -> ChannelMap<f64> {
    let weights = if llm_score.is_some() { CONFIDENCE_WEIGHTS_WITH_LLM } else { CONFIDENCE_WEIGHTS_NO_LLM };
    let [w_consensus, w_stability, w_benchmark, w_performance, _w_llm] = weights;
    ChannelMap::from_fn(|c| {
        let variance = *consensus.channel_variance.get(c);
        let consensus_term = 1.0 - (5.0 * variance).clamp(0.0, 1.0);
        let stability_term = *stability.channel_stability.get(c);
        let benchmark_term = benchmark
            .map(|b| 1.0 - (2.0 * b.channel_deviations.get(c)).clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_BENCHMARK_CONFIDENCE);
        let performance_term = stability.convergence_score;
        (w_consensus * consensus_term + w_stability * stability_term + w_benchmark * benchmark_term + w_performance * performance_term)
            .clamp(0.0, 1.0)
    })
}

/// Human-readable advisories: flags low overall/stability scores and any
/// weak channel; falls back to one positive message when nothing is wrong.
pub fn recommendations(overall: f64, stability: &StabilityMetrics, per_channel: &ChannelMap<f64>) -> Vec<String> {
    let mut out = Vec::new();
    if overall < 0.5 {
        out.push("Overall confidence is low; consider widening channel priors or gathering more data before committing budget.".to_string());
    }
    if stability.overall_stability < 0.6 {
        out.push("Algorithm results disagree substantially across runs; treat this allocation as provisional.".to_string());
    }
    for c in Channel::ALL {
        if *per_channel.get(c) < 0.4 {
            out.push(format!("{c} confidence is low; validate its priors independently before allocating budget there."));
        }
    }
    if out.is_empty() {
        out.push("Allocation is well-supported by algorithm consensus, stability, and benchmark alignment.".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlgorithmName, Interval, Priors};

    fn priors() -> ChannelPriors {
        ChannelMap::filled(Priors { cpm: Interval::new(10.0, 20.0), ctr: Interval::new(0.02, 0.04), cvr: Interval::new(0.05, 0.1) })
    }

    fn algo(shares: [f64; 4]) -> AlgorithmResult {
        AlgorithmResult::new(
            AlgorithmName::MonteCarlo,
            Allocation::new(ChannelMap::from_fn(|c| match c {
                Channel::Google => shares[0],
                Channel::Meta => shares[1],
                Channel::Tiktok => shares[2],
                Channel::Linkedin => shares[3],
            })),
            0.8,
            10.0,
        )
    }

    #[test]
    fn single_result_yields_full_stability() {
        let results = vec![algo([0.25, 0.25, 0.25, 0.25])];
        let stability = compute_stability(&results);
        assert_eq!(stability.overall_stability, 1.0);
        assert_eq!(stability.convergence_score, 1.0);
    }

    #[test]
    fn overall_confidence_is_bounded() {
        let consensus = ConsensusMetrics { agreement: 0.9, channel_variance: ChannelMap::zero(), outlier_count: 0 };
        let stability = StabilityMetrics { overall_stability: 0.9, channel_stability: ChannelMap::filled(0.9), convergence_score: 0.9 };
        let breakdown = overall_confidence(&consensus, &stability, None, None);
        let score = breakdown.compute();
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn channel_confidence_values_are_bounded() {
        let consensus = ConsensusMetrics { agreement: 0.9, channel_variance: ChannelMap::filled(0.01), outlier_count: 0 };
        let stability = StabilityMetrics { overall_stability: 0.9, channel_stability: ChannelMap::filled(0.9), convergence_score: 0.9 };
        let per_channel = channel_confidence(&consensus, &stability, None, None);
        for (_, &v) in per_channel.iter() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn benchmark_deviation_flags_high_severity_past_point_three() {
        let priors = priors();
        let skewed = Allocation::new(ChannelMap::from_fn(|c| if c == Channel::Google { 0.9 } else { 0.0333 }));
        let analysis = compare_to_benchmark(&skewed, &priors);
        assert!(analysis.warnings.iter().any(|w| w.severity == Severity::High || w.severity == Severity::Medium));
    }
}
