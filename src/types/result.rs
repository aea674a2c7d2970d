//! The composite output handed back to the caller at the end of a run.

use super::algorithm::AlgorithmResult;
use super::allocation::Allocation;
use super::benchmark::BenchmarkAnalysis;
use super::channel::ChannelMap;
use super::consensus::ConsensusMetrics;
use super::stability::StabilityMetrics;
use super::warning::ValidationWarning;
use serde::{Deserialize, Serialize};

/// `[lo, hi]` band for a per-channel confidence estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub lo: f64,
    pub hi: f64,
}

/// Monte-Carlo percentile summary carried on the composite result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// The small set of runner-up allocations and the reasoning behind the
/// final pick, surfaced alongside the fused recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternatives {
    pub top_allocations: Vec<Allocation>,
    pub reasoning_explanation: String,
}

/// Everything a caller needs: the fused recommendation, its Monte-Carlo
/// outcome distribution, per-channel confidence, and the full analysis
/// trail that justifies it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedModelResult {
    pub allocation: Allocation,
    pub deterministic_outcome: f64,
    pub percentiles: Percentiles,
    pub objective: f64,
    pub channel_confidence_intervals: ChannelMap<ConfidenceInterval>,
    pub overall_confidence: f64,
    pub channel_confidence: ChannelMap<f64>,
    pub stability: StabilityMetrics,
    pub alternative_algorithms: Vec<AlgorithmResult>,
    pub consensus: ConsensusMetrics,
    pub benchmark_comparison: BenchmarkAnalysis,
    pub warnings: Vec<ValidationWarning>,
    pub alternatives: Alternatives,
    pub recommendations: Vec<String>,
}
