//! The output of a single optimizer variant, before ensemble fusion.

use super::allocation::Allocation;
use serde::{Deserialize, Serialize};

/// Which optimizer produced an [`AlgorithmResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmName {
    MonteCarlo,
    Gradient,
    Bayesian,
}

impl std::fmt::Display for AlgorithmName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlgorithmName::MonteCarlo => "monte_carlo",
            AlgorithmName::Gradient => "gradient",
            AlgorithmName::Bayesian => "bayesian",
        };
        write!(f, "{s}")
    }
}

/// One optimizer's recommended allocation plus the metadata the ensemble
/// combiner and confidence scorer need to weigh it against the others.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmResult {
    pub name: AlgorithmName,
    pub allocation: Allocation,
    /// Self-reported confidence in `[0, 1]` (e.g. convergence quality for
    /// the gradient optimizer, sample density for Monte-Carlo).
    pub confidence: f64,
    /// Forward-model objective value at this allocation, in the goal's
    /// native units (demos, revenue, or negative CAC).
    pub performance: f64,
}

impl AlgorithmResult {
    pub fn new(name: AlgorithmName, allocation: Allocation, confidence: f64, performance: f64) -> Self {
        Self { name, allocation, confidence: confidence.clamp(0.0, 1.0), performance }
    }
}
