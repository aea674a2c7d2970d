//! Tunable knobs for a single optimization run, with defaults matching
//! the external interface's documented defaults.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeOptions {
    pub mc_samples: usize,
    pub grid_step: f64,
    pub max_iterations: usize,
    pub grad_learning_rate: f64,
    pub grad_tolerance: f64,
    pub grad_step: f64,
    /// Mean-pairwise-distance threshold above which an algorithm result is
    /// flagged as an outlier by the ensemble combiner.
    pub outlier_threshold: f64,
    pub seed: u64,
    /// Optional fixed weight per algorithm in ensemble fusion; `None`
    /// entries fall back to confidence-weighted fusion.
    pub algorithm_weights: Option<Vec<f64>>,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            mc_samples: 200,
            grid_step: 0.05,
            max_iterations: 1000,
            grad_learning_rate: 0.01,
            grad_tolerance: 1e-6,
            grad_step: 1e-4,
            outlier_threshold: 0.5,
            seed: 0x5EED_0000_CAFE_BABE,
            algorithm_weights: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let o = OptimizeOptions::default();
        assert_eq!(o.mc_samples, 200);
        assert_eq!(o.grid_step, 0.05);
        assert_eq!(o.max_iterations, 1000);
        assert_eq!(o.grad_learning_rate, 0.01);
        assert_eq!(o.grad_tolerance, 1e-6);
        assert_eq!(o.grad_step, 1e-4);
        assert_eq!(o.outlier_threshold, 0.5);
    }
}
