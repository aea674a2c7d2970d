//! Stability metrics derived from how tightly the optimizer results cluster.

use super::channel::ChannelMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilityMetrics {
    pub overall_stability: f64,
    pub channel_stability: ChannelMap<f64>,
    /// How close the gradient optimizer got to its convergence tolerance;
    /// 1.0 for a fully converged run, trending to 0 for one that exhausted
    /// its iteration budget without converging.
    pub convergence_score: f64,
}
