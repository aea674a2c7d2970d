//! Comparison of the fused allocation's implied unit economics against
//! the channel priors supplied by a [`crate::collaborators::PriorSource`].

use super::channel::ChannelMap;
use super::warning::ValidationWarning;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkAnalysis {
    /// Aggregate deviation of the implied per-channel performance from the
    /// benchmark midpoints, in `[0, 1]`; 0 means right on benchmark.
    pub deviation_score: f64,
    pub channel_deviations: ChannelMap<f64>,
    pub warnings: Vec<ValidationWarning>,
}
