//! Cross-algorithm agreement metrics produced by the ensemble combiner.

use super::channel::ChannelMap;
use serde::{Deserialize, Serialize};

/// How much the surviving (non-outlier) algorithm results agreed with each
/// other, both overall and per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusMetrics {
    /// `1 - variance / V_MAX`, clamped to `[0, 1]`. Higher is more agreement.
    pub agreement: f64,
    pub channel_variance: ChannelMap<f64>,
    pub outlier_count: usize,
}
