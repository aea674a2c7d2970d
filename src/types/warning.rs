//! Non-fatal degradations surfaced on a successful result instead of as
//! an error — the soft half of the error taxonomy.

use super::channel::Channel;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

/// The fixed set of soft-degradation reasons a run can surface. `code`
/// values are stable strings so callers can match on them without pulling
/// in the enum variant names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationWarning {
    pub code: WarningCode,
    pub severity: Severity,
    pub message: String,
    pub channel: Option<Channel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    ConstraintOverSpecified,
    DataFetchFallback,
    LlmValidationFallback,
    LowConsensus,
    HighChannelVariance,
    OutlierDetected,
    ManyOutliers,
    BenchmarkDeviation,
    StageFailed,
    StageTimeout,
}

impl ValidationWarning {
    pub fn new(code: WarningCode, severity: Severity, message: impl Into<String>) -> Self {
        Self { code, severity, message: message.into(), channel: None }
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = Some(channel);
        self
    }
}
