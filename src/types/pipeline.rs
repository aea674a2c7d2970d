//! Value types for the nine-stage optimization run state machine.
//!
//! These are plain data: the [`crate::pipeline::coordinator`] module owns
//! all mutation. Everything here is cheap to clone and safe to hand out as
//! an immutable snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type PipelineId = Uuid;

/// The fixed, strictly-ordered nine stages of one optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageId {
    DataFetch,
    Validation,
    EnsembleOptimization,
    BayesianOptimization,
    GradientOptimization,
    ConfidenceScoring,
    BenchmarkValidation,
    LlmValidation,
    FinalSelection,
}

impl StageId {
    /// The fixed topological order every pipeline run follows.
    pub const ORDER: [StageId; 9] = [
        StageId::DataFetch,
        StageId::Validation,
        StageId::EnsembleOptimization,
        StageId::BayesianOptimization,
        StageId::GradientOptimization,
        StageId::ConfidenceScoring,
        StageId::BenchmarkValidation,
        StageId::LlmValidation,
        StageId::FinalSelection,
    ];

    /// Stages 1 and 8: the only ones that suspend on an external collaborator.
    pub fn is_external(self) -> bool {
        matches!(self, StageId::DataFetch | StageId::LlmValidation)
    }

    /// Bayesian/gradient failures are compensable; everything else that can
    /// fail internally is terminal for the run.
    pub fn is_compensable(self) -> bool {
        matches!(self, StageId::BayesianOptimization | StageId::GradientOptimization)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::DataFetch => "dataFetch",
            StageId::Validation => "validation",
            StageId::EnsembleOptimization => "ensembleOptimization",
            StageId::BayesianOptimization => "bayesianOptimization",
            StageId::GradientOptimization => "gradientOptimization",
            StageId::ConfidenceScoring => "confidenceScoring",
            StageId::BenchmarkValidation => "benchmarkValidation",
            StageId::LlmValidation => "llmValidation",
            StageId::FinalSelection => "finalSelection",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStage {
    pub id: StageId,
    pub name: String,
    pub status: StageStatus,
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub details: Option<String>,
    pub error: Option<String>,
}

impl PipelineStage {
    pub fn pending(id: StageId) -> Self {
        Self {
            id,
            name: id.as_str().to_string(),
            status: StageStatus::Pending,
            progress: 0.0,
            start_time: None,
            end_time: None,
            duration_ms: None,
            details: None,
            error: None,
        }
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        self.status = StageStatus::Running;
        self.start_time = Some(at);
        self.progress = 0.0;
    }

    pub fn complete(&mut self, at: DateTime<Utc>, details: Option<String>) {
        self.status = StageStatus::Completed;
        self.end_time = Some(at);
        self.progress = 100.0;
        self.details = details;
        if let Some(start) = self.start_time {
            self.duration_ms = Some((at - start).num_milliseconds());
        }
    }

    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.status = StageStatus::Error;
        self.end_time = Some(at);
        self.error = Some(error.into());
        if let Some(start) = self.start_time {
            self.duration_ms = Some((at - start).num_milliseconds());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineStatus::Pending => "pending",
            PipelineStatus::Running => "running",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Error => "error",
            PipelineStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// The full state of one optimization run. Owned exclusively by the
/// pipeline coordinator; everyone else sees a cloned snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationPipeline {
    pub id: PipelineId,
    pub status: PipelineStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_duration_ms: Option<i64>,
    pub current_stage: Option<StageId>,
    pub completed_stages: Vec<StageId>,
    pub failed_stages: Vec<StageId>,
    pub stages: Vec<PipelineStage>,
}

impl OptimizationPipeline {
    pub fn new(id: PipelineId, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            status: PipelineStatus::Pending,
            start_time,
            end_time: None,
            total_duration_ms: None,
            current_stage: None,
            completed_stages: Vec::new(),
            failed_stages: Vec::new(),
            stages: StageId::ORDER.iter().map(|&id| PipelineStage::pending(id)).collect(),
        }
    }

    pub fn stage(&self, id: StageId) -> &PipelineStage {
        self.stages.iter().find(|s| s.id == id).expect("every StageId has a stage entry")
    }

    pub fn stage_mut(&mut self, id: StageId) -> &mut PipelineStage {
        self.stages.iter_mut().find(|s| s.id == id).expect("every StageId has a stage entry")
    }
}
