//! Crate-wide error taxonomy.
//!
//! Only the genuinely fatal half of the error taxonomy lives here.
//! `OverConstrained` and `ExternalDegraded` are not represented as error
//! variants — the run still succeeds in both cases — they surface only as
//! [`crate::types::ValidationWarning`]s on the result.

use crate::types::StageId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("stage {stage} failed: {reason}")]
    StageFailed { stage: StageId, reason: String },

    #[error("pipeline cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
