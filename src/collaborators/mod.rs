//! Pluggable collaborator interfaces: the parts of the system that live
//! outside the core (priors retrieval, LLM validation) are consumed
//! through these traits so the core stays runnable standalone, with a
//! trivial default implementation of each behind every call site.

use crate::types::{Allocation, ChannelPriors};
use async_trait::async_trait;

/// Supplies the per-channel CPM/CTR/CVR benchmark intervals an
/// optimization run is evaluated against. Implemented by callers who have
/// access to a live benchmark/priors service; the core only consumes the
/// result.
#[async_trait]
pub trait PriorSource: Send + Sync {
    async fn fetch_priors(&self, context: &PriorContext) -> anyhow::Result<ChannelPriors>;
}

/// Context handed to a [`PriorSource`] so it can tailor the priors it
/// returns (e.g. by industry vertical or region); the core does not
/// interpret these fields itself.
#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    pub industry: Option<String>,
    pub region: Option<String>,
}

/// Falls back to the built-in industry-default priors whenever no live
/// source is configured, or whenever a live source fails.
pub struct DefaultPriorSource;

#[async_trait]
impl PriorSource for DefaultPriorSource {
    async fn fetch_priors(&self, _context: &PriorContext) -> anyhow::Result<ChannelPriors> {
        Ok(crate::types::industry_default_priors())
    }
}

/// Result of an external LLM sanity-check on a fused allocation.
#[derive(Debug, Clone)]
pub struct LlmValidation {
    pub confidence: f64,
    pub notes: String,
}

/// Validates a fused allocation against qualitative judgment an LLM can
/// supply (e.g. "this overweights a historically low-performing channel").
/// Implemented by callers who have access to an LLM; the core substitutes
/// a neutral score when none is configured or when the call fails.
#[async_trait]
pub trait LlmValidator: Send + Sync {
    async fn validate(&self, allocation: &Allocation, summary: &str) -> anyhow::Result<LlmValidation>;
}

/// Neutral substitute used when no `LlmValidator` is configured.
pub struct NeutralLlmValidator;

#[async_trait]
impl LlmValidator for NeutralLlmValidator {
    async fn validate(&self, _allocation: &Allocation, _summary: &str) -> anyhow::Result<LlmValidation> {
        Ok(LlmValidation { confidence: crate::config::defaults::DEFAULT_LLM_CONFIDENCE, notes: "no LLM validator configured".to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_prior_source_returns_valid_priors() {
        let source = DefaultPriorSource;
        let priors = source.fetch_priors(&PriorContext::default()).await.expect("default source never fails");
        for (_, p) in priors.iter() {
            assert!(p.is_valid());
        }
    }

    #[tokio::test]
    async fn neutral_validator_returns_documented_default() {
        let validator = NeutralLlmValidator;
        let allocation = Allocation::new(crate::types::ChannelMap::filled(0.25));
        let result = validator.validate(&allocation, "test").await.expect("neutral validator never fails");
        assert_eq!(result.confidence, 0.7);
    }
}
