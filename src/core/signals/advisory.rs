use super::DerivedSignals;
use crate::core::providers::Provider;
use crate::core::turn::TurnInput;
use crate::prompt::{TeraEngine, templates};
use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const ADVISORY_TEMPERATURE: f64 = 0.0;

/// Unbounded guesses from an external estimator. The engine bounds them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdvisoryEstimate {
    pub source_quality: f64,
    pub alignment: f64,
}

#[async_trait]
pub trait SignalEstimator: Send + Sync {
    fn name(&self) -> &str;

    async fn estimate(
        &self,
        turn: &TurnInput,
        floor: &DerivedSignals,
    ) -> anyhow::Result<AdvisoryEstimate>;
}

/// Asks a [`Provider`] to rate the turn and parses its JSON answer.
pub struct LlmSignalEstimator {
    provider: Arc<dyn Provider>,
    model: String,
    prompts: TeraEngine,
}

impl LlmSignalEstimator {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> anyhow::Result<Self> {
        Ok(Self {
            provider,
            model: model.into(),
            prompts: TeraEngine::with_kernel_templates()?,
        })
    }
}

#[async_trait]
impl SignalEstimator for LlmSignalEstimator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn estimate(
        &self,
        turn: &TurnInput,
        floor: &DerivedSignals,
    ) -> anyhow::Result<AdvisoryEstimate> {
        let mut ctx = tera::Context::new();
        ctx.insert("source", &turn.source.to_string());
        ctx.insert("text", &turn.text);
        ctx.insert("source_quality", &floor.source_quality);
        ctx.insert("alignment", &floor.alignment);
        let prompt = self
            .prompts
            .render(templates::ADVISORY_ESTIMATE_NAME, &ctx)?;

        let reply = self
            .provider
            .chat_with_system(
                Some(templates::ADVISORY_SYSTEM),
                &prompt,
                &self.model,
                ADVISORY_TEMPERATURE,
            )
            .await
            .context("advisory estimator call failed")?;
        parse_estimate(&reply)
    }
}

/// Pull the first JSON object out of a model reply.
pub fn parse_estimate(reply: &str) -> anyhow::Result<AdvisoryEstimate> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        bail!("advisory reply contains no JSON object");
    };
    if end < start {
        bail!("advisory reply contains no JSON object");
    }
    let estimate: AdvisoryEstimate =
        serde_json::from_str(&reply[start..=end]).context("malformed advisory estimate")?;

    for (field, value) in [
        ("source_quality", estimate.source_quality),
        ("alignment", estimate.alignment),
    ] {
        if !(0.0..=1.0).contains(&value) {
            bail!("advisory {field} out of range: {value}");
        }
    }
    Ok(estimate)
}
