pub mod advisory;

pub use advisory::{AdvisoryEstimate, LlmSignalEstimator, SignalEstimator};

use crate::config::SignalsConfig;
use crate::core::turn::{TurnContext, TurnInput, TurnSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum::Display;

const SOURCE_QUALITY_BASE: f64 = 0.3;
const SOURCE_QUALITY_DIRECT_USER: f64 = 0.2;
const SOURCE_QUALITY_TOOL_VERIFIED: f64 = 0.1;
const SOURCE_QUALITY_DETERMINISTIC_CAP: f64 = 0.6;

const ALIGNMENT_COMMITTED: f64 = 1.0;
const ALIGNMENT_SHARED_PROBLEM: f64 = 0.5;
const ALIGNMENT_UNANCHORED: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConflictLevel {
    #[default]
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlastRadius {
    #[default]
    Minimal,
    Moderate,
    Severe,
}

/// Per-turn signals. Computed fresh every turn and never stored as truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedSignals {
    pub conflict_level: ConflictLevel,
    pub blast_radius: BlastRadius,
    pub source_quality: f64,
    pub alignment: f64,
    pub urgency: f64,
    /// True when a bounded advisory estimate adjusted quality or alignment.
    #[serde(default)]
    pub advisory_applied: bool,
}

impl DerivedSignals {
    /// Signals for a statement the user made about themselves, directly.
    pub fn user_asserted() -> Self {
        Self {
            conflict_level: ConflictLevel::None,
            blast_radius: BlastRadius::Severe,
            source_quality: 1.0,
            alignment: 1.0,
            urgency: 0.0,
            advisory_applied: false,
        }
    }
}

/// Combine an advisory estimate with its deterministic floor.
///
/// The blend is `floor + (1 - w) * floor + w * estimate`, capped at
/// `ceiling` and never below `floor`. A floor already above the ceiling is
/// left as is.
pub fn bound_advisory(floor: f64, estimate: f64, llm_weight: f64, ceiling: f64) -> f64 {
    let weight = llm_weight.clamp(0.0, 1.0);
    let estimate = estimate.clamp(0.0, 1.0);
    let blended = floor + (1.0 - weight) * floor + weight * estimate;
    blended.clamp(floor, ceiling.max(floor))
}

pub struct SignalEngine {
    config: SignalsConfig,
    estimator: Option<Arc<dyn SignalEstimator>>,
}

impl SignalEngine {
    pub fn new(config: SignalsConfig) -> Self {
        Self {
            config,
            estimator: None,
        }
    }

    #[must_use]
    pub fn with_estimator(mut self, estimator: Arc<dyn SignalEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    pub fn config(&self) -> &SignalsConfig {
        &self.config
    }

    /// The authoritative layer only.
    pub fn deterministic(&self, turn: &TurnInput) -> DerivedSignals {
        let context = &turn.context;
        DerivedSignals {
            conflict_level: self.conflict_level(context),
            blast_radius: self.blast_radius(context),
            source_quality: source_quality_floor(turn.source, context.tool_verified),
            alignment: alignment_floor(context),
            urgency: context.urgency.clamp(0.0, 1.0),
            advisory_applied: false,
        }
    }

    /// Deterministic signals, raised by the advisory estimator when one is
    /// configured and enabled. Estimator failures leave the floor in place.
    pub async fn derive(&self, turn: &TurnInput) -> DerivedSignals {
        let mut signals = self.deterministic(turn);
        if !self.config.advisory_enabled {
            return signals;
        }
        let Some(estimator) = &self.estimator else {
            return signals;
        };

        match estimator.estimate(turn, &signals).await {
            Ok(estimate) => {
                let quality = bound_advisory(
                    signals.source_quality,
                    estimate.source_quality,
                    self.config.llm_weight,
                    self.config.advisory_ceiling,
                );
                let alignment = bound_advisory(
                    signals.alignment,
                    estimate.alignment,
                    self.config.llm_weight,
                    self.config.advisory_ceiling,
                );
                signals.advisory_applied = quality > signals.source_quality
                    || alignment > signals.alignment;
                signals.source_quality = quality;
                signals.alignment = alignment;
            }
            Err(error) => {
                tracing::warn!(
                    estimator = estimator.name(),
                    error = %error,
                    "advisory signal estimate failed; using deterministic floor"
                );
            }
        }
        signals
    }

    pub fn blast_radius(&self, context: &TurnContext) -> BlastRadius {
        match context.write_target {
            Some(target) if target.is_global() => BlastRadius::Severe,
            _ if context.artifacts_touched > self.config.artifact_threshold
                || context.crosses_problem_boundary =>
            {
                BlastRadius::Moderate
            }
            _ => BlastRadius::Minimal,
        }
    }

    pub fn conflict_level(&self, context: &TurnContext) -> ConflictLevel {
        let outputs = &context.candidate_outputs;
        let disagree = outputs.len() >= 2
            && outputs
                .iter()
                .any(|o| o.content.trim() != outputs[0].content.trim());

        if disagree {
            let mut confidences = outputs
                .iter()
                .map(|o| o.confidence.clamp(0.0, 1.0))
                .collect::<Vec<_>>();
            confidences.sort_by(|a, b| b.total_cmp(a));
            let gap = confidences[0] - confidences[1];
            if gap < self.config.conflict_confidence_gap {
                return ConflictLevel::High;
            }
            if !context.contradicts_memory {
                return ConflictLevel::Low;
            }
        }
        if context.contradicts_memory {
            ConflictLevel::Medium
        } else {
            ConflictLevel::None
        }
    }
}

pub fn source_quality_floor(source: TurnSource, tool_verified: bool) -> f64 {
    let mut quality = SOURCE_QUALITY_BASE;
    if source == TurnSource::User {
        quality += SOURCE_QUALITY_DIRECT_USER;
    }
    if tool_verified {
        quality += SOURCE_QUALITY_TOOL_VERIFIED;
    }
    quality.min(SOURCE_QUALITY_DETERMINISTIC_CAP)
}

pub fn alignment_floor(context: &TurnContext) -> f64 {
    if context.commitment_active {
        ALIGNMENT_COMMITTED
    } else if context.shared_problem {
        ALIGNMENT_SHARED_PROBLEM
    } else {
        ALIGNMENT_UNANCHORED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::Compartment;
    use crate::core::turn::CandidateOutput;
    use async_trait::async_trait;

    fn engine() -> SignalEngine {
        SignalEngine::new(SignalsConfig::default())
    }

    fn candidate(content: &str, confidence: f64) -> CandidateOutput {
        CandidateOutput {
            content: content.into(),
            confidence,
        }
    }

    #[test]
    fn blast_radius_tracks_target_and_scope() {
        let engine = engine();
        let mut ctx = TurnContext {
            write_target: Some(Compartment::SemanticSynthesis),
            ..TurnContext::default()
        };
        assert_eq!(engine.blast_radius(&ctx), BlastRadius::Severe);

        ctx.write_target = Some(Compartment::WorkingSet);
        ctx.artifacts_touched = 4;
        assert_eq!(engine.blast_radius(&ctx), BlastRadius::Moderate);

        ctx.artifacts_touched = 3;
        assert_eq!(engine.blast_radius(&ctx), BlastRadius::Minimal);

        ctx.crosses_problem_boundary = true;
        assert_eq!(engine.blast_radius(&ctx), BlastRadius::Moderate);
    }

    #[test]
    fn clear_confidence_winner_is_low_conflict() {
        let engine = engine();
        let close = TurnContext {
            candidate_outputs: vec![candidate("A", 0.6), candidate("B", 0.5)],
            ..TurnContext::default()
        };
        assert_eq!(engine.conflict_level(&close), ConflictLevel::High);

        let clear = TurnContext {
            candidate_outputs: vec![candidate("A", 0.9), candidate("B", 0.4)],
            ..TurnContext::default()
        };
        assert_eq!(engine.conflict_level(&clear), ConflictLevel::Low);

        let agree = TurnContext {
            candidate_outputs: vec![candidate("A", 0.9), candidate(" A ", 0.2)],
            ..TurnContext::default()
        };
        assert_eq!(engine.conflict_level(&agree), ConflictLevel::None);
    }

    #[test]
    fn memory_contradiction_is_medium() {
        let ctx = TurnContext {
            contradicts_memory: true,
            ..TurnContext::default()
        };
        assert_eq!(engine().conflict_level(&ctx), ConflictLevel::Medium);
    }

    #[test]
    fn floors_follow_source_and_anchoring() {
        assert!((source_quality_floor(TurnSource::Agent, false) - 0.3).abs() < 1e-9);
        assert!((source_quality_floor(TurnSource::User, false) - 0.5).abs() < 1e-9);
        assert!((source_quality_floor(TurnSource::User, true) - 0.6).abs() < 1e-9);

        let mut ctx = TurnContext::default();
        assert!((alignment_floor(&ctx) - 0.2).abs() < 1e-9);
        ctx.shared_problem = true;
        assert!((alignment_floor(&ctx) - 0.5).abs() < 1e-9);
        ctx.commitment_active = true;
        assert!((alignment_floor(&ctx) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn advisory_never_drops_below_floor_or_exceeds_ceiling() {
        assert!((bound_advisory(0.2, 0.1, 0.5, 0.9) - 0.35).abs() < 1e-9);
        assert!((bound_advisory(0.2, 0.0, 1.0, 0.9) - 0.2).abs() < 1e-9);
        assert!((bound_advisory(0.3, 0.2, 0.0, 0.9) - 0.6).abs() < 1e-9);
        assert!((bound_advisory(0.5, 0.6, 0.5, 0.9) - 0.9).abs() < 1e-9);
        assert!((bound_advisory(0.5, 0.0, 0.5, 0.9) - 0.75).abs() < 1e-9);
        assert!((bound_advisory(1.0, 0.1, 0.5, 0.9) - 1.0).abs() < 1e-9);
        assert!((bound_advisory(0.3, 7.0, 0.5, 0.9) - 0.9).abs() < 1e-9);
    }

    struct FixedEstimator(anyhow::Result<AdvisoryEstimate>);

    #[async_trait]
    impl SignalEstimator for FixedEstimator {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn estimate(
            &self,
            _turn: &TurnInput,
            _floor: &DerivedSignals,
        ) -> anyhow::Result<AdvisoryEstimate> {
            match &self.0 {
                Ok(estimate) => Ok(*estimate),
                Err(error) => Err(anyhow::anyhow!("{error}")),
            }
        }
    }

    fn advisory_engine(result: anyhow::Result<AdvisoryEstimate>) -> SignalEngine {
        SignalEngine::new(SignalsConfig {
            advisory_enabled: true,
            ..SignalsConfig::default()
        })
        .with_estimator(Arc::new(FixedEstimator(result)))
    }

    #[tokio::test]
    async fn derive_applies_bounded_advisory() {
        let engine = advisory_engine(Ok(AdvisoryEstimate {
            source_quality: 1.0,
            alignment: 1.0,
        }));
        let signals = engine.derive(&TurnInput::new("x", TurnSource::User)).await;
        assert!(signals.advisory_applied);
        assert!((signals.source_quality - 0.9).abs() < 1e-9);
        assert!((signals.alignment - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn derive_falls_back_on_estimator_failure() {
        let engine = advisory_engine(Err(anyhow::anyhow!("model offline")));
        let signals = engine.derive(&TurnInput::new("x", TurnSource::User)).await;
        assert!(!signals.advisory_applied);
        assert!((signals.source_quality - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn derive_ignores_estimator_when_disabled() {
        let engine = SignalEngine::new(SignalsConfig::default()).with_estimator(Arc::new(
            FixedEstimator(Ok(AdvisoryEstimate {
                source_quality: 1.0,
                alignment: 1.0,
            })),
        ));
        let signals = engine.derive(&TurnInput::new("x", TurnSource::User)).await;
        assert!(!signals.advisory_applied);
    }
}
