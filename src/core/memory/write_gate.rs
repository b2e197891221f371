use super::types::Compartment;
use crate::core::signals::{BlastRadius, ConflictLevel, DerivedSignals};
use serde::{Deserialize, Serialize};

pub const SEVERE_MIN_SOURCE_QUALITY: f64 = 0.7;
pub const SYNTHESIS_MIN_ALIGNMENT: f64 = 0.5;
pub const CONCLUSION_MIN_SOURCE_QUALITY: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub target: Compartment,
    pub payload: serde_json::Value,
    pub signals: DerivedSignals,
}

impl WriteRequest {
    pub fn new(target: Compartment, payload: serde_json::Value, signals: DerivedSignals) -> Self {
        Self {
            target,
            payload,
            signals,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteDecision {
    pub approved: bool,
    pub requested: Compartment,
    /// Where the write lands. Never less restrictive than `requested`.
    pub target: Compartment,
    pub reason: String,
}

impl WriteDecision {
    fn approve(requested: Compartment, reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            requested,
            target: requested,
            reason: reason.into(),
        }
    }

    fn redirect(requested: Compartment, target: Compartment, reason: impl Into<String>) -> Self {
        // A redirect to something less restrictive is a promotion; keep the request.
        let target = if target.is_at_least_as_restrictive_as(requested) {
            target
        } else {
            requested
        };
        Self {
            approved: true,
            requested,
            target,
            reason: reason.into(),
        }
    }

    fn deny(requested: Compartment, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            requested,
            target: requested,
            reason: reason.into(),
        }
    }

    pub fn is_redirect(&self) -> bool {
        self.approved && self.target != self.requested
    }
}

/// Decide where a write may land. Rules run in order; the first match wins.
///
/// A write to a global compartment is severe whatever blast radius the
/// caller reports.
pub fn evaluate(request: &WriteRequest) -> WriteDecision {
    let requested = request.target;
    let signals = &request.signals;
    let blast_radius = if requested.is_global() {
        signals.blast_radius.max(BlastRadius::Severe)
    } else {
        signals.blast_radius
    };

    if blast_radius == BlastRadius::Severe && signals.source_quality < SEVERE_MIN_SOURCE_QUALITY {
        return WriteDecision::deny(
            requested,
            format!(
                "severe blast radius with source quality {:.2} below {SEVERE_MIN_SOURCE_QUALITY}",
                signals.source_quality
            ),
        );
    }

    if requested == Compartment::WorkingSet {
        return WriteDecision::approve(requested, "working set writes are problem-local");
    }

    if signals.conflict_level == ConflictLevel::High {
        return WriteDecision::redirect(
            requested,
            Compartment::WorkingSet,
            "high conflict: kept local until resolved",
        );
    }

    if requested == Compartment::SemanticSynthesis && signals.alignment < SYNTHESIS_MIN_ALIGNMENT
    {
        return WriteDecision::deny(
            requested,
            format!(
                "alignment {:.2} below {SYNTHESIS_MIN_ALIGNMENT} for synthesis",
                signals.alignment
            ),
        );
    }

    if signals.source_quality < CONCLUSION_MIN_SOURCE_QUALITY {
        return WriteDecision::redirect(
            requested,
            Compartment::EpisodicTrace,
            format!(
                "source quality {:.2} below {CONCLUSION_MIN_SOURCE_QUALITY}: logged without conclusions",
                signals.source_quality
            ),
        );
    }

    WriteDecision::approve(requested, "approved as requested")
}
