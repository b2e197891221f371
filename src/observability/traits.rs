use crate::core::arbiter::Disposition;
use crate::core::commitment::CommitmentStatus;
use crate::core::gates::GateKind;
use crate::core::memory::Compartment;
use crate::core::orchestrator::BundleStatus;
use crate::core::preference::PreferenceClass;
use crate::core::stance::Stance;
use crate::core::turn::TurnSource;
use serde::Serialize;

/// Decisions the kernel publishes. The sink is append-only from the
/// kernel's point of view; consumers pull from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum KernelEvent {
    StanceTransition {
        from: Stance,
        to: Stance,
        gate: Option<GateKind>,
        success: bool,
        reason: String,
    },
    GateDecision {
        gate: GateKind,
        turn: u64,
        allowed: bool,
        reason: String,
    },
    WriteDecision {
        requested: Compartment,
        target: Compartment,
        approved: bool,
        reason: String,
    },
    Arbitration {
        active_problem_id: Option<String>,
        candidate_problem_id: Option<String>,
        disposition: Disposition,
        score: f64,
    },
    CommitmentLifecycle {
        commitment_id: String,
        problem_id: String,
        status: CommitmentStatus,
        remaining_turns: u32,
    },
    Orchestration {
        bundle_id: String,
        status: BundleStatus,
        agents: usize,
        timed_out: usize,
        elapsed_ms: u64,
    },
    PreferenceClassified {
        class: PreferenceClass,
        source: TurnSource,
    },
}

impl KernelEvent {
    /// Stable dotted name used as the log message.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::StanceTransition { .. } => "stance.transition",
            Self::GateDecision { .. } => "gate.decision",
            Self::WriteDecision { .. } => "write.decision",
            Self::Arbitration { .. } => "arbiter.decision",
            Self::CommitmentLifecycle { .. } => "commitment.lifecycle",
            Self::Orchestration { .. } => "orchestrator.bundle",
            Self::PreferenceClassified { .. } => "preference.classified",
        }
    }
}

/// Receives every kernel decision as it is made.
pub trait EventSink: Send + Sync {
    fn record(&self, event: &KernelEvent);

    /// Flush any buffered data (no-op for most backends)
    fn flush(&self) {}

    fn name(&self) -> &str;
}
