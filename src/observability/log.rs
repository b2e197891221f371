use super::traits::{EventSink, KernelEvent};
use tracing::info;

/// Log-based sink: one structured `tracing` line per decision.
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for LogSink {
    fn record(&self, event: &KernelEvent) {
        let name = event.name();
        match event {
            KernelEvent::StanceTransition {
                from,
                to,
                gate,
                success,
                reason,
            } => {
                let gate = gate.map(|g| g.to_string()).unwrap_or_default();
                info!(%from, %to, gate = %gate, success, reason = %reason, "{name}");
            }
            KernelEvent::GateDecision {
                gate,
                turn,
                allowed,
                reason,
            } => {
                info!(%gate, turn, allowed, reason = %reason, "{name}");
            }
            KernelEvent::WriteDecision {
                requested,
                target,
                approved,
                reason,
            } => {
                info!(%requested, %target, approved, reason = %reason, "{name}");
            }
            KernelEvent::Arbitration {
                active_problem_id,
                candidate_problem_id,
                disposition,
                score,
            } => {
                info!(
                    active = ?active_problem_id,
                    candidate = ?candidate_problem_id,
                    %disposition,
                    score,
                    "{name}"
                );
            }
            KernelEvent::CommitmentLifecycle {
                commitment_id,
                problem_id,
                status,
                remaining_turns,
            } => {
                info!(
                    commitment = %commitment_id,
                    problem = %problem_id,
                    %status,
                    remaining_turns,
                    "{name}"
                );
            }
            KernelEvent::Orchestration {
                bundle_id,
                status,
                agents,
                timed_out,
                elapsed_ms,
            } => {
                info!(bundle = %bundle_id, %status, agents, timed_out, elapsed_ms, "{name}");
            }
            KernelEvent::PreferenceClassified { class, source } => {
                info!(%class, %source, "{name}");
            }
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}
