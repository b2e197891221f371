use crate::config::GatesConfig;
use crate::core::memory::WriteDecision;
use crate::core::stance::Stance;
use crate::error::{KernelError, Result};
use crate::observability::{EventSink, KernelEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GateKind {
    Framing,
    Commitment,
    Evaluation,
    Emergency,
    WriteApproval,
    AgentApproval,
}

/// Everything a gate evaluator may look at. Evaluators only read it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateContext {
    pub turn: u64,
    pub reason: String,
    pub problem_id: Option<String>,
    pub from: Option<Stance>,
    pub to: Option<Stance>,
    pub urgency: f64,
    pub emergency: bool,
    pub commitment_turns: Option<u32>,
    pub write: Option<WriteDecision>,
    pub agent_count: usize,
    pub requested_capabilities: Vec<String>,
}

impl GateContext {
    pub fn at_turn(turn: u64) -> Self {
        Self {
            turn,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    #[must_use]
    pub fn with_problem(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = Some(problem_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub allowed: bool,
    pub reason: String,
}

impl GateVerdict {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Proof that a gate passed. Only [`GateController`] can mint one, and
/// consumers take it by value so it cannot be reused.
///
/// Carries the scope the gate evaluated so consumers can refuse a token
/// minted for some other problem or budget.
#[derive(Debug, PartialEq, Eq)]
pub struct GateAuthorization {
    gate: GateKind,
    turn: u64,
    problem_id: Option<String>,
    commitment_turns: Option<u32>,
}

impl GateAuthorization {
    pub fn gate(&self) -> GateKind {
        self.gate
    }

    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn problem_id(&self) -> Option<&str> {
        self.problem_id.as_deref()
    }

    pub fn commitment_turns(&self) -> Option<u32> {
        self.commitment_turns
    }
}

pub type GateEvaluator = fn(&GateContext, &GatesConfig) -> GateVerdict;

fn framing(ctx: &GateContext, _config: &GatesConfig) -> GateVerdict {
    if ctx.reason.trim().is_empty() {
        GateVerdict::deny("framing needs a stated problem framing")
    } else {
        GateVerdict::allow("problem framed")
    }
}

fn commitment(ctx: &GateContext, config: &GatesConfig) -> GateVerdict {
    if ctx.problem_id.is_none() {
        return GateVerdict::deny("commitment needs a problem to commit to");
    }
    match ctx.commitment_turns {
        Some(0) => GateVerdict::deny("commitment needs at least one turn"),
        Some(turns) if turns > config.max_commitment_turns => GateVerdict::deny(format!(
            "commitment of {turns} turns exceeds limit {}",
            config.max_commitment_turns
        )),
        _ => GateVerdict::allow("commitment scoped"),
    }
}

fn evaluation(ctx: &GateContext, _config: &GatesConfig) -> GateVerdict {
    if ctx.problem_id.is_none() {
        GateVerdict::deny("evaluation needs a problem under review")
    } else if ctx.reason.trim().is_empty() {
        GateVerdict::deny("evaluation needs stated criteria")
    } else {
        GateVerdict::allow("evaluation criteria stated")
    }
}

fn emergency(ctx: &GateContext, config: &GatesConfig) -> GateVerdict {
    if ctx.emergency || ctx.urgency >= config.emergency_urgency {
        GateVerdict::allow(format!("emergency at urgency {:.2}", ctx.urgency))
    } else {
        GateVerdict::deny(format!(
            "urgency {:.2} below emergency threshold {:.2}",
            ctx.urgency, config.emergency_urgency
        ))
    }
}

fn write_approval(ctx: &GateContext, _config: &GatesConfig) -> GateVerdict {
    match &ctx.write {
        Some(decision) if decision.approved => {
            GateVerdict::allow(format!("write lands in {}", decision.target))
        }
        Some(decision) => GateVerdict::deny(decision.reason.clone()),
        None => GateVerdict::deny("no write decision supplied"),
    }
}

fn agent_approval(ctx: &GateContext, config: &GatesConfig) -> GateVerdict {
    if ctx.agent_count == 0 {
        return GateVerdict::deny("empty agent bundle");
    }
    if ctx.agent_count > config.max_agents_per_bundle {
        return GateVerdict::deny(format!(
            "{} agents exceed bundle limit {}",
            ctx.agent_count, config.max_agents_per_bundle
        ));
    }
    if let Some(capability) = ctx
        .requested_capabilities
        .iter()
        .find(|c| !config.allowed_capabilities.contains(c))
    {
        return GateVerdict::deny(format!("capability '{capability}' is not allowed"));
    }
    GateVerdict::allow(format!("{} agents approved", ctx.agent_count))
}

/// Built-in evaluator for each gate kind.
pub fn default_evaluator(kind: GateKind) -> GateEvaluator {
    match kind {
        GateKind::Framing => framing,
        GateKind::Commitment => commitment,
        GateKind::Evaluation => evaluation,
        GateKind::Emergency => emergency,
        GateKind::WriteApproval => write_approval,
        GateKind::AgentApproval => agent_approval,
    }
}

/// Session-scoped gate state: the evaluator table and emergency cooldown.
pub struct GateController {
    config: GatesConfig,
    evaluators: BTreeMap<GateKind, GateEvaluator>,
    last_emergency_turn: Option<u64>,
    sink: Arc<dyn EventSink>,
}

impl GateController {
    pub fn new(config: GatesConfig, sink: Arc<dyn EventSink>) -> Self {
        let evaluators = GateKind::iter()
            .map(|kind| (kind, default_evaluator(kind)))
            .collect();
        Self {
            config,
            evaluators,
            last_emergency_turn: None,
            sink,
        }
    }

    /// Replace the evaluator for one gate kind.
    pub fn register(&mut self, kind: GateKind, evaluator: GateEvaluator) {
        self.evaluators.insert(kind, evaluator);
    }

    pub fn last_emergency_turn(&self) -> Option<u64> {
        self.last_emergency_turn
    }

    /// Pure check, including the emergency cooldown. Records nothing.
    pub fn evaluate(&self, gate: GateKind, ctx: &GateContext) -> GateVerdict {
        if gate == GateKind::Emergency {
            if let Some(last) = self.last_emergency_turn {
                let ready_at = last.saturating_add(self.config.emergency_cooldown_turns);
                if ctx.turn < ready_at {
                    return GateVerdict::deny(format!(
                        "emergency cooldown: {} turns remaining",
                        ready_at - ctx.turn
                    ));
                }
            }
        }
        let evaluator = self
            .evaluators
            .get(&gate)
            .copied()
            .unwrap_or_else(|| default_evaluator(gate));
        evaluator(ctx, &self.config)
    }

    pub fn attempt(&mut self, gate: GateKind, ctx: &GateContext) -> bool {
        self.authorize(gate, ctx).is_ok()
    }

    /// Evaluate and, on success, mint the token the guarded action needs.
    pub fn authorize(&mut self, gate: GateKind, ctx: &GateContext) -> Result<GateAuthorization> {
        let verdict = self.evaluate(gate, ctx);
        self.sink.record(&KernelEvent::GateDecision {
            gate,
            turn: ctx.turn,
            allowed: verdict.allowed,
            reason: verdict.reason.clone(),
        });

        if !verdict.allowed {
            return Err(KernelError::gate_denied(format!("{gate}: {}", verdict.reason))
                .with_context(serde_json::json!({ "gate": gate, "turn": ctx.turn })));
        }
        if gate == GateKind::Emergency {
            self.last_emergency_turn = Some(ctx.turn);
        }
        Ok(GateAuthorization {
            gate,
            turn: ctx.turn,
            problem_id: ctx.problem_id.clone(),
            commitment_turns: ctx.commitment_turns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::Compartment;
    use crate::observability::MemorySink;

    fn controller() -> (GateController, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        (GateController::new(GatesConfig::default(), sink.clone()), sink)
    }

    #[test]
    fn framing_requires_reason() {
        let (mut gates, _) = controller();
        assert!(!gates.attempt(GateKind::Framing, &GateContext::at_turn(1)));
        assert!(gates.attempt(
            GateKind::Framing,
            &GateContext::at_turn(1).with_reason("reframe as a caching problem")
        ));
    }

    #[test]
    fn commitment_bounds_turns() {
        let (mut gates, _) = controller();
        let mut ctx = GateContext::at_turn(1).with_problem("p1");
        ctx.commitment_turns = Some(51);
        assert!(!gates.attempt(GateKind::Commitment, &ctx));
        ctx.commitment_turns = Some(10);
        let token = gates.authorize(GateKind::Commitment, &ctx).unwrap();
        assert_eq!(token.gate(), GateKind::Commitment);
        assert_eq!(token.turn(), 1);
    }

    #[test]
    fn emergency_cooldown_counts_from_last_grant() {
        let (mut gates, sink) = controller();
        let hot = |turn| GateContext {
            urgency: 0.95,
            ..GateContext::at_turn(turn)
        };
        assert!(gates.attempt(GateKind::Emergency, &hot(1)));
        assert!(!gates.attempt(GateKind::Emergency, &hot(3)));
        assert!(!gates.attempt(GateKind::Emergency, &hot(5)));
        assert!(gates.attempt(GateKind::Emergency, &hot(6)));
        assert_eq!(gates.last_emergency_turn(), Some(6));
        assert_eq!(
            sink.count_where(|e| matches!(e, KernelEvent::GateDecision { allowed: false, .. })),
            2
        );
    }

    #[test]
    fn denied_emergency_does_not_reset_cooldown() {
        let (mut gates, _) = controller();
        assert!(!gates.attempt(GateKind::Emergency, &GateContext::at_turn(1)));
        assert_eq!(gates.last_emergency_turn(), None);
    }

    #[test]
    fn write_approval_mirrors_decision() {
        let (mut gates, _) = controller();
        let mut ctx = GateContext::at_turn(2);
        assert!(!gates.attempt(GateKind::WriteApproval, &ctx));
        ctx.write = Some(WriteDecision {
            approved: true,
            requested: Compartment::SharedReference,
            target: Compartment::EpisodicTrace,
            reason: "logged".into(),
        });
        assert!(gates.attempt(GateKind::WriteApproval, &ctx));
    }

    #[test]
    fn agent_approval_checks_size_and_capabilities() {
        let (mut gates, _) = controller();
        let mut ctx = GateContext {
            agent_count: 2,
            requested_capabilities: vec!["search".into()],
            ..GateContext::at_turn(1)
        };
        assert!(gates.attempt(GateKind::AgentApproval, &ctx));
        ctx.requested_capabilities.push("write_shared".into());
        assert!(!gates.attempt(GateKind::AgentApproval, &ctx));
        ctx.requested_capabilities.clear();
        ctx.agent_count = 9;
        assert!(!gates.attempt(GateKind::AgentApproval, &ctx));
    }

    #[test]
    fn registered_evaluator_replaces_default() {
        fn never(_: &GateContext, _: &GatesConfig) -> GateVerdict {
            GateVerdict::deny("locked down")
        }
        let (mut gates, _) = controller();
        gates.register(GateKind::Framing, never);
        let err = gates
            .authorize(
                GateKind::Framing,
                &GateContext::at_turn(1).with_reason("anything"),
            )
            .unwrap_err();
        assert!(err.message.contains("locked down"));
        assert!(err.recoverable);
    }
}
