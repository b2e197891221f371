//! The governance kernel: one facade over the policy components.
//!
//! The kernel holds the shared services (memory bus, signal engine,
//! arbiter, orchestrator, event sink). Everything that changes turn to turn
//! lives in a [`Session`].

pub mod session;

pub use session::{PendingAsk, PendingPreference, Session};

use crate::config::KernelConfig;
use crate::core::arbiter::{ArbitrationDecision, ArbitrationInput, Arbiter, Disposition};
use crate::core::commitment::{Commitment, TickOutcome};
use crate::core::gates::{GateContext, GateController, GateKind};
use crate::core::memory::{
    CompartmentStores, MemoryBus, NewEpisode, SharedWrite, StoredWrite, WorkingEntry,
    WriteDecision, WriteOutcome, WriteRequest, create_stores, episode_types, write_gate,
};
use crate::core::orchestrator::{Agent, BundleContext, Orchestrator, OrchestratorResult, Reducer};
use crate::core::preference::{self, PreferenceClass, PreferenceVerdict};
use crate::core::problems::Problem;
use crate::core::providers::Provider;
use crate::core::signals::{DerivedSignals, LlmSignalEstimator, SignalEngine};
use crate::core::stance::{Stance, StanceMachine, TransitionRecord, required_gate};
use crate::core::turn::{TurnInput, TurnSource};
use crate::error::{KernelError, Result};
use crate::observability::{EventSink, KernelEvent, create_sink};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;

/// Priority given to a candidate problem the classifier raised without one.
pub const DEFAULT_CANDIDATE_PRIORITY: u8 = 5;

/// What `begin_turn` did before the turn's own work starts.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnStart {
    pub turn: u64,
    pub expired: Vec<Commitment>,
    pub purged_working_sets: usize,
}

/// Where a recorded preference ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceRecord {
    pub verdict: PreferenceVerdict,
    pub stored: StoredWrite,
}

pub struct GovernanceKernel {
    config: Arc<KernelConfig>,
    bus: Arc<MemoryBus>,
    signals: SignalEngine,
    arbiter: Arbiter,
    orchestrator: Orchestrator,
    sink: Arc<dyn EventSink>,
}

impl GovernanceKernel {
    /// Validate `config` and wire the kernel over the given stores and sink.
    pub fn new(
        config: KernelConfig,
        stores: CompartmentStores,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(MemoryBus::new(
            stores,
            config.working_set.clone(),
            Arc::clone(&sink),
        ));
        let signals = SignalEngine::new(config.signals.clone());
        let arbiter = Arbiter::new(config.arbiter.clone())?;
        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            config.gates.allowed_capabilities.clone(),
            Arc::clone(&sink),
        )?;
        Ok(Self {
            config: Arc::new(config),
            bus,
            signals,
            arbiter,
            orchestrator,
            sink,
        })
    }

    /// Build stores and sink from the configured backends.
    pub async fn from_config(config: KernelConfig) -> Result<Self> {
        config.validate()?;
        let stores = create_stores(&config.storage).await?;
        let sink = create_sink(&config.observability);
        tracing::info!(
            storage = %config.storage.backend,
            sink = sink.name(),
            "governance kernel ready"
        );
        Self::new(config, stores, sink)
    }

    /// Attach a generation provider. It backs the advisory signal estimator
    /// (when enabled) and the synthesize reducer.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Result<Self> {
        if self.config.signals.advisory_enabled {
            let estimator = LlmSignalEstimator::new(
                Arc::clone(&provider),
                self.config.signals.advisory_model.clone(),
            )?;
            self.signals = self.signals.with_estimator(Arc::new(estimator));
        }
        self.orchestrator = self.orchestrator.with_provider(provider);
        Ok(self)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<MemoryBus> {
        &self.bus
    }

    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    pub fn open_session(&self) -> Session {
        let stance = StanceMachine::new(Arc::clone(&self.bus), Arc::clone(&self.sink));
        let gates = GateController::new(self.config.gates.clone(), Arc::clone(&self.sink));
        Session::new(stance, gates)
    }

    // ── Turn lifecycle ───────────────────────────────────────────

    /// Advance the turn counter and tick every active commitment once.
    pub async fn begin_turn(&self, session: &mut Session) -> Result<TurnStart> {
        session.turn += 1;
        let turn = session.turn;

        let mut expired = Vec::new();
        for outcome in session.commitments.tick(turn) {
            if let TickOutcome::Expired(commitment) = outcome {
                tracing::info!(
                    commitment_id = %commitment.id,
                    problem_id = %commitment.problem_id,
                    turn,
                    "commitment expired"
                );
                self.log_commitment(episode_types::COMMITMENT_EXPIRED, &commitment, turn)
                    .await?;
                expired.push(commitment);
            }
        }
        let purged_working_sets = self.bus.purge_expired_working().await?;
        Ok(TurnStart {
            turn,
            expired,
            purged_working_sets,
        })
    }

    pub async fn derive_signals(&self, turn: &TurnInput) -> DerivedSignals {
        self.signals.derive(turn).await
    }

    // ── Problems and arbitration ─────────────────────────────────

    pub fn register_problem(
        &self,
        session: &mut Session,
        id: &str,
        name: &str,
        priority: u8,
    ) -> Result<Problem> {
        session.problems.register(id, name, priority, Utc::now())
    }

    /// Archive a problem. Its active commitment, if any, completes with it.
    pub async fn complete_problem(&self, session: &mut Session, id: &str) -> Result<Problem> {
        let problem = session.problems.complete(id, Utc::now())?;
        if let Some(commitment_id) = session.commitments.active_for(id).map(|c| c.id.clone()) {
            self.complete_commitment(session, &commitment_id).await?;
        }
        session.pending_asks.retain(|ask| ask.candidate_problem_id != id);
        Ok(problem)
    }

    /// Decide stay / switch / ask / queue for this turn and apply it.
    ///
    /// A candidate problem the registry has not seen is registered first.
    /// Emergency preemption only counts once the Emergency gate grants it.
    pub async fn arbitrate(
        &self,
        session: &mut Session,
        turn: &TurnInput,
        signals: &DerivedSignals,
    ) -> Result<ArbitrationDecision> {
        let now = turn.timestamp;
        let candidate = turn.context.candidate_problem_id.as_deref();
        if let Some(id) = candidate {
            if session.problems.get(id).is_none() {
                let priority = turn.priority.unwrap_or(DEFAULT_CANDIDATE_PRIORITY);
                session.problems.register(id, id, priority, now)?;
            }
            session.problems.set_urgency(id, signals.urgency)?;
        }

        let wants_emergency = turn.context.emergency
            || signals.urgency >= self.config.gates.emergency_urgency;
        let preempting = candidate.is_some()
            && session.problems.active().map(|p| p.id.as_str()) != candidate;
        let emergency = if wants_emergency && preempting {
            let ctx = GateContext {
                urgency: signals.urgency,
                emergency: turn.context.emergency,
                problem_id: candidate.map(str::to_string),
                ..GateContext::at_turn(session.turn).with_reason("preemption requested")
            };
            session.gates.authorize(GateKind::Emergency, &ctx).is_ok()
        } else {
            false
        };

        let decision = self.arbiter.arbitrate(&ArbitrationInput {
            registry: &session.problems,
            commitments: &session.commitments,
            candidate,
            urgency: signals.urgency,
            emergency,
            now,
        })?;

        self.apply_decision(session, &decision, now).await?;
        self.sink.record(&KernelEvent::Arbitration {
            active_problem_id: decision.active_problem_id.clone(),
            candidate_problem_id: decision.candidate_problem_id.clone(),
            disposition: decision.disposition,
            score: decision.score,
        });
        self.bus
            .log_episode(
                NewEpisode::new(
                    episode_types::ARBITRATION,
                    serde_json::to_value(&decision).map_err(anyhow::Error::from)?,
                )
                .for_optional_problem(decision.active_problem_id.as_deref())
                .with_tag("arbiter")
                .with_tag(decision.disposition.to_string()),
            )
            .await?;
        Ok(decision)
    }

    async fn apply_decision(
        &self,
        session: &mut Session,
        decision: &ArbitrationDecision,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        match (decision.disposition, decision.candidate_problem_id.as_deref()) {
            (Disposition::Switch, Some(candidate)) => {
                self.switch_to(session, candidate, now).await?;
            }
            (Disposition::Queue, Some(candidate)) => {
                session.problems.background(candidate)?;
            }
            (Disposition::Ask, Some(candidate)) => {
                session.push_ask(PendingAsk {
                    candidate_problem_id: candidate.to_string(),
                    active_problem_id: decision.active_problem_id.clone(),
                    score: decision.score,
                    turn: session.turn,
                    reason: decision.reason.clone(),
                });
            }
            (Disposition::Stay, _) => {
                if let Some(active) = decision.active_problem_id.as_deref() {
                    if decision.candidate_problem_id.is_none()
                        || decision.candidate_problem_id.as_deref() == Some(active)
                    {
                        session.problems.record_progress(active, now)?;
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Activate `candidate`. A commitment on the problem losing focus is
    /// abandoned, since a lease of focus cannot survive a switch.
    async fn switch_to(
        &self,
        session: &mut Session,
        candidate: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<()> {
        if let Some(previous) = session.problems.active().map(|p| p.id.clone()) {
            if let Some(id) = session.commitments.active_for(&previous).map(|c| c.id.clone()) {
                let reason = format!("preempted by {candidate}");
                let closed = session.commitments.abandon(&id, &reason)?;
                self.log_commitment(episode_types::COMMITMENT_CLOSED, &closed, session.turn)
                    .await?;
            }
        }
        session.problems.activate(candidate, now)?;
        session.take_ask(candidate);
        Ok(())
    }

    /// Settle a surfaced switch. Accepting activates the candidate;
    /// declining queues it for later turns.
    pub async fn resolve_ask(
        &self,
        session: &mut Session,
        candidate_problem_id: &str,
        accept: bool,
    ) -> Result<ArbitrationDecision> {
        let ask = session.take_ask(candidate_problem_id).ok_or_else(|| {
            KernelError::validation_failed(format!(
                "no pending ask for problem {candidate_problem_id}"
            ))
        })?;
        let active_problem_id = session.problems.active().map(|p| p.id.clone());
        let disposition = if accept {
            self.switch_to(session, candidate_problem_id, Utc::now())
                .await?;
            Disposition::Switch
        } else {
            session.problems.background(candidate_problem_id)?;
            Disposition::Queue
        };
        let decision = ArbitrationDecision {
            active_problem_id,
            disposition,
            score: ask.score,
            reason: if accept {
                "user accepted the switch".into()
            } else {
                "user declined the switch".into()
            },
            candidate_problem_id: Some(ask.candidate_problem_id),
        };
        self.sink.record(&KernelEvent::Arbitration {
            active_problem_id: decision.active_problem_id.clone(),
            candidate_problem_id: decision.candidate_problem_id.clone(),
            disposition,
            score: decision.score,
        });
        Ok(decision)
    }

    // ── Stance ───────────────────────────────────────────────────

    /// Ask the gate the edge needs, then attempt the transition. Denied
    /// gates still reach the stance machine so the attempt is audited.
    pub async fn request_stance(
        &self,
        session: &mut Session,
        target: Stance,
        reason: &str,
    ) -> Result<TransitionRecord> {
        let from = session.stance.current();
        let authorization = match required_gate(from, target) {
            None => None,
            Some(gate) => {
                let active = session.problems.active().map(|p| p.id.clone());
                let commitment_turns = active
                    .as_deref()
                    .and_then(|id| session.commitments.active_for(id))
                    .map_or(self.config.commitment.default_turns, |c| c.remaining_turns);
                let ctx = GateContext {
                    problem_id: active,
                    from: Some(from),
                    to: Some(target),
                    commitment_turns: Some(commitment_turns),
                    ..GateContext::at_turn(session.turn).with_reason(reason)
                };
                session.gates.authorize(gate, &ctx).ok()
            }
        };
        session.stance.transition(target, reason, authorization).await
    }

    // ── Commitments ──────────────────────────────────────────────

    pub async fn create_commitment(
        &self,
        session: &mut Session,
        problem_id: &str,
        description: &str,
        turns: Option<u32>,
    ) -> Result<Commitment> {
        if session.problems.get(problem_id).is_none() {
            return Err(KernelError::validation_failed(format!(
                "unknown problem {problem_id}"
            )));
        }
        let turns = turns.unwrap_or(self.config.commitment.default_turns);
        let ctx = GateContext {
            commitment_turns: Some(turns),
            ..GateContext::at_turn(session.turn)
                .with_problem(problem_id)
                .with_reason(description)
        };
        let authorization = session.gates.authorize(GateKind::Commitment, &ctx)?;
        let commitment = session
            .commitments
            .create(problem_id, description, turns, authorization)?;
        self.log_commitment(episode_types::COMMITMENT_CREATED, &commitment, session.turn)
            .await?;
        Ok(commitment)
    }

    pub async fn complete_commitment(
        &self,
        session: &mut Session,
        commitment_id: &str,
    ) -> Result<Commitment> {
        let commitment = session.commitments.complete(commitment_id)?;
        self.log_commitment(episode_types::COMMITMENT_CLOSED, &commitment, session.turn)
            .await?;
        Ok(commitment)
    }

    pub async fn abandon_commitment(
        &self,
        session: &mut Session,
        commitment_id: &str,
        reason: &str,
    ) -> Result<Commitment> {
        let commitment = session.commitments.abandon(commitment_id, reason)?;
        self.log_commitment(episode_types::COMMITMENT_CLOSED, &commitment, session.turn)
            .await?;
        Ok(commitment)
    }

    pub fn renew_commitment(
        &self,
        session: &mut Session,
        problem_id: &str,
        extra_turns: u32,
    ) -> Result<Commitment> {
        let commitment = session.commitments.renew(problem_id, extra_turns)?;
        self.record_commitment(&commitment);
        Ok(commitment)
    }

    fn record_commitment(&self, commitment: &Commitment) {
        self.sink.record(&KernelEvent::CommitmentLifecycle {
            commitment_id: commitment.id.clone(),
            problem_id: commitment.problem_id.clone(),
            status: commitment.status,
            remaining_turns: commitment.remaining_turns,
        });
    }

    async fn log_commitment(
        &self,
        entry_type: &str,
        commitment: &Commitment,
        turn: u64,
    ) -> Result<()> {
        self.record_commitment(commitment);
        self.bus
            .log_episode(
                NewEpisode::new(
                    entry_type,
                    json!({
                        "commitment_id": commitment.id,
                        "status": commitment.status,
                        "remaining_turns": commitment.remaining_turns,
                        "description": commitment.description,
                        "reason": commitment.closed_reason,
                        "turn": turn,
                    }),
                )
                .for_problem(&commitment.problem_id)
                .with_tag("commitment"),
            )
            .await?;
        Ok(())
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Route a write through the write gate, then the WriteApproval gate.
    /// Both outcomes are published; the decision itself is returned.
    pub fn evaluate_write(&self, session: &mut Session, request: &WriteRequest) -> WriteDecision {
        let decision = write_gate::evaluate(request);
        self.sink.record(&KernelEvent::WriteDecision {
            requested: decision.requested,
            target: decision.target,
            approved: decision.approved,
            reason: decision.reason.clone(),
        });
        let ctx = GateContext {
            write: Some(decision.clone()),
            ..GateContext::at_turn(session.turn).with_reason(decision.reason.clone())
        };
        session.gates.attempt(GateKind::WriteApproval, &ctx);
        decision
    }

    // ── Preferences ──────────────────────────────────────────────

    pub fn classify_preference(&self, statement: &str, source: TurnSource) -> PreferenceVerdict {
        let verdict = preference::classify(statement, source);
        self.sink.record(&KernelEvent::PreferenceClassified {
            class: verdict.class,
            source,
        });
        verdict
    }

    /// Classify and store a preference where its tier allows.
    ///
    /// Explicit preferences go straight to Shared Reference. Confirm-required
    /// ones wait in the problem's working set for [`Self::confirm_preference`].
    /// Silent ones stay in the working set, behavioral ones in the trace.
    pub async fn record_preference(
        &self,
        session: &mut Session,
        key: &str,
        statement: &str,
        source: TurnSource,
        problem_id: Option<&str>,
    ) -> Result<PreferenceRecord> {
        let verdict = self.classify_preference(statement, source);
        let stored = match verdict.class {
            PreferenceClass::Explicit => {
                let write = SharedWrite {
                    key: preference_key(key),
                    value: json!(statement),
                    source: source.to_string(),
                    problem_id: problem_id.map(str::to_string),
                };
                self.bus
                    .write_shared(write, DerivedSignals::user_asserted())
                    .await?
                    .stored
            }
            PreferenceClass::InferredConfirmRequired | PreferenceClass::InferredSilent => {
                let problem_id = self.preference_scope(session, problem_id)?;
                let pending = verdict.class == PreferenceClass::InferredConfirmRequired;
                let artifact_key = preference_key(key);
                self.bus
                    .write_working(
                        &problem_id,
                        vec![WorkingEntry::Artifact {
                            key: artifact_key.clone(),
                            value: json!({
                                "statement": statement,
                                "class": verdict.class,
                                "pending_confirmation": pending,
                            }),
                        }],
                    )
                    .await?;
                if pending {
                    session.push_preference(PendingPreference {
                        key: key.to_string(),
                        statement: statement.to_string(),
                        problem_id: problem_id.clone(),
                        turn: session.turn,
                        raised_at: Utc::now(),
                    });
                }
                StoredWrite::Working {
                    problem_id,
                    key: artifact_key,
                }
            }
            PreferenceClass::Behavioral => {
                let entry = self
                    .bus
                    .log_episode(
                        NewEpisode::new(
                            episode_types::PREFERENCE_OBSERVED,
                            json!({ "key": key, "statement": statement, "source": source }),
                        )
                        .for_optional_problem(problem_id)
                        .with_tag("preference"),
                    )
                    .await?;
                StoredWrite::Episode(entry)
            }
        };
        Ok(PreferenceRecord { verdict, stored })
    }

    /// Promote a parked preference after the user confirmed it.
    pub async fn confirm_preference(
        &self,
        session: &mut Session,
        key: &str,
    ) -> Result<WriteOutcome> {
        let pending = session.take_preference(key).ok_or_else(|| {
            KernelError::validation_failed(format!("no preference '{key}' awaiting confirmation"))
        })?;
        let write = SharedWrite {
            key: preference_key(key),
            value: json!(pending.statement),
            source: TurnSource::User.to_string(),
            problem_id: Some(pending.problem_id.clone()),
        };
        match self
            .bus
            .write_shared(write, DerivedSignals::user_asserted())
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                session.push_preference(pending);
                Err(error)
            }
        }
    }

    fn preference_scope(&self, session: &Session, problem_id: Option<&str>) -> Result<String> {
        problem_id
            .map(str::to_string)
            .or_else(|| session.problems.active().map(|p| p.id.clone()))
            .ok_or_else(|| {
                KernelError::validation_failed(
                    "inferred preferences need a problem to hold them",
                )
            })
    }

    // ── Agents ───────────────────────────────────────────────────

    /// Pass the AgentApproval gate, then run the bundle. The orchestrator
    /// never sees a bundle the gate refused.
    pub async fn approve_and_run_agents(
        &self,
        session: &mut Session,
        agents: &[Arc<dyn Agent>],
        reducer: &Reducer,
        parallel: bool,
        context: BundleContext,
        requested_capabilities: Vec<String>,
    ) -> Result<OrchestratorResult> {
        let ctx = GateContext {
            problem_id: context.problem_id.clone(),
            agent_count: agents.len(),
            requested_capabilities,
            ..GateContext::at_turn(session.turn).with_reason(context.instruction.clone())
        };
        let authorization = session.gates.authorize(GateKind::AgentApproval, &ctx)?;
        let problem_id = context.problem_id.clone();
        let result = self
            .orchestrator
            .execute(agents, reducer, parallel, context, authorization)
            .await?;

        self.bus
            .log_episode(
                NewEpisode::new(
                    episode_types::ORCHESTRATION,
                    json!({
                        "bundle_id": result.bundle_id,
                        "status": result.status,
                        "agents": agents.iter().map(|a| a.id()).collect::<Vec<_>>(),
                        "timed_out": result.timed_out,
                        "errored": result.errored,
                        "reason": result.reason,
                        "elapsed_ms": result.elapsed_ms,
                    }),
                )
                .for_optional_problem(problem_id.as_deref())
                .with_tag("orchestrator"),
            )
            .await?;
        Ok(result)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

fn preference_key(key: &str) -> String {
    format!("preference:{key}")
}
