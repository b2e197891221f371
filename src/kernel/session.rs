use crate::core::commitment::CommitmentManager;
use crate::core::gates::GateController;
use crate::core::problems::ProblemRegistry;
use crate::core::stance::{Stance, StanceMachine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A switch the arbiter surfaced instead of deciding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAsk {
    pub candidate_problem_id: String,
    pub active_problem_id: Option<String>,
    pub score: f64,
    pub turn: u64,
    pub reason: String,
}

/// An inferred preference parked until the user confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPreference {
    pub key: String,
    pub statement: String,
    pub problem_id: String,
    pub turn: u64,
    pub raised_at: DateTime<Utc>,
}

/// Per-conversation kernel state. Turns are processed one at a time, so a
/// session is owned by a single caller and mutated through the kernel.
pub struct Session {
    id: String,
    pub(crate) turn: u64,
    pub(crate) stance: StanceMachine,
    pub(crate) gates: GateController,
    pub(crate) commitments: CommitmentManager,
    pub(crate) problems: ProblemRegistry,
    pub(crate) pending_asks: Vec<PendingAsk>,
    pub(crate) pending_preferences: Vec<PendingPreference>,
}

impl Session {
    pub(crate) fn new(stance: StanceMachine, gates: GateController) -> Self {
        Self {
            id: format!("ses_{}", Uuid::new_v4().simple()),
            turn: 0,
            stance,
            gates,
            commitments: CommitmentManager::new(),
            problems: ProblemRegistry::new(),
            pending_asks: Vec::new(),
            pending_preferences: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current turn number; zero before the first `begin_turn`.
    pub fn turn(&self) -> u64 {
        self.turn
    }

    pub fn stance(&self) -> Stance {
        self.stance.current()
    }

    pub fn stance_machine(&self) -> &StanceMachine {
        &self.stance
    }

    pub fn problems(&self) -> &ProblemRegistry {
        &self.problems
    }

    pub fn commitments(&self) -> &CommitmentManager {
        &self.commitments
    }

    pub fn gates(&self) -> &GateController {
        &self.gates
    }

    /// Replace gate evaluators for this session only.
    pub fn gates_mut(&mut self) -> &mut GateController {
        &mut self.gates
    }

    pub fn pending_asks(&self) -> &[PendingAsk] {
        &self.pending_asks
    }

    pub fn pending_preferences(&self) -> &[PendingPreference] {
        &self.pending_preferences
    }

    pub(crate) fn take_ask(&mut self, candidate_problem_id: &str) -> Option<PendingAsk> {
        let index = self
            .pending_asks
            .iter()
            .position(|ask| ask.candidate_problem_id == candidate_problem_id)?;
        Some(self.pending_asks.remove(index))
    }

    pub(crate) fn push_ask(&mut self, ask: PendingAsk) {
        self.pending_asks
            .retain(|existing| existing.candidate_problem_id != ask.candidate_problem_id);
        self.pending_asks.push(ask);
    }

    pub(crate) fn take_preference(&mut self, key: &str) -> Option<PendingPreference> {
        let index = self
            .pending_preferences
            .iter()
            .position(|pending| pending.key == key)?;
        Some(self.pending_preferences.remove(index))
    }

    pub(crate) fn push_preference(&mut self, pending: PendingPreference) {
        self.pending_preferences
            .retain(|existing| existing.key != pending.key);
        self.pending_preferences.push(pending);
    }
}
