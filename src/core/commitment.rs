use crate::core::gates::{GateAuthorization, GateKind};
use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CommitmentStatus {
    Active,
    Completed,
    Abandoned,
    Expired,
}

impl CommitmentStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

/// A turn-bounded lease of focus on one problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    pub problem_id: String,
    pub description: String,
    pub total_turns: u32,
    pub remaining_turns: u32,
    pub status: CommitmentStatus,
    pub created_turn: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_reason: Option<String>,
}

impl Commitment {
    pub fn is_active(&self) -> bool {
        self.status == CommitmentStatus::Active
    }

    /// Share of the lease already used, 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        if self.total_turns == 0 {
            return 1.0;
        }
        let used = self.total_turns.saturating_sub(self.remaining_turns);
        f64::from(used) / f64::from(self.total_turns)
    }
}

/// What a tick did to one active commitment.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Continuing(Commitment),
    Expired(Commitment),
}

#[derive(Debug, Default)]
pub struct CommitmentManager {
    commitments: Vec<Commitment>,
    last_tick_turn: Option<u64>,
}

impl CommitmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a commitment. Requires a Commitment gate grant scoped to this
    /// problem and turn budget; fails with `ConflictDetected` while the
    /// problem already has an active one.
    pub fn create(
        &mut self,
        problem_id: &str,
        description: &str,
        turns: u32,
        authorization: GateAuthorization,
    ) -> Result<Commitment> {
        if authorization.gate() != GateKind::Commitment {
            return Err(KernelError::stance_violation(format!(
                "{} authorization cannot open a commitment",
                authorization.gate()
            )));
        }
        if turns == 0 {
            return Err(KernelError::validation_failed(
                "commitments need at least one turn",
            ));
        }
        if authorization.problem_id() != Some(problem_id) {
            return Err(KernelError::stance_violation(format!(
                "commitment authorization was granted for {}, not {problem_id}",
                authorization.problem_id().unwrap_or("no problem")
            )));
        }
        if authorization.commitment_turns() != Some(turns) {
            return Err(KernelError::stance_violation(format!(
                "commitment authorization covers {}, not {turns} turns",
                authorization
                    .commitment_turns()
                    .map_or_else(|| "no turn budget".to_string(), |t| format!("{t} turns"))
            )));
        }
        if let Some(existing) = self.active_for(problem_id) {
            return Err(KernelError::conflict_detected(format!(
                "problem {problem_id} already has active commitment {}",
                existing.id
            )));
        }

        let commitment = Commitment {
            id: format!("cmt_{}", Uuid::new_v4().simple()),
            problem_id: problem_id.to_string(),
            description: description.to_string(),
            total_turns: turns,
            remaining_turns: turns,
            status: CommitmentStatus::Active,
            created_turn: authorization.turn(),
            closed_reason: None,
        };
        self.commitments.push(commitment.clone());
        Ok(commitment)
    }

    /// Decrement every active commitment once for `turn`. Calling again for
    /// the same (or an earlier) turn is a no-op.
    pub fn tick(&mut self, turn: u64) -> Vec<TickOutcome> {
        if self.last_tick_turn.is_some_and(|last| turn <= last) {
            return Vec::new();
        }
        self.last_tick_turn = Some(turn);

        let mut outcomes = Vec::new();
        for commitment in self.commitments.iter_mut().filter(|c| c.is_active()) {
            commitment.remaining_turns = commitment.remaining_turns.saturating_sub(1);
            if commitment.remaining_turns == 0 {
                commitment.status = CommitmentStatus::Expired;
                commitment.closed_reason = Some("turn budget exhausted".into());
                outcomes.push(TickOutcome::Expired(commitment.clone()));
            } else {
                outcomes.push(TickOutcome::Continuing(commitment.clone()));
            }
        }
        outcomes
    }

    pub fn renew(&mut self, problem_id: &str, extra_turns: u32) -> Result<Commitment> {
        if extra_turns == 0 {
            return Err(KernelError::validation_failed("renewal needs at least one turn"));
        }
        let commitment = self
            .commitments
            .iter_mut()
            .find(|c| c.is_active() && c.problem_id == problem_id)
            .ok_or_else(|| {
                KernelError::validation_failed(format!(
                    "problem {problem_id} has no active commitment to renew"
                ))
            })?;
        commitment.total_turns = commitment.total_turns.saturating_add(extra_turns);
        commitment.remaining_turns = commitment.remaining_turns.saturating_add(extra_turns);
        Ok(commitment.clone())
    }

    pub fn complete(&mut self, id: &str) -> Result<Commitment> {
        self.close(id, CommitmentStatus::Completed, None)
    }

    pub fn abandon(&mut self, id: &str, reason: &str) -> Result<Commitment> {
        self.close(id, CommitmentStatus::Abandoned, Some(reason.to_string()))
    }

    /// Terminal transitions are idempotent: closing a closed commitment
    /// returns it unchanged.
    fn close(
        &mut self,
        id: &str,
        status: CommitmentStatus,
        reason: Option<String>,
    ) -> Result<Commitment> {
        let commitment = self
            .commitments
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| KernelError::validation_failed(format!("unknown commitment {id}")))?;
        if commitment.is_active() {
            commitment.status = status;
            commitment.closed_reason = reason;
        }
        Ok(commitment.clone())
    }

    pub fn get(&self, id: &str) -> Option<&Commitment> {
        self.commitments.iter().find(|c| c.id == id)
    }

    pub fn active_for(&self, problem_id: &str) -> Option<&Commitment> {
        self.commitments
            .iter()
            .find(|c| c.is_active() && c.problem_id == problem_id)
    }

    /// Every commitment ever opened this session, oldest first.
    pub fn history(&self) -> &[Commitment] {
        &self.commitments
    }
}
