use crate::error::{KernelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProblemState {
    Active,
    Paused,
    /// Queued by the arbiter; re-evaluated every turn.
    Background,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub name: String,
    pub priority: u8,
    pub state: ProblemState,
    pub last_progress_at: DateTime<Utc>,
    /// Urgency from the most recent turn that raised this problem.
    #[serde(default)]
    pub last_urgency: f64,
    pub created_at: DateTime<Utc>,
}

/// Candidate problems for one session. At most one is `Active`.
#[derive(Debug, Default)]
pub struct ProblemRegistry {
    problems: Vec<Problem>,
}

impl ProblemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a problem in the `Paused` state.
    pub fn register(
        &mut self,
        id: &str,
        name: &str,
        priority: u8,
        now: DateTime<Utc>,
    ) -> Result<Problem> {
        if id.trim().is_empty() {
            return Err(KernelError::validation_failed("problem id must not be empty"));
        }
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
            return Err(KernelError::validation_failed(format!(
                "priority {priority} outside {MIN_PRIORITY}..={MAX_PRIORITY}"
            )));
        }
        if self.get(id).is_some() {
            return Err(KernelError::conflict_detected(format!(
                "problem {id} already registered"
            )));
        }
        let problem = Problem {
            id: id.to_string(),
            name: name.to_string(),
            priority,
            state: ProblemState::Paused,
            last_progress_at: now,
            last_urgency: 0.0,
            created_at: now,
        };
        self.problems.push(problem.clone());
        Ok(problem)
    }

    /// Make `id` the active problem; the previous one is paused.
    pub fn activate(&mut self, id: &str, now: DateTime<Utc>) -> Result<Problem> {
        let state = self.require(id)?.state;
        if state == ProblemState::Completed {
            return Err(KernelError::validation_failed(format!(
                "problem {id} is completed"
            )));
        }
        for problem in &mut self.problems {
            if problem.state == ProblemState::Active && problem.id != id {
                problem.state = ProblemState::Paused;
            }
        }
        let problem = self.require_mut(id)?;
        if problem.state != ProblemState::Active {
            problem.state = ProblemState::Active;
            problem.last_progress_at = now;
        }
        Ok(problem.clone())
    }

    pub fn pause(&mut self, id: &str) -> Result<Problem> {
        self.set_open_state(id, ProblemState::Paused)
    }

    /// Queue a problem for re-evaluation on later turns.
    pub fn background(&mut self, id: &str) -> Result<Problem> {
        self.set_open_state(id, ProblemState::Background)
    }

    /// Archive a problem. Completed problems are kept, never deleted.
    pub fn complete(&mut self, id: &str, now: DateTime<Utc>) -> Result<Problem> {
        let problem = self.require_mut(id)?;
        if problem.state != ProblemState::Completed {
            problem.state = ProblemState::Completed;
            problem.last_progress_at = now;
        }
        Ok(problem.clone())
    }

    pub fn record_progress(&mut self, id: &str, now: DateTime<Utc>) -> Result<()> {
        self.require_mut(id)?.last_progress_at = now;
        Ok(())
    }

    pub fn set_urgency(&mut self, id: &str, urgency: f64) -> Result<()> {
        self.require_mut(id)?.last_urgency = urgency.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Problem> {
        self.problems.iter().find(|p| p.id == id)
    }

    pub fn active(&self) -> Option<&Problem> {
        self.problems
            .iter()
            .find(|p| p.state == ProblemState::Active)
    }

    /// Background problems in registration order.
    pub fn queued(&self) -> Vec<&Problem> {
        self.problems
            .iter()
            .filter(|p| p.state == ProblemState::Background)
            .collect()
    }

    pub fn list(&self) -> &[Problem] {
        &self.problems
    }

    fn set_open_state(&mut self, id: &str, state: ProblemState) -> Result<Problem> {
        let problem = self.require_mut(id)?;
        if problem.state == ProblemState::Completed {
            return Err(KernelError::validation_failed(format!(
                "problem {id} is completed"
            )));
        }
        problem.state = state;
        Ok(problem.clone())
    }

    fn require(&self, id: &str) -> Result<&Problem> {
        self.get(id)
            .ok_or_else(|| KernelError::validation_failed(format!("unknown problem {id}")))
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Problem> {
        self.problems
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| KernelError::validation_failed(format!("unknown problem {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn register_validates_priority_and_uniqueness() {
        let mut registry = ProblemRegistry::new();
        let now = Utc::now();
        assert!(registry.register("p0", "zero", 0, now).is_err());
        assert!(registry.register("p11", "eleven", 11, now).is_err());
        registry.register("p1", "parser", 5, now).unwrap();
        let err = registry.register("p1", "again", 5, now).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConflictDetected);
    }

    #[test]
    fn only_one_problem_is_active() {
        let mut registry = ProblemRegistry::new();
        let now = Utc::now();
        registry.register("p1", "a", 5, now).unwrap();
        registry.register("p2", "b", 5, now).unwrap();
        registry.activate("p1", now).unwrap();
        registry.activate("p2", now).unwrap();

        assert_eq!(registry.active().unwrap().id, "p2");
        assert_eq!(registry.get("p1").unwrap().state, ProblemState::Paused);
        assert_eq!(
            registry
                .list()
                .iter()
                .filter(|p| p.state == ProblemState::Active)
                .count(),
            1
        );
    }

    #[test]
    fn completed_problems_are_archived_not_reopened() {
        let mut registry = ProblemRegistry::new();
        let now = Utc::now();
        registry.register("p1", "a", 5, now).unwrap();
        registry.complete("p1", now).unwrap();
        assert!(registry.activate("p1", now).is_err());
        assert!(registry.background("p1").is_err());
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn queued_lists_background_problems() {
        let mut registry = ProblemRegistry::new();
        let now = Utc::now();
        registry.register("p1", "a", 5, now).unwrap();
        registry.register("p2", "b", 7, now).unwrap();
        registry.background("p2").unwrap();
        registry.set_urgency("p2", 3.0).unwrap();

        let queued = registry.queued();
        assert_eq!(queued.len(), 1);
        assert!((queued[0].last_urgency - 1.0).abs() < f64::EPSILON);
    }
}
