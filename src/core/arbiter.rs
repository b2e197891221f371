use crate::config::{ArbiterConfig, PreemptWeights};
use crate::core::commitment::{Commitment, CommitmentManager};
use crate::core::problems::{MAX_PRIORITY, MIN_PRIORITY, Problem, ProblemRegistry, ProblemState};
use crate::error::{KernelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Disposition {
    Stay,
    Switch,
    /// Surface to the user; never decided silently.
    Ask,
    Queue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrationDecision {
    pub active_problem_id: Option<String>,
    pub disposition: Disposition,
    pub score: f64,
    pub reason: String,
    pub candidate_problem_id: Option<String>,
}

/// The four normalized inputs to the preempt score, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreemptTerms {
    pub priority_delta: f64,
    pub urgency: f64,
    pub staleness: f64,
    pub switch_cost: f64,
}

impl PreemptTerms {
    /// Weighted sum; switch cost enters inverted.
    pub fn score(&self, weights: &PreemptWeights) -> f64 {
        weights.priority * self.priority_delta
            + weights.urgency * self.urgency
            + weights.staleness * self.staleness
            + weights.switch_cost * (1.0 - self.switch_cost)
    }
}

/// Everything one arbitration reads. Nothing here is mutated.
pub struct ArbitrationInput<'a> {
    pub registry: &'a ProblemRegistry,
    pub commitments: &'a CommitmentManager,
    /// Problem raised by this turn, if any.
    pub candidate: Option<&'a str>,
    pub urgency: f64,
    /// Emergency already confirmed by the Emergency gate.
    pub emergency: bool,
    pub now: DateTime<Utc>,
}

pub struct Arbiter {
    config: ArbiterConfig,
}

impl Arbiter {
    pub fn new(config: ArbiterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    pub fn terms(
        &self,
        active: &Problem,
        candidate: &Problem,
        commitment: Option<&Commitment>,
        urgency: f64,
        now: DateTime<Utc>,
    ) -> PreemptTerms {
        let span = f64::from(MAX_PRIORITY - MIN_PRIORITY);
        let priority_delta =
            ((f64::from(candidate.priority) - f64::from(active.priority)) / span).clamp(0.0, 1.0);

        #[allow(clippy::cast_precision_loss)]
        let elapsed = (now - active.last_progress_at).num_milliseconds().max(0) as f64 / 1000.0;
        #[allow(clippy::cast_precision_loss)]
        let window = self.config.staleness_window_secs.max(1) as f64;
        let staleness = (elapsed / window).clamp(0.0, 1.0);

        let base = self.config.base_switch_cost.clamp(0.0, 1.0);
        let switch_cost = commitment.map_or(base, |c| {
            let progress = c.progress();
            base + (1.0 - base) * progress * progress
        });

        PreemptTerms {
            priority_delta,
            urgency: urgency.clamp(0.0, 1.0),
            staleness,
            switch_cost,
        }
    }

    pub fn disposition_for(&self, score: f64) -> Disposition {
        if score >= self.config.switch_threshold {
            Disposition::Switch
        } else if score >= self.config.ask_threshold {
            Disposition::Ask
        } else {
            Disposition::Queue
        }
    }

    /// Decide for this turn. Pure: identical inputs give identical output.
    pub fn arbitrate(&self, input: &ArbitrationInput<'_>) -> Result<ArbitrationDecision> {
        let registry = input.registry;
        let active = registry.active();
        let active_id = active.map(|p| p.id.clone());

        let candidate = match input.candidate {
            Some(id) => Some(registry.get(id).ok_or_else(|| {
                KernelError::validation_failed(format!("unknown candidate problem {id}"))
            })?),
            None => None,
        };

        if let Some(candidate) = candidate {
            if active.is_some_and(|a| a.id == candidate.id) {
                return Ok(decision(&active_id, Disposition::Stay, 0.0, "candidate is already active", None));
            }
            if candidate.state == ProblemState::Completed {
                return Ok(decision(
                    &active_id,
                    Disposition::Stay,
                    0.0,
                    "candidate is completed",
                    Some(&candidate.id),
                ));
            }
            if input.emergency {
                return Ok(decision(
                    &active_id,
                    Disposition::Switch,
                    1.0,
                    "emergency preempts the active problem",
                    Some(&candidate.id),
                ));
            }
            if active.is_none() {
                return Ok(decision(
                    &active_id,
                    Disposition::Switch,
                    1.0,
                    "no active problem",
                    Some(&candidate.id),
                ));
            }
        }

        let Some(active) = active else {
            let resumable = registry
                .queued()
                .into_iter()
                .fold(None::<&Problem>, |best, p| match best {
                    Some(b) if b.priority >= p.priority => Some(b),
                    _ => Some(p),
                });
            return Ok(match resumable {
                Some(problem) => decision(
                    &active_id,
                    Disposition::Switch,
                    1.0,
                    "no active problem; resuming queued work",
                    Some(&problem.id),
                ),
                None => decision(&active_id, Disposition::Stay, 0.0, "nothing to arbitrate", None),
            });
        };

        let mut contenders: Vec<(&Problem, f64)> = Vec::new();
        if let Some(candidate) = candidate {
            contenders.push((candidate, input.urgency));
        }
        for queued in registry.queued() {
            if !contenders.iter().any(|(p, _)| p.id == queued.id) {
                contenders.push((queued, queued.last_urgency));
            }
        }
        if contenders.is_empty() {
            return Ok(decision(&active_id, Disposition::Stay, 0.0, "no competing problem", None));
        }

        let commitment = input.commitments.active_for(&active.id);
        let mut best: Option<(&Problem, PreemptTerms, f64)> = None;
        for (problem, urgency) in contenders {
            let terms = self.terms(active, problem, commitment, urgency, input.now);
            let score = terms.score(&self.config.weights);
            if best.as_ref().is_none_or(|(_, _, top)| score > *top) {
                best = Some((problem, terms, score));
            }
        }
        let Some((winner, terms, score)) = best else {
            return Ok(decision(&active_id, Disposition::Stay, 0.0, "no competing problem", None));
        };

        let disposition = self.disposition_for(score);
        let reason = format!(
            "preempt score {score:.3} (priority {:.2}, urgency {:.2}, staleness {:.2}, switch cost {:.2})",
            terms.priority_delta, terms.urgency, terms.staleness, terms.switch_cost
        );
        Ok(decision(&active_id, disposition, score, &reason, Some(&winner.id)))
    }
}

fn decision(
    active_id: &Option<String>,
    disposition: Disposition,
    score: f64,
    reason: &str,
    candidate: Option<&str>,
) -> ArbitrationDecision {
    ArbitrationDecision {
        active_problem_id: active_id.clone(),
        disposition,
        score,
        reason: reason.to_string(),
        candidate_problem_id: candidate.map(str::to_string),
    }
}
