use crate::core::gates::{GateAuthorization, GateKind};
use crate::core::memory::{MemoryBus, NewEpisode, episode_types};
use crate::error::{KernelError, Result};
use crate::observability::{EventSink, KernelEvent};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, RwLock};
use strum::{Display, EnumIter, EnumString};
use tokio::sync::Mutex as AsyncMutex;

/// Operating mode: exploration or exploitation, crossed with accuracy or
/// momentum.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIter,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Stance {
    /// Exploration, accuracy.
    #[default]
    Sensemaking,
    /// Exploration, momentum.
    Discovery,
    /// Exploitation, momentum.
    Execution,
    /// Exploitation, accuracy.
    Evaluation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionClass {
    Clarify,
    Explore,
    Research,
    Prototype,
    Implement,
    WriteMemory,
    Review,
    Verify,
    Synthesize,
}

impl Stance {
    pub const fn allowed_actions(self) -> &'static [ActionClass] {
        match self {
            Self::Sensemaking => &[
                ActionClass::Clarify,
                ActionClass::Explore,
                ActionClass::Research,
                ActionClass::Review,
            ],
            Self::Discovery => &[
                ActionClass::Explore,
                ActionClass::Research,
                ActionClass::Prototype,
            ],
            Self::Execution => &[
                ActionClass::Prototype,
                ActionClass::Implement,
                ActionClass::WriteMemory,
            ],
            Self::Evaluation => &[
                ActionClass::Review,
                ActionClass::Verify,
                ActionClass::Synthesize,
                ActionClass::WriteMemory,
            ],
        }
    }

    pub fn permits(self, action: ActionClass) -> bool {
        self.allowed_actions().contains(&action)
    }

    const fn is_exploratory(self) -> bool {
        matches!(self, Self::Sensemaking | Self::Discovery)
    }
}

/// Gate that must authorize `from -> to`. `None` for a self-transition.
///
/// An Emergency authorization also opens any edge leaving Execution, in
/// place of the gate named here. It opens nothing else.
pub fn required_gate(from: Stance, to: Stance) -> Option<GateKind> {
    if from == to {
        return None;
    }
    let gate = match (from, to) {
        (Stance::Sensemaking, Stance::Discovery) | (Stance::Discovery, Stance::Sensemaking) => {
            GateKind::Framing
        }
        (_, Stance::Execution) => GateKind::Commitment,
        (_, Stance::Evaluation) => GateKind::Evaluation,
        (Stance::Evaluation, to) if to.is_exploratory() => GateKind::Evaluation,
        (Stance::Execution, _) => GateKind::Emergency,
        _ => GateKind::Framing,
    };
    Some(gate)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: Stance,
    pub to: Stance,
    pub gate: GateKind,
    pub reason: String,
    pub episode_id: String,
}

/// Holds the current stance. Never authorizes itself: every transition
/// consumes a [`GateAuthorization`] and is written to the trace before the
/// new state becomes visible.
pub struct StanceMachine {
    current: RwLock<Stance>,
    transition_lock: AsyncMutex<()>,
    bus: Arc<MemoryBus>,
    sink: Arc<dyn EventSink>,
}

impl StanceMachine {
    pub fn new(bus: Arc<MemoryBus>, sink: Arc<dyn EventSink>) -> Self {
        Self::starting_in(Stance::default(), bus, sink)
    }

    pub fn starting_in(initial: Stance, bus: Arc<MemoryBus>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            current: RwLock::new(initial),
            transition_lock: AsyncMutex::new(()),
            bus,
            sink,
        }
    }

    pub fn current(&self) -> Stance {
        *self
            .current
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn allowed_actions(&self) -> &'static [ActionClass] {
        self.current().allowed_actions()
    }

    pub fn permits(&self, action: ActionClass) -> bool {
        self.current().permits(action)
    }

    /// Attempt `current -> target`. `None` means the gate was not granted;
    /// the attempt is still audited.
    pub async fn transition(
        &self,
        target: Stance,
        reason: &str,
        authorization: Option<GateAuthorization>,
    ) -> Result<TransitionRecord> {
        let _guard = self.transition_lock.lock().await;
        let from = self.current();
        let required = required_gate(from, target);

        let failure = match (required, &authorization) {
            (None, _) => Some(KernelError::stance_violation(format!("already in {from}"))),
            (Some(gate), None) => Some(KernelError::gate_denied(format!(
                "{from} -> {target} needs the {gate} gate"
            ))),
            (Some(gate), Some(auth))
                if auth.gate() != gate
                    && !(auth.gate() == GateKind::Emergency && from == Stance::Execution) =>
            {
                Some(KernelError::stance_violation(format!(
                    "{} authorization cannot open {from} -> {target} (needs {gate})",
                    auth.gate()
                )))
            }
            _ => None,
        };

        let used_gate = authorization.as_ref().map(GateAuthorization::gate).or(required);
        let episode = NewEpisode::new(
            episode_types::STANCE_TRANSITION,
            json!({
                "from": from,
                "to": target,
                "gate": used_gate,
                "success": failure.is_none(),
                "reason": failure.as_ref().map_or(reason, |e| e.message.as_str()),
            }),
        )
        .with_tag("stance");

        if let Some(error) = failure {
            if let Err(log_error) = self.bus.log_episode(episode).await {
                tracing::warn!(error = %log_error, "failed to audit rejected stance transition");
            }
            self.sink.record(&KernelEvent::StanceTransition {
                from,
                to: target,
                gate: used_gate,
                success: false,
                reason: error.message.clone(),
            });
            return Err(error);
        }

        let entry = self.bus.log_episode(episode).await?;
        *self
            .current
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = target;

        let gate = used_gate.unwrap_or(GateKind::Framing);
        self.sink.record(&KernelEvent::StanceTransition {
            from,
            to: target,
            gate: Some(gate),
            success: true,
            reason: reason.to_string(),
        });
        Ok(TransitionRecord {
            from,
            to: target,
            gate,
            reason: reason.to_string(),
            episode_id: entry.id,
        })
    }
}
