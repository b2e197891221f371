use crate::core::memory::Compartment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Who produced a turn, as tagged by the upstream classifier.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum TurnSource {
    #[default]
    User,
    Assistant,
    Agent,
    Tool,
    System,
    /// Usage observed by the host rather than said by anyone.
    Observation,
}

/// A competing answer the classifier saw in this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateOutput {
    pub content: String,
    pub confidence: f64,
}

/// Structured facts the classifier extracted. The kernel never parses the
/// raw text; everything it reasons about lives here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnContext {
    /// Problem the turn was addressed to, when it is a new or competing one.
    pub candidate_problem_id: Option<String>,
    /// Compartment this turn intends to write, if any.
    pub write_target: Option<Compartment>,
    pub artifacts_touched: usize,
    pub crosses_problem_boundary: bool,
    pub candidate_outputs: Vec<CandidateOutput>,
    pub contradicts_memory: bool,
    pub commitment_active: bool,
    pub shared_problem: bool,
    pub tool_verified: bool,
    pub urgency: f64,
    pub emergency: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnInput {
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: TurnSource,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub context: TurnContext,
}

impl TurnInput {
    pub fn new(text: impl Into<String>, source: TurnSource) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
            source,
            priority: None,
            context: TurnContext::default(),
        }
    }

    pub fn with_context(mut self, context: TurnContext) -> Self {
        self.context = context;
        self
    }
}
