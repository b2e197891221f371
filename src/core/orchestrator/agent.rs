use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::Display;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OutputType {
    Proposal,
    Data,
    Artifact,
}

/// What an agent hands back. Proposals only; never a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: String,
    pub output_type: OutputType,
    pub content: String,
    #[serde(default)]
    pub requested_capabilities: Vec<String>,
    #[serde(default = "empty_metadata")]
    pub metadata: serde_json::Value,
}

fn empty_metadata() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl AgentOutput {
    pub fn proposal(agent_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            output_type: OutputType::Proposal,
            content: content.into(),
            requested_capabilities: Vec::new(),
            metadata: empty_metadata(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        if let Some(map) = self.metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.requested_capabilities.push(capability.into());
        self
    }

    pub fn confidence(&self) -> Option<f64> {
        self.metadata.get("confidence").and_then(serde_json::Value::as_f64)
    }

    /// An explicit abstention or an empty answer.
    pub fn is_abstention(&self) -> bool {
        self.content.trim().is_empty()
            || self
                .metadata
                .get("abstain")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    }
}

/// One unit of work handed to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentTask {
    pub bundle_id: String,
    pub problem_id: Option<String>,
    pub instruction: String,
    /// Output of the previous agent in a serial run.
    pub previous: Option<AgentOutput>,
}

/// An ephemeral helper worker. Implementations should check `cancel` at
/// their own checkpoints; the orchestrator will not wait for them past
/// the timeout.
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, task: AgentTask, cancel: CancellationToken)
    -> anyhow::Result<AgentOutput>;
}
