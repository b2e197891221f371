use super::agent::AgentOutput;
use crate::error::{KernelError, Result};
use serde_json::json;

/// Phrases that turn a proposal into a decision.
const DECISION_MARKERS: &[&str] = &[
    "[decision]",
    "decision:",
    "final decision",
    "i have decided",
    "we have decided",
    "i hereby approve",
    "approved for execution",
    "this is now committed",
];

const DECISION_METADATA_KEYS: &[&str] = &["decision", "approved", "commit"];

/// Inline check run on every output before it can be reduced.
///
/// Malformed packets are `ValidationFailed`; decisions and capability
/// grabs are `AgentViolation`. Both abort the bundle.
pub fn validate_output(
    output: &AgentOutput,
    expected_agent_id: &str,
    allowed_capabilities: &[String],
) -> Result<()> {
    if output.agent_id.trim().is_empty() {
        return Err(malformed(output, "missing agent id"));
    }
    if output.agent_id != expected_agent_id {
        return Err(malformed(
            output,
            &format!("output claims agent '{}' but came from '{expected_agent_id}'", output.agent_id),
        ));
    }
    if !output.metadata.is_object() {
        return Err(malformed(output, "metadata must be a JSON object"));
    }

    let lowered = output.content.to_lowercase();
    if let Some(marker) = DECISION_MARKERS.iter().find(|m| lowered.contains(*m)) {
        return Err(violation(output, &format!("output contains decision marker '{marker}'")));
    }
    if let Some(key) = DECISION_METADATA_KEYS
        .iter()
        .find(|key| output.metadata.get(**key).is_some())
    {
        return Err(violation(output, &format!("metadata carries decision field '{key}'")));
    }
    if let Some(capability) = output
        .requested_capabilities
        .iter()
        .find(|c| !allowed_capabilities.contains(c))
    {
        return Err(violation(
            output,
            &format!("requested unauthorized capability '{capability}'"),
        ));
    }
    Ok(())
}

fn malformed(output: &AgentOutput, detail: &str) -> KernelError {
    KernelError::validation_failed(format!("malformed agent output: {detail}"))
        .with_context(json!({ "agent_id": output.agent_id }))
}

fn violation(output: &AgentOutput, detail: &str) -> KernelError {
    KernelError::agent_violation(format!("agent {}: {detail}", output.agent_id))
        .with_context(json!({ "agent_id": output.agent_id }))
}
