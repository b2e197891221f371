use super::agent::{AgentOutput, OutputType};
use crate::core::providers::Provider;
use crate::error::{KernelError, Result};
use crate::prompt::{TeraEngine, templates};
use serde::{Deserialize, Serialize};
use serde_json::json;
use strum::Display;

const SYNTHESIS_TEMPERATURE: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tiebreaker {
    First,
    #[default]
    Abstain,
    Escalate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MergeStrategy {
    #[default]
    Concatenate,
    Dedupe,
    SelectByConfidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Reducer {
    /// Pipeline: keep the last output.
    PassThrough,
    Merge { strategy: MergeStrategy },
    Vote { threshold: f64, tiebreaker: Tiebreaker },
    /// `lead` combines the other outputs with one generation call.
    Synthesize { lead: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReduceOutcome {
    Output(AgentOutput),
    Abstained(String),
    Escalated(String),
}

pub fn pass_through(outputs: &[AgentOutput]) -> Result<ReduceOutcome> {
    outputs
        .last()
        .cloned()
        .map(ReduceOutcome::Output)
        .ok_or_else(|| KernelError::strategy_failed("pass-through has no output to keep"))
}

pub fn merge(outputs: &[AgentOutput], strategy: MergeStrategy) -> Result<ReduceOutcome> {
    if outputs.is_empty() {
        return Err(KernelError::strategy_failed("merge has no outputs"));
    }
    if strategy == MergeStrategy::SelectByConfidence {
        let mut best = &outputs[0];
        for output in &outputs[1..] {
            if output.confidence().unwrap_or(0.0) > best.confidence().unwrap_or(0.0) {
                best = output;
            }
        }
        return Ok(ReduceOutcome::Output(best.clone()));
    }

    let mut parts: Vec<&AgentOutput> = Vec::with_capacity(outputs.len());
    for output in outputs {
        let duplicate = strategy == MergeStrategy::Dedupe
            && parts
                .iter()
                .any(|kept| kept.content.trim() == output.content.trim());
        if !duplicate {
            parts.push(output);
        }
    }

    let mut capabilities: Vec<String> = Vec::new();
    for capability in parts.iter().flat_map(|o| &o.requested_capabilities) {
        if !capabilities.contains(capability) {
            capabilities.push(capability.clone());
        }
    }
    let output_type = if parts.iter().all(|o| o.output_type == parts[0].output_type) {
        parts[0].output_type
    } else {
        OutputType::Proposal
    };

    Ok(ReduceOutcome::Output(AgentOutput {
        agent_id: "merge".into(),
        output_type,
        content: parts
            .iter()
            .map(|o| o.content.trim())
            .collect::<Vec<_>>()
            .join("\n\n"),
        requested_capabilities: capabilities,
        metadata: json!({
            "strategy": strategy,
            "sources": parts.iter().map(|o| o.agent_id.as_str()).collect::<Vec<_>>(),
        }),
    }))
}

/// Tally identical outputs. The winner needs `threshold` of the
/// non-abstaining votes; otherwise the tiebreaker applies.
pub fn vote(outputs: &[AgentOutput], threshold: f64, tiebreaker: Tiebreaker) -> ReduceOutcome {
    let ballots = outputs
        .iter()
        .filter(|o| !o.is_abstention())
        .collect::<Vec<_>>();
    if ballots.is_empty() {
        return ReduceOutcome::Abstained("no non-abstaining votes".into());
    }

    let mut tally: Vec<(&str, usize, &AgentOutput)> = Vec::new();
    for ballot in &ballots {
        let key = ballot.content.trim();
        match tally.iter_mut().find(|(k, _, _)| *k == key) {
            Some(entry) => entry.1 += 1,
            None => tally.push((key, 1, ballot)),
        }
    }
    let mut leader = tally[0];
    for entry in &tally[1..] {
        if entry.1 > leader.1 {
            leader = *entry;
        }
    }

    #[allow(clippy::cast_precision_loss)]
    let share = leader.1 as f64 / ballots.len() as f64;
    if share >= threshold {
        let winner = leader
            .2
            .clone()
            .with_metadata("votes", json!(leader.1))
            .with_metadata("share", json!(share));
        return ReduceOutcome::Output(winner);
    }

    let reason = format!(
        "top answer has {:.0}% of {} votes, below {:.0}%",
        share * 100.0,
        ballots.len(),
        threshold * 100.0
    );
    match tiebreaker {
        Tiebreaker::First => ReduceOutcome::Output(ballots[0].clone()),
        Tiebreaker::Abstain => ReduceOutcome::Abstained(reason),
        Tiebreaker::Escalate => ReduceOutcome::Escalated(reason),
    }
}

/// Have the lead agent's voice combine everyone's proposals. Falls back to
/// the lead's own output when the provider is missing or fails.
pub async fn synthesize(
    outputs: &[AgentOutput],
    lead: &str,
    instruction: &str,
    provider: Option<&dyn Provider>,
    prompts: &TeraEngine,
    model: &str,
) -> Result<ReduceOutcome> {
    let lead_output = outputs
        .iter()
        .find(|o| o.agent_id == lead)
        .ok_or_else(|| {
            KernelError::strategy_failed(format!("synthesis lead '{lead}' produced no output"))
        })?;
    let delegates = outputs
        .iter()
        .filter(|o| o.agent_id != lead)
        .map(|o| json!({ "agent_id": o.agent_id, "content": o.content }))
        .collect::<Vec<_>>();

    let Some(provider) = provider else {
        tracing::warn!(lead, "no provider for synthesis; keeping the lead's proposal");
        return Ok(ReduceOutcome::Output(lead_output.clone()));
    };

    let mut ctx = tera::Context::new();
    ctx.insert("instruction", instruction);
    ctx.insert("lead", &lead_output.content);
    ctx.insert("delegates", &delegates);
    let prompt = prompts.render(templates::SYNTHESIS_LEAD_NAME, &ctx)?;

    match provider
        .chat_with_system(
            Some(templates::SYNTHESIS_SYSTEM),
            &prompt,
            model,
            SYNTHESIS_TEMPERATURE,
        )
        .await
    {
        Ok(content) => Ok(ReduceOutcome::Output(AgentOutput {
            agent_id: lead.to_string(),
            output_type: OutputType::Proposal,
            content,
            requested_capabilities: Vec::new(),
            metadata: json!({ "synthesized_from": outputs.len() }),
        })),
        Err(error) => {
            tracing::warn!(
                lead,
                provider = provider.name(),
                error = %error,
                "synthesis call failed; keeping the lead's proposal"
            );
            Ok(ReduceOutcome::Output(lead_output.clone()))
        }
    }
}
