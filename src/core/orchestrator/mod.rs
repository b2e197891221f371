pub mod agent;
pub mod reducers;
pub mod validation;

pub use agent::{Agent, AgentOutput, AgentTask, OutputType};
pub use reducers::{MergeStrategy, ReduceOutcome, Reducer, Tiebreaker};
pub use validation::validate_output;

use crate::config::OrchestratorConfig;
use crate::core::gates::{GateAuthorization, GateKind};
use crate::core::providers::Provider;
use crate::error::{KernelError, Result};
use crate::observability::{EventSink, KernelEvent};
use crate::prompt::TeraEngine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strum::Display;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BundleStatus {
    Completed,
    Abstained,
    Escalated,
    Failed,
}

/// What the bundle is working on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleContext {
    pub problem_id: Option<String>,
    pub instruction: String,
}

impl BundleContext {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            problem_id: None,
            instruction: instruction.into(),
        }
    }

    #[must_use]
    pub fn for_problem(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = Some(problem_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub bundle_id: String,
    pub status: BundleStatus,
    /// The reduced proposal, present only when `status` is `Completed`.
    pub output: Option<AgentOutput>,
    /// Validated outputs in agent order, before reduction.
    pub outputs: Vec<AgentOutput>,
    pub timed_out: Vec<String>,
    pub errored: Vec<String>,
    pub reason: Option<String>,
    pub error: Option<KernelError>,
    pub elapsed_ms: u64,
}

enum Slot {
    Finished(anyhow::Result<AgentOutput>),
    TimedOut,
}

struct MapPhase {
    outputs: Vec<AgentOutput>,
    timed_out: Vec<String>,
    errored: Vec<String>,
    violation: Option<KernelError>,
}

impl MapPhase {
    fn new() -> Self {
        Self {
            outputs: Vec::new(),
            timed_out: Vec::new(),
            errored: Vec::new(),
            violation: None,
        }
    }
}

/// Runs approved agent bundles. Agents propose; nothing here decides.
pub struct Orchestrator {
    config: OrchestratorConfig,
    allowed_capabilities: Vec<String>,
    provider: Option<Arc<dyn Provider>>,
    prompts: TeraEngine,
    sink: Arc<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        allowed_capabilities: Vec<String>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            allowed_capabilities,
            provider: None,
            prompts: TeraEngine::with_kernel_templates()?,
            sink,
        })
    }

    /// Provider used by the synthesize reducer.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Map the bundle over `agents`, validate every output, then reduce.
    ///
    /// Validation failures abort the bundle and come back as a `Failed`
    /// result carrying the error. The reduced output is validated the same
    /// way. Timed-out agents are cancelled and left out of the reduction.
    pub async fn execute(
        &self,
        agents: &[Arc<dyn Agent>],
        reducer: &Reducer,
        parallel: bool,
        context: BundleContext,
        authorization: GateAuthorization,
    ) -> Result<OrchestratorResult> {
        if authorization.gate() != GateKind::AgentApproval {
            return Err(KernelError::stance_violation(format!(
                "{} authorization cannot start an agent bundle",
                authorization.gate()
            )));
        }
        if agents.is_empty() {
            return Err(KernelError::validation_failed("agent bundle is empty"));
        }

        let started = Instant::now();
        let bundle_id = format!("bnd_{}", Uuid::new_v4().simple());
        tracing::debug!(
            bundle_id = %bundle_id,
            agents = agents.len(),
            parallel,
            "starting agent bundle"
        );

        let map = if parallel {
            self.map_parallel(agents, &bundle_id, &context).await
        } else {
            self.map_serial(agents, &bundle_id, &context).await
        };

        let mut result = OrchestratorResult {
            bundle_id,
            status: BundleStatus::Failed,
            output: None,
            outputs: map.outputs,
            timed_out: map.timed_out,
            errored: map.errored,
            reason: None,
            error: None,
            elapsed_ms: 0,
        };

        if let Some(error) = map.violation {
            result.reason = Some(error.message.clone());
            result.error = Some(error);
        } else {
            match self.reduce(&result.outputs, reducer, &context).await {
                Ok(ReduceOutcome::Output(output)) => {
                    match validate_output(&output, &output.agent_id, &self.allowed_capabilities) {
                        Ok(()) => {
                            result.status = BundleStatus::Completed;
                            result.output = Some(output);
                        }
                        Err(error) => {
                            result.reason = Some(error.message.clone());
                            result.error = Some(error);
                        }
                    }
                }
                Ok(ReduceOutcome::Abstained(reason)) => {
                    result.status = BundleStatus::Abstained;
                    result.reason = Some(reason);
                }
                Ok(ReduceOutcome::Escalated(reason)) => {
                    result.status = BundleStatus::Escalated;
                    result.error = Some(KernelError::escalation_required(reason.clone()));
                    result.reason = Some(reason);
                }
                Err(error) => {
                    result.reason = Some(error.message.clone());
                    result.error = Some(error);
                }
            }
        }

        result.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.sink.record(&KernelEvent::Orchestration {
            bundle_id: result.bundle_id.clone(),
            status: result.status,
            agents: agents.len(),
            timed_out: result.timed_out.len(),
            elapsed_ms: result.elapsed_ms,
        });
        if result.status == BundleStatus::Failed {
            tracing::warn!(
                bundle_id = %result.bundle_id,
                reason = result.reason.as_deref().unwrap_or_default(),
                "agent bundle failed"
            );
        }
        Ok(result)
    }

    async fn map_parallel(
        &self,
        agents: &[Arc<dyn Agent>],
        bundle_id: &str,
        context: &BundleContext,
    ) -> MapPhase {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(self.config.agent_timeout_ms);
        let mut set = JoinSet::new();
        let mut task_index = HashMap::with_capacity(agents.len());

        for (index, agent) in agents.iter().enumerate() {
            let agent = Arc::clone(agent);
            let semaphore = Arc::clone(&semaphore);
            let token = cancel.child_token();
            let task = AgentTask {
                bundle_id: bundle_id.to_string(),
                problem_id: context.problem_id.clone(),
                instruction: context.instruction.clone(),
                previous: None,
            };
            let handle = set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let slot = match tokio::time::timeout(timeout, agent.run(task, token.clone())).await
                {
                    Ok(result) => Slot::Finished(result),
                    Err(_) => {
                        token.cancel();
                        Slot::TimedOut
                    }
                };
                (index, slot)
            });
            task_index.insert(handle.id(), index);
        }

        let mut slots: Vec<Option<AgentOutput>> = vec![None; agents.len()];
        let mut map = MapPhase::new();
        while let Some(joined) = set.join_next_with_id().await {
            let (index, slot) = match joined {
                Ok((_, done)) => done,
                Err(error) => {
                    let Some(&index) = task_index.get(&error.id()) else {
                        tracing::warn!(
                            error = %error,
                            bundle_id,
                            "unknown agent task did not complete"
                        );
                        continue;
                    };
                    let agent_id = agents[index].id();
                    tracing::warn!(
                        agent_id,
                        bundle_id,
                        panicked = error.is_panic(),
                        error = %error,
                        "agent task did not complete; excluded"
                    );
                    map.errored.push(agent_id.to_string());
                    continue;
                }
            };
            let agent_id = agents[index].id();
            match slot {
                Slot::TimedOut => {
                    tracing::warn!(agent_id, bundle_id, "agent timed out; excluded");
                    map.timed_out.push(agent_id.to_string());
                }
                Slot::Finished(Err(error)) => {
                    tracing::warn!(agent_id, bundle_id, error = %error, "agent failed; excluded");
                    map.errored.push(agent_id.to_string());
                }
                Slot::Finished(Ok(output)) => {
                    if let Err(error) =
                        validate_output(&output, agent_id, &self.allowed_capabilities)
                    {
                        cancel.cancel();
                        set.abort_all();
                        map.violation = Some(error);
                        break;
                    }
                    slots[index] = Some(output);
                }
            }
        }
        map.outputs = slots.into_iter().flatten().collect();
        map
    }

    async fn map_serial(
        &self,
        agents: &[Arc<dyn Agent>],
        bundle_id: &str,
        context: &BundleContext,
    ) -> MapPhase {
        let cancel = CancellationToken::new();
        let timeout = Duration::from_millis(self.config.agent_timeout_ms);
        let mut map = MapPhase::new();

        for agent in agents {
            let agent_id = agent.id();
            let task = AgentTask {
                bundle_id: bundle_id.to_string(),
                problem_id: context.problem_id.clone(),
                instruction: context.instruction.clone(),
                previous: map.outputs.last().cloned(),
            };
            let token = cancel.child_token();
            match tokio::time::timeout(timeout, agent.run(task, token.clone())).await {
                Err(_) => {
                    token.cancel();
                    tracing::warn!(agent_id, bundle_id, "agent timed out; excluded");
                    map.timed_out.push(agent_id.to_string());
                }
                Ok(Err(error)) => {
                    tracing::warn!(agent_id, bundle_id, error = %error, "agent failed; excluded");
                    map.errored.push(agent_id.to_string());
                }
                Ok(Ok(output)) => {
                    if let Err(error) =
                        validate_output(&output, agent_id, &self.allowed_capabilities)
                    {
                        cancel.cancel();
                        map.violation = Some(error);
                        break;
                    }
                    map.outputs.push(output);
                }
            }
        }
        map
    }

    async fn reduce(
        &self,
        outputs: &[AgentOutput],
        reducer: &Reducer,
        context: &BundleContext,
    ) -> Result<ReduceOutcome> {
        match reducer {
            Reducer::PassThrough => reducers::pass_through(outputs),
            Reducer::Merge { strategy } => reducers::merge(outputs, *strategy),
            Reducer::Vote {
                threshold,
                tiebreaker,
            } => Ok(reducers::vote(outputs, *threshold, *tiebreaker)),
            Reducer::Synthesize { lead } => {
                reducers::synthesize(
                    outputs,
                    lead,
                    &context.instruction,
                    self.provider.as_deref(),
                    &self.prompts,
                    &self.config.synthesis_model,
                )
                .await
            }
        }
    }

    /// Vote reducer with the configured threshold and tiebreaker.
    pub fn default_vote(&self) -> Reducer {
        Reducer::Vote {
            threshold: self.config.vote_threshold,
            tiebreaker: self.config.tiebreaker,
        }
    }

    /// Merge reducer with the configured strategy.
    pub fn default_merge(&self) -> Reducer {
        Reducer::Merge {
            strategy: self.config.merge_strategy,
        }
    }
}
