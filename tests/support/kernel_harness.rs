#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use iris_kernel::config::{KernelConfig, StorageConfig};
use iris_kernel::core::memory::CompartmentStores;
use iris_kernel::core::orchestrator::{Agent, AgentOutput, AgentTask};
use iris_kernel::core::turn::{TurnContext, TurnInput, TurnSource};
use iris_kernel::observability::MemorySink;
use iris_kernel::{GovernanceKernel, Session};

pub struct Harness {
    pub kernel: GovernanceKernel,
    pub session: Session,
    pub sink: Arc<MemorySink>,
}

pub fn harness() -> Harness {
    harness_with(KernelConfig::default())
}

pub fn harness_with(config: KernelConfig) -> Harness {
    let sink = Arc::new(MemorySink::new());
    let kernel = GovernanceKernel::new(config, CompartmentStores::in_memory(), sink.clone())
        .expect("default config builds a kernel");
    let session = kernel.open_session();
    Harness {
        kernel,
        session,
        sink,
    }
}

/// Kernel over a SQLite file inside `dir`, wired through the config factory.
pub async fn sqlite_kernel(dir: &TempDir) -> GovernanceKernel {
    let config = KernelConfig {
        storage: StorageConfig {
            backend: "sqlite".into(),
            path: dir.path().join("kernel.db").display().to_string(),
        },
        ..KernelConfig::default()
    };
    GovernanceKernel::from_config(config)
        .await
        .expect("sqlite kernel opens")
}

/// A user turn raising `candidate` at `at`.
pub fn raising(candidate: &str, priority: u8, urgency: f64, at: DateTime<Utc>) -> TurnInput {
    TurnInput {
        text: format!("about {candidate}"),
        timestamp: at,
        source: TurnSource::User,
        priority: Some(priority),
        context: TurnContext {
            candidate_problem_id: Some(candidate.to_string()),
            urgency,
            ..TurnContext::default()
        },
    }
}

pub struct ScriptedAgent {
    id: String,
    output: AgentOutput,
    delay: Duration,
}

impl ScriptedAgent {
    pub fn says(id: &str, content: &str) -> Arc<dyn Agent> {
        Arc::new(Self {
            id: id.to_string(),
            output: AgentOutput::proposal(id, content),
            delay: Duration::ZERO,
        })
    }

    pub fn returns(output: AgentOutput) -> Arc<dyn Agent> {
        Arc::new(Self {
            id: output.agent_id.clone(),
            output,
            delay: Duration::ZERO,
        })
    }

    pub fn stalls(id: &str) -> Arc<dyn Agent> {
        Arc::new(Self {
            id: id.to_string(),
            output: AgentOutput::proposal(id, "too late"),
            delay: Duration::from_secs(30),
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, _task: AgentTask, cancel: CancellationToken) -> anyhow::Result<AgentOutput> {
        tokio::select! {
            () = tokio::time::sleep(self.delay) => Ok(self.output.clone()),
            () = cancel.cancelled() => anyhow::bail!("cancelled"),
        }
    }
}
