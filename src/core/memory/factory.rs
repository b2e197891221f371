use super::in_memory::{
    InMemoryEpisodicTrace, InMemorySharedReferences, InMemorySynthesis, InMemoryWorkingSets,
};
use super::sqlite::{
    SqliteEpisodicTrace, SqliteSharedReferences, SqliteSynthesis, SqliteWorkingSets, open_pool,
};
use super::traits::{EpisodicStore, SharedReferenceStore, SynthesisStore, WorkingSetStore};
use crate::config::StorageConfig;
use std::sync::Arc;

/// One handle per compartment. Backends may differ per compartment.
#[derive(Clone)]
pub struct CompartmentStores {
    pub working: Arc<dyn WorkingSetStore>,
    pub shared: Arc<dyn SharedReferenceStore>,
    pub episodic: Arc<dyn EpisodicStore>,
    pub synthesis: Arc<dyn SynthesisStore>,
}

impl CompartmentStores {
    pub fn in_memory() -> Self {
        Self {
            working: Arc::new(InMemoryWorkingSets::new()),
            shared: Arc::new(InMemorySharedReferences::new()),
            episodic: Arc::new(InMemoryEpisodicTrace::new()),
            synthesis: Arc::new(InMemorySynthesis::new()),
        }
    }

    pub async fn sqlite(path: &std::path::Path) -> anyhow::Result<Self> {
        let pool = open_pool(path).await?;
        Ok(Self {
            working: Arc::new(SqliteWorkingSets::new(pool.clone())),
            shared: Arc::new(SqliteSharedReferences::new(pool.clone())),
            episodic: Arc::new(SqliteEpisodicTrace::new(pool.clone())),
            synthesis: Arc::new(SqliteSynthesis::new(pool)),
        })
    }
}

pub async fn create_stores(config: &StorageConfig) -> anyhow::Result<CompartmentStores> {
    match config.backend.as_str() {
        "sqlite" => CompartmentStores::sqlite(&config.resolved_path()).await,
        "memory" | "none" => Ok(CompartmentStores::in_memory()),
        other => {
            tracing::warn!("Unknown storage backend '{other}', falling back to memory");
            Ok(CompartmentStores::in_memory())
        }
    }
}
