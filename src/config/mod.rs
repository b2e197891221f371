pub mod schema;

pub use schema::{
    ArbiterConfig, CommitmentConfig, GatesConfig, KernelConfig, ObservabilityConfig,
    OrchestratorConfig, PreemptWeights, SignalsConfig, StorageConfig, WorkingSetConfig,
};
