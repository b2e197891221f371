use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use super::types::{
    Compartment, EpisodeEntry, EpisodeQuery, NewEpisode, NewPattern, SharedReference,
    SynthesizedPattern, WorkingEntry, WorkingSet,
};

/// Problem-scoped working sets. Keyed by problem id, never enumerated.
#[async_trait]
pub trait WorkingSetStore: Send + Sync {
    fn name(&self) -> &str;
    /// Returns `None` for missing or expired sets.
    async fn load(&self, problem_id: &str, now: DateTime<Utc>)
    -> anyhow::Result<Option<WorkingSet>>;
    async fn save(&self, set: &WorkingSet) -> anyhow::Result<()>;
    async fn clear(&self, problem_id: &str) -> anyhow::Result<bool>;
    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize>;
}

/// Versioned global facts. `put` never overwrites a prior version.
#[async_trait]
pub trait SharedReferenceStore: Send + Sync {
    fn name(&self) -> &str;
    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        source: &str,
    ) -> anyhow::Result<SharedReference>;
    /// Highest version for `key`.
    async fn get(&self, key: &str) -> anyhow::Result<Option<SharedReference>>;
    /// Every version for `key`, oldest first.
    async fn history(&self, key: &str) -> anyhow::Result<Vec<SharedReference>>;
    async fn keys(&self) -> anyhow::Result<Vec<String>>;
}

/// Append-only audit trail. There is deliberately no update or delete.
#[async_trait]
pub trait EpisodicStore: Send + Sync {
    fn name(&self) -> &str;
    async fn append(&self, episode: NewEpisode) -> anyhow::Result<EpisodeEntry>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<EpisodeEntry>>;
    /// Entries for the ids that exist, in trace order.
    async fn get_many(&self, ids: &[String]) -> anyhow::Result<Vec<EpisodeEntry>>;
    /// Matching entries, oldest first.
    async fn query(&self, query: &EpisodeQuery) -> anyhow::Result<Vec<EpisodeEntry>>;
    async fn count(&self) -> anyhow::Result<usize>;
}

/// Patterns with permanent evidence lists.
#[async_trait]
pub trait SynthesisStore: Send + Sync {
    fn name(&self) -> &str;
    async fn insert(&self, pattern: &SynthesizedPattern) -> anyhow::Result<()>;
    async fn get(&self, id: &str) -> anyhow::Result<Option<SynthesizedPattern>>;
    async fn list(&self) -> anyhow::Result<Vec<SynthesizedPattern>>;
    /// Appends evidence (never removes). Confidence never drops.
    async fn strengthen(
        &self,
        id: &str,
        extra_evidence: &[String],
        confidence: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<SynthesizedPattern>>;
    /// Drops unprotected patterns below `min_confidence`.
    async fn prune(&self, min_confidence: f64) -> anyhow::Result<usize>;
}
