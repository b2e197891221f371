use super::traits::{
    EpisodeEntry, EpisodeQuery, EpisodicStore, NewEpisode, SharedReference, SharedReferenceStore,
    SynthesisStore, SynthesizedPattern, WorkingSet, WorkingSetStore,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ── Working sets ─────────────────────────────────────────────────

#[derive(Default)]
pub struct InMemoryWorkingSets {
    sets: Mutex<HashMap<String, WorkingSet>>,
}

impl InMemoryWorkingSets {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkingSetStore for InMemoryWorkingSets {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(
        &self,
        problem_id: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<WorkingSet>> {
        let sets = lock(&self.sets);
        Ok(sets
            .get(problem_id)
            .filter(|set| !set.is_expired(now))
            .cloned())
    }

    async fn save(&self, set: &WorkingSet) -> anyhow::Result<()> {
        lock(&self.sets).insert(set.problem_id.clone(), set.clone());
        Ok(())
    }

    async fn clear(&self, problem_id: &str) -> anyhow::Result<bool> {
        Ok(lock(&self.sets).remove(problem_id).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let mut sets = lock(&self.sets);
        let before = sets.len();
        sets.retain(|_, set| !set.is_expired(now));
        Ok(before - sets.len())
    }
}

// ── Shared references ────────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySharedReferences {
    versions: Mutex<HashMap<String, Vec<SharedReference>>>,
}

impl InMemorySharedReferences {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SharedReferenceStore for InMemorySharedReferences {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        source: &str,
    ) -> anyhow::Result<SharedReference> {
        let now = Utc::now();
        let mut versions = lock(&self.versions);
        let history = versions.entry(key.to_string()).or_default();
        let (version, created_at) = history
            .last()
            .map_or((1, now), |latest| (latest.version + 1, latest.created_at));
        let reference = SharedReference {
            key: key.to_string(),
            value,
            version,
            source: source.to_string(),
            created_at,
            updated_at: now,
        };
        history.push(reference.clone());
        Ok(reference)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<SharedReference>> {
        Ok(lock(&self.versions)
            .get(key)
            .and_then(|history| history.last().cloned()))
    }

    async fn history(&self, key: &str) -> anyhow::Result<Vec<SharedReference>> {
        Ok(lock(&self.versions).get(key).cloned().unwrap_or_default())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let mut keys = lock(&self.versions).keys().cloned().collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }
}

// ── Episodic trace ───────────────────────────────────────────────

#[derive(Default)]
struct TraceState {
    entries: Vec<EpisodeEntry>,
    positions: HashMap<String, usize>,
}

#[derive(Default)]
pub struct InMemoryEpisodicTrace {
    state: Mutex<TraceState>,
}

impl InMemoryEpisodicTrace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EpisodicStore for InMemoryEpisodicTrace {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, episode: NewEpisode) -> anyhow::Result<EpisodeEntry> {
        let entry = episode.into_entry(Uuid::new_v4().to_string(), Utc::now());
        let mut state = lock(&self.state);
        let position = state.entries.len();
        state.positions.insert(entry.id.clone(), position);
        state.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<EpisodeEntry>> {
        let state = lock(&self.state);
        Ok(state
            .positions
            .get(id)
            .and_then(|&position| state.entries.get(position))
            .cloned())
    }

    async fn get_many(&self, ids: &[String]) -> anyhow::Result<Vec<EpisodeEntry>> {
        let state = lock(&self.state);
        let mut positions = ids
            .iter()
            .filter_map(|id| state.positions.get(id).copied())
            .collect::<Vec<_>>();
        positions.sort_unstable();
        positions.dedup();
        Ok(positions
            .into_iter()
            .filter_map(|position| state.entries.get(position).cloned())
            .collect())
    }

    async fn query(&self, query: &EpisodeQuery) -> anyhow::Result<Vec<EpisodeEntry>> {
        let state = lock(&self.state);
        let matching = state.entries.iter().filter(|entry| query.matches(entry));
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(matching.take(limit).cloned().collect())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        Ok(lock(&self.state).entries.len())
    }
}

// ── Semantic synthesis ───────────────────────────────────────────

#[derive(Default)]
pub struct InMemorySynthesis {
    patterns: Mutex<Vec<SynthesizedPattern>>,
}

impl InMemorySynthesis {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SynthesisStore for InMemorySynthesis {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, pattern: &SynthesizedPattern) -> anyhow::Result<()> {
        let mut patterns = lock(&self.patterns);
        if patterns.iter().any(|existing| existing.id == pattern.id) {
            anyhow::bail!("pattern already exists: {}", pattern.id);
        }
        patterns.push(pattern.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<SynthesizedPattern>> {
        Ok(lock(&self.patterns)
            .iter()
            .find(|pattern| pattern.id == id)
            .cloned())
    }

    async fn list(&self) -> anyhow::Result<Vec<SynthesizedPattern>> {
        Ok(lock(&self.patterns).clone())
    }

    async fn strengthen(
        &self,
        id: &str,
        extra_evidence: &[String],
        confidence: f64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Option<SynthesizedPattern>> {
        let mut patterns = lock(&self.patterns);
        let Some(pattern) = patterns.iter_mut().find(|pattern| pattern.id == id) else {
            return Ok(None);
        };
        for evidence_id in extra_evidence {
            if !pattern.evidence_ids.contains(evidence_id) {
                pattern.evidence_ids.push(evidence_id.clone());
            }
        }
        pattern.confidence = pattern.confidence.max(confidence.clamp(0.0, 1.0));
        pattern.last_strengthened_at = now;
        Ok(Some(pattern.clone()))
    }

    async fn prune(&self, min_confidence: f64) -> anyhow::Result<usize> {
        let mut patterns = lock(&self.patterns);
        let before = patterns.len();
        patterns.retain(|pattern| pattern.protected || pattern.confidence >= min_confidence);
        Ok(before - patterns.len())
    }
}
