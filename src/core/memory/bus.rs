use super::factory::CompartmentStores;
use super::types::{
    Compartment, EpisodeEntry, EpisodeQuery, NewEpisode, NewPattern, SharedReference,
    SynthesizedPattern, WorkingEntry, WorkingSet, episode_types,
};
use super::write_gate::{self, WriteDecision, WriteRequest};
use crate::config::WorkingSetConfig;
use crate::core::signals::DerivedSignals;
use crate::error::{KernelError, Result};
use crate::observability::{EventSink, KernelEvent};
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// A request to record a global fact.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedWrite {
    pub key: String,
    pub value: serde_json::Value,
    pub source: String,
    /// Problem whose working set absorbs the write if it is kept local.
    pub problem_id: Option<String>,
}

/// Where an approved write actually ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredWrite {
    Shared(SharedReference),
    Pattern(SynthesizedPattern),
    Working { problem_id: String, key: String },
    Episode(EpisodeEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteOutcome {
    pub decision: WriteDecision,
    pub stored: StoredWrite,
}

/// Single access surface over the four compartments.
///
/// Shared Reference and Semantic Synthesis writes serialize on one lock per
/// compartment. Working Set writes serialize per problem only.
pub struct MemoryBus {
    stores: CompartmentStores,
    working_config: WorkingSetConfig,
    sink: Arc<dyn EventSink>,
    shared_lock: AsyncMutex<()>,
    synthesis_lock: AsyncMutex<()>,
    working_locks: std::sync::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl MemoryBus {
    pub fn new(
        stores: CompartmentStores,
        working_config: WorkingSetConfig,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            stores,
            working_config,
            sink,
            shared_lock: AsyncMutex::new(()),
            synthesis_lock: AsyncMutex::new(()),
            working_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn stores(&self) -> &CompartmentStores {
        &self.stores
    }

    fn problem_lock(&self, problem_id: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .working_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(
            locks
                .entry(problem_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    fn record_decision(&self, decision: &WriteDecision) {
        self.sink.record(&KernelEvent::WriteDecision {
            requested: decision.requested,
            target: decision.target,
            approved: decision.approved,
            reason: decision.reason.clone(),
        });
    }

    // ── Working set ──────────────────────────────────────────────

    /// Apply entries to a problem's working set. Never gated.
    pub async fn write_working(
        &self,
        problem_id: &str,
        entries: Vec<WorkingEntry>,
    ) -> Result<WorkingSet> {
        self.write_working_with_ttl(problem_id, entries, None).await
    }

    /// As [`Self::write_working`]; `ttl_secs` resets expiry from now, still
    /// bounded by the maximum lifetime measured from creation.
    pub async fn write_working_with_ttl(
        &self,
        problem_id: &str,
        entries: Vec<WorkingEntry>,
        ttl_secs: Option<u64>,
    ) -> Result<WorkingSet> {
        if problem_id.trim().is_empty() {
            return Err(KernelError::validation_failed(
                "working set writes need a problem id",
            ));
        }
        let lock = self.problem_lock(problem_id);
        let _guard = lock.lock().await;

        let now = Utc::now();
        let ttl = self.working_config.effective_ttl(ttl_secs);
        let mut set = match self.stores.working.load(problem_id, now).await? {
            Some(mut existing) => {
                if ttl_secs.is_some() {
                    let max_expiry = existing.created_at
                        + self.working_config.effective_ttl(Some(u64::MAX));
                    existing.expires_at = (now + ttl).min(max_expiry);
                }
                existing
            }
            None => WorkingSet::new(problem_id, now, ttl),
        };
        for entry in entries {
            set.apply(entry);
        }
        self.stores.working.save(&set).await?;
        Ok(set)
    }

    pub async fn read_working(&self, problem_id: &str) -> Result<Option<WorkingSet>> {
        Ok(self.stores.working.load(problem_id, Utc::now()).await?)
    }

    pub async fn clear_working(&self, problem_id: &str) -> Result<bool> {
        let lock = self.problem_lock(problem_id);
        let _guard = lock.lock().await;
        Ok(self.stores.working.clear(problem_id).await?)
    }

    pub async fn purge_expired_working(&self) -> Result<usize> {
        let purged = self.stores.working.purge_expired(Utc::now()).await?;
        if purged > 0 {
            tracing::debug!(purged, "memory.working.purged");
        }
        Ok(purged)
    }

    // ── Shared reference ─────────────────────────────────────────

    /// Gated write of a global fact. Denials are returned as `WriteDenied`.
    pub async fn write_shared(
        &self,
        write: SharedWrite,
        signals: DerivedSignals,
    ) -> Result<WriteOutcome> {
        let request = WriteRequest::new(
            Compartment::SharedReference,
            write.value.clone(),
            signals,
        );
        let decision = write_gate::evaluate(&request);
        self.record_decision(&decision);
        if !decision.approved {
            return Err(denied(&decision));
        }

        let stored = match decision.target {
            Compartment::SharedReference => {
                let _guard = self.shared_lock.lock().await;
                let reference = self
                    .stores
                    .shared
                    .put(&write.key, write.value, &write.source)
                    .await?;
                StoredWrite::Shared(reference)
            }
            Compartment::WorkingSet => {
                self.keep_local(write.problem_id.as_deref(), &write.key, write.value, &decision)
                    .await?
            }
            Compartment::EpisodicTrace | Compartment::SemanticSynthesis => {
                let episode = NewEpisode::new(
                    episode_types::WRITE_REDIRECTED,
                    json!({
                        "key": write.key,
                        "value": write.value,
                        "source": write.source,
                        "requested": decision.requested,
                        "reason": decision.reason,
                    }),
                )
                .for_optional_problem(write.problem_id.as_deref())
                .with_tag("redirected");
                StoredWrite::Episode(self.stores.episodic.append(episode).await?)
            }
        };
        Ok(WriteOutcome { decision, stored })
    }

    pub async fn read_shared(&self, key: &str) -> Result<Option<SharedReference>> {
        Ok(self.stores.shared.get(key).await?)
    }

    pub async fn shared_history(&self, key: &str) -> Result<Vec<SharedReference>> {
        Ok(self.stores.shared.history(key).await?)
    }

    pub async fn shared_keys(&self) -> Result<Vec<String>> {
        Ok(self.stores.shared.keys().await?)
    }

    // ── Episodic trace ───────────────────────────────────────────

    /// Append-only; there is no gate in front of the trace.
    pub async fn log_episode(&self, episode: NewEpisode) -> Result<EpisodeEntry> {
        Ok(self.stores.episodic.append(episode).await?)
    }

    /// Append a correction linked back to `old_id`. The old entry stays.
    pub async fn supersede_episode(
        &self,
        old_id: &str,
        episode: NewEpisode,
    ) -> Result<EpisodeEntry> {
        if self.stores.episodic.get(old_id).await?.is_none() {
            return Err(KernelError::validation_failed(format!(
                "cannot supersede unknown episode {old_id}"
            )));
        }
        Ok(self
            .stores
            .episodic
            .append(episode.superseding(old_id))
            .await?)
    }

    pub async fn get_episode(&self, id: &str) -> Result<Option<EpisodeEntry>> {
        Ok(self.stores.episodic.get(id).await?)
    }

    pub async fn query_episodes(&self, query: &EpisodeQuery) -> Result<Vec<EpisodeEntry>> {
        Ok(self.stores.episodic.query(query).await?)
    }

    // ── Semantic synthesis ───────────────────────────────────────

    /// Gated pattern insert. Every evidence id must already be in the trace.
    pub async fn add_synthesis(
        &self,
        pattern: NewPattern,
        signals: DerivedSignals,
        problem_id: Option<&str>,
    ) -> Result<WriteOutcome> {
        self.ensure_evidence(&pattern.evidence_ids).await?;

        let request = WriteRequest::new(
            Compartment::SemanticSynthesis,
            serde_json::to_value(&pattern).map_err(anyhow::Error::from)?,
            signals,
        );
        let decision = write_gate::evaluate(&request);
        self.record_decision(&decision);
        if !decision.approved {
            return Err(denied(&decision));
        }

        let stored = match decision.target {
            Compartment::SemanticSynthesis => {
                let _guard = self.synthesis_lock.lock().await;
                let id = format!("pat_{}", Uuid::new_v4().simple());
                let pattern = pattern.into_pattern(id, Utc::now());
                self.stores.synthesis.insert(&pattern).await?;
                StoredWrite::Pattern(pattern)
            }
            Compartment::WorkingSet => {
                let key = format!(
                    "pattern_candidate:{}",
                    super::types::input_signature(&pattern.input_description)
                );
                self.keep_local(problem_id, &key, request.payload, &decision)
                    .await?
            }
            Compartment::EpisodicTrace | Compartment::SharedReference => {
                let episode = NewEpisode::new(
                    episode_types::SYNTHESIS_CANDIDATE,
                    json!({
                        "pattern": request.payload,
                        "reason": decision.reason,
                    }),
                )
                .for_optional_problem(problem_id)
                .with_tags(pattern.evidence_ids.iter().map(|id| format!("evidence:{id}")));
                StoredWrite::Episode(self.stores.episodic.append(episode).await?)
            }
        };
        Ok(WriteOutcome { decision, stored })
    }

    /// Append evidence to a pattern and replace its confidence.
    /// Add evidence to an existing pattern. Runs through the write gate like
    /// any synthesis write; only a decision that lands in synthesis proceeds.
    /// Confidence never drops.
    pub async fn strengthen_pattern(
        &self,
        pattern_id: &str,
        extra_evidence: &[String],
        confidence: f64,
        signals: DerivedSignals,
    ) -> Result<SynthesizedPattern> {
        self.ensure_evidence(extra_evidence).await?;

        let request = WriteRequest::new(
            Compartment::SemanticSynthesis,
            json!({
                "pattern_id": pattern_id,
                "evidence_ids": extra_evidence,
                "confidence": confidence,
            }),
            signals,
        );
        let decision = write_gate::evaluate(&request);
        self.record_decision(&decision);
        if !decision.approved {
            return Err(denied(&decision));
        }
        if decision.target != Compartment::SemanticSynthesis {
            return Err(KernelError::write_denied(format!(
                "strengthening {pattern_id} redirected to {}: {}",
                decision.target, decision.reason
            ))
            .with_context(json!(decision)));
        }

        let _guard = self.synthesis_lock.lock().await;
        self.stores
            .synthesis
            .strengthen(pattern_id, extra_evidence, confidence, Utc::now())
            .await?
            .ok_or_else(|| KernelError::validation_failed(format!("unknown pattern {pattern_id}")))
    }

    pub async fn get_pattern(&self, pattern_id: &str) -> Result<Option<SynthesizedPattern>> {
        Ok(self.stores.synthesis.get(pattern_id).await?)
    }

    pub async fn list_patterns(&self) -> Result<Vec<SynthesizedPattern>> {
        Ok(self.stores.synthesis.list().await?)
    }

    pub async fn prune_patterns(&self, min_confidence: f64) -> Result<usize> {
        let _guard = self.synthesis_lock.lock().await;
        Ok(self.stores.synthesis.prune(min_confidence).await?)
    }

    /// Resolve every evidence id on a pattern. A single missing link fails.
    pub async fn get_evidence_chain(&self, pattern_id: &str) -> Result<Vec<EpisodeEntry>> {
        let pattern = self
            .stores
            .synthesis
            .get(pattern_id)
            .await?
            .ok_or_else(|| KernelError::validation_failed(format!("unknown pattern {pattern_id}")))?;
        let entries = self.stores.episodic.get_many(&pattern.evidence_ids).await?;
        let missing = missing_ids(&pattern.evidence_ids, &entries);
        if !missing.is_empty() {
            return Err(KernelError::validation_failed(format!(
                "pattern {pattern_id} has broken evidence links"
            ))
            .with_context(json!({ "pattern_id": pattern_id, "missing": missing })));
        }
        Ok(entries)
    }

    async fn ensure_evidence(&self, evidence_ids: &[String]) -> Result<()> {
        if evidence_ids.is_empty() {
            return Err(KernelError::validation_failed(
                "patterns need at least one evidence id",
            ));
        }
        let entries = self.stores.episodic.get_many(evidence_ids).await?;
        let missing = missing_ids(evidence_ids, &entries);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(
                KernelError::validation_failed("evidence ids not found in the episodic trace")
                    .with_context(json!({ "missing": missing })),
            )
        }
    }

    async fn keep_local(
        &self,
        problem_id: Option<&str>,
        key: &str,
        value: serde_json::Value,
        decision: &WriteDecision,
    ) -> Result<StoredWrite> {
        let Some(problem_id) = problem_id else {
            return Err(KernelError::write_denied(format!(
                "{}; no problem working set to hold it",
                decision.reason
            ))
            .with_context(json!(decision)));
        };
        self.write_working(
            problem_id,
            vec![WorkingEntry::Artifact {
                key: key.to_string(),
                value,
            }],
        )
        .await?;
        Ok(StoredWrite::Working {
            problem_id: problem_id.to_string(),
            key: key.to_string(),
        })
    }
}

fn denied(decision: &WriteDecision) -> KernelError {
    KernelError::write_denied(decision.reason.clone()).with_context(json!(decision))
}

fn missing_ids(expected: &[String], found: &[EpisodeEntry]) -> Vec<String> {
    expected
        .iter()
        .filter(|id| !found.iter().any(|entry| &entry.id == *id))
        .cloned()
        .collect()
}
