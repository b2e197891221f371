use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use strum::Display;

/// The four memory compartments, from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Compartment {
    /// Problem-local scratch space. Never leaves its problem.
    WorkingSet,
    /// Append-only audit log. Records, never concludes.
    EpisodicTrace,
    /// Versioned global facts.
    SharedReference,
    /// Evidence-linked patterns distilled from the trace.
    SemanticSynthesis,
}

impl Compartment {
    /// Lower rank means more restrictive (smaller audience, less durable).
    pub const fn restrictiveness_rank(self) -> u8 {
        match self {
            Self::WorkingSet => 0,
            Self::EpisodicTrace => 1,
            Self::SharedReference => 2,
            Self::SemanticSynthesis => 3,
        }
    }

    pub const fn is_at_least_as_restrictive_as(self, other: Self) -> bool {
        self.restrictiveness_rank() <= other.restrictiveness_rank()
    }

    /// Writes whose mistakes outlive the current problem.
    pub const fn is_global(self) -> bool {
        matches!(self, Self::SharedReference | Self::SemanticSynthesis)
    }
}

// ── Working set ──────────────────────────────────────────────────

/// One contribution to a problem's working set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkingEntry {
    Constraint { text: String },
    Assumption { text: String },
    OpenQuestion { text: String },
    Artifact { key: String, value: serde_json::Value },
    Decision { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkingSet {
    pub problem_id: String,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub partial_artifacts: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub local_decisions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WorkingSet {
    pub fn new(problem_id: impl Into<String>, now: DateTime<Utc>, ttl: chrono::Duration) -> Self {
        Self {
            problem_id: problem_id.into(),
            constraints: Vec::new(),
            assumptions: Vec::new(),
            open_questions: Vec::new(),
            partial_artifacts: BTreeMap::new(),
            local_decisions: Vec::new(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn apply(&mut self, entry: WorkingEntry) {
        match entry {
            WorkingEntry::Constraint { text } => push_unique(&mut self.constraints, text),
            WorkingEntry::Assumption { text } => push_unique(&mut self.assumptions, text),
            WorkingEntry::OpenQuestion { text } => push_unique(&mut self.open_questions, text),
            WorkingEntry::Artifact { key, value } => {
                self.partial_artifacts.insert(key, value);
            }
            WorkingEntry::Decision { text } => self.local_decisions.push(text),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
            && self.assumptions.is_empty()
            && self.open_questions.is_empty()
            && self.partial_artifacts.is_empty()
            && self.local_decisions.is_empty()
    }
}

fn push_unique(list: &mut Vec<String>, text: String) {
    if !list.iter().any(|existing| existing == &text) {
        list.push(text);
    }
}

// ── Shared reference ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedReference {
    pub key: String,
    pub value: serde_json::Value,
    pub version: u64,
    pub source: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ── Episodic trace ───────────────────────────────────────────────

/// Entry types the kernel itself appends.
pub mod episode_types {
    pub const STANCE_TRANSITION: &str = "stance_transition";
    pub const COMMITMENT_CREATED: &str = "commitment_created";
    pub const COMMITMENT_EXPIRED: &str = "commitment_expired";
    pub const COMMITMENT_CLOSED: &str = "commitment_closed";
    pub const ARBITRATION: &str = "arbitration";
    pub const WRITE_REDIRECTED: &str = "write_redirected";
    pub const SYNTHESIS_CANDIDATE: &str = "synthesis_candidate";
    pub const PREFERENCE_OBSERVED: &str = "preference_observed";
    pub const ORCHESTRATION: &str = "orchestration";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem_id: Option<String>,
    pub entry_type: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// An episode before the trace assigns it an id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEpisode {
    pub problem_id: Option<String>,
    pub entry_type: String,
    pub payload: serde_json::Value,
    pub tags: BTreeSet<String>,
    pub supersedes: Option<String>,
}

impl NewEpisode {
    pub fn new(entry_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            problem_id: None,
            entry_type: entry_type.into(),
            payload,
            tags: BTreeSet::new(),
            supersedes: None,
        }
    }

    pub fn for_problem(mut self, problem_id: impl Into<String>) -> Self {
        self.problem_id = Some(problem_id.into());
        self
    }

    pub fn for_optional_problem(mut self, problem_id: Option<&str>) -> Self {
        self.problem_id = problem_id.map(str::to_string);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub(crate) fn superseding(mut self, old_id: impl Into<String>) -> Self {
        self.supersedes = Some(old_id.into());
        self
    }

    pub(crate) fn into_entry(self, id: String, timestamp: DateTime<Utc>) -> EpisodeEntry {
        EpisodeEntry {
            id,
            timestamp,
            problem_id: self.problem_id,
            entry_type: self.entry_type,
            payload: self.payload,
            tags: self.tags,
            supersedes: self.supersedes,
        }
    }
}

/// Chronological filter over the trace. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeQuery {
    pub problem_id: Option<String>,
    pub entry_type: Option<String>,
    pub tag: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EpisodeQuery {
    pub fn matches(&self, entry: &EpisodeEntry) -> bool {
        if let Some(problem_id) = &self.problem_id {
            if entry.problem_id.as_deref() != Some(problem_id.as_str()) {
                return false;
            }
        }
        if let Some(entry_type) = &self.entry_type {
            if &entry.entry_type != entry_type {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !entry.tags.contains(tag) {
                return false;
            }
        }
        if self.since.is_some_and(|since| entry.timestamp < since) {
            return false;
        }
        if self.until.is_some_and(|until| entry.timestamp > until) {
            return false;
        }
        true
    }
}

// ── Semantic synthesis ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedPattern {
    pub id: String,
    pub pattern_type: String,
    pub input_signature: String,
    pub recommended_action: String,
    pub confidence: f64,
    pub evidence_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_strengthened_at: DateTime<Utc>,
    #[serde(default)]
    pub protected: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPattern {
    pub pattern_type: String,
    /// Free-form description of the situation the pattern matches.
    pub input_description: String,
    pub recommended_action: String,
    pub confidence: f64,
    pub evidence_ids: Vec<String>,
    #[serde(default)]
    pub protected: bool,
}

impl NewPattern {
    pub(crate) fn into_pattern(self, id: String, now: DateTime<Utc>) -> SynthesizedPattern {
        let mut evidence_ids = Vec::with_capacity(self.evidence_ids.len());
        for evidence_id in self.evidence_ids {
            if !evidence_ids.contains(&evidence_id) {
                evidence_ids.push(evidence_id);
            }
        }
        SynthesizedPattern {
            id,
            pattern_type: self.pattern_type,
            input_signature: input_signature(&self.input_description),
            recommended_action: self.recommended_action,
            confidence: self.confidence.clamp(0.0, 1.0),
            evidence_ids,
            created_at: now,
            last_strengthened_at: now,
            protected: self.protected,
        }
    }
}

/// SHA-256 of the case- and whitespace-normalized description.
pub fn input_signature(description: &str) -> String {
    let normalized = description
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
