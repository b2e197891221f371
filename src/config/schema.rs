use crate::core::orchestrator::{MergeStrategy, Tiebreaker};
use crate::error::KernelError;
use anyhow::{Context, Result};
use directories::UserDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

// ── Top-level config ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub signals: SignalsConfig,

    #[serde(default)]
    pub arbiter: ArbiterConfig,

    #[serde(default)]
    pub gates: GatesConfig,

    #[serde(default)]
    pub commitment: CommitmentConfig,

    #[serde(default)]
    pub working_set: WorkingSetConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Signals ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalsConfig {
    /// Artifacts touched above this count make a write MODERATE
    #[serde(default = "default_artifact_threshold")]
    pub artifact_threshold: usize,
    /// Confidence gap below which disagreeing outputs are a HIGH conflict
    #[serde(default = "default_conflict_confidence_gap")]
    pub conflict_confidence_gap: f64,
    #[serde(default)]
    pub advisory_enabled: bool,
    #[serde(default = "default_llm_weight")]
    pub llm_weight: f64,
    #[serde(default = "default_advisory_ceiling")]
    pub advisory_ceiling: f64,
    #[serde(default = "default_advisory_model")]
    pub advisory_model: String,
}

fn default_artifact_threshold() -> usize {
    3
}

fn default_conflict_confidence_gap() -> f64 {
    0.3
}

fn default_llm_weight() -> f64 {
    0.5
}

fn default_advisory_ceiling() -> f64 {
    0.9
}

fn default_advisory_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            artifact_threshold: default_artifact_threshold(),
            conflict_confidence_gap: default_conflict_confidence_gap(),
            advisory_enabled: false,
            llm_weight: default_llm_weight(),
            advisory_ceiling: default_advisory_ceiling(),
            advisory_model: default_advisory_model(),
        }
    }
}

// ── Arbiter ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PreemptWeights {
    pub priority: f64,
    pub urgency: f64,
    pub staleness: f64,
    pub switch_cost: f64,
}

impl PreemptWeights {
    pub fn sum(&self) -> f64 {
        self.priority + self.urgency + self.staleness + self.switch_cost
    }
}

impl Default for PreemptWeights {
    fn default() -> Self {
        Self {
            priority: 0.3,
            urgency: 0.3,
            staleness: 0.2,
            switch_cost: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default)]
    pub weights: PreemptWeights,
    #[serde(default = "default_switch_threshold")]
    pub switch_threshold: f64,
    #[serde(default = "default_ask_threshold")]
    pub ask_threshold: f64,
    #[serde(default = "default_staleness_window_secs")]
    pub staleness_window_secs: u64,
    /// Switch cost when the active problem holds no commitment
    #[serde(default = "default_base_switch_cost")]
    pub base_switch_cost: f64,
}

fn default_switch_threshold() -> f64 {
    0.70
}

fn default_ask_threshold() -> f64 {
    0.55
}

fn default_staleness_window_secs() -> u64 {
    30 * 60
}

fn default_base_switch_cost() -> f64 {
    0.2
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            weights: PreemptWeights::default(),
            switch_threshold: default_switch_threshold(),
            ask_threshold: default_ask_threshold(),
            staleness_window_secs: default_staleness_window_secs(),
            base_switch_cost: default_base_switch_cost(),
        }
    }
}

// ── Gates ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatesConfig {
    #[serde(default = "default_emergency_cooldown_turns")]
    pub emergency_cooldown_turns: u64,
    /// Urgency at or above this counts as an emergency signal
    #[serde(default = "default_emergency_urgency")]
    pub emergency_urgency: f64,
    #[serde(default = "default_max_commitment_turns")]
    pub max_commitment_turns: u32,
    #[serde(default = "default_max_agents_per_bundle")]
    pub max_agents_per_bundle: usize,
    #[serde(default = "default_allowed_capabilities")]
    pub allowed_capabilities: Vec<String>,
}

fn default_emergency_cooldown_turns() -> u64 {
    5
}

fn default_emergency_urgency() -> f64 {
    0.9
}

fn default_max_commitment_turns() -> u32 {
    50
}

fn default_max_agents_per_bundle() -> usize {
    8
}

fn default_allowed_capabilities() -> Vec<String> {
    vec![
        "read_memory".into(),
        "search".into(),
        "summarize".into(),
        "analyze".into(),
    ]
}

impl Default for GatesConfig {
    fn default() -> Self {
        Self {
            emergency_cooldown_turns: default_emergency_cooldown_turns(),
            emergency_urgency: default_emergency_urgency(),
            max_commitment_turns: default_max_commitment_turns(),
            max_agents_per_bundle: default_max_agents_per_bundle(),
            allowed_capabilities: default_allowed_capabilities(),
        }
    }
}

// ── Commitment ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitmentConfig {
    #[serde(default = "default_commitment_turns")]
    pub default_turns: u32,
}

fn default_commitment_turns() -> u32 {
    10
}

impl Default for CommitmentConfig {
    fn default() -> Self {
        Self {
            default_turns: default_commitment_turns(),
        }
    }
}

// ── Working set ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingSetConfig {
    #[serde(default = "default_working_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_working_max_ttl_secs")]
    pub max_ttl_secs: u64,
}

fn default_working_ttl_secs() -> u64 {
    2 * 60 * 60
}

fn default_working_max_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl WorkingSetConfig {
    /// Requested TTL clamped to the configured maximum.
    pub fn effective_ttl(&self, requested_secs: Option<u64>) -> chrono::Duration {
        let secs = requested_secs
            .unwrap_or(self.ttl_secs)
            .clamp(1, self.max_ttl_secs);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_working_ttl_secs(),
            max_ttl_secs: default_working_max_ttl_secs(),
        }
    }
}

// ── Orchestrator ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_agent_timeout_ms")]
    pub agent_timeout_ms: u64,
    #[serde(default = "default_vote_threshold")]
    pub vote_threshold: f64,
    #[serde(default)]
    pub tiebreaker: Tiebreaker,
    #[serde(default)]
    pub merge_strategy: MergeStrategy,
    #[serde(default = "default_synthesis_model")]
    pub synthesis_model: String,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_agent_timeout_ms() -> u64 {
    30_000
}

fn default_vote_threshold() -> f64 {
    0.6
}

fn default_synthesis_model() -> String {
    "anthropic/claude-sonnet-4".into()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            agent_timeout_ms: default_agent_timeout_ms(),
            vote_threshold: default_vote_threshold(),
            tiebreaker: Tiebreaker::default(),
            merge_strategy: MergeStrategy::default(),
            synthesis_model: default_synthesis_model(),
        }
    }
}

// ── Storage ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "memory" | "sqlite"
    #[serde(default = "default_storage_backend")]
    pub backend: String,
    /// SQLite database file; `~` is expanded
    #[serde(default = "default_storage_path")]
    pub path: String,
}

fn default_storage_backend() -> String {
    "sqlite".into()
}

fn default_storage_path() -> String {
    "~/.iris-kernel/kernel.db".into()
}

impl StorageConfig {
    pub fn in_memory() -> Self {
        Self {
            backend: "memory".into(),
            path: String::new(),
        }
    }

    pub fn resolved_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
        }
    }
}

// ── Observability ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// "log" | "memory" | "none"
    #[serde(default = "default_observability_backend")]
    pub backend: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_observability_backend() -> String {
    "log".into()
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
            log_level: default_log_level(),
        }
    }
}

// ── Validation ───────────────────────────────────────────────────

fn ensure_unit(value: f64, field: &str) -> std::result::Result<(), KernelError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(KernelError::validation_failed(format!(
            "{field} must be within [0.0, 1.0], got {value}"
        )));
    }
    Ok(())
}

impl ArbiterConfig {
    pub fn validate(&self) -> std::result::Result<(), KernelError> {
        let w = &self.weights;
        ensure_unit(w.priority, "arbiter.weights.priority")?;
        ensure_unit(w.urgency, "arbiter.weights.urgency")?;
        ensure_unit(w.staleness, "arbiter.weights.staleness")?;
        ensure_unit(w.switch_cost, "arbiter.weights.switch_cost")?;
        let sum = w.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(KernelError::validation_failed(format!(
                "arbiter.weights must sum to 1.0, got {sum}"
            ))
            .with_context(serde_json::json!({ "sum": sum })));
        }
        ensure_unit(self.switch_threshold, "arbiter.switch_threshold")?;
        ensure_unit(self.ask_threshold, "arbiter.ask_threshold")?;
        if self.ask_threshold >= self.switch_threshold {
            return Err(KernelError::validation_failed(
                "arbiter.ask_threshold must be < arbiter.switch_threshold",
            ));
        }
        ensure_unit(self.base_switch_cost, "arbiter.base_switch_cost")?;
        if self.staleness_window_secs == 0 {
            return Err(KernelError::validation_failed(
                "arbiter.staleness_window_secs must be >= 1",
            ));
        }
        Ok(())
    }
}

impl KernelConfig {
    pub fn validate(&self) -> std::result::Result<(), KernelError> {
        self.arbiter.validate()?;

        ensure_unit(
            self.signals.conflict_confidence_gap,
            "signals.conflict_confidence_gap",
        )?;
        ensure_unit(self.signals.llm_weight, "signals.llm_weight")?;
        ensure_unit(self.signals.advisory_ceiling, "signals.advisory_ceiling")?;
        ensure_unit(self.gates.emergency_urgency, "gates.emergency_urgency")?;

        if self.gates.max_commitment_turns == 0 {
            return Err(KernelError::validation_failed(
                "gates.max_commitment_turns must be >= 1",
            ));
        }
        if self.commitment.default_turns == 0
            || self.commitment.default_turns > self.gates.max_commitment_turns
        {
            return Err(KernelError::validation_failed(
                "commitment.default_turns must be within [1, gates.max_commitment_turns]",
            ));
        }
        if self.working_set.ttl_secs == 0 || self.working_set.max_ttl_secs == 0 {
            return Err(KernelError::validation_failed(
                "working_set ttl values must be >= 1",
            ));
        }
        if self.working_set.ttl_secs > self.working_set.max_ttl_secs {
            return Err(KernelError::validation_failed(
                "working_set.ttl_secs must be <= working_set.max_ttl_secs",
            ));
        }
        if self.orchestrator.max_concurrency == 0 {
            return Err(KernelError::validation_failed(
                "orchestrator.max_concurrency must be >= 1",
            ));
        }
        if self.orchestrator.agent_timeout_ms == 0 {
            return Err(KernelError::validation_failed(
                "orchestrator.agent_timeout_ms must be >= 1",
            ));
        }
        let vote = self.orchestrator.vote_threshold;
        if !vote.is_finite() || vote <= 0.0 || vote > 1.0 {
            return Err(KernelError::validation_failed(
                "orchestrator.vote_threshold must be within (0.0, 1.0]",
            ));
        }
        match self.storage.backend.as_str() {
            "memory" | "sqlite" => {}
            other => {
                return Err(KernelError::validation_failed(format!(
                    "storage.backend must be \"memory\" or \"sqlite\", got \"{other}\""
                )));
            }
        }
        Ok(())
    }

    fn home_dir() -> Result<PathBuf> {
        UserDirs::new()
            .map(|u| u.home_dir().to_path_buf())
            .context("Could not find home directory")
    }

    pub fn load_or_init() -> Result<Self> {
        let kernel_dir = Self::home_dir()?.join(".iris-kernel");
        let config_path = kernel_dir.join("config.toml");

        if !kernel_dir.exists() {
            fs::create_dir_all(&kernel_dir).context("Failed to create .iris-kernel directory")?;
        }

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.validate()?;
            config.save()?;
            Ok(config)
        }
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: KernelConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;
        config.config_path = path.to_path_buf();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        // Storage backend: IRIS_KERNEL_STORAGE
        if let Ok(backend) = std::env::var("IRIS_KERNEL_STORAGE") {
            if !backend.is_empty() {
                self.storage.backend = backend;
            }
        }

        // Database path: IRIS_KERNEL_DB
        if let Ok(path) = std::env::var("IRIS_KERNEL_DB") {
            if !path.is_empty() {
                self.storage.path = path;
            }
        }

        // Log level: IRIS_KERNEL_LOG
        if let Ok(level) = std::env::var("IRIS_KERNEL_LOG") {
            if !level.is_empty() {
                self.observability.log_level = level;
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}
