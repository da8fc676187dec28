use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{EternalError, Result};

/// Main configuration structure for Eternal
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage location and vector layout
    #[serde(default)]
    pub storage: StorageConfig,
    /// Language model and embedding provider
    #[serde(default)]
    pub llm: LlmConfig,
    /// Optional pipeline features
    #[serde(default)]
    pub features: FeatureFlags,
    /// Retrieval scoring weights and limits
    #[serde(default)]
    pub scoring: ScoringConfig,
    /// Memorize pipeline thresholds
    #[serde(default)]
    pub memorize: MemorizeConfig,
    /// Conversation buffer settings
    #[serde(default)]
    pub buffer: BufferConfig,
    /// Consolidation pipeline settings
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    /// Profile insight quality bars
    #[serde(default)]
    pub profile: ProfileConfig,
    /// Background scheduler settings
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Markdown mirror settings
    #[serde(default)]
    pub vault: VaultConfig,
}

impl Config {
    /// Load a config file from an explicit path
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EternalError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| EternalError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from an explicit path, or the first default location that exists
    ///
    /// Search order: `~/.eternal/config.toml`, `<config_dir>/eternal/config.toml`,
    /// `./config.toml`. Falls back to defaults when none exist.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        let default_paths = [
            dirs::home_dir().map(|h| h.join(".eternal").join("config.toml")),
            dirs::config_dir().map(|c| c.join("eternal").join("config.toml")),
            Some(PathBuf::from("config.toml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }

    /// Path of the durable buffer log, defaulting into the data directory
    pub fn buffer_log_path(&self) -> PathBuf {
        self.buffer
            .log_path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("buffer.jsonl"))
    }

    /// Path of the markdown vault, defaulting into the data directory
    pub fn vault_path(&self) -> PathBuf {
        self.vault
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("vault"))
    }
}

/// Storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory for the LanceDB tables and default log/vault paths
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Embedding vector length, must match the embedding model
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".eternal"))
        .unwrap_or_else(|| PathBuf::from(".eternal"))
}

fn default_embedding_dimension() -> usize {
    1536
}

/// OpenAI-compatible provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the API (e.g. "https://api.openai.com/v1")
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Chat model used for extraction, reasoning and summaries
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    /// Embedding model
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Number of embeddings kept in the in-process LRU cache
    #[serde(default = "default_embedding_cache_capacity")]
    pub embedding_cache_capacity: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            timeout_secs: default_timeout_secs(),
            embedding_cache_capacity: default_embedding_cache_capacity(),
        }
    }
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "ETERNAL_API_KEY".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_embedding_cache_capacity() -> usize {
    1000
}

/// Optional pipeline features, all off except lazy triple extraction
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    /// Extract subject/predicate/object triples and use them in retrieval
    #[serde(default)]
    pub semantic_triples: bool,
    /// Defer triple extraction to the scheduled backlog job
    #[serde(default = "default_true")]
    pub lazy_triple_extraction: bool,
    /// Ask the model to rate importance for facts without a pinned value
    #[serde(default)]
    pub importance_rating: bool,
    /// Run the contradiction/supersession check after storing a fact
    #[serde(default)]
    pub memory_supersede: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            semantic_triples: false,
            lazy_triple_extraction: true,
            importance_rating: false,
            memory_supersede: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Weights and limits for the retrieval score
///
/// `score = alpha_relevance * cosine + alpha_recency * decay^hours + alpha_importance * importance`
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_alpha")]
    pub alpha_relevance: f32,
    #[serde(default = "default_alpha")]
    pub alpha_recency: f32,
    #[serde(default = "default_alpha")]
    pub alpha_importance: f32,
    /// Per-hour decay base for the recency term
    #[serde(default = "default_recency_decay")]
    pub recency_decay: f32,
    /// Items whose cosine relevance falls below this are excluded
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
    #[serde(default = "default_fast_limit")]
    pub fast_limit: usize,
    #[serde(default = "default_deep_limit")]
    pub deep_limit: usize,
    /// Multiplier applied to `min_relevance` in deep mode
    #[serde(default = "default_deep_threshold_factor")]
    pub deep_threshold_factor: f32,
    /// Similarity floor for the triple search
    #[serde(default = "default_triple_threshold")]
    pub triple_threshold: f32,
    #[serde(default = "default_triple_limit")]
    pub triple_limit: usize,
    /// Number of deduplicated triples rendered into the precision context
    #[serde(default = "default_triple_context_limit")]
    pub triple_context_limit: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            alpha_relevance: default_alpha(),
            alpha_recency: default_alpha(),
            alpha_importance: default_alpha(),
            recency_decay: default_recency_decay(),
            min_relevance: default_min_relevance(),
            fast_limit: default_fast_limit(),
            deep_limit: default_deep_limit(),
            deep_threshold_factor: default_deep_threshold_factor(),
            triple_threshold: default_triple_threshold(),
            triple_limit: default_triple_limit(),
            triple_context_limit: default_triple_context_limit(),
        }
    }
}

fn default_alpha() -> f32 {
    1.0
}

fn default_recency_decay() -> f32 {
    0.995
}

fn default_min_relevance() -> f32 {
    0.3
}

fn default_fast_limit() -> usize {
    10
}

fn default_deep_limit() -> usize {
    20
}

fn default_deep_threshold_factor() -> f32 {
    0.8
}

fn default_triple_threshold() -> f32 {
    0.4
}

fn default_triple_limit() -> usize {
    15
}

fn default_triple_context_limit() -> usize {
    5
}

/// Thresholds used by the memorize pipeline
#[derive(Debug, Clone, Deserialize)]
pub struct MemorizeConfig {
    /// Similarity at or above which a fact reinforces an existing item
    #[serde(default = "default_duplicate_threshold")]
    pub duplicate_threshold: f32,
    /// Lower bound of the band checked for contradictions
    #[serde(default = "default_supersede_threshold")]
    pub supersede_threshold: f32,
    #[serde(default = "default_supersede_candidates")]
    pub supersede_candidates: usize,
    #[serde(default = "default_category_threshold")]
    pub category_threshold: f32,
    #[serde(default = "default_category_candidates")]
    pub category_candidates: usize,
    /// Importance added on each reinforcement, saturating at 1.0
    #[serde(default = "default_reinforcement_step")]
    pub reinforcement_step: f32,
    #[serde(default = "default_importance")]
    pub default_importance: f32,
    /// Category used when the model proposes an unusable path
    #[serde(default = "default_fallback_category")]
    pub fallback_category: String,
}

impl Default for MemorizeConfig {
    fn default() -> Self {
        Self {
            duplicate_threshold: default_duplicate_threshold(),
            supersede_threshold: default_supersede_threshold(),
            supersede_candidates: default_supersede_candidates(),
            category_threshold: default_category_threshold(),
            category_candidates: default_category_candidates(),
            reinforcement_step: default_reinforcement_step(),
            default_importance: default_importance(),
            fallback_category: default_fallback_category(),
        }
    }
}

fn default_duplicate_threshold() -> f32 {
    0.95
}

fn default_supersede_threshold() -> f32 {
    0.85
}

fn default_supersede_candidates() -> usize {
    5
}

fn default_category_threshold() -> f32 {
    0.2
}

fn default_category_candidates() -> usize {
    5
}

fn default_reinforcement_step() -> f32 {
    0.1
}

fn default_importance() -> f32 {
    0.5
}

fn default_fallback_category() -> String {
    "knowledge/general".to_string()
}

/// Conversation buffer configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BufferConfig {
    /// Durable log location (defaults to `<data_dir>/buffer.jsonl`)
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Estimated token count (chars / 2) that triggers a flush
    #[serde(default = "default_flush_threshold_tokens")]
    pub flush_threshold_tokens: usize,
    /// Recent turns passed to query evolution as conversation context
    #[serde(default = "default_context_turns")]
    pub context_turns: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            log_path: None,
            flush_threshold_tokens: default_flush_threshold_tokens(),
            context_turns: default_context_turns(),
        }
    }
}

fn default_flush_threshold_tokens() -> usize {
    1000
}

fn default_context_turns() -> usize {
    6
}

/// Consolidation pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ConsolidationConfig {
    /// Member count above which a category is flagged for reorganization
    #[serde(default = "default_max_category_items")]
    pub max_category_items: usize,
    /// Number of recent items fed to each category summary
    #[serde(default = "default_summary_item_limit")]
    pub summary_item_limit: usize,
    /// Hard-delete stale, low-importance items. Off by default.
    #[serde(default)]
    pub archive_enabled: bool,
    #[serde(default = "default_stale_days")]
    pub stale_days: i64,
    #[serde(default = "default_archive_importance_threshold")]
    pub archive_importance_threshold: f32,
    #[serde(default = "default_archive_batch_limit")]
    pub archive_batch_limit: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            max_category_items: default_max_category_items(),
            summary_item_limit: default_summary_item_limit(),
            archive_enabled: false,
            stale_days: default_stale_days(),
            archive_importance_threshold: default_archive_importance_threshold(),
            archive_batch_limit: default_archive_batch_limit(),
        }
    }
}

fn default_max_category_items() -> usize {
    100
}

fn default_summary_item_limit() -> usize {
    20
}

fn default_stale_days() -> i64 {
    30
}

fn default_archive_importance_threshold() -> f32 {
    0.3
}

fn default_archive_batch_limit() -> usize {
    50
}

/// Confidence and evidence bars for profile insights
///
/// Flush-time capture is deliberately looser than the nightly reflection.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    #[serde(default = "default_flush_min_confidence")]
    pub flush_min_confidence: f32,
    #[serde(default = "default_flush_min_evidence")]
    pub flush_min_evidence: u32,
    #[serde(default = "default_reflection_min_confidence")]
    pub reflection_min_confidence: f32,
    #[serde(default = "default_reflection_min_evidence")]
    pub reflection_min_evidence: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            flush_min_confidence: default_flush_min_confidence(),
            flush_min_evidence: default_flush_min_evidence(),
            reflection_min_confidence: default_reflection_min_confidence(),
            reflection_min_evidence: default_reflection_min_evidence(),
        }
    }
}

fn default_flush_min_confidence() -> f32 {
    0.5
}

fn default_flush_min_evidence() -> u32 {
    1
}

fn default_reflection_min_confidence() -> f32 {
    0.8
}

fn default_reflection_min_evidence() -> u32 {
    2
}

/// Scheduler tick and built-in job intervals (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Disable to run the daemon without background jobs
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval: u64,
    #[serde(default = "default_daily_interval")]
    pub daily_reflection_interval: u64,
    #[serde(default = "default_weekly_interval")]
    pub weekly_summary_interval: u64,
    #[serde(default = "default_monthly_interval")]
    pub monthly_summary_interval: u64,
    #[serde(default = "default_daily_interval")]
    pub profile_reflection_interval: u64,
    #[serde(default = "default_daily_interval")]
    pub vault_backup_interval: u64,
    #[serde(default = "default_stats_interval")]
    pub stats_snapshot_interval: u64,
    #[serde(default = "default_lazy_triples_interval")]
    pub lazy_triple_interval: u64,
    /// Pending items processed per lazy extraction run
    #[serde(default = "default_lazy_triple_batch")]
    pub lazy_triple_batch: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_millis: default_tick_millis(),
            maintenance_interval: default_maintenance_interval(),
            daily_reflection_interval: default_daily_interval(),
            weekly_summary_interval: default_weekly_interval(),
            monthly_summary_interval: default_monthly_interval(),
            profile_reflection_interval: default_daily_interval(),
            vault_backup_interval: default_daily_interval(),
            stats_snapshot_interval: default_stats_interval(),
            lazy_triple_interval: default_lazy_triples_interval(),
            lazy_triple_batch: default_lazy_triple_batch(),
        }
    }
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_maintenance_interval() -> u64 {
    43_200
}

fn default_daily_interval() -> u64 {
    86_400
}

fn default_weekly_interval() -> u64 {
    604_800
}

fn default_monthly_interval() -> u64 {
    2_592_000
}

fn default_stats_interval() -> u64 {
    3_600
}

fn default_lazy_triples_interval() -> u64 {
    300
}

fn default_lazy_triple_batch() -> usize {
    25
}

/// Markdown vault configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VaultConfig {
    /// Vault root (defaults to `<data_dir>/vault`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}
