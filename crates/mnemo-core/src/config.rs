use crate::{MnemoError, MnemoResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Top-level configuration, usually read from `mnemo.toml`.
///
/// Every section is optional; a missing key falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MnemoConfig {
    /// Directory for index files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Durable index settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Search defaults.
    #[serde(default)]
    pub search: SearchConfig,
    /// Duplicate-detection thresholds.
    #[serde(default)]
    pub duplicates: DuplicateConfig,
    /// Background reconciliation.
    #[serde(default)]
    pub sync: SyncConfig,
    /// Repository snapshot locations used by the CLI.
    #[serde(default)]
    pub repository: RepositoryConfig,
}

impl Default for MnemoConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            search: SearchConfig::default(),
            duplicates: DuplicateConfig::default(),
            sync: SyncConfig::default(),
            repository: RepositoryConfig::default(),
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProviderKind {
    /// Offline hashing embedder.
    #[default]
    Local,
    /// Google Gemini embedding API.
    Gemini,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Backend.
    #[serde(default)]
    pub provider: EmbeddingProviderKind,
    /// Remote model name.
    #[serde(default = "default_model")]
    pub model: String,
    /// Vector dimension; derived from the provider when unset.
    #[serde(default)]
    pub dimension: Option<usize>,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum texts per provider batch call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// API key; falls back to `GEMINI_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL override for the remote API.
    #[serde(default)]
    pub api_base_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::default(),
            model: default_model(),
            dimension: None,
            timeout_ms: default_timeout_ms(),
            batch_size: default_batch_size(),
            api_key: None,
            api_base_url: None,
        }
    }
}

impl EmbeddingConfig {
    /// Effective vector dimension.
    pub fn dimension(&self) -> usize {
        self.dimension.unwrap_or(match self.provider {
            EmbeddingProviderKind::Local => 384,
            EmbeddingProviderKind::Gemini => 768,
        })
    }

    /// Configured key, or the `GEMINI_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let usable = |k: &str| Some(k.trim().to_string()).filter(|k| !k.is_empty());
        self.api_key
            .as_deref()
            .and_then(usable)
            .or_else(|| std::env::var("GEMINI_API_KEY").ok().as_deref().and_then(usable))
    }
}

/// Durable mirror backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// SQLite `documents` table.
    #[default]
    Sqlite,
    /// Append-only JSONL journal.
    Jsonl,
    /// Process memory only.
    Memory,
}

/// Durable index settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreConfig {
    /// Backend.
    #[serde(default)]
    pub backend: StoreBackend,
    /// File path; defaults to a file under `data_dir`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Effective file path for file-backed stores.
    pub fn resolve_path(&self, data_dir: &Path) -> PathBuf {
        match (&self.path, self.backend) {
            (Some(p), _) => p.clone(),
            (None, StoreBackend::Jsonl) => data_dir.join("vectors.jsonl"),
            (None, _) => data_dir.join("vectors.db"),
        }
    }
}

/// Search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Results below this score are dropped.
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    /// Default task result count.
    #[serde(default = "default_task_limit")]
    pub task_limit: usize,
    /// Default project result count.
    #[serde(default = "default_project_limit")]
    pub project_limit: usize,
    /// Per-section cap for context bundles.
    #[serde(default = "default_context_limit")]
    pub context_limit_per_type: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            min_score: default_min_score(),
            task_limit: default_task_limit(),
            project_limit: default_project_limit(),
            context_limit_per_type: default_context_limit(),
        }
    }
}

/// Duplicate-detection thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateConfig {
    /// Score above which a match counts as a duplicate.
    #[serde(default = "default_dup_threshold")]
    pub threshold: f32,
    /// Score above which creation is withheld for confirmation.
    #[serde(default = "default_auto_block")]
    pub auto_block_threshold: f32,
    /// Default threshold for raw duplicate lookups.
    #[serde(default = "default_find_threshold")]
    pub find_threshold: f32,
    /// Maximum matches reported by a duplicate check.
    #[serde(default = "default_max_matches")]
    pub max_matches: usize,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            threshold: default_dup_threshold(),
            auto_block_threshold: default_auto_block(),
            find_threshold: default_find_threshold(),
            max_matches: default_max_matches(),
        }
    }
}

/// Background reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Whether the scheduler runs reconciliation.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 7-field cron expression.
    #[serde(default = "default_sync_cron")]
    pub cron: String,
    /// Remove documents whose entity disappeared.
    #[serde(default = "default_true")]
    pub prune_stale: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cron: default_sync_cron(),
            prune_stale: true,
        }
    }
}

/// JSON snapshot files standing in for the authoritative repository.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepositoryConfig {
    /// Array of tasks.
    #[serde(default)]
    pub tasks_path: Option<PathBuf>,
    /// Array of projects.
    #[serde(default)]
    pub projects_path: Option<PathBuf>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_model() -> String {
    "models/text-embedding-004".to_string()
}
fn default_timeout_ms() -> u64 {
    10_000
}
fn default_batch_size() -> usize {
    100
}
fn default_min_score() -> f32 {
    0.3
}
fn default_task_limit() -> usize {
    5
}
fn default_project_limit() -> usize {
    3
}
fn default_context_limit() -> usize {
    3
}
fn default_dup_threshold() -> f32 {
    0.75
}
fn default_auto_block() -> f32 {
    0.85
}
fn default_find_threshold() -> f32 {
    0.8
}
fn default_max_matches() -> usize {
    3
}
fn default_true() -> bool {
    true
}
fn default_sync_cron() -> String {
    "0 */15 * * * * *".to_string()
}

impl MnemoConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(s: &str) -> MnemoResult<Self> {
        let config: MnemoConfig =
            toml::from_str(s).map_err(|e| MnemoError::Config(format!("Invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML file.
    pub fn load(path: &Path) -> MnemoResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            MnemoError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Checks thresholds, sizes and the sync schedule.
    pub fn validate(&self) -> MnemoResult<()> {
        let d = &self.duplicates;
        for (name, value) in [
            ("duplicates.threshold", d.threshold),
            ("duplicates.auto_block_threshold", d.auto_block_threshold),
            ("duplicates.find_threshold", d.find_threshold),
            ("search.min_score", self.search.min_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(MnemoError::Config(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }
        if d.auto_block_threshold < d.threshold {
            return Err(MnemoError::Config(
                "duplicates.auto_block_threshold must not be below duplicates.threshold".into(),
            ));
        }
        if self.embedding.dimension() == 0 {
            return Err(MnemoError::Config("embedding.dimension must be > 0".into()));
        }
        if self.embedding.batch_size == 0 {
            return Err(MnemoError::Config("embedding.batch_size must be > 0".into()));
        }
        cron::Schedule::from_str(&self.sync.cron).map_err(|e| {
            MnemoError::Config(format!("Invalid sync.cron '{}': {e}", self.sync.cron))
        })?;
        Ok(())
    }
}
