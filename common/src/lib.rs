/*!
common/src/lib.rs

Shared configuration types and DB helper functions for newsdigest.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader that merges a default TOML file with an override file
- A helper to initialize an SQLite pool for the run history
- Secret masking for configuration display
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

/// Run-level limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Hard deadline for one pipeline pass; ratings still in flight are abandoned.
    pub max_run_seconds: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { max_run_seconds: 600 }
    }
}

/// URL normalization options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Query parameters stripped in addition to the built-in tracking list
    pub extra_tracking_params: Vec<String>,
}

/// Recency and topic filters applied before deduplication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Drop articles older than this many days (unset or <= 0 keeps everything)
    pub recent_days: Option<i64>,
    /// One match is enough to keep an article
    pub include_keywords: Vec<String>,
    /// Weaker signals; `min_related_matches` of them keep an article
    pub related_keywords: Vec<String>,
    pub min_related_matches: usize,
    pub exclude_keywords: Vec<String>,
    /// Articles with more exclude matches than this are dropped
    pub max_exclude_matches: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            recent_days: Some(5),
            include_keywords: Vec::new(),
            related_keywords: Vec::new(),
            min_related_matches: 3,
            exclude_keywords: Vec::new(),
            max_exclude_matches: 1,
        }
    }
}

/// Near-duplicate detection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Title token-set Jaccard overlap at or above which two articles are the same story
    pub similarity_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
        }
    }
}

/// Summarizer/rater behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingConfig {
    /// Maximum model calls that may fail transiently for one article
    pub max_attempts: u32,
    /// Articles rated at the same time
    pub concurrency: usize,
    /// Characters of body text kept in the prompt
    pub body_char_budget: usize,
    pub backoff_base_ms: u64,
    pub backoff_multiplier: f64,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            concurrency: 5,
            body_char_budget: 4000,
            backoff_base_ms: 1000,
            backoff_multiplier: 2.0,
            max_tokens: 400,
            temperature: 0.2,
        }
    }
}

/// Selection limits for the digest
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DigestConfig {
    pub max_items: usize,
    pub min_importance: f64,
}

impl Default for DigestConfig {
    fn default() -> Self {
        Self {
            max_items: 10,
            min_importance: 30.0,
        }
    }
}

/// Cross-run deduplication history
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Path to the sqlite database file (unset = in-memory, forgotten at exit)
    pub path: Option<String>,
    /// Ids seen within this many hours are treated as already delivered
    pub window_hours: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            window_hours: 48,
        }
    }
}

/// Politeness / fetching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolitenessConfig {
    pub fetch_timeout_seconds: Option<u64>,
    pub max_retries: Option<u32>,
}

/// Where the finished digest goes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// "console" or "json"
    pub channel: String,
    /// Target directory for the "json" channel
    pub output_dir: Option<String>,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            channel: "console".to_string(),
            output_dir: None,
        }
    }
}

/// Remote LLM config (used if `llm.adapter = "remote"`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_url: Option<String>,
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub max_tokens: Option<usize>,
}

/// LLM top-level config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub adapter: Option<String>, // "remote", "none"
    pub remote: Option<RemoteLlmConfig>,
}

/// A news source to pull articles from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Feed URL, or the NewsAPI endpoint for `kind = "newsapi"`
    pub url: String,
    /// "rss" (default) or "newsapi"
    pub kind: Option<String>,
    /// Entries taken per feed, or per NewsAPI source id, per run (default 10)
    pub max_articles: Option<usize>,
    /// Env var holding the NewsAPI key
    pub api_key_env: Option<String>,
    /// NewsAPI source ids queried one by one (e.g. "the-verge")
    #[serde(default)]
    pub source_ids: Vec<String>,
    /// NewsAPI look-back in days (default 2)
    pub days_back: Option<i64>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub rating: RatingConfig,
    #[serde(default)]
    pub digest: DigestConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    pub politeness: Option<PolitenessConfig>,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    pub llm: Option<LlmConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Mask a secret for display, keeping only its first and last character.
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "****".to_string();
    }
    let mut out = String::with_capacity(chars.len());
    out.push(chars[0]);
    out.extend(std::iter::repeat('*').take(chars.len() - 2));
    out.push(chars[chars.len() - 1]);
    out
}

/// Initialize an SQLite connection pool.
///
/// Creates the parent directory if necessary and returns a small pool; the run
/// history only ever issues a handful of queries per run.
///
/// Example:
///   let pool = init_db_pool("data/history.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    Ok(pool)
}
