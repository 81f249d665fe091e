//! Configuration parsing and validation.
//!
//! Resume Search is configured by an optional TOML file (default
//! `./config/rsx.toml`) layered with `RSX_*` environment variables. A `.env`
//! file in the working directory is read first, so variables defined there
//! behave like real environment variables.
//!
//! ```toml
//! [data]
//! source_path = "data/uploads/Resume.csv"
//! upload_dir = "data/uploads"
//!
//! [embedding]
//! kind = "remote"            # "local" | "remote"
//! base_url = "https://llm.example.com/v1"
//! model = "text-embedding-3-small"
//! batch_size = 128
//! max_retries = 3
//!
//! [store]
//! path = "data/rsx.sqlite"
//! collection = "cv_embeddings"
//!
//! [retrieval]
//! top_k = 5
//!
//! [chat]
//! model = "openai.gpt-4o"
//! ```
//!
//! Every section and key is optional. Missing values fall back to the
//! defaults below, and [`load_config`] rejects values the pipeline cannot
//! run with.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use resume_search_core::embedding::DEFAULT_LOCAL_DIMS;
use resume_search_core::index::{DEFAULT_COLLECTION, DEFAULT_UPSERT_BATCH};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config/rsx.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    /// Resume file that is loaded and indexed.
    #[serde(default = "default_source_path")]
    pub source_path: PathBuf,
    /// Directory that `rsx adopt` copies new files into.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source_path: default_source_path(),
            upload_dir: default_upload_dir(),
        }
    }
}

fn default_source_path() -> PathBuf {
    PathBuf::from("data/uploads/Resume.csv")
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("data/uploads")
}

/// Embedding provider selection and HTTP client settings.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Upstream provider name forwarded in the request body.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// Width of the local vectorizer.
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub verify_tls: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            kind: default_kind(),
            base_url: None,
            api_key: None,
            provider: None,
            model: default_embedding_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            timeout_secs: default_timeout_secs(),
            verify_tls: true,
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_kind() -> String {
    "local".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_dims() -> usize {
    DEFAULT_LOCAL_DIMS
}
fn default_batch_size() -> usize {
    128
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_upsert_batch")]
    pub upsert_batch: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
            upsert_batch: default_upsert_batch(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("data/rsx.sqlite")
}
fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}
fn default_upsert_batch() -> usize {
    DEFAULT_UPSERT_BATCH
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

/// Chat completions used for answers and summaries.
///
/// `base_url` and `api_key` fall back to the embedding settings.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: default_chat_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            context_chars: default_context_chars(),
            summary_temperature: default_summary_temperature(),
            summary_max_tokens: default_summary_max_tokens(),
        }
    }
}

fn default_chat_model() -> String {
    "openai.gpt-4o".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    800
}
fn default_context_chars() -> usize {
    8000
}
fn default_summary_temperature() -> f32 {
    0.3
}
fn default_summary_max_tokens() -> u32 {
    200
}

/// Load configuration from `path` (if it exists), then apply `.env` and
/// `RSX_*` environment overrides, then validate.
///
/// A missing file at the default location is not an error; a missing file
/// that was asked for explicitly is.
pub fn load_config(path: &Path, explicit: bool) -> Result<Config> {
    dotenvy::dotenv().ok();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str::<Config>(&content).with_context(|| "Failed to parse config file")?
    } else if explicit {
        bail!("Config file not found: {}", path.display());
    } else {
        Config::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate(&config)?;
    Ok(config)
}

/// Apply `RSX_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(v) = get("RSX_SOURCE_PATH") {
        config.data.source_path = PathBuf::from(v);
    }
    if let Some(v) = get("RSX_UPLOAD_DIR") {
        config.data.upload_dir = PathBuf::from(v);
    }
    if let Some(v) = get("RSX_EMBEDDING_KIND") {
        config.embedding.kind = v.trim().to_lowercase();
    }
    if let Some(v) = get("RSX_EMBEDDING_BASE_URL") {
        config.embedding.base_url = Some(v);
    }
    if let Some(v) = get("RSX_EMBEDDING_API_KEY") {
        config.embedding.api_key = Some(v);
    }
    if let Some(v) = get("RSX_EMBEDDING_PROVIDER") {
        config.embedding.provider = Some(v);
    }
    if let Some(v) = get("RSX_EMBEDDING_MODEL") {
        config.embedding.model = v;
    }
    if let Some(v) = get("RSX_EMBEDDING_DIMS") {
        config.embedding.dims = parse_env("RSX_EMBEDDING_DIMS", &v)?;
    }
    if let Some(v) = get("RSX_EMBEDDING_BATCH_SIZE") {
        config.embedding.batch_size = parse_env("RSX_EMBEDDING_BATCH_SIZE", &v)?;
    }
    if let Some(v) = get("RSX_EMBEDDING_MAX_RETRIES") {
        config.embedding.max_retries = parse_env("RSX_EMBEDDING_MAX_RETRIES", &v)?;
    }
    if let Some(v) = get("RSX_HTTP_TIMEOUT_SECS") {
        config.embedding.timeout_secs = parse_env("RSX_HTTP_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = get("RSX_VERIFY_TLS") {
        config.embedding.verify_tls = parse_bool("RSX_VERIFY_TLS", &v)?;
    }
    if let Some(v) = get("RSX_CHAT_MODEL") {
        config.chat.model = v;
    }
    if let Some(v) = get("RSX_STORE_PATH") {
        config.store.path = PathBuf::from(v);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => bail!("{} must be a boolean, got '{}'", key, value),
    }
}

/// Reject settings the pipeline cannot run with.
pub fn validate(config: &Config) -> Result<()> {
    match config.embedding.kind.as_str() {
        "local" | "remote" => {}
        other => bail!(
            "Unknown embedding kind: '{}'. Must be local or remote.",
            other
        ),
    }

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.kind == "local" && config.embedding.dims == 0 {
        bail!("embedding.dims must be > 0 for the local provider");
    }
    if config.embedding.base_delay_ms > config.embedding.max_delay_ms {
        bail!("embedding.base_delay_ms must not exceed embedding.max_delay_ms");
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }

    if config.store.upsert_batch == 0 {
        bail!("store.upsert_batch must be > 0");
    }
    if config.store.collection.trim().is_empty() {
        bail!("store.collection must not be empty");
    }

    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }

    if config.chat.context_chars == 0 {
        bail!("chat.context_chars must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_file_gives_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.kind, "local");
        assert_eq!(config.embedding.batch_size, 128);
        assert_eq!(config.embedding.max_retries, 3);
        assert_eq!(config.embedding.base_delay_ms, 500);
        assert_eq!(config.embedding.max_delay_ms, 8000);
        assert_eq!(config.store.collection, "cv_embeddings");
        assert_eq!(config.store.upsert_batch, 1000);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.chat.context_chars, 8000);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [embedding]
            kind = "remote"
            base_url = "http://localhost:9000"
            batch_size = 16

            [store]
            path = "/tmp/x.sqlite"
            "#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.embedding.kind, "remote");
        assert_eq!(config.embedding.batch_size, 16);
        assert_eq!(config.embedding.timeout_secs, 60);
        assert_eq!(config.store.collection, "cv_embeddings");
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut config = Config::default();
        let vars = env(&[
            ("RSX_EMBEDDING_KIND", "REMOTE"),
            ("RSX_EMBEDDING_BASE_URL", "http://emb"),
            ("RSX_EMBEDDING_API_KEY", "k"),
            ("RSX_EMBEDDING_BATCH_SIZE", "7"),
            ("RSX_VERIFY_TLS", "false"),
            ("RSX_SOURCE_PATH", "other.csv"),
            ("RSX_CHAT_MODEL", ""),
        ]);
        apply_env_overrides(&mut config, |k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.embedding.kind, "remote");
        assert_eq!(config.embedding.base_url.as_deref(), Some("http://emb"));
        assert_eq!(config.embedding.batch_size, 7);
        assert!(!config.embedding.verify_tls);
        assert_eq!(config.data.source_path, PathBuf::from("other.csv"));
        assert_eq!(config.chat.model, "openai.gpt-4o");
    }

    #[test]
    fn bad_env_number_is_reported() {
        let mut config = Config::default();
        let vars = env(&[("RSX_EMBEDDING_MAX_RETRIES", "many")]);
        let err = apply_env_overrides(&mut config, |k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("RSX_EMBEDDING_MAX_RETRIES"));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = Config::default();
        config.embedding.kind = "ollama".to_string();
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.batch_size = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.dims = 0;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.embedding.base_delay_ms = 10_000;
        assert!(validate(&config).is_err());

        let mut config = Config::default();
        config.store.upsert_batch = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(&missing, true).is_err());
    }
}
