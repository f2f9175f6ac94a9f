use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::storage::{BackendLocal, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Default remote embedding model
const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";
/// Default local embedding model
const DEFAULT_LOCAL_EMBEDDING_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_QUERY_LIMIT: usize = 5;
const DEFAULT_OVERDUE_DAYS: i64 = crate::store::DEFAULT_OVERDUE_DAYS;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not determine home directory; set JOBTRACK_BASE_PATH")]
    NoHome,

    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Malformed(#[from] serde_yml::Error),

    #[error("config file is not valid utf8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where embeddings come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Remote embeddings endpoint, needs `OPENAI_API_KEY`
    #[default]
    OpenAi,
    /// fastembed model running in-process
    Local,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SemanticSearchConfig {
    /// Enable or disable the similarity index
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub provider: EmbeddingProvider,

    /// Model name used with the `openai` provider
    #[serde(default = "default_openai_embedding_model")]
    pub openai_model: String,

    /// Model name used with the `local` provider (e.g. "bge-small-en-v1.5")
    #[serde(default = "default_local_embedding_model")]
    pub local_model: String,

    /// Hits scoring below this relevance [0.0, 1.0] are dropped
    #[serde(default)]
    pub min_score: f32,

    /// Number of hits returned when the caller does not ask for more
    #[serde(default = "default_query_limit")]
    pub default_limit: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for SemanticSearchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: EmbeddingProvider::default(),
            openai_model: default_openai_embedding_model(),
            local_model: default_local_embedding_model(),
            min_score: 0.0,
            default_limit: DEFAULT_QUERY_LIMIT,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InsightConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Chat completion model
    #[serde(default = "default_chat_model")]
    pub model: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: default_chat_model(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_openai_embedding_model() -> String {
    DEFAULT_OPENAI_EMBEDDING_MODEL.to_string()
}

fn default_local_embedding_model() -> String {
    DEFAULT_LOCAL_EMBEDDING_MODEL.to_string()
}

fn default_chat_model() -> String {
    DEFAULT_CHAT_MODEL.to_string()
}

fn default_query_limit() -> usize {
    DEFAULT_QUERY_LIMIT
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_overdue_days() -> i64 {
    DEFAULT_OVERDUE_DAYS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Days without contact before an active opportunity counts as overdue
    #[serde(default = "default_overdue_days")]
    pub overdue_days: i64,

    #[serde(default)]
    pub semantic_search: SemanticSearchConfig,

    #[serde(default)]
    pub insights: InsightConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            overdue_days: DEFAULT_OVERDUE_DAYS,
            semantic_search: SemanticSearchConfig::default(),
            insights: InsightConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.overdue_days < 0 {
            return Err(ConfigError::Invalid(format!(
                "overdue_days must not be negative, got {}",
                self.overdue_days
            )));
        }

        let sem = &self.semantic_search;
        if !(0.0..=1.0).contains(&sem.min_score) {
            return Err(ConfigError::Invalid(format!(
                "semantic_search.min_score must be between 0.0 and 1.0, got {}",
                sem.min_score
            )));
        }

        if sem.default_limit == 0 {
            return Err(ConfigError::Invalid(
                "semantic_search.default_limit must be greater than 0".to_string(),
            ));
        }

        if sem.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "semantic_search.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.insights.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "insights.request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Read `config.yaml` from `base_path`, creating it with defaults when
    /// missing and re-saving it when new fields were filled in.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let store = BackendLocal::new(base_path)?;

        if !store.exists(CONFIG_FILE) {
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let store = BackendLocal::new(&self.base_path)?;
        store.write(CONFIG_FILE, serde_yml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

/// Filesystem layout under the base directory.
#[derive(Clone, Debug)]
pub struct AppPaths {
    pub base: PathBuf,
}

impl AppPaths {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `JOBTRACK_BASE_PATH`, or `~/.local/share/jobtrack`.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(base) = std::env::var("JOBTRACK_BASE_PATH") {
            return Ok(Self::new(base));
        }

        let home = my_home().ok().flatten().ok_or(ConfigError::NoHome)?;
        Ok(Self::new(home.join(".local").join("share").join("jobtrack")))
    }

    pub fn records(&self) -> PathBuf {
        self.base.join("opportunities")
    }

    pub fn index(&self) -> PathBuf {
        self.base.join("index")
    }

    pub fn models(&self) -> PathBuf {
        self.base.join("models")
    }
}

/// Credentials and endpoint for the OpenAI-compatible API.
#[derive(Clone, Debug)]
pub struct ApiCredentials {
    pub api_key: String,
    pub base_url: String,
}

impl ApiCredentials {
    /// `None` when `OPENAI_API_KEY` is unset or empty.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())?;
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string());

        Some(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_creates_default_file() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).is_file());
        assert_eq!(config.overdue_days, 7);
        assert!(config.semantic_search.enabled);
        assert_eq!(config.semantic_search.provider, EmbeddingProvider::OpenAi);
        assert_eq!(config.semantic_search.openai_model, "text-embedding-3-small");
    }

    #[test]
    fn test_partial_file_is_upgraded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "semantic_search:\n  provider: local\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.semantic_search.provider, EmbeddingProvider::Local);
        assert_eq!(config.insights.model, "gpt-4o-mini");

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("overdue_days"));
        assert!(saved.contains("local_model"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "semantic_search:\n  min_score: 1.5\n",
        )
        .unwrap();

        assert!(matches!(
            Config::load_with(tmp.path()),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_file_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "overdue_days: [").unwrap();

        assert!(matches!(
            Config::load_with(tmp.path()),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn test_paths_layout() {
        let paths = AppPaths::new("/data/jobtrack");
        assert_eq!(paths.records(), PathBuf::from("/data/jobtrack/opportunities"));
        assert_eq!(paths.index(), PathBuf::from("/data/jobtrack/index"));
        assert_eq!(paths.models(), PathBuf::from("/data/jobtrack/models"));
    }
}
