//! Embedding providers.
//!
//! [`Embedder`] is the capability the similarity index depends on. The
//! concrete provider is chosen once at startup by [`create_embedder`]:
//! - `OpenAiEmbedder`: remote `/embeddings` endpoint over blocking HTTP
//! - `LocalEmbedder`: fastembed model, loaded on first use
//! - `UnavailableEmbedder`: stands in when neither can be used

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ApiCredentials, AppPaths, EmbeddingProvider, SemanticSearchConfig};

/// Inputs per request to the remote endpoint.
const OPENAI_BATCH_SIZE: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),

    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait Embedder: Send + Sync {
    /// Provider-qualified model name, e.g. `openai/text-embedding-3-small`.
    fn name(&self) -> &str;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    /// SHA256 of the model name, stored in the index header so vectors from
    /// different models are never mixed.
    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }

    /// Why this provider cannot embed, if it cannot.
    fn unavailable_reason(&self) -> Option<&str> {
        None
    }

    fn is_available(&self) -> bool {
        self.unavailable_reason().is_none()
    }
}

pub fn model_id_hash(name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.finalize().into()
}

/// Pick the embedding provider for this run.
pub fn create_embedder(config: &SemanticSearchConfig, paths: &AppPaths) -> Box<dyn Embedder> {
    if !config.enabled {
        return Box::new(UnavailableEmbedder::new("similarity search is disabled in config"));
    }

    match config.provider {
        EmbeddingProvider::OpenAi => {
            let Some(credentials) = ApiCredentials::from_env() else {
                return Box::new(UnavailableEmbedder::new("OPENAI_API_KEY is not set"));
            };
            let timeout = Duration::from_secs(config.request_timeout_secs);
            match OpenAiEmbedder::new(credentials, &config.openai_model, timeout) {
                Ok(embedder) => Box::new(embedder),
                Err(err) => Box::new(UnavailableEmbedder::new(err.to_string())),
            }
        }
        EmbeddingProvider::Local => create_local(config, paths),
    }
}

#[cfg(feature = "local-embeddings")]
fn create_local(config: &SemanticSearchConfig, paths: &AppPaths) -> Box<dyn Embedder> {
    match local::LocalEmbedder::new(&config.local_model, paths.models()) {
        Ok(embedder) => Box::new(embedder),
        Err(err) => Box::new(UnavailableEmbedder::new(err.to_string())),
    }
}

#[cfg(not(feature = "local-embeddings"))]
fn create_local(_config: &SemanticSearchConfig, _paths: &AppPaths) -> Box<dyn Embedder> {
    Box::new(UnavailableEmbedder::new(
        "built without the local-embeddings feature",
    ))
}

pub struct UnavailableEmbedder {
    reason: String,
}

impl UnavailableEmbedder {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Embedder for UnavailableEmbedder {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable(self.reason.clone()))
    }

    fn unavailable_reason(&self) -> Option<&str> {
        Some(&self.reason)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

pub struct OpenAiEmbedder {
    credentials: ApiCredentials,
    model: String,
    name: String,
    client: reqwest::blocking::Client,
}

impl OpenAiEmbedder {
    pub fn new(
        credentials: ApiCredentials,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            credentials,
            model: model.to_string(),
            name: format!("openai/{model}"),
            client,
        })
    }

    fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.credentials.base_url))
            .header("Authorization", format!("Bearer {}", self.credentials.api_key))
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "embeddings request failed with status {status}: {error_text}"
            )));
        }

        let mut body: EmbeddingResponse = response.json()?;
        if body.data.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                body.data.len()
            )));
        }

        body.data.sort_by_key(|d| d.index);
        Ok(body.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(OPENAI_BATCH_SIZE) {
            embeddings.extend(self.request(chunk)?);
        }
        Ok(embeddings)
    }
}

#[cfg(feature = "local-embeddings")]
mod local {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use fastembed::{InitOptions, TextEmbedding};

    use super::{Embedder, EmbeddingError};

    /// fastembed's TextEmbedding behind a Mutex because embed() needs
    /// `&mut self`. The model is downloaded and loaded on first use so that
    /// commands which never embed stay fast.
    pub struct LocalEmbedder {
        kind: fastembed::EmbeddingModel,
        name: String,
        models_dir: PathBuf,
        model: Mutex<Option<TextEmbedding>>,
    }

    impl LocalEmbedder {
        pub fn new(model_name: &str, models_dir: PathBuf) -> Result<Self, EmbeddingError> {
            Ok(Self {
                kind: parse_model_name(model_name)?,
                name: format!("local/{model_name}"),
                models_dir,
                model: Mutex::new(None),
            })
        }

        fn load(&self) -> Result<TextEmbedding, EmbeddingError> {
            log::info!("loading embedding model '{}'", self.name);

            std::fs::create_dir_all(&self.models_dir).map_err(|e| {
                EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
            })?;

            let options = InitOptions::new(self.kind.clone())
                .with_cache_dir(self.models_dir.clone())
                .with_show_download_progress(true);

            TextEmbedding::try_new(options).map_err(|e| EmbeddingError::InitFailed(e.to_string()))
        }
    }

    impl Embedder for LocalEmbedder {
        fn name(&self) -> &str {
            &self.name
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            if texts.is_empty() {
                return Ok(vec![]);
            }

            let mut guard = self.model.lock().map_err(|e| {
                EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
            })?;

            if guard.is_none() {
                *guard = Some(self.load()?);
            }

            let model = guard
                .as_mut()
                .ok_or_else(|| EmbeddingError::InitFailed("model not loaded".to_string()))?;

            model
                .embed(texts.to_vec(), None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
        }
    }

    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGESmallENV15Q),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" => Ok(fastembed::EmbeddingModel::BGEBaseENV15Q),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized)",
                name
            ))),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_embedder() {
        let embedder = UnavailableEmbedder::new("no key");
        assert!(!embedder.is_available());
        assert_eq!(embedder.unavailable_reason(), Some("no key"));
        assert!(matches!(
            embedder.embed("hello"),
            Err(EmbeddingError::Unavailable(reason)) if reason == "no key"
        ));
    }

    #[test]
    fn test_disabled_config_is_unavailable() {
        let config = SemanticSearchConfig {
            enabled: false,
            ..Default::default()
        };
        let embedder = create_embedder(&config, &AppPaths::new("/tmp/jobtrack-test"));
        assert!(!embedder.is_available());
    }

    #[test]
    fn test_model_id_hash_differs_per_model() {
        assert_eq!(model_id_hash("openai/a"), model_id_hash("openai/a"));
        assert_ne!(model_id_hash("openai/a"), model_id_hash("local/a"));
    }

    #[test]
    fn test_openai_embedder_name() {
        let credentials = ApiCredentials {
            api_key: "sk-test".to_string(),
            base_url: "http://localhost:1".to_string(),
        };
        let embedder =
            OpenAiEmbedder::new(credentials, "text-embedding-3-small", Duration::from_secs(1)).unwrap();
        assert_eq!(embedder.name(), "openai/text-embedding-3-small");
        assert!(embedder.is_available());
    }
}
