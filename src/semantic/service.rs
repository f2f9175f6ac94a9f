//! Similarity index kept in step with the record store.
//!
//! The index is an eventually-consistent cache over the record files:
//! - `Uninitialized` until it is built or loaded from `vectors.bin`
//! - `Available` once it holds vectors for the current embedding model
//!
//! Queries against an uninitialized index return nothing instead of failing,
//! and a full `build` always heals drift from interrupted writes.

use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::opportunity::Opportunity;
use crate::semantic::document::{DocumentMetadata, IndexedDocument};
use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::storage::{VectorStorage, VectorStorageError};
use crate::store::{Record, RecordId, RecordStore, StoreError};

const VECTORS_FILE: &str = "vectors.bin";

#[derive(Debug, thiserror::Error)]
pub enum SemanticSearchError {
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Uninitialized,
    Available,
}

impl Display for IndexStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexStatus::Uninitialized => write!(f, "uninitialized"),
            IndexStatus::Available => write!(f, "available"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub status: IndexStatus,
    pub document_count: usize,
    pub location: PathBuf,
    pub model: String,
    pub provider_available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    Built { documents: usize },
    NoRecords,
    Unavailable(String),
}

/// Metadata filters applied before ranking.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub active_only: bool,
    pub min_interest: Option<u8>,
    pub max_interest: Option<u8>,
    /// Case-insensitive substring of the company name
    pub company: Option<String>,
}

impl QueryFilters {
    pub fn matches(&self, metadata: &DocumentMetadata) -> bool {
        if self.active_only && !metadata.active {
            return false;
        }
        if self.min_interest.is_some_and(|min| metadata.interest_level < min)
            || self.max_interest.is_some_and(|max| metadata.interest_level > max)
        {
            return false;
        }
        match &self.company {
            Some(company) => metadata
                .company
                .to_lowercase()
                .contains(&company.trim().to_lowercase()),
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub record: Record,
    /// Relevance in `[0, 1]`, higher is better
    pub score: f32,
}

pub struct SimilarityIndex {
    embedder: Box<dyn Embedder>,
    storage: VectorStorage,
    dir: PathBuf,
    min_score: f32,
    /// `None` while uninitialized
    state: Mutex<Option<VectorIndex>>,
}

impl SimilarityIndex {
    /// Load a previously built index from `dir` if it matches the current
    /// embedding model. Never fails: anything unusable leaves the index
    /// uninitialized until the next build.
    pub fn open(embedder: Box<dyn Embedder>, dir: impl Into<PathBuf>, min_score: f32) -> Self {
        let dir = dir.into();
        let storage = VectorStorage::new(dir.join(VECTORS_FILE));

        let state = if let Some(reason) = embedder.unavailable_reason() {
            log::info!("similarity index unavailable: {reason}");
            None
        } else if !storage.exists() {
            log::info!("no existing similarity index found");
            None
        } else {
            match storage.load(&embedder.model_id_hash()) {
                Ok(index) => {
                    log::info!("loaded {} vectors from {}", index.len(), storage.path().display());
                    Some(index)
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!(
                        "similarity index was built with a different model than '{}'; rebuild it",
                        embedder.name()
                    );
                    None
                }
                Err(err) => {
                    log::warn!("could not load similarity index: {err}");
                    None
                }
            }
        };

        Self {
            embedder,
            storage,
            dir,
            min_score,
            state: Mutex::new(state),
        }
    }

    pub fn is_available(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Why the embedding provider cannot be used, if it cannot.
    pub fn unavailable_reason(&self) -> Option<&str> {
        self.embedder.unavailable_reason()
    }

    pub fn stats(&self) -> IndexStats {
        let document_count = self
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|index| index.len()));

        IndexStats {
            status: match document_count {
                Some(_) => IndexStatus::Available,
                None => IndexStatus::Uninitialized,
            },
            document_count: document_count.unwrap_or(0),
            location: self.dir.clone(),
            model: self.embedder.name().to_string(),
            provider_available: self.embedder.is_available(),
        }
    }

    /// Rebuild the index from every readable record and persist it.
    ///
    /// Vectors of unchanged documents are reused from the current index.
    /// Zero records or an unusable provider are reported through the
    /// outcome, only store and disk failures are errors.
    pub fn build(&self, store: &RecordStore) -> Result<BuildOutcome, SemanticSearchError> {
        if let Some(reason) = self.embedder.unavailable_reason() {
            log::error!("cannot build similarity index: {reason}");
            return Ok(BuildOutcome::Unavailable(reason.to_string()));
        }

        let records = store.records()?;
        if records.is_empty() {
            log::warn!("no opportunities found to index");
            return Ok(BuildOutcome::NoRecords);
        }

        let documents: Vec<IndexedDocument> = records
            .iter()
            .map(|record| IndexedDocument::from_opportunity(&record.id, &record.opportunity))
            .collect();

        let mut guard = self.lock()?;

        let mut reused: Vec<Option<Vec<f32>>> = documents
            .iter()
            .map(|doc| {
                guard
                    .as_ref()
                    .and_then(|index| index.get(&doc.metadata.record_id))
                    .filter(|entry| entry.content_hash == doc.content_hash)
                    .map(|entry| entry.embedding.clone())
            })
            .collect();

        let pending: Vec<String> = documents
            .iter()
            .zip(reused.iter())
            .filter(|(_, existing)| existing.is_none())
            .map(|(doc, _)| doc.text.clone())
            .collect();

        log::info!(
            "embedding {} of {} documents with '{}'",
            pending.len(),
            documents.len(),
            self.embedder.name()
        );

        let mut fresh = match self.embedder.embed_batch(&pending) {
            Ok(embeddings) => embeddings.into_iter(),
            Err(err) => {
                log::error!("error building similarity index: {err}");
                return Ok(BuildOutcome::Unavailable(err.to_string()));
            }
        };

        let mut embeddings = Vec::with_capacity(documents.len());
        for slot in reused.iter_mut() {
            match slot.take().or_else(|| fresh.next()) {
                Some(embedding) => embeddings.push(embedding),
                None => {
                    return Ok(BuildOutcome::Unavailable(
                        "provider returned fewer embeddings than requested".to_string(),
                    ))
                }
            }
        }

        let dimensions = embeddings.first().map(|e| e.len()).unwrap_or(0);
        let mut index = VectorIndex::with_capacity(dimensions, documents.len());
        for (doc, embedding) in documents.into_iter().zip(embeddings) {
            let id = doc.metadata.record_id.clone();
            if let Err(err) = index.insert(id.clone(), doc.content_hash, doc.metadata, embedding) {
                log::warn!("could not index {id}: {err}");
            }
        }

        self.storage.save(&index, &self.embedder.model_id_hash())?;
        let documents = index.len();
        *guard = Some(index);

        log::info!("built similarity index with {documents} documents");
        Ok(BuildOutcome::Built { documents })
    }

    /// Index one record. Returns `false` when the index is uninitialized.
    pub fn add(&self, id: &RecordId, opp: &Opportunity) -> Result<bool, SemanticSearchError> {
        let mut guard = self.lock()?;
        let Some(index) = guard.as_mut() else {
            return Ok(false);
        };

        let doc = IndexedDocument::from_opportunity(id, opp);
        let embedding = match index.get(id) {
            Some(entry) if entry.content_hash == doc.content_hash => entry.embedding.clone(),
            _ => self.embedder.embed(&doc.text)?,
        };

        index.insert(id.clone(), doc.content_hash, doc.metadata, embedding)?;
        self.storage.save(index, &self.embedder.model_id_hash())?;

        log::debug!("indexed {id}");
        Ok(true)
    }

    /// Drop the entry for `id`. Returns `false` when there was none.
    pub fn remove(&self, id: &RecordId) -> Result<bool, SemanticSearchError> {
        let mut guard = self.lock()?;
        let Some(index) = guard.as_mut() else {
            return Ok(false);
        };

        if index.remove(id).is_none() {
            return Ok(false);
        }

        self.storage.save(index, &self.embedder.model_id_hash())?;
        log::debug!("removed {id} from similarity index");
        Ok(true)
    }

    /// Records most similar to `text`, best first. Empty when the index is
    /// uninitialized or the query cannot be embedded.
    pub fn query(
        &self,
        store: &RecordStore,
        text: &str,
        k: usize,
        filters: &QueryFilters,
    ) -> Vec<SearchHit> {
        let ranked = self.rank(k, |_, _| true, filters, || {
            self.embedder.embed(text).map_err(SemanticSearchError::from)
        });

        self.resolve(store, ranked)
    }

    /// Records most similar to the record `id`, excluding itself.
    pub fn similar_to(&self, store: &RecordStore, id: &RecordId, k: usize) -> Vec<SearchHit> {
        let stored = self
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().and_then(|index| index.get(id)).map(|e| e.embedding.clone()));

        let ranked = self.rank(k, |candidate, _| candidate != id, &QueryFilters::default(), || {
            if let Some(embedding) = stored {
                return Ok(embedding);
            }
            let opp = store.load(id)?;
            let doc = IndexedDocument::from_opportunity(id, &opp);
            Ok(self.embedder.embed(&doc.text)?)
        });

        self.resolve(store, ranked)
    }

    /// Remove the persisted index and return to uninitialized.
    pub fn delete(&self) -> Result<(), SemanticSearchError> {
        let mut guard = self.lock()?;

        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        *guard = None;

        log::info!("deleted similarity index at {}", self.dir.display());
        Ok(())
    }

    fn rank(
        &self,
        k: usize,
        accept: impl Fn(&RecordId, &DocumentMetadata) -> bool,
        filters: &QueryFilters,
        query_embedding: impl FnOnce() -> Result<Vec<f32>, SemanticSearchError>,
    ) -> Vec<(RecordId, f32)> {
        self.try_rank(k, accept, filters, query_embedding)
            .unwrap_or_else(|err| {
                log::error!("similarity search failed: {err}");
                vec![]
            })
    }

    fn try_rank(
        &self,
        k: usize,
        accept: impl Fn(&RecordId, &DocumentMetadata) -> bool,
        filters: &QueryFilters,
        query_embedding: impl FnOnce() -> Result<Vec<f32>, SemanticSearchError>,
    ) -> Result<Vec<(RecordId, f32)>, SemanticSearchError> {
        let guard = self.lock()?;
        let Some(index) = guard.as_ref() else {
            log::warn!("similarity index not available; run `jobtrack index build` first");
            return Ok(vec![]);
        };

        let embedding = query_embedding()?;
        let results = index.search(
            &embedding,
            |id, metadata| accept(id, metadata) && filters.matches(metadata),
            self.min_score,
            k,
        )?;

        Ok(results.into_iter().map(|r| (r.id, r.score)).collect())
    }

    fn resolve(&self, store: &RecordStore, ranked: Vec<(RecordId, f32)>) -> Vec<SearchHit> {
        ranked
            .into_iter()
            .filter_map(|(id, score)| match store.load(&id) {
                Ok(opportunity) => Some(SearchHit {
                    record: Record { id, opportunity },
                    score,
                }),
                Err(StoreError::NotFound(_)) => {
                    log::debug!("indexed record {id} no longer exists");
                    None
                }
                Err(err) => {
                    log::warn!("could not load indexed record {id}: {err}");
                    None
                }
            })
            .collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<VectorIndex>>, SemanticSearchError> {
        self.state
            .lock()
            .map_err(|e| SemanticSearchError::Internal(format!("Lock poisoned: {}", e)))
    }
}
