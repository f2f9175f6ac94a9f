//! In-memory vector index with cosine similarity search.
//!
//! Entries are keyed by record identifier and carry the metadata of the
//! document they were embedded from.

use std::collections::HashMap;

use crate::semantic::document::DocumentMetadata;
use crate::store::RecordId;

#[derive(Debug, Clone)]
pub struct VectorEntry {
    /// Hash of the document text that was embedded
    pub content_hash: u64,
    pub metadata: DocumentMetadata,
    pub embedding: Vec<f32>,
}

/// In-memory vector index.
///
/// Supports insert/replace/remove and ranked search where the score is the
/// cosine distance mapped onto `[0, 1]`, higher meaning more similar.
pub struct VectorIndex {
    entries: HashMap<RecordId, VectorEntry>,
    dimensions: usize,
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: RecordId,
    /// Relevance in `[0, 1]`
    pub score: f32,
}

impl VectorIndex {
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Insert or replace the entry for `id`.
    ///
    /// Returns an error if the embedding has the wrong length or zero norm.
    pub fn insert(
        &mut self,
        id: RecordId,
        content_hash: u64,
        metadata: DocumentMetadata,
        embedding: Vec<f32>,
    ) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if l2_norm(&embedding) < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        self.entries.insert(
            id,
            VectorEntry {
                content_hash,
                metadata,
                embedding,
            },
        );

        Ok(())
    }

    pub fn remove(&mut self, id: &RecordId) -> Option<VectorEntry> {
        self.entries.remove(id)
    }

    pub fn get(&self, id: &RecordId) -> Option<&VectorEntry> {
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RecordId, &VectorEntry)> {
        self.entries.iter()
    }

    /// Rank entries accepted by `filter` against `query`.
    ///
    /// Results are sorted by score, highest first, ties broken by identifier
    /// so output is stable across runs.
    pub fn search(
        &self,
        query: &[f32],
        filter: impl Fn(&RecordId, &DocumentMetadata) -> bool,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SearchResult>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let query_norm = l2_norm(query);
        if query_norm < f32::EPSILON {
            return Err(IndexError::ZeroNormVector);
        }

        let mut results: Vec<SearchResult> = self
            .entries
            .iter()
            .filter(|(id, entry)| filter(id, &entry.metadata))
            .filter_map(|(id, entry)| {
                let cosine = cosine_similarity(query, &entry.embedding, query_norm);
                let score = relevance(cosine);
                (score >= threshold).then(|| SearchResult {
                    id: id.clone(),
                    score,
                })
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);

        Ok(results)
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

fn cosine_similarity(query: &[f32], target: &[f32], query_norm: f32) -> f32 {
    let target_norm = l2_norm(target);
    if target_norm < f32::EPSILON {
        return 0.0;
    }

    let dot_product: f32 = query.iter().zip(target.iter()).map(|(a, b)| a * b).sum();
    dot_product / (query_norm * target_norm)
}

/// Cosine distance lies in `[0, 2]`; halve it and flip so identical
/// vectors score 1 and opposite ones score 0.
fn relevance(cosine: f32) -> f32 {
    let distance = 1.0 - cosine;
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Cannot store or search with zero-norm vector")]
    ZeroNormVector,
}
