//! Similarity search over opportunities.
//!
//! # Architecture
//!
//! - `document`: projection of an opportunity into embeddable text plus metadata
//! - `embeddings`: the `Embedder` capability and its providers
//! - `index`: in-memory vector index with cosine ranking
//! - `storage`: binary file I/O for vectors.bin persistence
//! - `service`: `SimilarityIndex`, the index lifecycle kept in step with the store

mod document;
pub mod embeddings;
mod index;
pub mod service;
mod storage;

pub use embeddings::create_embedder;
pub use service::{BuildOutcome, QueryFilters, SearchHit, SimilarityIndex};
