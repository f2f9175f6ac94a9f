//! Similarity index behavior against a real record store.
//!
//! Uses a deterministic keyword embedder so no provider or network is needed.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::opportunity::Opportunity;
use crate::semantic::embeddings::{Embedder, EmbeddingError, UnavailableEmbedder};
use crate::semantic::service::IndexStatus;
use crate::semantic::{BuildOutcome, QueryFilters, SimilarityIndex};
use crate::store::{RecordId, RecordStore};

const VOCABULARY: [&str; 8] = [
    "rust", "python", "systems", "data", "engineer", "scientist", "kernel", "golang",
];

/// One dimension per vocabulary word plus a small constant so no vector is zero.
struct KeywordEmbedder {
    name: String,
    embedded: Arc<AtomicUsize>,
}

impl KeywordEmbedder {
    fn new(embedded: Arc<AtomicUsize>) -> Self {
        Self {
            name: "test/keywords".to_string(),
            embedded,
        }
    }

    fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            embedded: Arc::default(),
        }
    }
}

fn keyword_vector(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0; VOCABULARY.len() + 1];
    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|token| token.to_lowercase())
    {
        if let Some(pos) = VOCABULARY.iter().position(|word| *word == token) {
            vector[pos] += 1.0;
        }
    }
    vector[VOCABULARY.len()] = 0.1;
    vector
}

impl Embedder for KeywordEmbedder {
    fn name(&self) -> &str {
        &self.name
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|text| keyword_vector(text)).collect())
    }
}

struct Fixture {
    tmp: tempfile::TempDir,
    store: RecordStore,
    index: Arc<SimilarityIndex>,
    embedded: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let embedded = Arc::new(AtomicUsize::new(0));
        let index = Arc::new(SimilarityIndex::open(
            Box::new(KeywordEmbedder::new(embedded.clone())),
            tmp.path().join("index"),
            0.0,
        ));
        let store = RecordStore::open(tmp.path().join("opportunities"))
            .unwrap()
            .with_index(index.clone());

        Self {
            tmp,
            store,
            index,
            embedded,
        }
    }

    fn base(&self) -> &Path {
        self.tmp.path()
    }

    fn save(&self, company: &str, role: &str) -> RecordId {
        self.store
            .save(&Opportunity::new(company, role).unwrap())
            .unwrap()
    }

    fn query_ids(&self, text: &str, k: usize) -> Vec<RecordId> {
        self.index
            .query(&self.store, text, k, &QueryFilters::default())
            .into_iter()
            .map(|hit| hit.record.id)
            .collect()
    }
}

#[test]
pub fn test_query_uninitialized_is_empty() {
    let fx = Fixture::new();
    fx.save("Ferrous", "Rust Systems Engineer");

    assert!(!fx.index.is_available());
    assert_eq!(fx.index.stats().status, IndexStatus::Uninitialized);
    assert!(fx.query_ids("rust", 5).is_empty());
    assert_eq!(fx.embedded.load(Ordering::SeqCst), 0);
}

#[test]
pub fn test_build_without_records() {
    let fx = Fixture::new();

    assert_eq!(fx.index.build(&fx.store).unwrap(), BuildOutcome::NoRecords);
    assert_eq!(fx.index.stats().status, IndexStatus::Uninitialized);
}

#[test]
pub fn test_build_with_unavailable_provider() {
    let tmp = tempfile::tempdir().unwrap();
    let index = Arc::new(SimilarityIndex::open(
        Box::new(UnavailableEmbedder::new("OPENAI_API_KEY is not set")),
        tmp.path().join("index"),
        0.0,
    ));
    let store = RecordStore::open(tmp.path().join("opportunities"))
        .unwrap()
        .with_index(index.clone());

    // saving still works, the record just is not indexed
    let id = store
        .save(&Opportunity::new("Ferrous", "Rust Engineer").unwrap())
        .unwrap();
    assert!(store.load(&id).is_ok());

    assert!(matches!(
        index.build(&store).unwrap(),
        BuildOutcome::Unavailable(_)
    ));
    assert!(!index.stats().provider_available);
    assert!(index
        .query(&store, "rust", 5, &QueryFilters::default())
        .is_empty());
}

#[test]
pub fn test_build_and_query() {
    let fx = Fixture::new();
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    fx.save("Snake", "Python Data Scientist");
    fx.save("Gopher", "Golang Engineer");

    assert_eq!(
        fx.index.build(&fx.store).unwrap(),
        BuildOutcome::Built { documents: 3 }
    );

    let stats = fx.index.stats();
    assert_eq!(stats.status, IndexStatus::Available);
    assert_eq!(stats.document_count, 3);
    assert!(fx.base().join("index").join("vectors.bin").is_file());

    let hits = fx
        .index
        .query(&fx.store, "rust systems", 3, &QueryFilters::default());
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].record.id, rust);
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    assert!(hits.iter().all(|hit| (0.0..=1.0).contains(&hit.score)));

    assert_eq!(fx.query_ids("rust systems", 1), vec![rust]);
}

#[test]
pub fn test_removed_record_never_returned() {
    let fx = Fixture::new();
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    fx.save("Snake", "Python Data Scientist");
    fx.save("Gopher", "Golang Engineer");
    fx.index.build(&fx.store).unwrap();

    assert!(fx.index.remove(&rust).unwrap());
    assert!(!fx.index.remove(&rust).unwrap());
    assert_eq!(fx.index.stats().document_count, 2);

    let ids = fx.query_ids("rust systems engineer", 10);
    assert_eq!(ids.len(), 2);
    assert!(!ids.contains(&rust));
}

#[test]
pub fn test_store_keeps_index_in_step() {
    let fx = Fixture::new();
    fx.save("Snake", "Python Data Scientist");
    fx.index.build(&fx.store).unwrap();

    // save
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    assert_eq!(fx.index.stats().document_count, 2);
    assert_eq!(fx.query_ids("rust", 1), vec![rust.clone()]);

    // update
    let mut opp = fx.store.load(&rust).unwrap();
    opp.deactivate(Some("rejected".into()));
    fx.store.update(&rust, &opp).unwrap();
    assert_eq!(fx.index.stats().document_count, 2);

    let active_only = QueryFilters {
        active_only: true,
        ..Default::default()
    };
    let hits = fx.index.query(&fx.store, "rust", 5, &active_only);
    assert_eq!(hits.len(), 1);
    assert_ne!(hits[0].record.id, rust);

    // delete
    assert!(fx.store.delete(&rust).unwrap());
    assert_eq!(fx.index.stats().document_count, 1);
    assert!(!fx.query_ids("rust", 5).contains(&rust));
}

#[test]
pub fn test_query_filters() {
    let fx = Fixture::new();
    let mut keen = Opportunity::new("Ferrous", "Rust Engineer").unwrap();
    keen.set_interest_level(5).unwrap();
    let mut meh = Opportunity::new("Oxide", "Rust Engineer").unwrap();
    meh.set_interest_level(2).unwrap();
    let keen = fx.store.save(&keen).unwrap();
    let meh = fx.store.save(&meh).unwrap();
    fx.index.build(&fx.store).unwrap();

    let interested = QueryFilters {
        min_interest: Some(4),
        ..Default::default()
    };
    let ids: Vec<RecordId> = fx
        .index
        .query(&fx.store, "rust", 5, &interested)
        .into_iter()
        .map(|hit| hit.record.id)
        .collect();
    assert_eq!(ids, vec![keen]);

    let oxide = QueryFilters {
        company: Some("OXI".into()),
        ..Default::default()
    };
    let ids: Vec<RecordId> = fx
        .index
        .query(&fx.store, "rust", 5, &oxide)
        .into_iter()
        .map(|hit| hit.record.id)
        .collect();
    assert_eq!(ids, vec![meh]);
}

#[test]
pub fn test_query_skips_vanished_records() {
    let fx = Fixture::new();
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    fx.save("Snake", "Python Data Scientist");
    fx.index.build(&fx.store).unwrap();

    // removed behind the store's back, so the index still has it
    std::fs::remove_file(fx.store.location(&rust)).unwrap();
    assert_eq!(fx.index.stats().document_count, 2);

    let ids = fx.query_ids("rust", 5);
    assert_eq!(ids.len(), 1);
    assert!(!ids.contains(&rust));
}

#[test]
pub fn test_similar_to_excludes_itself() {
    let fx = Fixture::new();
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    let kernel = fx.save("Linux Co", "Rust Kernel Engineer");
    fx.save("Snake", "Python Data Scientist");
    fx.index.build(&fx.store).unwrap();

    let hits = fx.index.similar_to(&fx.store, &rust, 5);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].record.id, kernel);
    assert!(hits.iter().all(|hit| hit.record.id != rust));
}

#[test]
pub fn test_rebuild_reuses_unchanged_embeddings() {
    let fx = Fixture::new();
    let rust = fx.save("Ferrous", "Rust Systems Engineer");
    fx.save("Snake", "Python Data Scientist");

    fx.index.build(&fx.store).unwrap();
    assert_eq!(fx.embedded.load(Ordering::SeqCst), 2);

    fx.index.build(&fx.store).unwrap();
    assert_eq!(fx.embedded.load(Ordering::SeqCst), 2);

    // edit the file directly so the store does not reindex it
    let mut opp = fx.store.load(&rust).unwrap();
    opp.notes = Some("kernel work".into());
    std::fs::write(
        fx.store.location(&rust),
        serde_json::to_vec_pretty(&opp).unwrap(),
    )
    .unwrap();

    fx.index.build(&fx.store).unwrap();
    assert_eq!(fx.embedded.load(Ordering::SeqCst), 3);
}

#[test]
pub fn test_reopen_loads_persisted_index() {
    let fx = Fixture::new();
    fx.save("Ferrous", "Rust Systems Engineer");
    fx.save("Snake", "Python Data Scientist");
    fx.index.build(&fx.store).unwrap();

    let reopened = SimilarityIndex::open(
        Box::new(KeywordEmbedder::named("test/keywords")),
        fx.base().join("index"),
        0.0,
    );
    assert!(reopened.is_available());
    assert_eq!(reopened.stats().document_count, 2);

    let other_model = SimilarityIndex::open(
        Box::new(KeywordEmbedder::named("test/other-model")),
        fx.base().join("index"),
        0.0,
    );
    assert!(!other_model.is_available());
}

#[test]
pub fn test_delete_returns_to_uninitialized() {
    let fx = Fixture::new();
    fx.save("Ferrous", "Rust Systems Engineer");
    fx.index.build(&fx.store).unwrap();

    fx.index.delete().unwrap();

    assert_eq!(fx.index.stats().status, IndexStatus::Uninitialized);
    assert!(!fx.base().join("index").exists());
    assert!(fx.query_ids("rust", 5).is_empty());

    // deleting twice is fine
    fx.index.delete().unwrap();
}
