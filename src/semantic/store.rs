//! One embedding per distinct keyword string.
//!
//! Keys are exact strings: `"AI"` and `"ai"` are stored separately. Entries
//! are created once, the first time a keyword is indexed, and never mutated.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::preprocess::{dedupe_keywords, normalize_keyword};
use crate::semantic::similarity::l2_norm;
use crate::semantic::storage::{VectorFile, VectorFileError};

#[derive(Debug, Clone, PartialEq)]
pub struct KeywordEmbedding {
    pub keyword: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Dimension mismatch for '{keyword}': expected {expected}, got {got}")]
    DimensionMismatch {
        keyword: String,
        expected: usize,
        got: usize,
    },

    #[error("Provider returned an unusable vector for '{0}'")]
    InvalidVector(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorFileError),
}

#[derive(Debug)]
pub struct KeywordEmbeddingStore {
    dimensions: usize,
    entries: BTreeMap<String, KeywordEmbedding>,
}

impl KeywordEmbeddingStore {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            entries: BTreeMap::new(),
        }
    }

    /// Load from `file`, or start empty when there is nothing usable on disk.
    ///
    /// A file written by another model, with other dimensions or by a newer
    /// format version is discarded with a warning; the next `index_all`
    /// rebuilds it. Any other failure is returned.
    pub fn load_or_new(
        file: &VectorFile,
        model_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<Self, StoreError> {
        if !file.exists() {
            log::info!("no keyword vectors at {:?}, starting fresh", file.path());
            return Ok(Self::new(dimensions));
        }

        match file.load(model_id, dimensions) {
            Ok(loaded) => {
                let mut store = Self::new(dimensions);
                for entry in loaded {
                    store.entries.insert(entry.keyword.clone(), entry);
                }
                log::info!("loaded {} keyword vectors", store.len());
                Ok(store)
            }
            Err(VectorFileError::ModelMismatch) => {
                log::warn!("embedding model changed, keyword vectors must be re-indexed");
                Ok(Self::new(dimensions))
            }
            Err(VectorFileError::DimensionMismatch { expected, got }) => {
                log::warn!(
                    "stored vectors have {} dimensions, model has {}; re-index required",
                    got,
                    expected
                );
                Ok(Self::new(dimensions))
            }
            Err(VectorFileError::VersionMismatch(file_ver, _)) => {
                log::warn!("vectors file version {} unsupported, starting fresh", file_ver);
                Ok(Self::new(dimensions))
            }
            Err(e) => {
                log::error!("failed to load keyword vectors: {}", e);
                Err(e.into())
            }
        }
    }

    pub fn save(&self, file: &VectorFile, model_id: &[u8; 32]) -> Result<(), StoreError> {
        file.save(
            self.entries.values(),
            self.entries.len(),
            self.dimensions,
            model_id,
        )?;
        log::debug!("saved {} keyword vectors", self.entries.len());
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.contains_key(keyword)
    }

    /// Every (keyword, vector) pair, in keyword order.
    pub fn get_all(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.entries
            .values()
            .map(|e| (e.keyword.as_str(), e.embedding.as_slice()))
    }

    /// Embed and keep `keyword` unless it is already stored.
    ///
    /// Returns `true` when a new entry was created.
    pub fn store(
        &mut self,
        provider: &dyn EmbeddingProvider,
        keyword: &str,
    ) -> Result<bool, StoreError> {
        let Some(keyword) = normalize_keyword(keyword) else {
            return Ok(false);
        };
        if self.contains(&keyword) {
            return Ok(false);
        }

        let embedding = provider.embed(&keyword)?;
        self.insert(keyword, embedding)
    }

    /// Store several keywords, calling the provider one batch at a time.
    ///
    /// Input is trimmed and deduplicated first. Returns the number of new
    /// entries. Batches finished before a failure stay stored.
    pub fn store_many<I, S>(
        &mut self,
        provider: &dyn EmbeddingProvider,
        keywords: I,
        batch_size: usize,
    ) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pending: Vec<String> = dedupe_keywords(keywords)
            .into_iter()
            .filter(|k| !self.contains(k))
            .collect();

        let mut stored = 0;
        for batch in pending.chunks(batch_size.max(1)) {
            let embeddings = provider.embed_many(batch)?;
            if embeddings.len() != batch.len() {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "expected {} embeddings, provider returned {}",
                    batch.len(),
                    embeddings.len()
                ))
                .into());
            }

            for (keyword, embedding) in batch.iter().zip(embeddings) {
                if self.insert(keyword.clone(), embedding)? {
                    stored += 1;
                }
            }
            log::debug!("indexed batch of {} keywords", batch.len());
        }

        Ok(stored)
    }

    fn insert(&mut self, keyword: String, embedding: Vec<f32>) -> Result<bool, StoreError> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                keyword,
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        if embedding.iter().any(|x| !x.is_finite()) || l2_norm(&embedding) < f32::EPSILON {
            return Err(StoreError::InvalidVector(keyword));
        }

        if self.entries.contains_key(&keyword) {
            return Ok(false);
        }

        self.entries.insert(
            keyword.clone(),
            KeywordEmbedding {
                keyword,
                embedding,
                created_at: Utc::now(),
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::FakeProvider;

    #[test]
    fn test_store_is_idempotent() {
        let provider = FakeProvider::new(8);
        let mut store = KeywordEmbeddingStore::new(8);

        assert!(store.store(&provider, "river").unwrap());
        assert!(!store.store(&provider, "river").unwrap());
        assert!(!store.store(&provider, "  river ").unwrap());

        assert_eq!(store.get_all().count(), 1);
        assert_eq!(provider.calls(), 1);
    }

    #[test]
    fn test_store_is_case_sensitive() {
        let provider = FakeProvider::new(8);
        let mut store = KeywordEmbeddingStore::new(8);

        store.store(&provider, "AI").unwrap();
        store.store(&provider, "ai").unwrap();

        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_store_blank_keyword_is_noop() {
        let provider = FakeProvider::new(8);
        let mut store = KeywordEmbeddingStore::new(8);

        assert!(!store.store(&provider, "   ").unwrap());
        assert!(store.is_empty());
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn test_store_many_dedupes_and_batches() {
        let provider = FakeProvider::new(8);
        let mut store = KeywordEmbeddingStore::new(8);
        store.store(&provider, "lake").unwrap();

        let stored = store
            .store_many(
                &provider,
                ["mountain", " river", "", "mountain", "lake", "forest", "river "],
                2,
            )
            .unwrap();

        assert_eq!(stored, 3);
        let keywords: Vec<_> = store.get_all().map(|(k, _)| k).collect();
        assert_eq!(keywords, vec!["forest", "lake", "mountain", "river"]);
        // one single call plus two batches (2 + 1)
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_store_rejects_wrong_dimensions() {
        let provider = FakeProvider::new(4);
        let mut store = KeywordEmbeddingStore::new(8);

        let result = store.store(&provider, "river");
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch {
                expected: 8,
                got: 4,
                ..
            })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_rejects_zero_vector() {
        let provider = FakeProvider::new(3).with_vector("void", vec![0.0, 0.0, 0.0]);
        let mut store = KeywordEmbeddingStore::new(3);

        let result = store.store(&provider, "void");
        assert!(matches!(result, Err(StoreError::InvalidVector(_))));
    }

    #[test]
    fn test_provider_failure_propagates() {
        let provider = FakeProvider::new(8);
        provider.set_failing(true);
        let mut store = KeywordEmbeddingStore::new(8);

        let result = store.store_many(&provider, ["river"], 8);
        assert!(matches!(result, Err(StoreError::Embedding(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(dir.path().join("vectors.bin"));
        let provider = FakeProvider::new(8);
        let model_id = provider.model_id_hash();

        let mut store = KeywordEmbeddingStore::new(8);
        store
            .store_many(&provider, ["mountain", "river", "lake"], 64)
            .unwrap();
        store.save(&file, &model_id).unwrap();

        let loaded = KeywordEmbeddingStore::load_or_new(&file, &model_id, 8).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.contains("river"));
        let before: Vec<_> = store.get_all().collect();
        let after: Vec<_> = loaded.get_all().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_load_other_model_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(dir.path().join("vectors.bin"));
        let provider = FakeProvider::new(8);

        let mut store = KeywordEmbeddingStore::new(8);
        store.store(&provider, "river").unwrap();
        store.save(&file, &provider.model_id_hash()).unwrap();

        let other_model = crate::semantic::embeddings::model_id_hash("other-model");
        let loaded = KeywordEmbeddingStore::load_or_new(&file, &other_model, 8).unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_load_missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let file = VectorFile::new(dir.path().join("vectors.bin"));

        let loaded = KeywordEmbeddingStore::load_or_new(&file, &[0u8; 32], 8).unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensions(), 8);
    }
}
