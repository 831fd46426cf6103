//! Keyword search service.
//!
//! Runs the query pipeline over the catalog and the keyword embedding store:
//! validate, embed, rank stored keywords, find direct matches, merge per
//! file, enrich and truncate. Also owns indexing of catalog keywords.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::Serialize;

use crate::catalog::{AssetCatalog, AssetFile, AssetType, CatalogSnapshot};
use crate::semantic::context::{Interrupted, SearchContext};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::exact::find_direct_matches;
use crate::semantic::frames::{resolve_frames, MatchedFrame};
use crate::semantic::hybrid::{merge_matches, FileMatches, MatchCandidates};
use crate::semantic::similarity::{rank_with_context, RankError, SimilarKeyword};
use crate::semantic::storage::{VectorFile, VectorFileError};
use crate::semantic::store::{KeywordEmbeddingStore, StoreError};
use crate::semantic::{DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K, MAX_TOP_K};

/// Semantic candidates are over-fetched so merge losses do not starve the result.
const SEMANTIC_OVERFETCH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidQuery,
    DimensionMismatch,
    EmbeddingProviderFailure,
    StorageFailure,
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding provider failed: {0}")]
    EmbeddingProvider(#[from] EmbeddingError),

    #[error("Catalog error: {0:#}")]
    Catalog(anyhow::Error),

    #[error("Vector storage error: {0}")]
    VectorFile(#[from] VectorFileError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Cancelled(#[from] Interrupted),
}

impl SearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SearchError::InvalidQuery(_) => ErrorKind::InvalidQuery,
            SearchError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
            SearchError::EmbeddingProvider(_) => ErrorKind::EmbeddingProviderFailure,
            SearchError::Catalog(_) | SearchError::VectorFile(_) | SearchError::Internal(_) => {
                ErrorKind::StorageFailure
            }
            SearchError::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

impl From<RankError> for SearchError {
    fn from(err: RankError) -> Self {
        match err {
            RankError::DimensionMismatch { expected, got } => {
                SearchError::DimensionMismatch { expected, got }
            }
            RankError::Interrupted(interrupted) => SearchError::Cancelled(interrupted),
        }
    }
}

impl From<StoreError> for SearchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DimensionMismatch { expected, got, .. } => {
                SearchError::DimensionMismatch { expected, got }
            }
            StoreError::InvalidVector(keyword) => SearchError::EmbeddingProvider(
                EmbeddingError::EmbeddingFailed(format!("unusable vector for '{keyword}'")),
            ),
            StoreError::Embedding(e) => SearchError::EmbeddingProvider(e),
            StoreError::Storage(e) => SearchError::VectorFile(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub default_top_k: usize,
    pub default_min_similarity: f32,
    /// Zero disables the deadline.
    pub search_timeout: Duration,
    pub index_batch_size: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            default_min_similarity: DEFAULT_MIN_SIMILARITY,
            search_timeout: Duration::ZERO,
            index_batch_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeywordMatch {
    pub keyword: String,
    pub score: f32,
    /// `exact`, `direct` or `semantic`
    pub origin: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AssetDetails {
    Audio {
        transcription: Option<String>,
        language: Option<String>,
        duration_secs: Option<f64>,
    },
    Document {
        summary: Option<String>,
        word_count: Option<u64>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub file_id: u64,
    pub name: String,
    pub path: String,
    pub asset_type: AssetType,
    /// Best score among `matched_keywords`.
    pub score: f32,
    pub matched_keywords: Vec<KeywordMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<AssetDetails>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_frames: Option<Vec<MatchedFrame>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    /// Distinct keywords in the catalog.
    pub total_keywords: usize,
    /// Distinct catalog keywords that have an embedding.
    pub indexed_keywords: usize,
    /// Embeddings held by the store, including ones no file uses anymore.
    pub stored_vectors: usize,
    pub model: String,
    pub dimensions: usize,
}

pub struct SearchService {
    provider: Arc<dyn EmbeddingProvider>,
    catalog: Arc<dyn AssetCatalog>,
    store: RwLock<KeywordEmbeddingStore>,
    vectors: Option<VectorFile>,
    /// Store holds vectors that are not in `vectors` yet.
    unsaved: AtomicBool,
    settings: SearchSettings,
}

impl SearchService {
    /// Service with an empty, memory-only keyword store.
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        catalog: Arc<dyn AssetCatalog>,
        settings: SearchSettings,
    ) -> Self {
        let store = KeywordEmbeddingStore::new(provider.dimensions());
        Self {
            provider,
            catalog,
            store: RwLock::new(store),
            vectors: None,
            unsaved: AtomicBool::new(false),
            settings,
        }
    }

    /// Load the keyword store from `file` and save to it after indexing.
    pub fn with_vector_file(mut self, file: VectorFile) -> Result<Self, SearchError> {
        let store = KeywordEmbeddingStore::load_or_new(
            &file,
            &self.provider.model_id_hash(),
            self.provider.dimensions(),
        )?;
        self.store = RwLock::new(store);
        self.vectors = Some(file);
        Ok(self)
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Fresh context carrying the configured deadline.
    pub fn context(&self) -> SearchContext {
        SearchContext::with_timeout(self.settings.search_timeout)
    }

    pub fn semantic_search(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        asset_type: Option<AssetType>,
    ) -> Result<Vec<SearchResult>, SearchError> {
        self.semantic_search_with_context(query, top_k, min_similarity, asset_type, &self.context())
    }

    pub fn semantic_search_with_context(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
        asset_type: Option<AssetType>,
        ctx: &SearchContext,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let query = validate(query, top_k, min_similarity)?;
        ctx.check()?;

        let snapshot = self.catalog.snapshot().map_err(SearchError::Catalog)?;

        let semantic =
            self.rank_keywords(query, top_k * SEMANTIC_OVERFETCH, min_similarity, ctx)?;
        let direct = find_direct_matches(query, &snapshot, asset_type, ctx)?;

        log::debug!(
            "query '{}': {} semantic candidates, {} direct matches",
            query,
            semantic.len(),
            direct.len()
        );

        let candidates = MatchCandidates {
            literal: query,
            semantic,
            direct,
        };
        let mut merged = merge_matches(&snapshot, &candidates, asset_type, ctx)?;
        merged.truncate(top_k);

        let results: Vec<SearchResult> = merged
            .iter()
            .filter_map(|matches| {
                let file = snapshot.files.get(&matches.file_id)?;
                Some(build_result(file, matches, &snapshot))
            })
            .collect();

        ctx.check()?;
        log::info!("query '{}' returned {} files", query, results.len());
        Ok(results)
    }

    /// Stored keywords closest to `query`, without touching the catalog.
    pub fn find_similar_keywords(
        &self,
        query: &str,
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<SimilarKeyword>, SearchError> {
        let query = validate(query, top_k, min_similarity)?;
        self.rank_keywords(query, top_k, min_similarity, &self.context())
    }

    /// Embed every catalog keyword that has no embedding yet.
    ///
    /// Returns the number of newly indexed keywords.
    pub fn index_all(&self) -> Result<usize, SearchError> {
        let snapshot = self.catalog.snapshot().map_err(SearchError::Catalog)?;
        let keywords = snapshot.distinct_keywords();
        log::info!("indexing {} distinct catalog keywords", keywords.len());
        self.index_keywords(&keywords)
    }

    /// Embed and persist the given keywords; already indexed ones are skipped.
    pub fn index_keywords(&self, keywords: &[String]) -> Result<usize, SearchError> {
        let pending: Vec<String> = {
            let store = self.read_store()?;
            keywords
                .iter()
                .filter(|k| !store.contains(k.trim()))
                .cloned()
                .collect()
        };
        if pending.is_empty() {
            // a previous save may have failed
            self.persist()?;
            return Ok(0);
        }

        let batch_size = self.settings.index_batch_size.max(1);
        let mut indexed = 0;
        let mut failure = None;

        for batch in pending.chunks(batch_size) {
            // lock per batch so searches interleave with long indexing runs
            let mut store = self.write_store()?;
            match store.store_many(self.provider.as_ref(), batch, batch_size) {
                Ok(count) => indexed += count,
                Err(e) => {
                    failure = Some(SearchError::from(e));
                    break;
                }
            }
        }

        if indexed > 0 {
            self.unsaved.store(true, Ordering::SeqCst);
        }
        if let Err(e) = self.persist() {
            log::error!("failed to save keyword vectors: {}", e);
            return Err(failure.unwrap_or(e));
        }

        match failure {
            Some(e) => {
                log::error!("indexing stopped after {} keywords: {}", indexed, e);
                Err(e)
            }
            None => {
                log::info!("indexed {} new keywords", indexed);
                Ok(indexed)
            }
        }
    }

    pub fn stats(&self) -> Result<IndexStats, SearchError> {
        let snapshot = self.catalog.snapshot().map_err(SearchError::Catalog)?;
        let keywords = snapshot.distinct_keywords();
        let store = self.read_store()?;

        Ok(IndexStats {
            total_keywords: keywords.len(),
            indexed_keywords: keywords.iter().filter(|k| store.contains(k)).count(),
            stored_vectors: store.len(),
            model: self.provider.name().to_string(),
            dimensions: store.dimensions(),
        })
    }

    /// Write the store to the vector file if it changed since the last save.
    fn persist(&self) -> Result<(), SearchError> {
        let Some(file) = &self.vectors else {
            return Ok(());
        };
        if !self.unsaved.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let result = self
            .read_store()
            .and_then(|store| Ok(store.save(file, &self.provider.model_id_hash())?));
        if result.is_err() {
            self.unsaved.store(true, Ordering::SeqCst);
        }
        result
    }

    /// Rank stored keywords against `query`. An empty store yields no
    /// candidates and skips the provider call.
    fn rank_keywords(
        &self,
        query: &str,
        limit: usize,
        min_similarity: f32,
        ctx: &SearchContext,
    ) -> Result<Vec<SimilarKeyword>, SearchError> {
        if self.read_store()?.is_empty() {
            log::debug!("no keyword vectors stored, semantic matching skipped");
            return Ok(vec![]);
        }

        ctx.check()?;
        let query_vector = self.provider.embed(query)?;
        ctx.check()?;

        let store = self.read_store()?;
        if query_vector.len() != store.dimensions() {
            return Err(SearchError::DimensionMismatch {
                expected: store.dimensions(),
                got: query_vector.len(),
            });
        }

        Ok(rank_with_context(
            &query_vector,
            store.get_all(),
            limit,
            min_similarity,
            ctx,
        )?)
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, KeywordEmbeddingStore>, SearchError> {
        self.store
            .read()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, KeywordEmbeddingStore>, SearchError> {
        self.store
            .write()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))
    }
}

fn validate(query: &str, top_k: usize, min_similarity: f32) -> Result<&str, SearchError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(SearchError::InvalidQuery("query must not be empty".to_string()));
    }
    if !(1..=MAX_TOP_K).contains(&top_k) {
        return Err(SearchError::InvalidQuery(format!(
            "top_k must be between 1 and {MAX_TOP_K}, got {top_k}"
        )));
    }
    if !(0.0..=1.0).contains(&min_similarity) {
        return Err(SearchError::InvalidQuery(format!(
            "min_similarity must be between 0.0 and 1.0, got {min_similarity}"
        )));
    }
    Ok(query)
}

fn build_result(file: &AssetFile, matches: &FileMatches, snapshot: &CatalogSnapshot) -> SearchResult {
    let ranked = matches.ranked_keywords();

    let details = match file.asset_type {
        AssetType::Audio => Some(AssetDetails::Audio {
            transcription: file.transcription.clone(),
            language: file.language.clone(),
            duration_secs: file.duration_secs,
        }),
        AssetType::Document | AssetType::Text => Some(AssetDetails::Document {
            summary: file.summary.clone(),
            word_count: file.word_count,
        }),
        AssetType::Video | AssetType::Image => None,
    };

    let matched_frames = match file.asset_type {
        AssetType::Video => {
            let keywords: Vec<&str> = ranked.iter().map(|(k, _)| *k).collect();
            Some(resolve_frames(snapshot.frames_of(file.id), &keywords))
        }
        _ => None,
    };

    SearchResult {
        file_id: file.id,
        name: file.name.clone(),
        path: file.path.clone(),
        asset_type: file.asset_type,
        score: matches.best_score(),
        matched_keywords: ranked
            .iter()
            .map(|(keyword, origin)| KeywordMatch {
                keyword: keyword.to_string(),
                score: origin.score(),
                origin: origin.label(),
            })
            .collect(),
        details,
        matched_frames,
    }
}
