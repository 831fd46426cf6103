use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::catalog::{
    AssetCatalog, AssetCreate, AssetFile, AssetType, CatalogCsv, CatalogSnapshot, FileKeyword,
    FrameCreate, FrameKeywords,
};
use crate::semantic::preprocess::split_keyword_list;
use crate::semantic::{EmbeddingError, EmbeddingProvider};


/// Deterministic embedding provider.
///
/// Unknown texts get a normalized vector derived from their SHA-256, so equal
/// strings always embed identically and distinct strings are nearly
/// unrelated. Tests that need controlled similarity register vectors with
/// [`FakeProvider::with_vector`].
pub struct FakeProvider {
    dimensions: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: AtomicBool,
    calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            vectors: HashMap::new(),
            failing: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Provider calls so far; a batch counts once.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.vectors.get(text) {
            return vector.clone();
        }

        let mut vector = Vec::with_capacity(self.dimensions);
        for block in 0..self.dimensions.div_ceil(32) {
            let digest = Sha256::digest(format!("{text}\0{block}").as_bytes());
            vector.extend(digest.iter().map(|b| *b as f32 / 255.0 - 0.5));
        }
        vector.truncate(self.dimensions);

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        vector.iter().map(|x| x / norm).collect()
    }

    fn check_failing(&self) -> Result<(), EmbeddingError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::EmbeddingFailed("provider offline".to_string()));
        }
        Ok(())
    }
}

impl EmbeddingProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake-model"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.check_failing()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.vector_for(text))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.check_failing()?;
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| self.vector_for(text)).collect())
    }
}

/// Catalog whose tables cannot be read or written.
pub struct BrokenCatalog;

impl AssetCatalog for BrokenCatalog {
    fn snapshot(&self) -> anyhow::Result<CatalogSnapshot> {
        anyhow::bail!("\"files.csv\": invalid row 3")
    }

    fn create_file(&self, _file: AssetCreate) -> anyhow::Result<AssetFile> {
        anyhow::bail!("catalog is read-only")
    }

    fn add_file_keywords(&self, _file_id: u64, _keywords: &[String]) -> anyhow::Result<Vec<String>> {
        anyhow::bail!("catalog is read-only")
    }

    fn add_frame_keywords(
        &self,
        _file_id: u64,
        _frame: FrameCreate,
    ) -> anyhow::Result<FrameKeywords> {
        anyhow::bail!("catalog is read-only")
    }
}

pub fn asset(id: u64, asset_type: AssetType) -> AssetFile {
    AssetFile {
        id,
        name: format!("file-{id}"),
        path: format!("/data/file-{id}"),
        asset_type,
        size_bytes: 0,
        created_at: Utc::now(),
        transcription: None,
        language: None,
        duration_secs: None,
        summary: None,
        word_count: None,
    }
}

pub fn video_frame(
    file_id: u64,
    frame_index: u32,
    timestamp: Option<f64>,
    field: &str,
) -> FrameKeywords {
    FrameKeywords {
        file_id,
        frame_index,
        timestamp,
        confidence: None,
        field: field.to_string(),
        tokens: split_keyword_list(field),
    }
}

/// In-memory snapshot: `(file_id, type, keywords)` per file, plus frame rows.
pub fn snapshot_with(
    files: &[(u64, AssetType, &[&str])],
    frames: Vec<FrameKeywords>,
) -> CatalogSnapshot {
    let mut snapshot = CatalogSnapshot {
        frames,
        ..Default::default()
    };
    for (id, asset_type, keywords) in files {
        snapshot.files.insert(*id, asset(*id, *asset_type));
        snapshot
            .file_keywords
            .extend(keywords.iter().map(|keyword| FileKeyword {
                file_id: *id,
                keyword: keyword.to_string(),
            }));
    }
    snapshot
}

/// CSV catalog in a temp dir: `(name, type, keywords)` per file, ids from 0.
pub fn catalog_with(
    files: &[(&str, AssetType, &[&str])],
) -> (Arc<dyn AssetCatalog>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let catalog = CatalogCsv::load(dir.path()).unwrap();

    for (name, asset_type, keywords) in files {
        let file = catalog
            .create_file(AssetCreate {
                name: name.to_string(),
                path: format!("/data/{name}"),
                asset_type: Some(*asset_type),
                ..Default::default()
            })
            .unwrap();
        let keywords: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
        catalog.add_file_keywords(file.id, &keywords).unwrap();
    }

    (Arc::new(catalog), dir)
}
