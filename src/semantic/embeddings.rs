//! Embedding providers.
//!
//! [`EmbeddingProvider`] is the seam between the search core and whatever
//! turns text into vectors; tests plug in a deterministic fake. The
//! production provider is [`EmbeddingModel`], a local ONNX model run
//! through fastembed. Model files are fetched into `<base>/models` the
//! first time a model is used.

use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use fastembed::{InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Accepted model names and the fastembed model behind each.
const SUPPORTED_MODELS: &[(&str, fastembed::EmbeddingModel)] = &[
    ("all-MiniLM-L6-v2", fastembed::EmbeddingModel::AllMiniLML6V2),
    ("all-MiniLM-L6-v2-q", fastembed::EmbeddingModel::AllMiniLML6V2Q),
    ("bge-small-en-v1.5", fastembed::EmbeddingModel::BGESmallENV15),
    ("bge-base-en-v1.5", fastembed::EmbeddingModel::BGEBaseENV15),
    ("multilingual-e5-small", fastembed::EmbeddingModel::MultilingualE5Small),
];

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("could not load embedding model: {0}")]
    InitFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("unsupported embedding model '{0}'")]
    InvalidModel(String),
}

/// Text to fixed-dimension, L2-normalized vector.
///
/// Implementations must be deterministic for a fixed model version.
pub trait EmbeddingProvider: Send + Sync {
    /// Model name, used to fingerprint persisted vectors.
    fn name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed several texts; output order matches input order.
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }

    fn model_id_hash(&self) -> [u8; 32] {
        model_id_hash(self.name())
    }
}

/// Fingerprint written into `vectors.bin`.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    Sha256::digest(model_name.as_bytes()).into()
}

fn lookup_model(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
    SUPPORTED_MODELS
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(name.trim()))
        .map(|(_, model)| model.clone())
        .ok_or_else(|| EmbeddingError::InvalidModel(name.to_string()))
}

/// Run `work` on its own thread and give up after `timeout`.
///
/// On timeout the thread is left to finish in the background and its
/// result is dropped.
fn run_with_timeout<T, F>(timeout: Duration, work: F) -> Result<T, EmbeddingError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EmbeddingError> + Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("model-loader".to_string())
        .spawn(move || {
            // the caller may have timed out already
            let _ = done_tx.send(work());
        })
        .map_err(|e| EmbeddingError::InitFailed(format!("could not start model loader: {e}")))?;

    match done_rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(EmbeddingError::InitFailed(format!(
            "model not ready after {}s",
            timeout.as_secs_f32()
        ))),
        Err(RecvTimeoutError::Disconnected) => Err(EmbeddingError::InitFailed(
            "model loader stopped without a result".to_string(),
        )),
    }
}

pub struct EmbeddingModel {
    // fastembed needs `&mut` to embed
    inner: Mutex<TextEmbedding>,
    name: String,
    dimensions: usize,
}

impl EmbeddingModel {
    pub fn new(
        name: &str,
        base_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let model = lookup_model(name)?;

        let cache_dir = base_dir.join("models");
        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| EmbeddingError::InitFailed(format!("{cache_dir:?}: {e}")))?;

        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);
        log::info!(
            "loading embedding model '{name}' from {cache_dir:?} (timeout {}s)",
            timeout.as_secs()
        );

        let (inner, dimensions) = run_with_timeout(timeout, move || {
            let mut inner = TextEmbedding::try_new(
                InitOptions::new(model)
                    .with_cache_dir(cache_dir)
                    .with_show_download_progress(true),
            )
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

            // one throwaway embedding tells us the vector length
            let dimensions = inner
                .embed(vec!["dimension probe"], None)
                .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?
                .first()
                .map(Vec::len)
                .ok_or_else(|| EmbeddingError::InitFailed("model returned no vector".to_string()))?;

            Ok((inner, dimensions))
        })?;

        log::debug!("embedding model '{name}' ready, {dimensions} dimensions");

        Ok(Self {
            inner: Mutex::new(inner),
            name: name.to_string(),
            dimensions,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, TextEmbedding>, EmbeddingError> {
        self.inner
            .lock()
            .map_err(|e| EmbeddingError::EmbeddingFailed(format!("model lock poisoned: {e}")))
    }
}

impl EmbeddingProvider for EmbeddingModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed_many(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("model returned no vector".to_string()))
    }

    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let vectors = self
            .lock()?
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        if vectors.len() != texts.len() {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "asked for {} vectors, model returned {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}
