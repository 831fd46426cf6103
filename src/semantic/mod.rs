//! Hybrid keyword search.
//!
//! Keywords attached to files and video frames are embedded once and kept in
//! a brute-force vector store. A query is answered by merging three kinds of
//! matches per file: literal equality, substring, and embedding similarity.
//!
//! # Architecture
//!
//! - `embeddings`: provider trait and the fastembed-backed model
//! - `store`: one vector per distinct keyword
//! - `storage`: binary file I/O for vectors.bin persistence
//! - `similarity`: cosine similarity and top-K ranking
//! - `exact`: substring matches over file and frame rows
//! - `hybrid`: per-file merge with max-score precedence
//! - `frames`: frame provenance for video results
//! - `service`: the query pipeline and indexing

pub mod context;
pub mod embeddings;
mod exact;
mod frames;
mod hybrid;
pub mod preprocess;
mod service;
mod similarity;
mod storage;
mod store;

pub use context::SearchContext;
pub use embeddings::{EmbeddingError, EmbeddingModel, EmbeddingProvider};
pub use frames::MatchedFrame;
pub use service::{
    AssetDetails, ErrorKind, IndexStats, KeywordMatch, SearchError, SearchResult, SearchService,
    SearchSettings,
};
pub use similarity::SimilarKeyword;
pub use storage::VectorFile;

/// Default embedding model name
pub const DEFAULT_MODEL: &str = "all-MiniLM-L6-v2";

pub const DEFAULT_TOP_K: usize = 10;
pub const MAX_TOP_K: usize = 100;

/// Default inclusive similarity threshold for semantic candidates
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.3;

/// Score of a keyword equal to the query
pub const EXACT_MATCH_SCORE: f32 = 1.0;
/// Score of a keyword containing the query
pub const DIRECT_MATCH_SCORE: f32 = 0.9;
