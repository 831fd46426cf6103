//! Merging semantic and direct keyword matches into per-file results.
//!
//! A keyword can reach a file along three paths:
//! - `Exact`: the keyword equals the query (case-insensitive), score 1.0
//! - `Direct`: the keyword contains the query, score 0.9
//! - `Semantic`: the keyword's embedding is close to the query's
//!
//! When several paths reach the same (file, keyword) pair the highest score
//! wins. A file is ranked by its single best keyword, not by a sum.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use crate::catalog::{AssetType, CatalogSnapshot};
use crate::semantic::context::{Interrupted, SearchContext, CHECK_INTERVAL};
use crate::semantic::exact::KeywordHit;
use crate::semantic::similarity::SimilarKeyword;
use crate::semantic::{DIRECT_MATCH_SCORE, EXACT_MATCH_SCORE};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchOrigin {
    Exact,
    Direct,
    Semantic(f32),
}

impl MatchOrigin {
    pub fn score(&self) -> f32 {
        match self {
            MatchOrigin::Exact => EXACT_MATCH_SCORE,
            MatchOrigin::Direct => DIRECT_MATCH_SCORE,
            MatchOrigin::Semantic(similarity) => similarity.clamp(0.0, 1.0),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MatchOrigin::Exact => "exact",
            MatchOrigin::Direct => "direct",
            MatchOrigin::Semantic(_) => "semantic",
        }
    }

    /// Breaks score ties: exact, then direct, then semantic.
    fn precedence(&self) -> u8 {
        match self {
            MatchOrigin::Exact => 2,
            MatchOrigin::Direct => 1,
            MatchOrigin::Semantic(_) => 0,
        }
    }

    /// Whether `self` should replace `other` for the same keyword.
    pub fn outranks(&self, other: &MatchOrigin) -> bool {
        match self.score().partial_cmp(&other.score()) {
            Some(Ordering::Greater) => true,
            Some(Ordering::Equal) => self.precedence() > other.precedence(),
            _ => false,
        }
    }
}

/// Everything the merger needs for one query.
#[derive(Debug, Clone)]
pub struct MatchCandidates<'q> {
    /// The query as typed; matched with score 1.0 wherever a stored keyword equals it.
    pub literal: &'q str,
    /// Ranked semantic keywords, already limited and thresholded.
    pub semantic: Vec<SimilarKeyword>,
    pub direct: Vec<KeywordHit>,
}

/// Matched keywords for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMatches {
    pub file_id: u64,
    keywords: BTreeMap<String, MatchOrigin>,
}

impl FileMatches {
    pub fn new(file_id: u64) -> Self {
        Self {
            file_id,
            keywords: BTreeMap::new(),
        }
    }

    /// Record `keyword`, never lowering a score already recorded.
    pub fn insert(&mut self, keyword: &str, origin: MatchOrigin) {
        match self.keywords.get_mut(keyword) {
            Some(current) if origin.outranks(current) => *current = origin,
            Some(_) => {}
            None => {
                self.keywords.insert(keyword.to_string(), origin);
            }
        }
    }

    pub fn get(&self, keyword: &str) -> Option<MatchOrigin> {
        self.keywords.get(keyword).copied()
    }

    pub fn best_score(&self) -> f32 {
        self.keywords
            .values()
            .map(MatchOrigin::score)
            .fold(0.0, f32::max)
    }

    /// Keywords by score descending, then keyword ascending.
    pub fn ranked_keywords(&self) -> Vec<(&str, MatchOrigin)> {
        let mut keywords: Vec<(&str, MatchOrigin)> = self
            .keywords
            .iter()
            .map(|(k, origin)| (k.as_str(), *origin))
            .collect();
        keywords.sort_by(|a, b| {
            b.1.score()
                .partial_cmp(&a.1.score())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

/// Merge all match paths into per-file keyword maps.
///
/// Returned files are ordered by best score descending, then file id
/// ascending. Nothing is truncated here.
pub fn merge_matches(
    snapshot: &CatalogSnapshot,
    candidates: &MatchCandidates<'_>,
    filter: Option<AssetType>,
    ctx: &SearchContext,
) -> Result<Vec<FileMatches>, Interrupted> {
    let literal = candidates.literal.trim().to_lowercase();
    let mut files: BTreeMap<u64, FileMatches> = BTreeMap::new();

    // direct and literal
    for hit in &candidates.direct {
        if !snapshot.in_scope(hit.file_id, filter) {
            continue;
        }
        let origin = if hit.keyword.to_lowercase() == literal {
            MatchOrigin::Exact
        } else {
            MatchOrigin::Direct
        };
        files
            .entry(hit.file_id)
            .or_insert_with(|| FileMatches::new(hit.file_id))
            .insert(&hit.keyword, origin);
    }

    // semantic keywords reach every file that carries them, as a file row or a frame token
    if !candidates.semantic.is_empty() {
        let semantic: HashMap<&str, f32> = candidates
            .semantic
            .iter()
            .map(|s| (s.keyword.as_str(), s.similarity))
            .collect();

        for (scanned, row) in snapshot.file_keywords.iter().enumerate() {
            if scanned % CHECK_INTERVAL == 0 {
                ctx.check()?;
            }
            let Some(&similarity) = semantic.get(row.keyword.as_str()) else {
                continue;
            };
            if snapshot.in_scope(row.file_id, filter) {
                files
                    .entry(row.file_id)
                    .or_insert_with(|| FileMatches::new(row.file_id))
                    .insert(&row.keyword, MatchOrigin::Semantic(similarity));
            }
        }

        if matches!(filter, None | Some(AssetType::Video)) {
            for (scanned, frame) in snapshot.frames.iter().enumerate() {
                if scanned % CHECK_INTERVAL == 0 {
                    ctx.check()?;
                }
                if !snapshot.in_scope(frame.file_id, filter) {
                    continue;
                }
                for token in &frame.tokens {
                    if let Some(&similarity) = semantic.get(token.as_str()) {
                        files
                            .entry(frame.file_id)
                            .or_insert_with(|| FileMatches::new(frame.file_id))
                            .insert(token, MatchOrigin::Semantic(similarity));
                    }
                }
            }
        }
    }

    let mut merged: Vec<FileMatches> = files.into_values().filter(|f| !f.is_empty()).collect();
    merged.sort_by(|a, b| {
        b.best_score()
            .partial_cmp(&a.best_score())
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.file_id.cmp(&b.file_id))
    });

    Ok(merged)
}
