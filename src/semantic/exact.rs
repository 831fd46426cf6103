//! Substring matching over stored keywords.
//!
//! Two row shapes are searched: one keyword per file row, and video frame
//! rows whose field may join several keywords with commas. A frame field
//! that contains the query is split and only the tokens that themselves
//! contain the query are reported, so unrelated keywords sharing the field
//! do not leak into the results.

use crate::catalog::{AssetType, CatalogSnapshot};
use crate::semantic::context::{Interrupted, SearchContext, CHECK_INTERVAL};
use crate::semantic::preprocess::contains_ignore_case;

/// A stored keyword that contains the query, and the file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeywordHit {
    pub file_id: u64,
    pub keyword: String,
}

/// Case-insensitive substring search, scoped by asset type when given.
///
/// Rows whose file is missing from the catalog are ignored.
pub fn find_direct_matches(
    query: &str,
    snapshot: &CatalogSnapshot,
    filter: Option<AssetType>,
    ctx: &SearchContext,
) -> Result<Vec<KeywordHit>, Interrupted> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Ok(vec![]);
    }

    let mut hits = Vec::new();

    for (scanned, row) in snapshot.file_keywords.iter().enumerate() {
        if scanned % CHECK_INTERVAL == 0 {
            ctx.check()?;
        }
        if contains_ignore_case(&row.keyword, &needle) && snapshot.in_scope(row.file_id, filter) {
            hits.push(KeywordHit {
                file_id: row.file_id,
                keyword: row.keyword.clone(),
            });
        }
    }

    if matches!(filter, None | Some(AssetType::Video)) {
        for (scanned, frame) in snapshot.frames.iter().enumerate() {
            if scanned % CHECK_INTERVAL == 0 {
                ctx.check()?;
            }
            if !contains_ignore_case(&frame.field, &needle)
                || !snapshot.in_scope(frame.file_id, filter)
            {
                continue;
            }

            hits.extend(
                frame
                    .tokens
                    .iter()
                    .filter(|token| contains_ignore_case(token, &needle))
                    .map(|token| KeywordHit {
                        file_id: frame.file_id,
                        keyword: token.clone(),
                    }),
            );
        }
    }

    log::debug!("direct matches for '{}': {}", query, hits.len());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{snapshot_with, video_frame};

    fn hit(file_id: u64, keyword: &str) -> KeywordHit {
        KeywordHit {
            file_id,
            keyword: keyword.to_string(),
        }
    }

    #[test]
    fn test_file_keyword_substring_is_case_insensitive() {
        let snapshot = snapshot_with(
            &[(0, AssetType::Image, &["Red Rocket", "sky"])],
            vec![],
        );

        let hits =
            find_direct_matches("rocket", &snapshot, None, &SearchContext::new()).unwrap();
        assert_eq!(hits, vec![hit(0, "Red Rocket")]);
    }

    #[test]
    fn test_frame_field_is_split_and_refiltered() {
        let snapshot = snapshot_with(
            &[(0, AssetType::Video, &[])],
            vec![video_frame(0, 3, Some(12.5), "dog, park, sunny")],
        );

        let hits = find_direct_matches("dog", &snapshot, None, &SearchContext::new()).unwrap();
        assert_eq!(hits, vec![hit(0, "dog")]);
    }

    #[test]
    fn test_partial_query_reaches_whole_frame_token() {
        let snapshot = snapshot_with(
            &[(0, AssetType::Video, &[])],
            vec![video_frame(0, 1, None, "person, car, daytime")],
        );

        let hits = find_direct_matches("ca", &snapshot, None, &SearchContext::new()).unwrap();
        assert_eq!(hits, vec![hit(0, "car")]);
    }

    #[test]
    fn test_type_filter_scopes_both_row_shapes() {
        let snapshot = snapshot_with(
            &[
                (0, AssetType::Video, &["dog"]),
                (1, AssetType::Audio, &["dog barking"]),
            ],
            vec![video_frame(0, 7, None, "dog")],
        );
        let ctx = SearchContext::new();

        let audio = find_direct_matches("dog", &snapshot, Some(AssetType::Audio), &ctx).unwrap();
        assert_eq!(audio, vec![hit(1, "dog barking")]);

        let video = find_direct_matches("dog", &snapshot, Some(AssetType::Video), &ctx).unwrap();
        assert_eq!(video, vec![hit(0, "dog"), hit(0, "dog")]);
    }

    #[test]
    fn test_orphan_rows_are_ignored() {
        let mut snapshot = snapshot_with(&[(0, AssetType::Text, &["lake"])], vec![]);
        snapshot.file_keywords.push(crate::catalog::FileKeyword {
            file_id: 42,
            keyword: "lake".to_string(),
        });

        let hits = find_direct_matches("lake", &snapshot, None, &SearchContext::new()).unwrap();
        assert_eq!(hits, vec![hit(0, "lake")]);
    }

    #[test]
    fn test_blank_query_matches_nothing() {
        let snapshot = snapshot_with(&[(0, AssetType::Text, &["lake"])], vec![]);
        let hits = find_direct_matches("  ", &snapshot, None, &SearchContext::new()).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_cancelled_scan() {
        let snapshot = snapshot_with(&[(0, AssetType::Text, &["lake"])], vec![]);
        let ctx = SearchContext::new();
        ctx.cancel();

        let result = find_direct_matches("lake", &snapshot, None, &ctx);
        assert_eq!(result, Err(Interrupted::Cancelled));
    }
}
