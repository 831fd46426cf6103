//! Mapping matched keywords back to the video frames they were detected on.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::catalog::FrameKeywords;
use crate::semantic::preprocess::list_contains_token;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedFrame {
    pub frame_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    pub keywords: Vec<String>,
}

/// Frames of one file that contain any of `keywords`.
///
/// Membership uses the comma-list test on the raw frame field. Rows sharing a
/// frame index collapse into one entry; the result is sorted by frame index.
pub fn resolve_frames<'a, I>(frames: I, keywords: &[&str]) -> Vec<MatchedFrame>
where
    I: IntoIterator<Item = &'a FrameKeywords>,
{
    let mut by_index: BTreeMap<u32, MatchedFrame> = BTreeMap::new();

    for frame in frames {
        let found: Vec<&str> = keywords
            .iter()
            .copied()
            .filter(|keyword| list_contains_token(&frame.field, keyword))
            .collect();
        if found.is_empty() {
            continue;
        }

        let entry = by_index
            .entry(frame.frame_index)
            .or_insert_with(|| MatchedFrame {
                frame_index: frame.frame_index,
                timestamp: frame.timestamp,
                keywords: vec![],
            });

        if entry.timestamp.is_none() {
            entry.timestamp = frame.timestamp;
        }
        for keyword in found {
            if !entry.keywords.iter().any(|k| k == keyword) {
                entry.keywords.push(keyword.to_string());
            }
        }
    }

    by_index.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::video_frame;

    #[test]
    fn test_single_frame_match() {
        let frames = vec![video_frame(0, 3, Some(12.5), "dog, park, sunny")];

        let matched = resolve_frames(&frames, &["dog"]);
        assert_eq!(
            matched,
            vec![MatchedFrame {
                frame_index: 3,
                timestamp: Some(12.5),
                keywords: vec!["dog".to_string()],
            }]
        );
    }

    #[test]
    fn test_rows_sharing_a_frame_collapse() {
        let frames = vec![
            video_frame(0, 9, None, "car"),
            video_frame(0, 2, Some(0.5), "person, car"),
            video_frame(0, 9, Some(30.0), "person"),
        ];

        let matched = resolve_frames(&frames, &["person", "car"]);
        let indexes: Vec<u32> = matched.iter().map(|f| f.frame_index).collect();
        assert_eq!(indexes, vec![2, 9]);

        assert_eq!(matched[0].keywords, vec!["person", "car"]);
        assert_eq!(matched[1].keywords, vec!["car", "person"]);
        assert_eq!(matched[1].timestamp, Some(30.0));
    }

    #[test]
    fn test_whole_token_membership_only() {
        let frames = vec![video_frame(0, 1, None, "person, car, daytime")];

        assert!(resolve_frames(&frames, &["ca"]).is_empty());
        assert_eq!(resolve_frames(&frames, &["car"]).len(), 1);
    }

    #[test]
    fn test_no_keywords_no_frames() {
        let frames = vec![video_frame(0, 1, None, "dog")];
        assert!(resolve_frames(&frames, &[]).is_empty());
    }
}
