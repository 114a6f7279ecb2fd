pub mod srt;

pub use srt::{encode, format_timestamp, parse_srt, parse_timestamp, write_srt};

use crate::transcribe::Segment;
use std::time::Duration;

/// One numbered caption.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEntry {
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// Number segments 1..K, dropping any whose text is blank.
///
/// Blank segments do not consume an index.
pub fn to_entries(segments: &[Segment]) -> Vec<SubtitleEntry> {
    segments
        .iter()
        .filter_map(|segment| {
            let text = segment.text.trim();
            (!text.is_empty()).then(|| (segment, text))
        })
        .enumerate()
        .map(|(i, (segment, text))| SubtitleEntry {
            index: i + 1,
            start: segment.start,
            end: segment.end,
            text: text.to_string(),
        })
        .collect()
}
