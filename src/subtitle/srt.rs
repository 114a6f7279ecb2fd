// SRT subtitle format
use super::{to_entries, SubtitleEntry};
use crate::error::{Result, SubtitlerError};
use crate::transcribe::Segment;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

/// Render segments as SRT text. Blank segments are dropped.
pub fn encode(segments: &[Segment]) -> String {
    let mut output = String::new();
    for entry in to_entries(segments) {
        output.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            entry.index,
            format_timestamp(entry.start),
            format_timestamp(entry.end),
            entry.text
        ));
    }
    output
}

/// Encode segments and write them to `path` as UTF-8.
///
/// Returns the number of entries written.
pub fn write_srt(path: &Path, segments: &[Segment]) -> Result<usize> {
    let content = encode(segments);
    let count = to_entries(segments).len();

    std::fs::write(path, content)
        .map_err(|e| SubtitlerError::EncodeFailed(format!("{}: {e}", path.display())))?;

    info!("Wrote {} entries to {}", count, path.display());
    Ok(count)
}

/// `HH:MM:SS,mmm`, truncating sub-millisecond precision. Hours may exceed 24.
pub fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = d.subsec_millis();
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

fn timestamp_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{2,}):([0-5]\d):([0-5]\d)[,.](\d{3})$").expect("valid timestamp regex")
    })
}

/// Parse an `HH:MM:SS,mmm` timestamp.
pub fn parse_timestamp(s: &str) -> Option<Duration> {
    let caps = timestamp_regex().captures(s.trim())?;
    let field = |i: usize| caps.get(i)?.as_str().parse::<u64>().ok();

    let secs = field(1)? * 3600 + field(2)? * 60 + field(3)?;
    Some(Duration::from_secs(secs) + Duration::from_millis(field(4)?))
}

/// Parse SRT text back into entries. Malformed blocks are skipped.
pub fn parse_srt(content: &str) -> Vec<SubtitleEntry> {
    let mut entries = Vec::new();
    let mut lines = content.lines().peekable();

    while lines.peek().is_some() {
        // Skip blank lines
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }

        let Some(index_line) = lines.next() else {
            break;
        };
        let Ok(index) = index_line.trim().trim_start_matches('\u{feff}').parse::<usize>() else {
            continue;
        };

        let Some(times) = lines.next() else {
            break;
        };
        let Some((start, end)) = times
            .split_once("-->")
            .and_then(|(a, b)| Some((parse_timestamp(a)?, parse_timestamp(b)?)))
        else {
            continue;
        };

        let mut text_lines = Vec::new();
        while let Some(line) = lines.next_if(|l| !l.trim().is_empty()) {
            text_lines.push(line.trim_end());
        }

        entries.push(SubtitleEntry {
            index,
            start,
            end,
            text: text_lines.join("\n"),
        });
    }

    entries
}
