//! Mapping chunk-relative transcripts back onto the source timeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::audio::{AudioChunk, MediaTool};
use crate::error::{Result, SubtitlerError};
use crate::transcribe::{ChunkOutcome, ChunkStatus, Segment};

/// Re-probe every chunk file and derive offsets from the measured durations.
///
/// A chunk whose probe fails contributes zero to the running offset.
/// Stops with `Cancelled` once `cancelled` is raised, leaving offsets untouched.
pub async fn measure_offsets(
    tool: &dyn MediaTool,
    chunks: &mut [AudioChunk],
    cancelled: &AtomicBool,
) -> Result<()> {
    let mut probed = Vec::with_capacity(chunks.len());
    for chunk in chunks.iter() {
        if cancelled.load(Ordering::Relaxed) {
            return Err(SubtitlerError::Cancelled {
                completed: 0,
                total: chunks.len(),
            });
        }

        let duration = match tool.probe_duration(chunk.path()).await {
            Ok(d) => d,
            Err(e) => {
                warn!(
                    "Could not probe chunk {} ({}), assuming zero duration: {}",
                    chunk.index,
                    chunk.path().display(),
                    e
                );
                Duration::ZERO
            }
        };
        probed.push(duration);
    }
    accumulate_offsets(chunks, &probed);
    Ok(())
}

/// Replace nominal offsets with a running sum of measured durations.
///
/// `chunks` must be in index order and carry their nominal offset and
/// duration. Gaps left by chunks that were never created are bridged with
/// their nominal length so later chunks stay aligned with the source.
pub fn accumulate_offsets(chunks: &mut [AudioChunk], measured: &[Duration]) {
    let mut running = Duration::ZERO;
    let mut nominal_end = Duration::ZERO;

    for (chunk, &duration) in chunks.iter_mut().zip(measured) {
        running += chunk.offset.saturating_sub(nominal_end);
        nominal_end = chunk.end();

        debug!(
            "Chunk {}: nominal {:.3}s, measured offset {:.3}s (+{:.3}s)",
            chunk.index,
            chunk.offset.as_secs_f64(),
            running.as_secs_f64(),
            duration.as_secs_f64()
        );

        chunk.offset = running;
        chunk.duration = duration;
        running += duration;
    }
}

/// Merge per-chunk transcripts into one timeline-ordered segment list.
///
/// Each transcribed chunk's segments are shifted by the chunk offset; failed
/// and skipped chunks contribute nothing. The result is stably sorted by
/// start time. Fails with `NoSegmentsProduced` if nothing with text remains.
pub fn reassemble(mut outcomes: Vec<ChunkOutcome>) -> Result<Vec<Segment>> {
    outcomes.sort_by_key(|o| o.index);

    let total = outcomes.len();
    let mut failures = Vec::new();
    let mut segments: Vec<Segment> = Vec::new();

    for outcome in outcomes {
        match outcome.status {
            ChunkStatus::Transcribed(mut transcript) => {
                transcript.shift(outcome.offset);
                segments.extend(transcript.segments);
            }
            ChunkStatus::Failed(reason) => failures.push(format!("chunk {}: {}", outcome.index, reason)),
            ChunkStatus::Skipped => failures.push(format!("chunk {}: skipped", outcome.index)),
        }
    }

    if !segments.iter().any(|s| !s.text.trim().is_empty()) {
        let detail = if failures.is_empty() {
            format!("{} chunk(s) transcribed to silence", total)
        } else {
            failures.join("; ")
        };
        return Err(SubtitlerError::NoSegmentsProduced(detail));
    }

    // `sort_by_key` is stable, so equal starts keep chunk order.
    segments.sort_by_key(|s| s.start);
    Ok(segments)
}
