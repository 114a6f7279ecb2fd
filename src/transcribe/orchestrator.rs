use crate::audio::{remove_temp_file, AudioChunk};
use crate::transcribe::{Transcriber, Transcript};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// What happened to a single chunk.
#[derive(Debug)]
pub enum ChunkStatus {
    Transcribed(Transcript),
    Failed(String),
    /// Never dispatched because the run was cancelled.
    Skipped,
}

/// Result of processing a single chunk.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub index: usize,
    /// Where the chunk starts on the source timeline.
    pub offset: Duration,
    pub status: ChunkStatus,
    pub duration_ms: u64,
}

/// Statistics from the transcription process.
#[derive(Debug, Clone, Default)]
pub struct TranscriptionStats {
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub failed_chunks: usize,
    pub skipped_chunks: usize,
    pub total_time: Duration,
    pub avg_chunk_time: Duration,
}

/// Transcribes chunks concurrently with a bounded number of in-flight calls.
///
/// Chunk failures are isolated: each chunk yields its own `ChunkOutcome`
/// and never affects its siblings. Every chunk file the chunk owns is
/// deleted once its attempt has finished or been skipped.
pub struct TranscriptionOrchestrator {
    transcriber: Arc<dyn Transcriber>,
    concurrency: usize,
    language: Option<String>,
    show_progress: bool,
    cancelled: Arc<AtomicBool>,
}

impl TranscriptionOrchestrator {
    pub fn new(transcriber: Arc<dyn Transcriber>, concurrency: usize) -> Self {
        Self {
            transcriber,
            concurrency: concurrency.max(1),
            language: None,
            show_progress: true,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Language hint passed with every request; `None` auto-detects.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language;
        self
    }

    /// Enable or disable progress bar display.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Share a cooperative stop flag, checked before each dispatch.
    pub fn with_cancel(mut self, cancelled: Arc<AtomicBool>) -> Self {
        self.cancelled = cancelled;
        self
    }

    /// Transcribe every chunk. Outcomes are returned sorted by chunk index.
    pub async fn process_chunks(
        &self,
        chunks: Vec<AudioChunk>,
    ) -> (Vec<ChunkOutcome>, TranscriptionStats) {
        if chunks.is_empty() {
            return (Vec::new(), TranscriptionStats::default());
        }

        let total_chunks = chunks.len();
        let start_time = Instant::now();

        info!(
            "Processing {} chunks with {} concurrent requests using {}",
            total_chunks,
            self.concurrency,
            self.transcriber.name()
        );

        let progress_bar = if self.show_progress {
            let pb = ProgressBar::new(total_chunks as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut futures = FuturesUnordered::new();

        for chunk in chunks {
            let sem = semaphore.clone();
            let transcriber = self.transcriber.clone();
            let language = self.language.clone();
            let cancelled = self.cancelled.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let index = chunk.index;
                let offset = chunk.offset;

                // Wait for a slot, then re-check the stop flag before dispatch.
                let permit = sem.acquire().await;
                let chunk_start = Instant::now();
                let status = if permit.is_err() || cancelled.load(Ordering::Relaxed) {
                    debug!("Skipping chunk {}: cancelled", index);
                    ChunkStatus::Skipped
                } else {
                    debug!("Starting transcription of chunk {}", index);
                    match transcriber.transcribe(&chunk, language.as_deref()).await {
                        Ok(transcript) => ChunkStatus::Transcribed(transcript),
                        Err(e) => {
                            if e.is_fatal() {
                                error!("Chunk {} failed unexpectedly: {}", index, e);
                            } else {
                                warn!("Chunk {} failed: {}", index, e);
                            }
                            ChunkStatus::Failed(e.to_string())
                        }
                    }
                };
                drop(permit);

                if chunk.owns_file {
                    remove_temp_file(chunk.path());
                }

                let duration_ms = chunk_start.elapsed().as_millis() as u64;
                if let Some(ref pb) = pb {
                    pb.inc(1);
                }

                ChunkOutcome {
                    index,
                    offset,
                    status,
                    duration_ms,
                }
            });
        }

        let mut outcomes: Vec<ChunkOutcome> = Vec::with_capacity(total_chunks);
        while let Some(outcome) = futures.next().await {
            debug!("Chunk {} settled in {}ms", outcome.index, outcome.duration_ms);
            outcomes.push(outcome);
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Transcription complete");
        }

        // Completion order is arbitrary; restore chunk order.
        outcomes.sort_by_key(|o| o.index);

        let stats = summarize(&outcomes, start_time.elapsed());
        info!(
            "Transcription complete: {}/{} chunks successful in {:.2}s (avg {:.2}s/chunk)",
            stats.successful_chunks,
            total_chunks,
            stats.total_time.as_secs_f64(),
            stats.avg_chunk_time.as_secs_f64()
        );

        (outcomes, stats)
    }
}

fn summarize(outcomes: &[ChunkOutcome], total_time: Duration) -> TranscriptionStats {
    let mut stats = TranscriptionStats {
        total_chunks: outcomes.len(),
        total_time,
        ..TranscriptionStats::default()
    };

    for outcome in outcomes {
        match outcome.status {
            ChunkStatus::Transcribed(_) => stats.successful_chunks += 1,
            ChunkStatus::Failed(_) => stats.failed_chunks += 1,
            ChunkStatus::Skipped => stats.skipped_chunks += 1,
        }
    }

    let attempted = stats.successful_chunks + stats.failed_chunks;
    if attempted > 0 {
        let chunk_time_ms: u64 = outcomes
            .iter()
            .filter(|o| !matches!(o.status, ChunkStatus::Skipped))
            .map(|o| o.duration_ms)
            .sum();
        stats.avg_chunk_time = Duration::from_millis(chunk_time_ms / attempted as u64);
    }

    stats
}
