use crate::audio::{
    discard_chunks, extract_audio, remove_temp_file, split_audio, Ffmpeg, MediaTool,
};
use crate::config::{parse_language, validate_chunk_size, Config, DEFAULT_MAX_CHUNK_BYTES};
use crate::error::{Result, SubtitlerError};
use crate::subtitle::{to_entries, write_srt, SubtitleEntry};
use crate::timeline::{measure_offsets, reassemble};
use crate::transcribe::{create_transcriber, ChunkStatus, Transcriber, TranscriptionOrchestrator};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Configuration for the subtitle generation pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source language code; `None` lets the service detect it.
    pub language: Option<String>,
    /// Number of concurrent API requests.
    pub concurrency: usize,
    /// Upper bound for each uploaded chunk, in bytes.
    pub max_chunk_bytes: u64,
    /// Show progress bars.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            language: None,
            concurrency: 4,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            show_progress: true,
        }
    }
}

impl PipelineConfig {
    /// Pipeline settings taken from the loaded configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            language: parse_language(&config.default_language)?,
            concurrency: config.concurrency,
            max_chunk_bytes: config.max_chunk_bytes,
            show_progress: true,
        })
    }
}

/// Statistics from the subtitle generation process.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    /// Total time taken for the entire pipeline.
    pub total_time: Duration,
    /// Time taken for audio extraction.
    pub extraction_time: Duration,
    /// Time taken for transcription.
    pub transcription_time: Duration,
    /// Chunks the audio was split into, including any that failed to materialise.
    pub chunks_planned: usize,
    /// Chunks transcribed successfully.
    pub chunks_transcribed: usize,
    /// Chunks whose transcription failed.
    pub chunks_failed: usize,
    /// Number of subtitle entries generated.
    pub subtitle_entries: usize,
    /// Total audio duration, as measured across chunks.
    pub audio_duration: Duration,
    /// Transcription service used.
    pub provider: String,
}

/// Result of the subtitle generation pipeline.
#[derive(Debug)]
pub struct PipelineResult {
    /// Path to the output subtitle file.
    pub output_path: PathBuf,
    /// The captions that were written, in file order.
    pub entries: Vec<SubtitleEntry>,
    /// Pipeline statistics.
    pub stats: PipelineStats,
    /// Language reported by the service, if any.
    pub detected_language: Option<String>,
}

/// Removes the extracted audio on every exit path; the temp directory
/// itself goes when the `TempDir` drops.
struct TempCleanupGuard {
    temp_dir: Option<TempDir>,
    audio_path: PathBuf,
    cancelled: Arc<AtomicBool>,
}

impl Drop for TempCleanupGuard {
    fn drop(&mut self) {
        if self.cancelled.load(Ordering::Relaxed) {
            warn!("Pipeline cancelled, cleaning up temp files");
        }
        remove_temp_file(&self.audio_path);
        if let Some(temp_dir) = self.temp_dir.take() {
            let path = temp_dir.path().to_path_buf();
            debug!("Cleaning up temp directory: {:?}", path);
            if let Err(e) = temp_dir.close() {
                warn!("Failed to remove temp directory {:?}: {}", path, e);
            }
        }
    }
}

fn check_cancelled(cancelled: &AtomicBool, completed: usize, total: usize) -> Result<()> {
    if cancelled.load(Ordering::Relaxed) {
        return Err(SubtitlerError::Cancelled { completed, total });
    }
    Ok(())
}

fn spinner(multi_progress: Option<&MultiProgress>, message: &'static str) -> Option<ProgressBar> {
    multi_progress.map(|mp| {
        let pb = mp.add(ProgressBar::new_spinner());
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    })
}

/// Generate subtitles from a video file.
///
/// This is the main entry point. It:
/// 1. Extracts the audio track
/// 2. Splits it so every chunk fits the upload limit
/// 3. Transcribes the chunks in parallel
/// 4. Shifts and merges the transcripts onto the source timeline
/// 5. Writes the SRT file
pub async fn generate_subtitles(
    input: &Path,
    output: &Path,
    config: &Config,
    pipeline_config: PipelineConfig,
) -> Result<PipelineResult> {
    let cancelled = Arc::new(AtomicBool::new(false));
    generate_subtitles_with_cancel(input, output, config, pipeline_config, cancelled).await
}

/// Generate subtitles with cancellation support.
pub async fn generate_subtitles_with_cancel(
    input: &Path,
    output: &Path,
    config: &Config,
    pipeline_config: PipelineConfig,
    cancelled: Arc<AtomicBool>,
) -> Result<PipelineResult> {
    let media = Ffmpeg::with_paths(config.ffmpeg_path.clone(), config.ffprobe_path.clone());
    let transcriber = create_transcriber(config)?;
    run_pipeline(input, output, &media, transcriber, pipeline_config, cancelled).await
}

/// Run the pipeline against explicit media and transcription backends.
pub async fn run_pipeline(
    input: &Path,
    output: &Path,
    media: &dyn MediaTool,
    transcriber: Arc<dyn Transcriber>,
    pipeline_config: PipelineConfig,
    cancelled: Arc<AtomicBool>,
) -> Result<PipelineResult> {
    let start_time = Instant::now();

    validate_chunk_size(pipeline_config.max_chunk_bytes)?;
    if pipeline_config.max_chunk_bytes > transcriber.max_file_size() {
        return Err(SubtitlerError::Config(format!(
            "Chunk limit of {} bytes exceeds what {} accepts ({} bytes)",
            pipeline_config.max_chunk_bytes,
            transcriber.name(),
            transcriber.max_file_size()
        )));
    }

    media.check_available().await?;

    if !input.exists() {
        return Err(SubtitlerError::InputNotFound(input.display().to_string()));
    }

    // Create temp directory for intermediate files
    let temp_dir = TempDir::new().map_err(|e| {
        SubtitlerError::Io(std::io::Error::other(format!(
            "Failed to create temp directory: {}",
            e
        )))
    })?;
    let audio_path = temp_dir.path().join("audio.mp3");
    debug!("Using temp directory: {:?}", temp_dir.path());

    let _cleanup_guard = TempCleanupGuard {
        temp_dir: Some(temp_dir),
        audio_path: audio_path.clone(),
        cancelled: cancelled.clone(),
    };

    let multi_progress = pipeline_config.show_progress.then(MultiProgress::new);

    check_cancelled(&cancelled, 0, 0)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 1: Audio Extraction
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 1/4: Extracting audio from {:?}", input);
    let extraction_start = Instant::now();
    let extraction_pb = spinner(multi_progress.as_ref(), "Extracting audio...");

    let audio = extract_audio(media, input, &audio_path).await?;

    if let Some(pb) = extraction_pb {
        pb.finish_with_message(format!(
            "✓ Audio extracted ({:.2} MB)",
            audio.size as f64 / (1024.0 * 1024.0)
        ));
    }
    let extraction_time = extraction_start.elapsed();

    check_cancelled(&cancelled, 0, 0)?;

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 2: Size-bounded splitting
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 2/4: Splitting audio for upload");
    let chunking_pb = spinner(multi_progress.as_ref(), "Splitting audio...");

    let split = split_audio(media, &audio, pipeline_config.max_chunk_bytes, &cancelled).await?;
    let chunks_planned = split.planned;
    let mut chunks = split.chunks;

    let measured = measure_offsets(media, &mut chunks, &cancelled).await;
    if let Err(e) = measured.and_then(|()| check_cancelled(&cancelled, 0, chunks.len())) {
        discard_chunks(&chunks);
        return Err(e);
    }
    let audio_duration = chunks.last().map(|c| c.end()).unwrap_or_default();

    if let Some(pb) = chunking_pb {
        pb.finish_with_message(format!("✓ Prepared {} audio chunks", chunks.len()));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 3: Transcription
    // ═══════════════════════════════════════════════════════════════════════
    info!(
        "Stage 3/4: Transcribing with {} (concurrency: {})",
        transcriber.name(),
        pipeline_config.concurrency
    );
    let transcription_start = Instant::now();
    let provider = transcriber.name().to_string();

    let orchestrator = TranscriptionOrchestrator::new(transcriber, pipeline_config.concurrency)
        .with_language(pipeline_config.language.clone())
        .with_progress(pipeline_config.show_progress)
        .with_cancel(cancelled.clone());

    let total_chunks = chunks.len();
    let (outcomes, transcription_stats) = orchestrator.process_chunks(chunks).await;
    let transcription_time = transcription_start.elapsed();

    check_cancelled(
        &cancelled,
        transcription_stats.successful_chunks + transcription_stats.failed_chunks,
        total_chunks,
    )?;

    let detected_language = outcomes.iter().find_map(|o| match &o.status {
        ChunkStatus::Transcribed(t) => t.language.clone(),
        _ => None,
    });

    // ═══════════════════════════════════════════════════════════════════════
    // Stage 4: Reassembly and subtitle output
    // ═══════════════════════════════════════════════════════════════════════
    info!("Stage 4/4: Writing subtitles to {:?}", output);
    let segments = reassemble(outcomes)?;
    let subtitle_entries = write_srt(output, &segments)?;
    let entries = to_entries(&segments);

    let stats = PipelineStats {
        total_time: start_time.elapsed(),
        extraction_time,
        transcription_time,
        chunks_planned,
        chunks_transcribed: transcription_stats.successful_chunks,
        chunks_failed: transcription_stats.failed_chunks,
        subtitle_entries,
        audio_duration,
        provider,
    };

    Ok(PipelineResult {
        output_path: output.to_path_buf(),
        entries,
        stats,
        detected_language,
    })
}

/// Print a summary of the pipeline results.
pub fn print_summary(result: &PipelineResult) {
    println!();
    println!("═══════════════════════════════════════════════════════════════");
    println!("                      Subtitle Generation Complete              ");
    println!("═══════════════════════════════════════════════════════════════");
    println!();
    println!("  Output:     {}", result.output_path.display());
    println!("  Entries:    {}", result.stats.subtitle_entries);
    println!("  Provider:   {}", result.stats.provider);
    println!(
        "  Duration:   {:.1}s audio",
        result.stats.audio_duration.as_secs_f64()
    );
    println!(
        "  Chunks:     {}/{} transcribed",
        result.stats.chunks_transcribed, result.stats.chunks_planned
    );
    if result.stats.chunks_failed > 0 {
        println!(
            "  Warning:    {} chunk(s) failed; their time ranges have no subtitles",
            result.stats.chunks_failed
        );
    }
    println!();
    println!("  Timing:");
    println!(
        "    Extract:     {:.2}s",
        result.stats.extraction_time.as_secs_f64()
    );
    println!(
        "    Transcribe:  {:.2}s",
        result.stats.transcription_time.as_secs_f64()
    );
    println!(
        "    Total:       {:.2}s",
        result.stats.total_time.as_secs_f64()
    );
    if let Some(ref lang) = result.detected_language {
        println!();
        println!("  Detected language: {}", lang);
    }
    println!();
    println!("═══════════════════════════════════════════════════════════════");
}
