use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use subtitler::config::{megabytes_to_bytes, Config};
use subtitler::{generate_subtitles_with_cancel, print_summary, PipelineConfig};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "subtitler")]
#[command(version, about = "Generate SRT subtitles from video files")]
#[command(
    long_about = "Extract the audio track of a video, transcribe it with the Groq Whisper API and write a time-aligned SRT file."
)]
struct Cli {
    /// Input video/audio file
    input: PathBuf,

    /// Output subtitle file (defaults to input name with .srt extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Source language code (e.g., en, ja, es), or "auto" to detect
    #[arg(short, long)]
    language: Option<String>,

    /// Number of concurrent API requests
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Maximum size of each uploaded chunk, in megabytes
    #[arg(long)]
    max_chunk_mb: Option<f64>,

    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

fn derive_output_path(input: &Path) -> PathBuf {
    input.with_extension("srt")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    // Load configuration, then let flags override it
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(language) = cli.language {
        config.default_language = language;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(mb) = cli.max_chunk_mb {
        config.max_chunk_bytes = megabytes_to_bytes(mb);
    }
    config
        .validate()
        .context("Configuration validation failed")?;

    let output = cli
        .output
        .unwrap_or_else(|| derive_output_path(&cli.input));

    let mut pipeline_config = PipelineConfig::from_config(&config)?;
    pipeline_config.show_progress = !cli.no_progress;

    info!("Input:    {}", cli.input.display());
    info!("Output:   {}", output.display());
    info!(
        "Language: {}",
        pipeline_config.language.as_deref().unwrap_or("auto")
    );

    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            std::process::exit(130);
        }
        eprintln!("\nCancelling... press Ctrl+C again to force quit");
    })
    .context("Failed to install Ctrl+C handler")?;

    let result = generate_subtitles_with_cancel(
        &cli.input,
        &output,
        &config,
        pipeline_config,
        cancelled,
    )
    .await
    .with_context(|| format!("Failed to generate subtitles for {}", cli.input.display()))?;

    if result.stats.chunks_failed > 0 {
        warn!(
            "{} chunk(s) failed to transcribe; the output has gaps",
            result.stats.chunks_failed
        );
    }

    print_summary(&result);

    Ok(())
}
