use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Result, SubtitlerError};

use super::{AudioEncoding, ConvertRequest, MediaHandle, MediaTool};

/// Lines of FFmpeg stderr kept in error messages.
const STDERR_TAIL_LINES: usize = 5;

/// `MediaTool` backed by the `ffmpeg` and `ffprobe` executables.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use explicit executable paths instead of looking them up in `PATH`.
    pub fn with_paths(ffmpeg: Option<PathBuf>, ffprobe: Option<PathBuf>) -> Self {
        let default = Self::default();
        Self {
            ffmpeg: ffmpeg.unwrap_or(default.ffmpeg),
            ffprobe: ffprobe.unwrap_or(default.ffprobe),
        }
    }

    async fn check_binary(binary: &Path, name: &str) -> Result<()> {
        let output = Command::new(binary)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                SubtitlerError::DependencyMissing(format!(
                    "{name} not found ({e}). Install it with: brew install ffmpeg (macOS) or apt install ffmpeg (Linux)"
                ))
            })?;

        if !output.status.success() {
            return Err(SubtitlerError::DependencyMissing(format!(
                "{name} -version exited with {}",
                output.status
            )));
        }

        debug!("{} is available", name);
        Ok(())
    }
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn check_available(&self) -> Result<()> {
        Self::check_binary(&self.ffmpeg, "ffmpeg").await?;
        Self::check_binary(&self.ffprobe, "ffprobe").await
    }

    async fn probe_duration(&self, path: &Path) -> Result<Duration> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await
            .map_err(|e| SubtitlerError::ProbeFailed(format!("Failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            return Err(SubtitlerError::ProbeFailed(format!(
                "ffprobe failed on {}: {}",
                path.display(),
                stderr_tail(&output.stderr)
            )));
        }

        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }

    async fn convert(&self, request: &ConvertRequest) -> Result<()> {
        let args = conversion_args(request);
        debug!("ffmpeg {}", args.join(" "));

        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .output()
            .await
            .map_err(|e| SubtitlerError::ExtractionFailed(format!("Failed to run ffmpeg: {e}")))?;

        if !output.status.success() {
            return Err(SubtitlerError::ExtractionFailed(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                stderr_tail(&output.stderr)
            )));
        }

        if !request.output.exists() {
            return Err(SubtitlerError::ExtractionFailed(format!(
                "ffmpeg reported success but {} was not created",
                request.output.display()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parse `ffprobe -show_entries format=duration -of json` output.
fn parse_probe_output(stdout: &str) -> Result<Duration> {
    let parsed: ProbeOutput = serde_json::from_str(stdout)
        .map_err(|e| SubtitlerError::ProbeFailed(format!("Unreadable ffprobe output: {e}")))?;

    let raw = parsed
        .format
        .duration
        .ok_or_else(|| SubtitlerError::ProbeFailed("No duration in container metadata".to_string()))?;

    let secs: f64 = raw.trim().parse().map_err(|e| {
        SubtitlerError::ProbeFailed(format!("Failed to parse duration '{}': {e}", raw.trim()))
    })?;

    if !secs.is_finite() || secs <= 0.0 {
        return Err(SubtitlerError::ProbeFailed(format!(
            "Invalid duration: {secs}"
        )));
    }

    Duration::try_from_secs_f64(secs)
        .map_err(|e| SubtitlerError::ProbeFailed(format!("Invalid duration {secs}: {e}")))
}

fn conversion_args(request: &ConvertRequest) -> Vec<String> {
    let AudioEncoding {
        sample_rate,
        channels,
        bitrate_kbps,
    } = request.encoding;

    let mut args = vec!["-y".to_string()];
    if let Some(range) = request.range {
        args.push("-ss".to_string());
        args.push(format!("{:.3}", range.start.as_secs_f64()));
        args.push("-t".to_string());
        args.push(format!("{:.3}", range.duration.as_secs_f64()));
    }
    args.push("-i".to_string());
    args.push(request.source.to_string_lossy().into_owned());
    for arg in ["-vn", "-acodec", "libmp3lame"] {
        args.push(arg.to_string());
    }
    args.push("-ar".to_string());
    args.push(sample_rate.to_string());
    args.push("-ac".to_string());
    args.push(channels.to_string());
    args.push("-b:a".to_string());
    args.push(format!("{bitrate_kbps}k"));
    args.push(request.output.to_string_lossy().into_owned());
    args
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

/// Extract the audio track of `input` into `output` using the default encoding.
pub async fn extract_audio(
    tool: &dyn MediaTool,
    input: &Path,
    output: &Path,
) -> Result<MediaHandle> {
    if !input.exists() {
        return Err(SubtitlerError::InputNotFound(input.display().to_string()));
    }

    info!("Extracting audio from {}", input.display());

    let request = ConvertRequest {
        source: input.to_path_buf(),
        output: output.to_path_buf(),
        encoding: AudioEncoding::default(),
        range: None,
    };

    tool.convert(&request).await.map_err(|e| match e {
        SubtitlerError::ExtractionFailed(msg) => SubtitlerError::ExtractionFailed(msg),
        other => SubtitlerError::ExtractionFailed(other.to_string()),
    })?;

    let handle = MediaHandle::open(output).map_err(|e| {
        SubtitlerError::ExtractionFailed(format!("{} unreadable: {e}", output.display()))
    })?;

    info!(
        "Audio extracted to {} ({:.2} MB)",
        output.display(),
        handle.size as f64 / (1024.0 * 1024.0)
    );

    Ok(handle)
}
