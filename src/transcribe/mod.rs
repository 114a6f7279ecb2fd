pub mod groq;
pub mod orchestrator;

pub use groq::{ClientConfig, GroqClient};
pub use orchestrator::{ChunkOutcome, ChunkStatus, TranscriptionOrchestrator, TranscriptionStats};

use crate::audio::AudioChunk;
use crate::config::Config;
use crate::error::{Result, SubtitlerError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// One timed transcript fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl Segment {
    /// Build a segment from service seconds, clamping negatives and NaN to
    /// zero and keeping `end >= start`.
    pub fn from_secs(start: f64, end: f64, text: impl Into<String>) -> Self {
        let start = secs_to_duration(start);
        let end = secs_to_duration(end).max(start);
        Self {
            start,
            end,
            text: text.into(),
        }
    }

    /// Move this segment onto a later position in the timeline.
    pub fn shift(&mut self, offset: Duration) {
        self.start += offset;
        self.end += offset;
    }
}

/// Word-level timing, passed through alongside segments.
#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// The result of transcribing one chunk. Timings are chunk-relative.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub text: String,
    pub segments: Vec<Segment>,
    pub words: Vec<Word>,
    pub language: Option<String>,
    /// Audio length as reported by the service.
    pub duration: Option<Duration>,
}

impl Transcript {
    /// Shift every segment and word by `offset`.
    pub fn shift(&mut self, offset: Duration) {
        for segment in &mut self.segments {
            segment.shift(offset);
        }
        for word in &mut self.words {
            word.start += offset;
            word.end += offset;
        }
    }
}

pub(crate) fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one chunk. `language` of `None` means auto-detect.
    async fn transcribe(&self, chunk: &AudioChunk, language: Option<&str>) -> Result<Transcript>;
    fn name(&self) -> &'static str;
    /// Largest upload this service accepts, in bytes.
    fn max_file_size(&self) -> u64;
}

/// Build the configured transcription client.
pub fn create_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>> {
    let api_key = config
        .groq_api_key
        .as_ref()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            SubtitlerError::Config(
                "Groq API key not set. Set GROQ_API_KEY environment variable.".to_string(),
            )
        })?;

    let client = GroqClient::new(ClientConfig {
        api_key: api_key.clone(),
        base_url: config.base_url.clone(),
        model: config.model.clone(),
        timeout: config.request_timeout(),
        retries: config.retries,
    })?;

    Ok(Arc::new(client))
}
