use crate::audio::AudioChunk;
use crate::config::{DEFAULT_BASE_URL, DEFAULT_MODEL, SERVICE_UPLOAD_LIMIT};
use crate::error::{Result, SubtitlerError};
use crate::transcribe::{secs_to_duration, Segment, Transcriber, Transcript, Word};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, warn};

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 1000;

/// Backoff stops growing after this many doublings (64s).
const MAX_BACKOFF_DOUBLINGS: u32 = 6;

/// Credentials and endpoint for one transcription session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: String,
    /// OpenAI-compatible API root, e.g. `https://api.groq.com/openai/v1`.
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Extra attempts after the first one. Zero means a single attempt.
    pub retries: u32,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(300),
            retries: 0,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.base_url.trim().trim_end_matches('/')
        )
    }
}

/// Whisper transcription through Groq's OpenAI-compatible API.
///
/// A client is immutable once built; changing credentials means building a
/// new one.
pub struct GroqClient {
    client: reqwest::Client,
    config: ClientConfig,
}

/// A failed request, kept structured so retry decisions don't parse strings.
#[derive(Debug)]
struct ApiFailure {
    status: Option<StatusCode>,
    message: String,
}

impl ApiFailure {
    fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
        }
    }
}

impl GroqClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the multipart form for the API request.
    async fn build_form(&self, audio_path: &Path, language: Option<&str>) -> Result<Form> {
        let file_bytes = fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let mime_type = match audio_path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            Some("webm") => "audio/webm",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "word")
            .text("timestamp_granularities[]", "segment")
            .text("temperature", "0");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        Ok(form)
    }

    /// Make the API request (form is consumed, so no retries at this level).
    async fn call_api(&self, form: Form) -> std::result::Result<TranscriptionResponse, ApiFailure> {
        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ApiFailure {
                status: e.status(),
                message: e.to_string(),
            })?;

        let status = response.status();
        debug!("Transcription API response status: {}", status);

        let body = response.text().await.map_err(|e| ApiFailure {
            status: Some(status),
            message: e.to_string(),
        })?;

        if status.is_success() {
            debug!("Transcription API response: {}", truncate(&body, 500));
            return serde_json::from_str(&body).map_err(|e| ApiFailure {
                status: Some(status),
                message: format!("unreadable response: {e}"),
            });
        }

        // Try to parse API error
        let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
            Ok(api_error) => format!(
                "API error ({}): {} ({})",
                status,
                api_error.error.message,
                api_error.error.r#type.unwrap_or_default()
            ),
            Err(_) => format!("API error ({}): {}", status, truncate(&body, 500)),
        };

        Err(ApiFailure {
            status: Some(status),
            message,
        })
    }

    /// Transcribe with bounded retry - rebuilds form on each attempt.
    async fn transcribe_with_retry(
        &self,
        chunk: &AudioChunk,
        language: Option<&str>,
    ) -> Result<TranscriptionResponse> {
        let attempts = self.config.retries.saturating_add(1);
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = BASE_DELAY_MS * 2u64.pow((attempt - 1).min(MAX_BACKOFF_DOUBLINGS));
                debug!("Retry attempt {} after {}ms delay", attempt, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let form = self.build_form(chunk.path(), language).await?;

            match self.call_api(form).await {
                Ok(response) => return Ok(response),
                Err(failure) if !failure.is_retryable() => {
                    return Err(SubtitlerError::TranscriptionFailed(failure.message));
                }
                Err(failure) => {
                    if attempt + 1 < attempts {
                        warn!("Attempt {} failed: {}", attempt + 1, failure.message);
                    }
                    last_error = failure.message;
                }
            }
        }

        Err(SubtitlerError::TranscriptionFailed(last_error))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Convert an API response into a chunk-relative transcript.
fn parse_response(response: TranscriptionResponse) -> Transcript {
    let segments = response
        .segments
        .unwrap_or_default()
        .into_iter()
        .map(|seg| Segment::from_secs(seg.start, seg.end, seg.text))
        .collect();

    let words = response
        .words
        .unwrap_or_default()
        .into_iter()
        .map(|w| {
            let start = secs_to_duration(w.start);
            Word {
                start,
                end: secs_to_duration(w.end).max(start),
                text: w.word,
            }
        })
        .collect();

    Transcript {
        text: response.text,
        segments,
        words,
        language: response.language,
        duration: response.duration.map(secs_to_duration),
    }
}

#[async_trait]
impl Transcriber for GroqClient {
    async fn transcribe(&self, chunk: &AudioChunk, language: Option<&str>) -> Result<Transcript> {
        debug!(
            "Transcribing chunk {} with Groq: {:?}",
            chunk.index,
            chunk.path()
        );

        // Check file size
        let metadata = fs::metadata(chunk.path()).await.map_err(|e| {
            SubtitlerError::TranscriptionFailed(format!("{}: {e}", chunk.path().display()))
        })?;
        if metadata.len() > SERVICE_UPLOAD_LIMIT {
            return Err(SubtitlerError::TranscriptionFailed(format!(
                "File too large for upload: {} bytes (max {} bytes)",
                metadata.len(),
                SERVICE_UPLOAD_LIMIT
            )));
        }

        let response = self.transcribe_with_retry(chunk, language).await?;
        let transcript = parse_response(response);

        debug!(
            "Groq returned {} segments for chunk {}",
            transcript.segments.len(),
            chunk.index
        );

        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "Groq Whisper"
    }

    fn max_file_size(&self) -> u64 {
        SERVICE_UPLOAD_LIMIT
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Option<Vec<ResponseSegment>>,
    #[serde(default)]
    words: Option<Vec<ResponseWord>>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ResponseSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponseWord {
    word: String,
    start: f64,
    end: f64,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
    #[serde(default)]
    r#type: Option<String>,
}
