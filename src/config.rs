use crate::error::{Result, SubtitlerError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default OpenAI-compatible Groq endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// Default Whisper model served by Groq.
pub const DEFAULT_MODEL: &str = "whisper-large-v3-turbo";

/// Default upper bound for a single uploaded chunk (18 MiB).
pub const DEFAULT_MAX_CHUNK_BYTES: u64 = 18 * 1024 * 1024;

/// Hard upload limit of the transcription service (25 MiB).
pub const SERVICE_UPLOAD_LIMIT: u64 = 25 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub groq_api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    /// Language code, or "auto" for detection.
    pub default_language: String,
    pub concurrency: usize,
    pub max_chunk_bytes: u64,
    pub retries: u32,
    pub request_timeout_secs: u64,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            groq_api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            default_language: "auto".to_string(),
            concurrency: 4,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            retries: 0,
            request_timeout_secs: 300,
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                match toml::from_str::<Config>(&contents) {
                    Ok(file_config) => config = file_config,
                    Err(e) => warn!("Ignoring malformed {}: {}", config_path.display(), e),
                }
            }
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            if !key.trim().is_empty() {
                self.groq_api_key = Some(key.trim().to_string());
            }
        }
        if let Ok(url) = std::env::var("SUBTITLER_BASE_URL") {
            self.base_url = url;
        }
        if let Ok(model) = std::env::var("SUBTITLER_MODEL") {
            self.model = model;
        }
        if let Ok(language) = std::env::var("SUBTITLER_LANGUAGE") {
            self.default_language = language;
        }
        if let Ok(concurrency) = std::env::var("SUBTITLER_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
        if let Ok(mb) = std::env::var("SUBTITLER_MAX_CHUNK_MB") {
            if let Ok(mb) = mb.parse::<f64>() {
                self.max_chunk_bytes = megabytes_to_bytes(mb);
            }
        }
        if let Ok(retries) = std::env::var("SUBTITLER_RETRIES") {
            if let Ok(r) = retries.parse() {
                self.retries = r;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self.groq_api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(SubtitlerError::Config(
                    "GROQ_API_KEY not set. Get one at https://console.groq.com/keys".to_string(),
                ))
            }
        }

        if self.concurrency == 0 {
            return Err(SubtitlerError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        validate_chunk_size(self.max_chunk_bytes)?;
        parse_language(&self.default_language)?;

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("subtitler").join("config.toml"))
    }
}

/// Check a chunk size bound against the service upload limit.
pub fn validate_chunk_size(max_chunk_bytes: u64) -> Result<()> {
    if max_chunk_bytes == 0 {
        return Err(SubtitlerError::Config(
            "Maximum chunk size must be greater than 0".to_string(),
        ));
    }
    if max_chunk_bytes > SERVICE_UPLOAD_LIMIT {
        return Err(SubtitlerError::Config(format!(
            "Maximum chunk size {} bytes exceeds the service upload limit of {} bytes",
            max_chunk_bytes, SERVICE_UPLOAD_LIMIT
        )));
    }
    Ok(())
}

pub fn megabytes_to_bytes(mb: f64) -> u64 {
    (mb.max(0.0) * 1024.0 * 1024.0) as u64
}

/// Parse a language hint. `"auto"` or an empty string means auto-detect.
pub fn parse_language(s: &str) -> Result<Option<String>> {
    let code = s.trim().to_lowercase();
    if code.is_empty() || code == "auto" {
        return Ok(None);
    }

    let valid = (2..=3).contains(&code.len()) && code.chars().all(|c| c.is_ascii_lowercase());
    if !valid {
        return Err(SubtitlerError::Config(format!(
            "Unknown language code: {}. Use an ISO 639-1 code such as 'en' or 'auto'",
            s
        )));
    }

    Ok(Some(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.model, "whisper-large-v3-turbo");
        assert_eq!(config.max_chunk_bytes, 18 * 1024 * 1024);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.retries, 0);
    }

    #[test]
    fn test_validate_missing_api_key() {
        let config = Config::default();
        assert!(config.validate().is_err());

        let config = Config {
            groq_api_key: Some("   ".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_with_api_key() {
        let config = Config {
            groq_api_key: Some("gsk-test".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            groq_api_key: Some("gsk-test".to_string()),
            concurrency: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_chunk_size_bounds() {
        assert!(validate_chunk_size(0).is_err());
        assert!(validate_chunk_size(SERVICE_UPLOAD_LIMIT + 1).is_err());
        assert!(validate_chunk_size(SERVICE_UPLOAD_LIMIT).is_ok());
        assert!(validate_chunk_size(DEFAULT_MAX_CHUNK_BYTES).is_ok());
    }

    #[test]
    fn test_parse_language() {
        assert_eq!(parse_language("auto").unwrap(), None);
        assert_eq!(parse_language("").unwrap(), None);
        assert_eq!(parse_language("EN").unwrap(), Some("en".to_string()));
        assert_eq!(parse_language(" ja ").unwrap(), Some("ja".to_string()));
        assert_eq!(parse_language("haw").unwrap(), Some("haw".to_string()));
        assert!(parse_language("english").is_err());
        assert!(parse_language("e1").is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str("groq_api_key = \"gsk-x\"\nconcurrency = 2\n").unwrap();
        assert_eq!(config.groq_api_key.as_deref(), Some("gsk-x"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.model, DEFAULT_MODEL);
    }

    #[test]
    fn test_megabytes_to_bytes() {
        assert_eq!(megabytes_to_bytes(18.0), 18 * 1024 * 1024);
        assert_eq!(megabytes_to_bytes(0.5), 512 * 1024);
        assert_eq!(megabytes_to_bytes(-1.0), 0);
    }
}
