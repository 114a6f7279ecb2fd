use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubtitlerError {
    #[error("Required tool not available: {0}")]
    DependencyMissing(String),

    #[error("Input file not found: {0}")]
    InputNotFound(String),

    #[error("Audio extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Duration probe failed: {0}")]
    ProbeFailed(String),

    #[error("Chunk creation failed: {0}")]
    ChunkCreationFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("No transcription segments produced: {0}")]
    NoSegmentsProduced(String),

    #[error("Failed to write subtitles: {0}")]
    EncodeFailed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline cancelled after {completed}/{total} chunks")]
    Cancelled { completed: usize, total: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SubtitlerError {
    /// Whether this error aborts the whole run.
    ///
    /// Probe, chunk-creation and transcription failures are scoped to a
    /// single chunk and only degrade the output.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            SubtitlerError::ProbeFailed(_)
                | SubtitlerError::ChunkCreationFailed(_)
                | SubtitlerError::TranscriptionFailed(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SubtitlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_local_errors_are_not_fatal() {
        assert!(!SubtitlerError::ProbeFailed("x".into()).is_fatal());
        assert!(!SubtitlerError::ChunkCreationFailed("x".into()).is_fatal());
        assert!(!SubtitlerError::TranscriptionFailed("x".into()).is_fatal());
    }

    #[test]
    fn test_run_level_errors_are_fatal() {
        assert!(SubtitlerError::DependencyMissing("ffmpeg".into()).is_fatal());
        assert!(SubtitlerError::InputNotFound("a.mp4".into()).is_fatal());
        assert!(SubtitlerError::ExtractionFailed("x".into()).is_fatal());
        assert!(SubtitlerError::NoSegmentsProduced("x".into()).is_fatal());
        assert!(SubtitlerError::EncodeFailed("x".into()).is_fatal());
        assert!(SubtitlerError::Io(std::io::Error::other("disk")).is_fatal());
        assert!(SubtitlerError::Cancelled {
            completed: 1,
            total: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_cancelled_message() {
        let err = SubtitlerError::Cancelled {
            completed: 2,
            total: 5,
        };
        assert_eq!(err.to_string(), "Pipeline cancelled after 2/5 chunks");
    }
}
