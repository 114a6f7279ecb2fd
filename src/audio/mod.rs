pub mod chunk;
pub mod extract;

pub use chunk::{
    discard_chunks, plan_split, remove_temp_file, split_audio, ChunkPlan, Cleanup, SplitAudio,
};
pub use extract::{extract_audio, Ffmpeg};

use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A file on disk holding raw video or derived audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaHandle {
    pub path: PathBuf,
    pub size: u64,
}

impl MediaHandle {
    /// Stat `path` and record its current byte size.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, size })
    }
}

/// One contiguous slice of the source audio, ready for transcription.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Position in the split, defines merge order.
    pub index: usize,
    /// Start of this chunk on the source timeline.
    pub offset: Duration,
    pub duration: Duration,
    pub media: MediaHandle,
    /// True when the backing file was created for this chunk alone and
    /// may be deleted once the chunk has been transcribed.
    pub owns_file: bool,
}

impl AudioChunk {
    pub fn path(&self) -> &Path {
        &self.media.path
    }

    pub fn end(&self) -> Duration {
        self.offset + self.duration
    }
}

/// Target encoding for every audio file the pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioEncoding {
    pub sample_rate: u32,
    pub channels: u16,
    pub bitrate_kbps: u32,
}

impl Default for AudioEncoding {
    /// Mono 16 kHz at 64 kbps: compact and sufficient for speech.
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            bitrate_kbps: 64,
        }
    }
}

/// A sub-range of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Duration,
    pub duration: Duration,
}

/// One invocation of the media-conversion tool.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub source: PathBuf,
    pub output: PathBuf,
    pub encoding: AudioEncoding,
    /// Restrict the conversion to part of the source. `None` converts it all.
    pub range: Option<TimeRange>,
}

/// Boundary to the external media tooling (probing and conversion).
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Fail with `DependencyMissing` if the tooling cannot be run.
    async fn check_available(&self) -> Result<()>;

    async fn probe_duration(&self, path: &Path) -> Result<Duration>;

    /// Produce `request.output`, overwriting it if present.
    async fn convert(&self, request: &ConvertRequest) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_handle_open_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audio.mp3");
        std::fs::write(&path, vec![0u8; 1234]).unwrap();

        let handle = MediaHandle::open(&path).unwrap();
        assert_eq!(handle.size, 1234);
        assert_eq!(handle.path, path);
    }

    #[test]
    fn test_media_handle_open_missing_file() {
        assert!(MediaHandle::open("/nonexistent/audio.mp3").is_err());
    }

    #[test]
    fn test_chunk_end() {
        let chunk = AudioChunk {
            index: 1,
            offset: Duration::from_secs(20),
            duration: Duration::from_millis(19_500),
            media: MediaHandle {
                path: PathBuf::from("/tmp/a_part02.mp3"),
                size: 10,
            },
            owns_file: true,
        };
        assert_eq!(chunk.end(), Duration::from_millis(39_500));
        assert_eq!(chunk.path(), Path::new("/tmp/a_part02.mp3"));
    }

    #[test]
    fn test_default_encoding() {
        let encoding = AudioEncoding::default();
        assert_eq!(encoding.sample_rate, 16_000);
        assert_eq!(encoding.channels, 1);
        assert_eq!(encoding.bitrate_kbps, 64);
    }
}
