use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SubtitlerError};

use super::{AudioChunk, AudioEncoding, ConvertRequest, MediaHandle, MediaTool, TimeRange};

/// One planned slice of the source timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    pub index: usize,
    pub start: Duration,
    pub duration: Duration,
}

/// Partition `[0, total)` into equal-duration ranges so that each range is
/// expected to encode below `max_bytes`.
///
/// Sizes scale with content, so this bounds the *expected* size only.
/// The last range absorbs integer rounding so the durations sum to `total`.
pub fn plan_split(total: Duration, file_size: u64, max_bytes: u64) -> Vec<ChunkPlan> {
    if max_bytes == 0 || file_size <= max_bytes {
        return vec![ChunkPlan {
            index: 0,
            start: Duration::ZERO,
            duration: total,
        }];
    }

    let count = file_size.div_ceil(max_bytes);
    let Ok(count) = u32::try_from(count) else {
        // More than u32::MAX chunks is not a real input; fall back to one.
        return vec![ChunkPlan {
            index: 0,
            start: Duration::ZERO,
            duration: total,
        }];
    };
    let chunk_duration = total / count;

    (0..count)
        .map(|i| {
            let start = chunk_duration * i;
            let duration = if i + 1 == count {
                total.saturating_sub(start)
            } else {
                chunk_duration
            };
            ChunkPlan {
                index: i as usize,
                start,
                duration,
            }
        })
        .collect()
}

/// Path for the `index`-th chunk of `source`: `<stem>_partNN.<ext>` beside it.
pub fn chunk_path(source: &Path, index: usize) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mp3".to_string());
    source.with_file_name(format!("{}_part{:02}.{}", stem, index + 1, ext))
}

/// Chunks cut from one source.
#[derive(Debug)]
pub struct SplitAudio {
    /// Chunks that were created, in index order.
    pub chunks: Vec<AudioChunk>,
    /// Chunks in the plan, including any that could not be created.
    pub planned: usize,
}

/// Split `source` into chunks no larger than `max_bytes` (by expectation).
///
/// A file already within the limit comes back as a single chunk backed by
/// the source itself. Chunks whose conversion fails are logged and skipped.
/// `cancelled` is checked before each chunk is cut; on cancellation the
/// chunks made so far are deleted.
pub async fn split_audio(
    tool: &dyn MediaTool,
    source: &MediaHandle,
    max_bytes: u64,
    cancelled: &AtomicBool,
) -> Result<SplitAudio> {
    info!(
        "Audio file size: {:.2} MB (limit {:.2} MB)",
        source.size as f64 / (1024.0 * 1024.0),
        max_bytes as f64 / (1024.0 * 1024.0)
    );

    if source.size <= max_bytes {
        let duration = match tool.probe_duration(&source.path).await {
            Ok(d) => d,
            Err(e) => {
                warn!("Could not probe {}: {}", source.path.display(), e);
                Duration::ZERO
            }
        };
        debug!("File size is within limit, no split needed");
        return Ok(SplitAudio {
            chunks: vec![AudioChunk {
                index: 0,
                offset: Duration::ZERO,
                duration,
                media: source.clone(),
                owns_file: false,
            }],
            planned: 1,
        });
    }

    // Without a total duration there is nothing to partition.
    let total = tool.probe_duration(&source.path).await?;
    let plans = plan_split(total, source.size, max_bytes);

    info!(
        "Audio duration: {:.2}s, splitting into {} chunks",
        total.as_secs_f64(),
        plans.len()
    );

    let mut chunks = Vec::with_capacity(plans.len());
    for plan in &plans {
        if cancelled.load(Ordering::Relaxed) {
            info!("Splitting cancelled before chunk {}/{}", plan.index + 1, plans.len());
            discard_chunks(&chunks);
            return Err(SubtitlerError::Cancelled {
                completed: 0,
                total: plans.len(),
            });
        }

        match create_chunk(tool, source, plan).await {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => warn!("Dropping chunk {}/{}: {}", plan.index + 1, plans.len(), e),
        }
    }

    if chunks.is_empty() {
        return Err(SubtitlerError::ChunkCreationFailed(format!(
            "none of the {} chunks could be created",
            plans.len()
        )));
    }

    info!("Created {}/{} audio chunks", chunks.len(), plans.len());
    Ok(SplitAudio {
        chunks,
        planned: plans.len(),
    })
}

async fn create_chunk(
    tool: &dyn MediaTool,
    source: &MediaHandle,
    plan: &ChunkPlan,
) -> Result<AudioChunk> {
    let output = chunk_path(&source.path, plan.index);

    debug!(
        "Creating chunk {}: {:.3}s + {:.3}s -> {}",
        plan.index,
        plan.start.as_secs_f64(),
        plan.duration.as_secs_f64(),
        output.display()
    );

    let request = ConvertRequest {
        source: source.path.clone(),
        output: output.clone(),
        encoding: AudioEncoding::default(),
        range: Some(TimeRange {
            start: plan.start,
            duration: plan.duration,
        }),
    };

    tool.convert(&request)
        .await
        .map_err(|e| SubtitlerError::ChunkCreationFailed(format!("chunk {}: {e}", plan.index)))?;

    let media = MediaHandle::open(&output).map_err(|e| {
        SubtitlerError::ChunkCreationFailed(format!("chunk {} missing after conversion: {e}", plan.index))
    })?;

    debug!(
        "Chunk {}: {:.2} MB",
        plan.index + 1,
        media.size as f64 / (1024.0 * 1024.0)
    );

    Ok(AudioChunk {
        index: plan.index,
        offset: plan.start,
        duration: plan.duration,
        media,
        owns_file: true,
    })
}

/// Outcome of a best-effort temp-file deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cleanup {
    Removed,
    AlreadyGone,
    Failed(String),
}

/// Delete the files of every chunk that owns one.
pub fn discard_chunks(chunks: &[AudioChunk]) {
    for chunk in chunks.iter().filter(|c| c.owns_file) {
        remove_temp_file(chunk.path());
    }
}

/// Delete a temporary file. Never fails; problems are logged and returned.
pub fn remove_temp_file(path: &Path) -> Cleanup {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Cleanup::Removed
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Cleanup::AlreadyGone,
        Err(e) => {
            warn!("Failed to remove temp file {}: {}", path.display(), e);
            Cleanup::Failed(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    const MB: u64 = 1024 * 1024;

    /// Writes a small file for every conversion; fails on selected chunks.
    struct FakeTool {
        total: Option<Duration>,
        fail_outputs: HashSet<String>,
        requests: Mutex<Vec<ConvertRequest>>,
        /// Raised during the first conversion.
        cancel: Option<Arc<AtomicBool>>,
    }

    impl FakeTool {
        fn new(total: Option<Duration>) -> Self {
            Self {
                total,
                fail_outputs: HashSet::new(),
                requests: Mutex::new(Vec::new()),
                cancel: None,
            }
        }

        fn cancelling(mut self, flag: Arc<AtomicBool>) -> Self {
            self.cancel = Some(flag);
            self
        }

        fn failing_on(mut self, file_name: &str) -> Self {
            self.fail_outputs.insert(file_name.to_string());
            self
        }
    }

    #[async_trait]
    impl MediaTool for FakeTool {
        async fn check_available(&self) -> Result<()> {
            Ok(())
        }

        async fn probe_duration(&self, _path: &Path) -> Result<Duration> {
            self.total
                .ok_or_else(|| SubtitlerError::ProbeFailed("no metadata".to_string()))
        }

        async fn convert(&self, request: &ConvertRequest) -> Result<()> {
            self.requests.lock().unwrap().push(request.clone());
            if let Some(ref flag) = self.cancel {
                flag.store(true, Ordering::SeqCst);
            }
            let name = request.output.file_name().unwrap().to_string_lossy().into_owned();
            if self.fail_outputs.contains(&name) {
                return Err(SubtitlerError::ExtractionFailed("boom".to_string()));
            }
            std::fs::write(&request.output, b"chunk")?;
            Ok(())
        }
    }

    fn source_file(dir: &Path, size: usize) -> MediaHandle {
        let path = dir.join("audio.mp3");
        std::fs::write(&path, vec![0u8; size]).unwrap();
        MediaHandle::open(path).unwrap()
    }

    #[test]
    fn test_plan_split_within_limit() {
        let plans = plan_split(Duration::from_secs(600), 10 * MB, 18 * MB);
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].start, Duration::ZERO);
        assert_eq!(plans[0].duration, Duration::from_secs(600));
    }

    #[test]
    fn test_plan_split_exact_limit_is_not_split() {
        let plans = plan_split(Duration::from_secs(600), 18 * MB, 18 * MB);
        assert_eq!(plans.len(), 1);
    }

    #[test]
    fn test_plan_split_count_is_ceiling() {
        let total = Duration::from_secs(3600);
        assert_eq!(plan_split(total, 18 * MB + 1, 18 * MB).len(), 2);
        assert_eq!(plan_split(total, 36 * MB, 18 * MB).len(), 2);
        assert_eq!(plan_split(total, 50 * MB, 18 * MB).len(), 3);
    }

    #[test]
    fn test_plan_split_partitions_timeline() {
        let total = Duration::from_secs_f64(1234.567);
        for size in [19 * MB, 55 * MB, 100 * MB, 181 * MB] {
            let plans = plan_split(total, size, 18 * MB);
            let expected = size.div_ceil(18 * MB) as usize;
            assert_eq!(plans.len(), expected);

            let nominal = total / expected as u32;
            let sum: Duration = plans.iter().map(|p| p.duration).sum();
            assert_eq!(sum, total);

            for (i, plan) in plans.iter().enumerate() {
                assert_eq!(plan.index, i);
                let diff = if plan.duration > nominal {
                    plan.duration - nominal
                } else {
                    nominal - plan.duration
                };
                assert!(diff < Duration::from_micros(1), "chunk {i} off by {diff:?}");
            }
            for pair in plans.windows(2) {
                assert_eq!(pair[0].start + pair[0].duration, pair[1].start);
            }
        }
    }

    #[test]
    fn test_chunk_path_naming() {
        let path = chunk_path(Path::new("/tmp/work/audio.mp3"), 0);
        assert_eq!(path, PathBuf::from("/tmp/work/audio_part01.mp3"));
        let path = chunk_path(Path::new("/tmp/work/audio.mp3"), 11);
        assert_eq!(path, PathBuf::from("/tmp/work/audio_part12.mp3"));
    }

    #[tokio::test]
    async fn test_split_small_file_returns_source() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 100);
        let tool = FakeTool::new(Some(Duration::from_secs(40)));

        let chunks = split_audio(&tool, &source, 1000, &AtomicBool::new(false)).await.unwrap().chunks;

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].offset, Duration::ZERO);
        assert_eq!(chunks[0].duration, Duration::from_secs(40));
        assert_eq!(chunks[0].media, source);
        assert!(!chunks[0].owns_file);
        assert!(tool.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_large_file_creates_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 250);
        let tool = FakeTool::new(Some(Duration::from_secs(60)));

        let chunks = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await.unwrap().chunks;

        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert_eq!(chunk.offset, Duration::from_secs(20 * i as u64));
            assert_eq!(chunk.duration, Duration::from_secs(20));
            assert!(chunk.owns_file);
            assert!(chunk.path().exists());
        }

        let requests = tool.requests.lock().unwrap();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[1].range,
            Some(TimeRange {
                start: Duration::from_secs(20),
                duration: Duration::from_secs(20),
            })
        );
        assert_eq!(requests[1].encoding, AudioEncoding::default());
    }

    #[tokio::test]
    async fn test_split_skips_failed_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 250);
        let tool = FakeTool::new(Some(Duration::from_secs(60))).failing_on("audio_part02.mp3");

        let split = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await.unwrap();

        let indices: Vec<usize> = split.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(split.chunks[1].offset, Duration::from_secs(40));
        assert_eq!(split.planned, 3);
    }

    #[tokio::test]
    async fn test_split_counts_dropped_last_chunk_as_planned() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 250);
        let tool = FakeTool::new(Some(Duration::from_secs(60))).failing_on("audio_part03.mp3");

        let split = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await.unwrap();

        assert_eq!(split.chunks.len(), 2);
        assert_eq!(split.planned, 3);
    }

    #[tokio::test]
    async fn test_split_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 1000);
        let cancelled = Arc::new(AtomicBool::new(false));
        let tool = FakeTool::new(Some(Duration::from_secs(100))).cancelling(cancelled.clone());

        let result = split_audio(&tool, &source, 100, &cancelled).await;

        assert!(matches!(
            result,
            Err(SubtitlerError::Cancelled {
                completed: 0,
                total: 10
            })
        ));
        // Only the chunk in progress when the flag was raised was cut, and it is gone.
        let requests = tool.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].output.exists());
    }

    #[tokio::test]
    async fn test_split_already_cancelled_cuts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 250);
        let tool = FakeTool::new(Some(Duration::from_secs(60)));

        let result = split_audio(&tool, &source, 100, &AtomicBool::new(true)).await;

        assert!(matches!(result, Err(SubtitlerError::Cancelled { .. })));
        assert!(tool.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_split_fails_when_every_chunk_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 150);
        let tool = FakeTool::new(Some(Duration::from_secs(60)))
            .failing_on("audio_part01.mp3")
            .failing_on("audio_part02.mp3");

        let result = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await;
        assert!(matches!(result, Err(SubtitlerError::ChunkCreationFailed(_))));
    }

    #[tokio::test]
    async fn test_split_without_duration_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 150);
        let tool = FakeTool::new(None);

        let result = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await;
        assert!(matches!(result, Err(SubtitlerError::ProbeFailed(_))));
    }

    #[tokio::test]
    async fn test_split_small_file_tolerates_probe_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), 50);
        let tool = FakeTool::new(None);

        let chunks = split_audio(&tool, &source, 100, &AtomicBool::new(false)).await.unwrap().chunks;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].duration, Duration::ZERO);
    }

    #[test]
    fn test_remove_temp_file_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.mp3");
        std::fs::write(&path, b"x").unwrap();

        assert_eq!(remove_temp_file(&path), Cleanup::Removed);
        assert_eq!(remove_temp_file(&path), Cleanup::AlreadyGone);
        // A directory cannot be removed with remove_file.
        assert!(matches!(remove_temp_file(dir.path()), Cleanup::Failed(_)));
    }
}
