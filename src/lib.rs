pub mod audio;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod subtitle;
pub mod timeline;
pub mod transcribe;

pub use config::Config;
pub use error::{Result, SubtitlerError};
pub use pipeline::{
    generate_subtitles, generate_subtitles_with_cancel, print_summary, run_pipeline,
    PipelineConfig, PipelineResult, PipelineStats,
};
