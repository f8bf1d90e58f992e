use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failures callers may want to tell apart. Everything else travels as `anyhow::Error`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Frame #{index} not found in video {path:?} (frame count = {frame_count})")]
    FrameNotFound {
        index: usize,
        path: PathBuf,
        frame_count: usize,
    },

    #[error("Malformed metadata in {path:?}: {reason}")]
    MalformedMetadata { path: PathBuf, reason: String },

    #[error("No robot start time for trial #{trial} ({known} trials known)")]
    MissingStartTime { trial: u32, known: usize },

    #[error("Decoder #{source_index} delivered no frame within {waited:?}")]
    ChannelTimeout {
        source_index: usize,
        waited: Duration,
    },

    #[error("Decoder #{source_index} stopped without signalling completion")]
    WorkerDisconnected { source_index: usize },

    #[error("Grid needs at least one video source")]
    NoSources,
}
