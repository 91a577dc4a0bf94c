use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::job::StageKind;

/// Failure of a single snapshot job. Never fatal to the pool that ran it.
#[derive(Debug, Error)]
pub enum JobError {
    /// Network or HTTP status failure.
    #[error("fetching {url} failed: {source}")]
    TransientFetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    /// Payload was malformed or undersized.
    #[error("decode failed: {0}")]
    Decode(String),
    /// PNG encoding of a rendered frame failed.
    #[error("encoding image failed: {0}")]
    Encode(#[from] image::ImageError),
    /// Filesystem failure while writing the output.
    #[error("writing {} failed: {source}", .path.display())]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("job has no target path")]
    MissingTarget,
}

impl JobError {
    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        JobError::Decode(msg.into())
    }
}

/// Misuse of the orchestrator or a failure that halts a whole stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline is already running")]
    AlreadyRunning,
    #[error("pipeline is not running")]
    NotRunning,
    #[error("invalid stage id {0}")]
    InvalidStage(u8),
    /// Output directories could not be created at start.
    #[error("preparing {} failed: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} stage lost its downstream queue")]
    DownstreamClosed(StageKind),
    #[error("{0} worker panicked")]
    WorkerPanicked(StageKind),
    #[error("{0} pool supervisor is gone")]
    PoolGone(StageKind),
}

/// Returned by [`crate::JobQueue::enqueue`] once the queue is closed, handing
/// the rejected item back to the caller.
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Debug for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueClosed(..)")
    }
}

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue closed")
    }
}

impl<T> std::error::Error for QueueClosed<T> {}
