//! I/O error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for I/O operations.
pub type Result<T> = std::result::Result<T, Error>;

/// I/O error types.
#[derive(Error, Debug)]
pub enum Error {
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Memory mapping error.
    #[error("memory mapping error: {0}")]
    MmapError(String),

    /// Invalid file format.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),

    /// A frame could not be read or decoded.
    #[error("failed to decode frame {frame} of {}: {message}", path.display())]
    DecodeFailure {
        path: PathBuf,
        frame: usize,
        message: String,
    },

    /// A shared memory region could not be allocated.
    #[error("cannot allocate {requested} bytes of shared memory: {reason}")]
    ResourceExhausted { requested: u64, reason: String },

    /// The shared buffer was already released.
    #[error("shared buffer {0} was already released")]
    AlreadyReleased(String),

    /// The dataset to append to does not exist.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// A worker process could not be started or did not report back.
    #[error("worker launch failed: {0}")]
    WorkerLaunch(String),

    /// Some jobs of an import run failed or were cancelled.
    #[error("import incomplete: {failed} job(s) failed, {cancelled} job(s) cancelled")]
    PartialImportFailure { failed: usize, cancelled: usize },

    /// Array shape mismatch over a shared buffer.
    #[error("array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// Job or outcome serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Core library error.
    #[error("core error: {0}")]
    CoreError(#[from] pixseq_core::Error),
}
