//! Error types for pixseq-core.

use thiserror::Error;

/// Result type alias for pixseq core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for import planning.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A raw frame cannot be split evenly into two emission channels.
    #[error("malformed frame shape {height}x{width}: width must be even to split in half")]
    MalformedFrameShape { height: usize, width: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// A string did not name a known mode, layout or channel.
    #[error("unknown {kind}: {value:?}")]
    UnknownValue { kind: &'static str, value: String },

    /// A frame plan violates its destination-index invariants.
    #[error("invalid frame plan: {0}")]
    InvalidPlan(String),
}
