//! pixseq-core: Core types for single-molecule image import.
//!
//! This crate holds the I/O-free part of the import pipeline: acquisition
//! modes, channel naming, import configuration, and the frame partitioner
//! that decides which output channel and destination index every raw TIFF
//! frame is written to.
//!

pub mod channel;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod mode;
pub mod plan;
pub mod sample;

pub use channel::{AlexFirstFrame, Channel, ChannelLayout, Letter};
pub use config::ImportConfig;
pub use descriptor::ImportDescriptor;
pub use error::{Error, Result};
pub use mode::AcquisitionMode;
pub use plan::{partition, FrameAssignment, FramePlan};
pub use sample::{FrameShape, SampleType};
