//! pixseq-io: TIFF import through shared memory and worker processes.
//!
//! The import of a set of TIFF stacks runs in five stages:
//!
//! 1. Probe every file and partition its frames into channels
//!    ([`pixseq_core::FramePlan`]).
//! 2. Allocate one named shared buffer per (dataset, channel)
//!    ([`SharedBufferAllocator`]).
//! 3. Dispatch one [`ImportJob`] per file to a bounded worker pool
//!    ([`JobScheduler`]); each worker decodes its frames straight into the
//!    shared buffers ([`run_job`]).
//! 4. Poll the shared [`ProgressMap`] until every job has finished.
//! 5. Copy the buffers into owned `u16` arrays, release them, and merge the
//!    channels into the [`DatasetRegistry`] ([`assemble`]).
//!
//! [`Importer`] drives the whole sequence.
//!

mod assemble;
mod error;
mod import;
mod reader;
pub mod registry;
pub mod scheduler;
pub mod shm;
mod writer;

pub use assemble::{assemble, read_channel, PendingImport};
pub use error::{Error, Result};
pub use import::{normalize_import_path, ImportReport, Importer, PreparedImport};
pub use reader::{Frame, StackInfo, TiffStackReader};
pub use registry::{ChannelRecord, Completeness, Dataset, DatasetRegistry};
pub use scheduler::{Backend, JobScheduler, SchedulerConfig};
pub use shm::{
    CancelFlag, ChannelBuffer, ProgressMap, SharedBuffer, SharedBufferAllocator,
    SharedMemoryConfig,
};
pub use writer::{run_job, ImportJob, JobOutcome, JobStatus};

#[cfg(test)]
pub(crate) mod test_support;
