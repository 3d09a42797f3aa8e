//! Frame writer: the per-file worker job.
//!
//! A job decodes the planned frames of one TIFF stack in source order and
//! copies every sub-image straight into the shared buffer of its channel,
//! at the planned destination index. It runs either inside a `pixseq worker`
//! subprocess or on a pool thread; both paths call [`run_job`].

use crate::reader::{Frame, TiffStackReader};
use crate::shm::{CancelFlag, ChannelBuffer, ProgressMap, SharedBuffer};
use crate::{Error, Result};
use log::{debug, error};
use ndarray::{s, ArrayView2, ArrayViewMut3, Axis};
use pixseq_core::{Channel, FrameAssignment, FramePlan, FrameShape, SampleType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Everything a worker needs to import one source file.
///
/// Jobs only carry paths to shared regions, never pixel data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImportJob {
    /// Slot of this job in the progress map.
    pub index: usize,
    pub dataset: String,
    pub path: PathBuf,
    pub plan: FramePlan,
    /// Raw page shape the plan was built for.
    pub frame_shape: FrameShape,
    pub sample_type: SampleType,
    pub buffers: BTreeMap<Channel, ChannelBuffer>,
    pub progress_map: PathBuf,
    pub cancel_flag: PathBuf,
}

impl ImportJob {
    /// Serialize the job for a worker's stdin.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a job received on stdin.
    ///
    /// # Errors
    /// Returns an error if the input is not a valid job.
    pub fn from_json(input: &str) -> Result<Self> {
        Ok(serde_json::from_str(input)?)
    }
}

/// Final state of a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    /// Every planned frame was written.
    Completed,
    /// The cancellation flag was observed before all frames were written.
    Cancelled,
    /// The job aborted; its buffers hold whatever was written before.
    Failed { error: String },
}

/// What a worker reports back for one job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub index: usize,
    pub dataset: String,
    pub path: PathBuf,
    pub status: JobStatus,
    pub frames_written: usize,
    pub frames_planned: usize,
}

impl JobOutcome {
    /// Outcome of a job that failed before or outside [`run_job`].
    #[must_use]
    pub fn failed(job: &ImportJob, error: impl Into<String>) -> Self {
        Self {
            index: job.index,
            dataset: job.dataset.clone(),
            path: job.path.clone(),
            status: JobStatus::Failed {
                error: error.into(),
            },
            frames_written: 0,
            frames_planned: job.plan.len(),
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.status == JobStatus::Cancelled
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self.status, JobStatus::Failed { .. })
    }

    /// Serialize the outcome for a worker's stdout.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Run one import job to completion, cancellation or failure.
///
/// Errors never escape: they are logged and reported as
/// [`JobStatus::Failed`]. Frames written before a failure or cancellation
/// stay in the buffers.
#[must_use]
pub fn run_job(job: &ImportJob) -> JobOutcome {
    let mut frames_written = 0;
    let status = match write_frames(job, &mut frames_written) {
        Ok(true) => JobStatus::Completed,
        Ok(false) => {
            debug!(
                "job {} ({}) cancelled after {frames_written} frame(s)",
                job.index,
                job.path.display()
            );
            JobStatus::Cancelled
        }
        Err(err) => {
            error!("job {} ({}) failed: {err}", job.index, job.path.display());
            JobStatus::Failed {
                error: err.to_string(),
            }
        }
    };

    JobOutcome {
        index: job.index,
        dataset: job.dataset.clone(),
        path: job.path.clone(),
        status,
        frames_written,
        frames_planned: job.plan.len(),
    }
}

/// Returns `Ok(false)` when cancelled.
fn write_frames(job: &ImportJob, written: &mut usize) -> Result<bool> {
    let cancel = CancelFlag::attach(&job.cancel_flag)?;
    if cancel.is_cancelled() {
        return Ok(false);
    }

    check_geometry(job)?;
    let progress = ProgressMap::attach(&job.progress_map)?;
    let mut targets = attach_targets(job)?;
    let mut reader = TiffStackReader::open(&job.path)?;

    let total = job.plan.len();
    if total == 0 {
        progress.set(job.index, 100);
        return Ok(true);
    }

    for (i, assignment) in job.plan.assignments().iter().enumerate() {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let frame = reader.read_frame(assignment.source_frame)?;
        if frame.shape != job.frame_shape || frame.sample_type != job.sample_type {
            return Err(Error::InvalidFormat(format!(
                "{} page {} is {}x{} {}, expected {}x{} {}",
                job.path.display(),
                assignment.source_frame,
                frame.shape.height,
                frame.shape.width,
                frame.sample_type,
                job.frame_shape.height,
                job.frame_shape.width,
                job.sample_type
            )));
        }
        write_assignment(&frame, assignment, job.plan.output_shape(), &mut targets)?;
        *written += 1;
        progress.set(job.index, percent(i + 1, total));
    }
    Ok(true)
}

fn check_geometry(job: &ImportJob) -> Result<()> {
    let out = job.plan.output_shape();
    let parts = if job.plan.is_split() { 2 } else { 1 };
    if out.height != job.frame_shape.height || out.width * parts != job.frame_shape.width {
        return Err(Error::InvalidFormat(format!(
            "plan output {}x{} does not fit {}x{} frames",
            out.height, out.width, job.frame_shape.height, job.frame_shape.width
        )));
    }
    Ok(())
}

fn attach_targets(job: &ImportJob) -> Result<BTreeMap<Channel, SharedBuffer>> {
    let expected = job.plan.channel_shape();
    job.plan
        .channels()
        .iter()
        .map(|&channel| {
            let handle = job.buffers.get(&channel).ok_or_else(|| {
                Error::InvalidFormat(format!("job {} has no buffer for {channel}", job.index))
            })?;
            if handle.shape != expected || handle.sample_type != job.sample_type {
                return Err(Error::InvalidFormat(format!(
                    "buffer {} is {:?} {}, expected {expected:?} {}",
                    handle.name, handle.shape, handle.sample_type, job.sample_type
                )));
            }
            Ok((channel, SharedBuffer::attach(handle)?))
        })
        .collect()
}

/// Copy the sub-images of one decoded frame into their channel buffers.
///
/// Works on byte views: the frame is viewed as `(height, row_bytes)` and
/// each buffer as `(frames, height, part_bytes)`, so halves are plain
/// column slices regardless of the sample type.
fn write_assignment(
    frame: &Frame,
    assignment: &FrameAssignment,
    output: FrameShape,
    targets: &mut BTreeMap<Channel, SharedBuffer>,
) -> Result<()> {
    let raw = ArrayView2::from_shape((frame.shape.height, frame.row_bytes()), &frame.bytes)?;
    let part_bytes = output.width * frame.sample_type.itemsize();

    for (part, channel) in assignment.channels.iter().enumerate() {
        let columns = part * part_bytes..(part + 1) * part_bytes;
        let source = raw.slice(s![.., columns]);
        let buffer = targets.get_mut(channel).ok_or_else(|| {
            Error::InvalidFormat(format!("no buffer attached for channel {channel}"))
        })?;
        let frames = buffer.handle().shape[0];
        if assignment.destination_frame >= frames {
            return Err(pixseq_core::Error::InvalidPlan(format!(
                "destination {} out of range for {frames} frames",
                assignment.destination_frame
            ))
            .into());
        }
        let mut dest =
            ArrayViewMut3::from_shape((frames, output.height, part_bytes), buffer.as_bytes_mut()?)?;
        dest.index_axis_mut(Axis(0), assignment.destination_frame)
            .assign(&source);
    }
    Ok(())
}

fn percent(done: usize, total: usize) -> u32 {
    u32::try_from(done * 100 / total).unwrap_or(100)
}
