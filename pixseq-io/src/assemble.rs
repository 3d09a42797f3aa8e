//! Result assembly.
//!
//! Once every job has finished, each shared buffer is copied into an owned
//! `u16` array, released, tagged with its acquisition metadata and merged
//! into the registry.

use crate::registry::{ChannelRecord, Completeness, DatasetRegistry};
use crate::shm::SharedBuffer;
use crate::writer::{JobOutcome, JobStatus};
use crate::Result;
use bytemuck::Pod;
use log::{debug, error, warn};
use ndarray::Array3;
use pixseq_core::{Channel, FramePlan, ImportDescriptor, SampleType};
use std::collections::BTreeMap;
use std::mem::size_of;

/// A planned file whose buffers are waiting to be read back.
#[derive(Debug)]
pub struct PendingImport {
    /// Job index this file was dispatched under.
    pub index: usize,
    pub descriptor: ImportDescriptor,
    pub plan: FramePlan,
    pub buffers: BTreeMap<Channel, SharedBuffer>,
}

/// Copy a shared buffer into an owned `u16` array of the buffer's shape.
///
/// Wider integer types wrap and floating point values saturate (NaN becomes
/// 0), as with an `as` cast. Nothing is rescaled.
///
/// # Errors
/// Returns an error if the buffer was released or its size does not match
/// its shape.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn read_channel(buffer: &SharedBuffer) -> Result<Array3<u16>> {
    let handle = buffer.handle();
    let bytes = buffer.as_bytes()?;
    let values = match handle.sample_type {
        SampleType::U8 => bytes.iter().map(|&v| u16::from(v)).collect(),
        SampleType::U16 => convert::<u16>(bytes, |v| v),
        SampleType::U32 => convert::<u32>(bytes, |v| v as u16),
        SampleType::U64 => convert::<u64>(bytes, |v| v as u16),
        SampleType::I8 => convert::<i8>(bytes, |v| v as u16),
        SampleType::I16 => convert::<i16>(bytes, |v| v as u16),
        SampleType::I32 => convert::<i32>(bytes, |v| v as u16),
        SampleType::I64 => convert::<i64>(bytes, |v| v as u16),
        SampleType::F32 => convert::<f32>(bytes, |v| v as u16),
        SampleType::F64 => convert::<f64>(bytes, |v| v as u16),
    };
    Ok(Array3::from_shape_vec(handle.shape, values)?)
}

fn convert<T: Pod>(bytes: &[u8], cast: impl Fn(T) -> u16) -> Vec<u16> {
    bytes
        .chunks_exact(size_of::<T>())
        .map(|chunk| cast(bytemuck::pod_read_unaligned(chunk)))
        .collect()
}

/// Read back, release and register every pending import.
///
/// A channel's completeness comes from the outcome of the job with the same
/// index; a job without an outcome counts as failed. A buffer that cannot be
/// read back is registered as zeros and marked partial, and a completed
/// outcome for that job is turned into a failure. A buffer that cannot be
/// released keeps its copied data and is unlinked when dropped. Files whose
/// plan selects no frames are not registered.
///
/// Returns the names of the datasets touched, in first-touched order.
pub fn assemble(
    registry: &mut DatasetRegistry,
    pending: Vec<PendingImport>,
    outcomes: &mut [JobOutcome],
) -> Vec<String> {
    let mut touched: Vec<String> = Vec::new();

    for import in pending {
        let PendingImport {
            index,
            descriptor,
            plan,
            buffers,
        } = import;
        if plan.is_empty() {
            warn!(
                "{} has no frames to import into {}",
                descriptor.path.display(),
                descriptor.dataset
            );
            continue;
        }

        let outcome = outcomes.iter_mut().find(|o| o.index == index);
        let completeness = match outcome.as_ref().map(|o| &o.status) {
            Some(JobStatus::Completed) => Completeness::Complete,
            Some(JobStatus::Cancelled) => Completeness::Cancelled,
            Some(JobStatus::Failed { .. }) | None => Completeness::Partial,
        };
        if descriptor.sample_type.is_lossy_to_u16() {
            warn!(
                "{} holds {} samples; values are cast to uint16 without rescaling",
                descriptor.path.display(),
                descriptor.sample_type
            );
        }

        let mut unreadable = Vec::new();
        let mut records = Vec::with_capacity(buffers.len());
        for (channel, mut buffer) in buffers {
            let (data, completeness) = match read_channel(&buffer) {
                Ok(data) => (data, completeness),
                Err(err) => {
                    error!(
                        "could not read back {channel} of {}: {err}",
                        descriptor.path.display()
                    );
                    unreadable.push(format!("{channel}: {err}"));
                    (Array3::zeros(buffer.handle().shape), Completeness::Partial)
                }
            };
            if let Err(err) = buffer.release() {
                warn!("could not release {}: {err}", buffer.handle().name);
            }
            records.push(ChannelRecord {
                data,
                path: descriptor.path.clone(),
                channel,
                excitation: channel.excitation(),
                emission: channel.emission(),
                fret: descriptor.mode.is_fret(),
                mode: descriptor.mode,
                channel_layout: descriptor.channel_layout,
                alex_first_frame: descriptor.alex_first_frame,
                source_sample_type: descriptor.sample_type,
                completeness,
            });
        }
        if let Some(outcome) = outcome {
            if !unreadable.is_empty() && outcome.is_completed() {
                outcome.status = JobStatus::Failed {
                    error: format!("read back failed ({})", unreadable.join("; ")),
                };
            }
        }
        debug!(
            "assembled {} channel(s) of {} frame(s) into {}",
            records.len(),
            plan.channel_frame_count(),
            descriptor.dataset
        );

        registry.merge(&descriptor.dataset, records);
        if !touched.contains(&descriptor.dataset) {
            touched.push(descriptor.dataset);
        }
    }
    touched
}
