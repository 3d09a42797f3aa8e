//! Frame partitioning.
//!
//! A [`FramePlan`] lists, for every raw frame that will be read, the output
//! channels it feeds and the destination index inside those channels. The
//! plan is built once per file and never mutated; the frame writer walks it
//! in order.
//!
//! # Modes
//!
//! - **single**: frame `i` goes to index `i` of the one configured channel.
//! - **fret**: frame `i` is split along its width; the halves go to index
//!   `i` of the two FRET channels in layout order.
//! - **alex**: even and odd frames are limited independently, merged, and
//!   paired; frames `2j` and `2j + 1` both land at index `j`, each split
//!   into the two emission channels of its own excitation.

use crate::channel::{AlexFirstFrame, Channel, ChannelLayout};
use crate::mode::AcquisitionMode;
use crate::sample::{FrameShape, SampleType};
use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Destination of one raw frame.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameAssignment {
    /// Page index in the source TIFF.
    pub source_frame: usize,
    /// Output channels, one per sub-image, left to right.
    pub channels: Vec<Channel>,
    /// Frame index inside every listed channel.
    pub destination_frame: usize,
}

/// Ordered frame assignments for one source file.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FramePlan {
    assignments: Vec<FrameAssignment>,
    channels: Vec<Channel>,
    channel_frame_count: usize,
    output_shape: FrameShape,
    split: bool,
    unpaired_frames: usize,
}

impl FramePlan {
    /// Assignments in source-frame order.
    #[must_use]
    pub fn assignments(&self) -> &[FrameAssignment] {
        &self.assignments
    }

    /// Distinct output channels, in order of first appearance.
    #[must_use]
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Number of frames every output channel receives.
    #[must_use]
    pub fn channel_frame_count(&self) -> usize {
        self.channel_frame_count
    }

    /// Shape of one frame of an output channel.
    #[must_use]
    pub fn output_shape(&self) -> FrameShape {
        self.output_shape
    }

    /// Full output array shape: `[frames, height, width]`.
    #[must_use]
    pub fn channel_shape(&self) -> [usize; 3] {
        [
            self.channel_frame_count,
            self.output_shape.height,
            self.output_shape.width,
        ]
    }

    /// Returns true if raw frames are split into two halves.
    #[must_use]
    pub fn is_split(&self) -> bool {
        self.split
    }

    /// Trailing ALEX frames left out because they had no partner.
    #[must_use]
    pub fn unpaired_frames(&self) -> usize {
        self.unpaired_frames
    }

    /// Number of raw frames read.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Returns true when no frame is read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Exact size in bytes of one channel's output array.
    #[must_use]
    pub fn channel_bytes(&self, sample_type: SampleType) -> usize {
        self.channel_frame_count * self.output_shape.pixels() * sample_type.itemsize()
    }

    /// Check the plan against a source of `n_frames` pages.
    ///
    /// Every source frame must exist and appear once, and every channel's
    /// destination indices must cover `0..channel_frame_count` exactly once.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPlan`] describing the first violation.
    pub fn validate(&self, n_frames: usize) -> Result<()> {
        let mut sources = BTreeSet::new();
        for assignment in &self.assignments {
            if assignment.source_frame >= n_frames {
                return Err(Error::InvalidPlan(format!(
                    "source frame {} out of range for {n_frames} frames",
                    assignment.source_frame
                )));
            }
            if !sources.insert(assignment.source_frame) {
                return Err(Error::InvalidPlan(format!(
                    "source frame {} assigned twice",
                    assignment.source_frame
                )));
            }
        }

        for &channel in &self.channels {
            let mut destinations: Vec<usize> = self
                .assignments
                .iter()
                .filter(|a| a.channels.contains(&channel))
                .map(|a| a.destination_frame)
                .collect();
            destinations.sort_unstable();
            let contiguous = destinations.len() == self.channel_frame_count
                && destinations.iter().enumerate().all(|(i, &d)| i == d);
            if !contiguous {
                return Err(Error::InvalidPlan(format!(
                    "channel {channel} destinations are not 0..{}",
                    self.channel_frame_count
                )));
            }
        }
        Ok(())
    }
}

/// Build the frame plan for one file.
///
/// `n_frames` is the page count of the file, `raw_shape` the shape of one
/// page, and `import_limit` the optional per-file limit (per excitation for
/// ALEX).
///
/// # Errors
/// Returns [`Error::MalformedFrameShape`] when a splitting mode meets an odd
/// frame width.
pub fn partition(
    mode: AcquisitionMode,
    layout: ChannelLayout,
    alex_first_frame: AlexFirstFrame,
    n_frames: usize,
    raw_shape: FrameShape,
    import_limit: Option<usize>,
) -> Result<FramePlan> {
    let limit = import_limit.unwrap_or(n_frames);
    match mode {
        AcquisitionMode::Single(channel) => {
            let frames = unique_sorted((0..n_frames).take(limit));
            Ok(sequential_plan(frames, vec![channel], raw_shape, false))
        }
        AcquisitionMode::Fret => {
            let half = raw_shape.split_half()?;
            let frames = unique_sorted((0..n_frames).take(limit));
            Ok(sequential_plan(
                frames,
                layout.fret_channels().to_vec(),
                half,
                true,
            ))
        }
        AcquisitionMode::Alex => {
            let half = raw_shape.split_half()?;
            Ok(alex_plan(layout, alex_first_frame, n_frames, half, limit))
        }
    }
}

fn unique_sorted(frames: impl IntoIterator<Item = usize>) -> Vec<usize> {
    frames
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn sequential_plan(
    frames: Vec<usize>,
    channels: Vec<Channel>,
    output_shape: FrameShape,
    split: bool,
) -> FramePlan {
    let assignments = frames
        .iter()
        .enumerate()
        .map(|(destination_frame, &source_frame)| FrameAssignment {
            source_frame,
            channels: channels.clone(),
            destination_frame,
        })
        .collect();
    FramePlan {
        assignments,
        channels,
        channel_frame_count: frames.len(),
        output_shape,
        split,
        unpaired_frames: 0,
    }
}

fn alex_plan(
    layout: ChannelLayout,
    alex_first_frame: AlexFirstFrame,
    n_frames: usize,
    output_shape: FrameShape,
    limit: usize,
) -> FramePlan {
    let even = (0..n_frames).step_by(2).take(limit);
    let odd = (1..n_frames).step_by(2).take(limit);
    let mut frames = unique_sorted(even.chain(odd));

    let unpaired_frames = frames.len() % 2;
    frames.truncate(frames.len() - unpaired_frames);

    let mut channels: Vec<Channel> = Vec::with_capacity(4);
    let assignments = frames
        .iter()
        .enumerate()
        .map(|(position, &source_frame)| {
            let excitation = alex_first_frame.excitation_for(source_frame);
            let frame_channels = layout.alex_channels(excitation).to_vec();
            for channel in &frame_channels {
                if !channels.contains(channel) {
                    channels.push(*channel);
                }
            }
            FrameAssignment {
                source_frame,
                channels: frame_channels,
                destination_frame: position / 2,
            }
        })
        .collect();

    FramePlan {
        assignments,
        channels,
        channel_frame_count: frames.len() / 2,
        output_shape,
        split: true,
        unpaired_frames,
    }
}
