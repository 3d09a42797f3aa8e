//! Per-file import descriptors.

use crate::channel::{AlexFirstFrame, ChannelLayout};
use crate::config::ImportConfig;
use crate::mode::AcquisitionMode;
use crate::plan::{partition, FramePlan};
use crate::sample::{FrameShape, SampleType};
use crate::Result;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything needed to plan and run the import of one source file.
///
/// Built once from the file's metadata and the run's [`ImportConfig`];
/// never modified afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImportDescriptor {
    pub path: PathBuf,
    pub dataset: String,
    pub mode: AcquisitionMode,
    pub channel_layout: ChannelLayout,
    pub alex_first_frame: AlexFirstFrame,
    pub n_frames: usize,
    pub frame_shape: FrameShape,
    pub sample_type: SampleType,
    pub import_limit: Option<usize>,
    /// Size of the file on disk, in bytes.
    pub file_size: u64,
}

impl ImportDescriptor {
    /// Combine inspected file metadata with the run configuration.
    #[must_use]
    pub fn new(
        path: PathBuf,
        config: &ImportConfig,
        n_frames: usize,
        frame_shape: FrameShape,
        sample_type: SampleType,
        file_size: u64,
    ) -> Self {
        let dataset = config.dataset_name_for(&path);
        Self {
            path,
            dataset,
            mode: config.mode,
            channel_layout: config.channel_layout,
            alex_first_frame: config.alex_first_frame,
            n_frames,
            frame_shape,
            sample_type,
            import_limit: config.import_limit,
            file_size,
        }
    }

    /// Partition this file's frames into channels.
    ///
    /// # Errors
    /// Returns an error if the frame shape cannot be split for the mode.
    pub fn plan(&self) -> Result<FramePlan> {
        let plan = partition(
            self.mode,
            self.channel_layout,
            self.alex_first_frame,
            self.n_frames,
            self.frame_shape,
            self.import_limit,
        )?;
        plan.validate(self.n_frames)?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn descriptor_takes_dataset_and_options_from_config() {
        let config = ImportConfig::new(AcquisitionMode::Fret)
            .with_channel_layout(ChannelLayout::AcceptorDonor)
            .with_import_limit(2);
        let descriptor = ImportDescriptor::new(
            PathBuf::from("/tmp/stack.tif"),
            &config,
            6,
            FrameShape::new(8, 16),
            SampleType::U16,
            4096,
        );
        assert_eq!(descriptor.dataset, "stack.tif");
        let plan = descriptor.plan().unwrap();
        assert_eq!(plan.channel_shape(), [2, 8, 8]);
        assert_eq!(plan.channels(), &[Channel::Acceptor, Channel::Donor]);
    }
}
