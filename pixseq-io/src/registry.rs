//! Imported datasets.
//!
//! The registry is an explicit value owned by the caller and passed into
//! each import. Imports only ever add to it: a new dataset is inserted
//! whole, and importing into an existing one overlays the imported channels
//! while leaving its other channels alone.

use ndarray::Array3;
use pixseq_core::{AcquisitionMode, AlexFirstFrame, Channel, ChannelLayout, Letter, SampleType};
use std::collections::btree_map::{self, BTreeMap};
use std::path::PathBuf;

/// Whether a channel's pixel data can be trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completeness {
    /// Every planned frame was written.
    Complete,
    /// The job failed; frames past the failure point are zero.
    Partial,
    /// The job was cancelled; frames past the cancellation point are zero.
    Cancelled,
}

/// One imported channel and its acquisition metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRecord {
    /// Pixel data, `[frames, height, width]`.
    pub data: Array3<u16>,
    pub path: PathBuf,
    pub channel: Channel,
    pub excitation: Letter,
    pub emission: Letter,
    /// True when imported in FRET mode.
    pub fret: bool,
    pub mode: AcquisitionMode,
    pub channel_layout: ChannelLayout,
    pub alex_first_frame: AlexFirstFrame,
    /// Sample type of the source file before the `u16` conversion.
    pub source_sample_type: SampleType,
    pub completeness: Completeness,
}

impl ChannelRecord {
    /// Excitation letter followed by emission letter.
    #[must_use]
    pub fn channel_ref(&self) -> String {
        format!("{}{}", self.excitation, self.emission)
    }

    #[must_use]
    pub fn display_name(&self) -> &'static str {
        self.channel.display_name()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.completeness == Completeness::Complete
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.data.shape()[0]
    }
}

/// A named group of channels, usually one source file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dataset {
    channels: BTreeMap<Channel, ChannelRecord>,
}

impl Dataset {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn channel(&self, channel: Channel) -> Option<&ChannelRecord> {
        self.channels.get(&channel)
    }

    pub fn channel_mut(&mut self, channel: Channel) -> Option<&mut ChannelRecord> {
        self.channels.get_mut(&channel)
    }

    /// Channels in name order.
    pub fn channels(&self) -> impl Iterator<Item = (Channel, &ChannelRecord)> {
        self.channels
            .iter()
            .map(|(&channel, record)| (channel, record))
    }

    /// Insert or replace one channel, returning the replaced record.
    pub fn insert(&mut self, record: ChannelRecord) -> Option<ChannelRecord> {
        self.channels.insert(record.channel, record)
    }

    pub fn remove(&mut self, channel: Channel) -> Option<ChannelRecord> {
        self.channels.remove(&channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Returns true when every channel is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.channels.values().all(ChannelRecord::is_complete)
    }
}

/// Dataset name to dataset mapping.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DatasetRegistry {
    datasets: BTreeMap<String, Dataset>,
}

impl DatasetRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge channels into dataset `name`.
    ///
    /// Creates the dataset if needed; otherwise only the given channels are
    /// replaced.
    pub fn merge(&mut self, name: &str, records: impl IntoIterator<Item = ChannelRecord>) {
        let dataset = self.create(name);
        for record in records {
            dataset.insert(record);
        }
    }

    /// Returns dataset `name`, creating it empty if it does not exist.
    pub fn create(&mut self, name: &str) -> &mut Dataset {
        self.datasets.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Dataset> {
        self.datasets.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Dataset> {
        self.datasets.get_mut(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.datasets.contains_key(name)
    }

    /// Dataset names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.datasets.keys().map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<Dataset> {
        self.datasets.remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Dataset> {
        self.datasets.iter()
    }
}

impl<'a> IntoIterator for &'a DatasetRegistry {
    type Item = (&'a String, &'a Dataset);
    type IntoIter = btree_map::Iter<'a, String, Dataset>;

    fn into_iter(self) -> Self::IntoIter {
        self.datasets.iter()
    }
}
