//! Import configuration chosen by the user.

use crate::channel::{AlexFirstFrame, ChannelLayout};
use crate::mode::AcquisitionMode;
use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::path::Path;

/// User-facing options for one import run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ImportConfig {
    /// How frames map onto channels.
    pub mode: AcquisitionMode,
    /// Left-to-right order of emission halves (FRET and ALEX).
    pub channel_layout: ChannelLayout,
    /// Excitation of frame 0 (ALEX only).
    pub alex_first_frame: AlexFirstFrame,
    /// Maximum frames per file; for ALEX, per excitation.
    pub import_limit: Option<usize>,
    /// Import every file into this existing dataset instead of one dataset
    /// per file.
    pub append_to_dataset: Option<String>,
}

impl ImportConfig {
    #[must_use]
    pub fn new(mode: AcquisitionMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    /// Set the acquisition mode.
    #[must_use]
    pub fn with_mode(mut self, mode: AcquisitionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the channel layout.
    #[must_use]
    pub fn with_channel_layout(mut self, layout: ChannelLayout) -> Self {
        self.channel_layout = layout;
        self
    }

    /// Set which laser fires on the first ALEX frame.
    #[must_use]
    pub fn with_alex_first_frame(mut self, first: AlexFirstFrame) -> Self {
        self.alex_first_frame = first;
        self
    }

    /// Set the per-file frame limit.
    ///
    /// Values less than 1 are clamped to 1. Use [`Self::try_with_import_limit`]
    /// to surface invalid values as an error instead.
    #[must_use]
    pub fn with_import_limit(mut self, limit: usize) -> Self {
        self.import_limit = Some(limit.max(1));
        self
    }

    /// Import into an existing dataset.
    #[must_use]
    pub fn with_append_to_dataset(mut self, name: impl Into<String>) -> Self {
        self.append_to_dataset = Some(name.into());
        self
    }

    /// Fallible variant of [`Self::with_import_limit`].
    ///
    /// # Errors
    /// Returns an error if `limit` is 0.
    pub fn try_with_import_limit(mut self, limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidConfig(
                "import_limit must be at least 1".to_string(),
            ));
        }
        self.import_limit = Some(limit);
        Ok(self)
    }

    /// Parse the limit as the UI presents it: a number or `"None"`.
    ///
    /// # Errors
    /// Returns an error if the value is neither `none` nor a positive integer.
    pub fn try_with_import_limit_str(self, limit: &str) -> Result<Self> {
        let trimmed = limit.trim();
        if trimmed.eq_ignore_ascii_case("none") || trimmed.is_empty() {
            return Ok(Self {
                import_limit: None,
                ..self
            });
        }
        let value = trimmed.parse::<usize>().map_err(|_| Error::UnknownValue {
            kind: "import limit",
            value: limit.to_string(),
        })?;
        self.try_with_import_limit(value)
    }

    /// Dataset a file is imported into.
    ///
    /// This is the append target when one is configured, otherwise the
    /// file name of `path`.
    #[must_use]
    pub fn dataset_name_for(&self, path: &Path) -> String {
        if let Some(name) = &self.append_to_dataset {
            return name.clone();
        }
        path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use std::path::PathBuf;

    #[test]
    fn builder_sets_fields() {
        let config = ImportConfig::new(AcquisitionMode::Alex)
            .with_channel_layout(ChannelLayout::AcceptorDonor)
            .with_alex_first_frame(AlexFirstFrame::Acceptor)
            .with_import_limit(0);
        assert_eq!(config.mode, AcquisitionMode::Alex);
        assert_eq!(config.channel_layout, ChannelLayout::AcceptorDonor);
        assert_eq!(config.alex_first_frame, AlexFirstFrame::Acceptor);
        assert_eq!(config.import_limit, Some(1));
    }

    #[test]
    fn limit_parsing() {
        let config = ImportConfig::default();
        let unlimited = config.clone().try_with_import_limit_str("None").unwrap();
        assert_eq!(unlimited.import_limit, None);
        let limited = config.clone().try_with_import_limit_str("250").unwrap();
        assert_eq!(limited.import_limit, Some(250));
        assert!(config.clone().try_with_import_limit_str("0").is_err());
        assert!(config.try_with_import_limit_str("many").is_err());
    }

    #[test]
    fn dataset_name_defaults_to_file_name() {
        let path = PathBuf::from("/data/run1/movie_01.tif");
        let config = ImportConfig::new(AcquisitionMode::Single(Channel::Dd));
        assert_eq!(config.dataset_name_for(&path), "movie_01.tif");

        let config = config.with_append_to_dataset("combined");
        assert_eq!(config.dataset_name_for(&path), "combined");
    }
}
