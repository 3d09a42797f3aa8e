//! Acquisition modes.

use crate::channel::Channel;
use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How the frames of a TIFF stack map onto output channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum AcquisitionMode {
    /// Every frame belongs to one named channel.
    Single(Channel),
    /// Every frame holds two emission channels side by side.
    Fret,
    /// Excitation alternates frame by frame and every frame holds two
    /// emission channels side by side.
    Alex,
}

impl AcquisitionMode {
    /// Returns true for FRET imports; this becomes the channel's FRET flag.
    #[must_use]
    pub fn is_fret(self) -> bool {
        matches!(self, Self::Fret)
    }

    /// Returns true when each raw frame is split into two halves.
    #[must_use]
    pub fn splits_frames(self) -> bool {
        matches!(self, Self::Fret | Self::Alex)
    }
}

impl Default for AcquisitionMode {
    fn default() -> Self {
        Self::Single(Channel::Donor)
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(channel) => write!(f, "{channel}"),
            Self::Fret => f.write_str("fret"),
            Self::Alex => f.write_str("alex"),
        }
    }
}

impl FromStr for AcquisitionMode {
    type Err = Error;

    /// Accepts `fret`, `alex`, `single` (donor) or any channel name, which
    /// selects single-channel import into that channel.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fret" => Ok(Self::Fret),
            "alex" => Ok(Self::Alex),
            "single" => Ok(Self::Single(Channel::Donor)),
            other => other
                .parse::<Channel>()
                .map(Self::Single)
                .map_err(|_| Error::UnknownValue {
                    kind: "import mode",
                    value: s.to_string(),
                }),
        }
    }
}
