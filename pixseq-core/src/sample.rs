//! Pixel sample types and frame geometry.

use crate::{Error, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a decoded TIFF page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SampleType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    /// Size of one sample in bytes.
    #[must_use]
    pub fn itemsize(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Returns true if converting to `u16` can lose information.
    #[must_use]
    pub fn is_lossy_to_u16(self) -> bool {
        !matches!(self, Self::U8 | Self::U16)
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::U8 => "uint8",
            Self::U16 => "uint16",
            Self::U32 => "uint32",
            Self::U64 => "uint64",
            Self::I8 => "int8",
            Self::I16 => "int16",
            Self::I32 => "int32",
            Self::I64 => "int64",
            Self::F32 => "float32",
            Self::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Height and width of a single frame, in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FrameShape {
    pub height: usize,
    pub width: usize,
}

impl FrameShape {
    #[must_use]
    pub fn new(height: usize, width: usize) -> Self {
        Self { height, width }
    }

    /// Number of pixels in one frame.
    #[must_use]
    pub fn pixels(&self) -> usize {
        self.height * self.width
    }

    /// Shape of each half after splitting along the width.
    ///
    /// # Errors
    /// Returns [`Error::MalformedFrameShape`] if the width is odd.
    pub fn split_half(&self) -> Result<Self> {
        if self.width % 2 != 0 {
            return Err(Error::MalformedFrameShape {
                height: self.height,
                width: self.width,
            });
        }
        Ok(Self::new(self.height, self.width / 2))
    }
}

impl fmt::Display for FrameShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}
