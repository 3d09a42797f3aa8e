//! Multi-page TIFF readers.
//!

use crate::{Error, Result};
use pixseq_core::{FrameShape, SampleType};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::ColorType;

/// Metadata of a TIFF stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StackInfo {
    /// Number of pages.
    pub n_frames: usize,
    /// Shape of the first page.
    pub frame_shape: FrameShape,
    /// Sample type of the first page.
    pub sample_type: SampleType,
    /// File size on disk in bytes.
    pub file_size: u64,
}

/// One decoded page, as native-endian sample bytes in row-major order.
#[derive(Clone, Debug)]
pub struct Frame {
    pub shape: FrameShape,
    pub sample_type: SampleType,
    pub bytes: Vec<u8>,
}

impl Frame {
    /// Number of bytes in one row.
    #[must_use]
    pub fn row_bytes(&self) -> usize {
        self.shape.width * self.sample_type.itemsize()
    }
}

/// A sequential reader over the pages of a grayscale TIFF stack.
///
/// Pages are addressed by index. Reading forward walks the IFD chain;
/// reading backwards reopens the file.
pub struct TiffStackReader {
    decoder: Decoder<BufReader<File>>,
    path: PathBuf,
    current: usize,
}

impl TiffStackReader {
    /// Opens a TIFF file positioned at its first page.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or has no valid header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let decoder = open_decoder(&path)?;
        Ok(Self {
            decoder,
            path,
            current: 0,
        })
    }

    /// Reads the page count, first-page shape and sample type of a file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be decoded or is not grayscale.
    pub fn inspect<P: AsRef<Path>>(path: P) -> Result<StackInfo> {
        let mut reader = Self::open(path)?;
        let file_size = std::fs::metadata(&reader.path)?.len();
        let first = reader.read_frame(0)?;

        let mut n_frames = 1;
        while reader.decoder.more_images() {
            reader
                .decoder
                .next_image()
                .map_err(|e| reader.decode_error(n_frames, &e))?;
            n_frames += 1;
        }
        reader.current = n_frames - 1;

        Ok(StackInfo {
            n_frames,
            frame_shape: first.shape,
            sample_type: first.sample_type,
            file_size,
        })
    }

    /// Returns the path of the file being read.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Decodes page `index`.
    ///
    /// # Errors
    /// Returns [`Error::DecodeFailure`] if the page does not exist or cannot
    /// be decoded, and [`Error::InvalidFormat`] for non-grayscale pages.
    pub fn read_frame(&mut self, index: usize) -> Result<Frame> {
        self.seek(index)?;

        match self
            .decoder
            .colortype()
            .map_err(|e| self.decode_error(index, &e))?
        {
            ColorType::Gray(_) => {}
            other => {
                return Err(Error::InvalidFormat(format!(
                    "{} page {index} has color type {other:?}, expected grayscale",
                    self.path.display()
                )));
            }
        }

        let (width, height) = self
            .decoder
            .dimensions()
            .map_err(|e| self.decode_error(index, &e))?;
        let image = self
            .decoder
            .read_image()
            .map_err(|e| self.decode_error(index, &e))?;
        let (sample_type, bytes) = sample_bytes(image).ok_or_else(|| {
            Error::InvalidFormat(format!(
                "{} page {index} has an unsupported sample format",
                self.path.display()
            ))
        })?;

        Ok(Frame {
            shape: FrameShape::new(height as usize, width as usize),
            sample_type,
            bytes,
        })
    }

    fn seek(&mut self, index: usize) -> Result<()> {
        if index < self.current {
            self.decoder = open_decoder(&self.path)?;
            self.current = 0;
        }
        while self.current < index {
            if !self.decoder.more_images() {
                return Err(Error::DecodeFailure {
                    path: self.path.clone(),
                    frame: index,
                    message: format!("file has only {} page(s)", self.current + 1),
                });
            }
            self.decoder
                .next_image()
                .map_err(|e| self.decode_error(self.current + 1, &e))?;
            self.current += 1;
        }
        Ok(())
    }

    fn decode_error(&self, frame: usize, err: &tiff::TiffError) -> Error {
        Error::DecodeFailure {
            path: self.path.clone(),
            frame,
            message: err.to_string(),
        }
    }
}

fn open_decoder(path: &Path) -> Result<Decoder<BufReader<File>>> {
    let file = File::open(path)?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| Error::DecodeFailure {
        path: path.to_path_buf(),
        frame: 0,
        message: e.to_string(),
    })?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn sample_bytes(image: DecodingResult) -> Option<(SampleType, Vec<u8>)> {
    let converted = match image {
        DecodingResult::U8(buf) => (SampleType::U8, buf),
        DecodingResult::U16(buf) => (SampleType::U16, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::U32(buf) => (SampleType::U32, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::U64(buf) => (SampleType::U64, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::I8(buf) => (SampleType::I8, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::I16(buf) => (SampleType::I16, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::I32(buf) => (SampleType::I32, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::I64(buf) => (SampleType::I64, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::F32(buf) => (SampleType::F32, bytemuck::cast_slice(&buf).to_vec()),
        DecodingResult::F64(buf) => (SampleType::F64, bytemuck::cast_slice(&buf).to_vec()),
        #[allow(unreachable_patterns)]
        _ => return None,
    };
    Some(converted)
}
