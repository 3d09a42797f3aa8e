//! Synthetic TIFF stacks with known pixel values.

#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use tiff::encoder::{colortype, TiffEncoder};

/// Path of the built `pixseq` binary.
pub fn pixseq_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_pixseq"))
}

/// Value of pixel (`y`, `x`) on page `frame`.
pub fn pixel(frame: usize, y: usize, x: usize) -> u16 {
    u16::try_from(frame * 1000 + y * 50 + x).unwrap()
}

/// Write `frames` pages of `height` x `width` `u16` pixels.
pub fn write_stack(path: &Path, frames: usize, height: usize, width: usize) {
    let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
    for frame in 0..frames {
        let data: Vec<u16> = (0..height)
            .flat_map(|y| (0..width).map(move |x| pixel(frame, y, x)))
            .collect();
        encoder
            .write_image::<colortype::Gray16>(
                u32::try_from(width).unwrap(),
                u32::try_from(height).unwrap(),
                &data,
            )
            .unwrap();
    }
}
