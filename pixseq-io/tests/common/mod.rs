//! Synthetic TIFF stacks with known pixel values.

#![allow(dead_code)]

use std::fs::File;
use std::path::Path;
use std::time::Duration;

use pixseq_core::ImportConfig;
use pixseq_io::{Backend, Importer, SchedulerConfig, SharedMemoryConfig};
use tiff::encoder::{colortype, TiffEncoder};

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

/// Write `frames` pages of `u8` pixels, all equal to `frame + 1`.
pub fn write_stack_u8(path: &Path, frames: usize, height: usize, width: usize) {
    let mut encoder = TiffEncoder::new(File::create(path).unwrap()).unwrap();
    for frame in 0..frames {
        let data = vec![u8::try_from(frame + 1).unwrap(); height * width];
        encoder
            .write_image::<colortype::Gray8>(
                u32::try_from(width).unwrap(),
                u32::try_from(height).unwrap(),
                &data,
            )
            .unwrap();
    }
}

/// In-process importer with its shared memory under `root`.
pub fn importer(root: &Path, config: ImportConfig) -> Importer {
    Importer::new(
        config,
        SchedulerConfig::new(Backend::InProcess)
            .with_workers(2)
            .with_poll_interval(Duration::from_millis(5)),
        SharedMemoryConfig::default().with_root(root),
    )
    .unwrap()
}
