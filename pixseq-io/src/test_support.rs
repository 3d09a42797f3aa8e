//! Synthetic TIFF fixtures for unit tests.

use crate::shm::{
    CancelFlag, ProgressMap, SharedBuffer, SharedBufferAllocator, SharedMemoryConfig,
};
use crate::writer::ImportJob;
use pixseq_core::{
    partition, AcquisitionMode, AlexFirstFrame, Channel, ChannelLayout, FrameShape, SampleType,
};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
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

/// A ready-to-run job over a synthetic `u16` stack, with the owning
/// shared regions kept alive alongside it.
pub struct JobFixture {
    pub job: ImportJob,
    pub buffers: BTreeMap<Channel, SharedBuffer>,
    pub progress: ProgressMap,
    pub cancel: CancelFlag,
}

/// Build one job per entry of `frames`, each over its own 3x8 stack.
pub fn job_fixtures(dir: &Path, mode: AcquisitionMode, frames: &[usize]) -> Vec<JobFixture> {
    let alloc =
        SharedBufferAllocator::new(SharedMemoryConfig::default().with_root(dir.join("shm")))
            .unwrap();
    let shared_progress = alloc.create_progress_map(frames.len()).unwrap();
    let cancel = alloc.create_cancel_flag().unwrap();
    let shape = FrameShape::new(3, 8);

    let fixtures = frames
        .iter()
        .enumerate()
        .map(|(index, &n)| {
            let path = dir.join(format!("stack{index}.tif"));
            write_stack(&path, n, shape.height, shape.width);
            let plan = partition(
                mode,
                ChannelLayout::DonorAcceptor,
                AlexFirstFrame::Donor,
                n,
                shape,
                None,
            )
            .unwrap();
            let buffers: BTreeMap<Channel, SharedBuffer> = plan
                .channels()
                .iter()
                .map(|&c| {
                    let buffer = alloc.allocate(plan.channel_shape(), SampleType::U16);
                    (c, buffer.unwrap())
                })
                .collect();
            let job = ImportJob {
                index,
                dataset: format!("stack{index}.tif"),
                path,
                plan,
                frame_shape: shape,
                sample_type: SampleType::U16,
                buffers: buffers
                    .iter()
                    .map(|(&c, b)| (c, b.handle().clone()))
                    .collect(),
                progress_map: shared_progress.path().to_path_buf(),
                cancel_flag: cancel.path().to_path_buf(),
            };
            (job, buffers)
        })
        .collect::<Vec<_>>();

    // Every fixture keeps its own view of the shared progress map; the
    // first one owns the region.
    let mut owner = Some(shared_progress);
    fixtures
        .into_iter()
        .map(|(job, buffers)| JobFixture {
            progress: owner
                .take()
                .unwrap_or_else(|| ProgressMap::attach(&job.progress_map).unwrap()),
            job,
            buffers,
            cancel: cancel.clone(),
        })
        .collect()
}

/// Native-endian `u16` contents of a buffer.
pub fn u16_values(buffer: &SharedBuffer) -> Vec<u16> {
    buffer
        .as_bytes()
        .unwrap()
        .chunks_exact(2)
        .map(|b| u16::from_ne_bytes([b[0], b[1]]))
        .collect()
}
