//! Named shared memory regions.
//!
//! Regions are files under a shared-memory root (`/dev/shm` on Linux)
//! mapped with `memmap2`. Any process that knows a region's path can map
//! the same pages, so worker processes write decoded frames directly into
//! memory the orchestrator later reads, without copying arrays through
//! pipes.
//!
//! # Ownership
//!
//! The allocator hands out owning [`SharedBuffer`]s. Workers [`attach`]
//! non-owning views by path. Only the owner unlinks the file, either through
//! [`SharedBuffer::release`] or, as a fallback, when dropped.
//!
//! [`attach`]: SharedBuffer::attach

use crate::{Error, Result};
use log::{debug, warn};
use memmap2::{MmapMut, MmapOptions};
use pixseq_core::SampleType;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use sysinfo::{Disk, Disks, System};

/// Environment variable overriding the shared memory root directory.
pub const SHM_DIR_ENV: &str = "PIXSEQ_SHM_DIR";

/// Configuration for shared memory allocation.
#[derive(Clone, Debug)]
pub struct SharedMemoryConfig {
    /// Directory holding the named regions.
    pub root: PathBuf,
    /// Refuse allocations larger than the currently available system memory
    /// or the free space of the filesystem holding `root`.
    pub check_available_memory: bool,
}

impl Default for SharedMemoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            check_available_memory: true,
        }
    }
}

impl SharedMemoryConfig {
    /// Set the directory holding the named regions.
    #[must_use]
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Enable or disable the available-memory and free-space checks.
    #[must_use]
    pub fn with_memory_check(mut self, enabled: bool) -> Self {
        self.check_available_memory = enabled;
        self
    }
}

fn default_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(SHM_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let dev_shm = Path::new("/dev/shm");
    if dev_shm.is_dir() {
        dev_shm.to_path_buf()
    } else {
        std::env::temp_dir()
    }
}

/// Serializable description of one channel's shared output array.
///
/// This is what crosses the process boundary; workers turn it back into a
/// mapping with [`SharedBuffer::attach`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelBuffer {
    pub name: String,
    pub path: PathBuf,
    /// `[frames, height, width]`.
    pub shape: [usize; 3],
    pub sample_type: SampleType,
}

impl ChannelBuffer {
    /// Size of the region in bytes: product of the shape times the item size.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.shape.iter().product::<usize>() * self.sample_type.itemsize()
    }
}

/// A mapped shared memory region.
#[derive(Debug)]
pub struct SharedBuffer {
    handle: ChannelBuffer,
    mmap: Option<MmapMut>,
    owner: bool,
    released: bool,
}

impl SharedBuffer {
    /// Map an existing region created by another handle or process.
    ///
    /// The returned view does not own the region: dropping or releasing it
    /// unmaps it but leaves the file in place.
    ///
    /// # Errors
    /// Returns an error if the region is missing, shorter than its
    /// description, or cannot be mapped.
    pub fn attach(handle: &ChannelBuffer) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&handle.path)?;
        let len = handle.byte_len();
        let actual = file.metadata()?.len();
        if actual < len as u64 {
            return Err(Error::InvalidFormat(format!(
                "shared buffer {} is {actual} bytes, expected {len}",
                handle.name
            )));
        }
        Ok(Self {
            handle: handle.clone(),
            mmap: map_file(&file, len)?,
            owner: false,
            released: false,
        })
    }

    /// Returns the serializable description of this region.
    #[must_use]
    pub fn handle(&self) -> &ChannelBuffer {
        &self.handle
    }

    /// Returns true once [`Self::release`] has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Returns the region contents.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyReleased`] after the buffer was released.
    pub fn as_bytes(&self) -> Result<&[u8]> {
        if self.released {
            return Err(Error::AlreadyReleased(self.handle.name.clone()));
        }
        Ok(self.mmap.as_deref().unwrap_or_default())
    }

    /// Returns the region contents for writing.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyReleased`] after the buffer was released.
    pub fn as_bytes_mut(&mut self) -> Result<&mut [u8]> {
        if self.released {
            return Err(Error::AlreadyReleased(self.handle.name.clone()));
        }
        Ok(self.mmap.as_deref_mut().unwrap_or_default())
    }

    /// Unmap the region and, for the owning handle, unlink it.
    ///
    /// # Errors
    /// Returns [`Error::AlreadyReleased`] on a second call, leaving all
    /// other state untouched, or an I/O error if the file cannot be removed.
    pub fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(Error::AlreadyReleased(self.handle.name.clone()));
        }
        self.released = true;
        self.mmap = None;
        if self.owner {
            remove_region(&self.handle.path)?;
            debug!("released shared buffer {}", self.handle.name);
        }
        Ok(())
    }
}

impl Drop for SharedBuffer {
    fn drop(&mut self) {
        if self.owner && !self.released {
            self.mmap = None;
            if let Err(err) = remove_region(&self.handle.path) {
                warn!("failed to unlink shared buffer {}: {err}", self.handle.name);
            } else {
                debug!("unlinked unreleased shared buffer {}", self.handle.name);
            }
        }
    }
}

fn remove_region(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Write `len` zero bytes.
fn zero_fill<W: Write>(mut out: W, len: usize) -> std::io::Result<()> {
    const CHUNK: usize = 1 << 20;
    let zeros = vec![0u8; CHUNK.min(len)];
    let mut remaining = len;
    while remaining > 0 {
        let n = remaining.min(CHUNK);
        out.write_all(&zeros[..n])?;
        remaining -= n;
    }
    out.flush()
}

/// Back every byte of a fresh region at `path` before it is mapped.
///
/// tmpfs allocates pages on first write, and a mapped page it cannot back
/// raises `SIGBUS` instead of an error. Writing through the file turns a
/// full filesystem into `ENOSPC` here. On failure the region is unlinked.
fn reserve_region<W: Write>(out: W, path: &Path, len: usize) -> Result<()> {
    zero_fill(out, len).map_err(|err| {
        let _ = std::fs::remove_file(path);
        Error::ResourceExhausted {
            requested: len as u64,
            reason: format!("cannot reserve {}: {err}", path.display()),
        }
    })
}

/// Free space of the filesystem holding `root`, if it can be determined.
fn free_space(root: &Path) -> Option<u64> {
    let root = root.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| root.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(Disk::available_space)
}

fn map_file(file: &File, len: usize) -> Result<Option<MmapMut>> {
    if len == 0 {
        return Ok(None);
    }
    // SAFETY: The region is a private file under the shared memory root that
    // is never truncated while mapped. Concurrent writers touch disjoint
    // frames and the reader only maps it after all writers have finished.
    #[allow(unsafe_code)]
    let mmap = unsafe { MmapOptions::new().len(len).map_mut(file) }
        .map_err(|e| Error::MmapError(e.to_string()))?;
    Ok(Some(mmap))
}

/// Allocates named shared regions for one import run.
#[derive(Debug)]
pub struct SharedBufferAllocator {
    config: SharedMemoryConfig,
    prefix: String,
    next: AtomicUsize,
}

impl SharedBufferAllocator {
    /// Create an allocator rooted at `config.root`, creating the directory
    /// if needed.
    ///
    /// # Errors
    /// Returns an error if the root directory cannot be created.
    pub fn new(config: SharedMemoryConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Ok(Self {
            config,
            prefix: format!("pixseq-{}-{nanos:x}", std::process::id()),
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the shared memory root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Allocate a zero-filled region sized exactly for a `shape` array of
    /// `sample_type`.
    ///
    /// # Errors
    /// Returns [`Error::ResourceExhausted`] if the size overflows, exceeds
    /// available memory, or the region cannot be backed in full.
    pub fn allocate(&self, shape: [usize; 3], sample_type: SampleType) -> Result<SharedBuffer> {
        let requested = shape
            .iter()
            .try_fold(sample_type.itemsize(), |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| Error::ResourceExhausted {
                requested: u64::MAX,
                reason: format!("shape {shape:?} overflows the address space"),
            })?;
        self.check_available(requested as u64)?;

        let name = self.next_name("buf");
        let path = self.config.root.join(&name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        reserve_region(&file, &path, requested)?;
        let mmap = match map_file(&file, requested) {
            Ok(mmap) => mmap,
            Err(err) => {
                let _ = std::fs::remove_file(&path);
                return Err(err);
            }
        };
        debug!("allocated shared buffer {name} ({requested} bytes)");

        Ok(SharedBuffer {
            handle: ChannelBuffer {
                name,
                path,
                shape,
                sample_type,
            },
            mmap,
            owner: true,
            released: false,
        })
    }

    /// Create a progress map with one zeroed slot per job.
    ///
    /// # Errors
    /// Returns an error if the region cannot be created.
    pub fn create_progress_map(&self, jobs: usize) -> Result<ProgressMap> {
        let path = self.config.root.join(self.next_name("progress"));
        Ok(ProgressMap {
            slots: AtomicSlots::create(path, jobs)?,
        })
    }

    /// Create a cleared cancellation flag.
    ///
    /// # Errors
    /// Returns an error if the region cannot be created.
    pub fn create_cancel_flag(&self) -> Result<CancelFlag> {
        let path = self.config.root.join(self.next_name("cancel"));
        Ok(CancelFlag {
            slots: Arc::new(AtomicSlots::create(path, 1)?),
        })
    }

    fn next_name(&self, kind: &str) -> String {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{kind}-{seq}", self.prefix)
    }

    /// Check that a run needing `requested` bytes of shared buffers fits in
    /// available memory and in the free space under the root.
    ///
    /// Filesystems that cannot be identified are not checked; every
    /// allocation still reserves its pages and fails cleanly when they run
    /// out.
    ///
    /// # Errors
    /// Returns [`Error::ResourceExhausted`] when either limit is exceeded.
    pub fn check_capacity(&self, requested: u64) -> Result<()> {
        self.check_available(requested)?;
        if !self.config.check_available_memory || requested == 0 {
            return Ok(());
        }
        match free_space(&self.config.root) {
            Some(free) if requested > free => Err(Error::ResourceExhausted {
                requested,
                reason: format!(
                    "only {free} bytes free under {}",
                    self.config.root.display()
                ),
            }),
            _ => Ok(()),
        }
    }

    fn check_available(&self, requested: u64) -> Result<()> {
        if !self.config.check_available_memory || requested == 0 {
            return Ok(());
        }
        let mut system = System::new();
        system.refresh_memory();
        let available = system.available_memory();
        if available != 0 && requested > available {
            return Err(Error::ResourceExhausted {
                requested,
                reason: format!("only {available} bytes of memory available"),
            });
        }
        Ok(())
    }
}

/// A shared array of `AtomicU32` slots.
#[derive(Debug)]
struct AtomicSlots {
    path: PathBuf,
    mmap: MmapMut,
    len: usize,
    owner: bool,
}

impl AtomicSlots {
    fn create(path: PathBuf, len: usize) -> Result<Self> {
        let bytes = len.max(1) * size_of::<AtomicU32>();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;
        reserve_region(&file, &path, bytes)?;
        let mmap = map_file(&file, bytes)?
            .ok_or_else(|| Error::MmapError("empty slot region".to_string()))?;
        Ok(Self {
            path,
            mmap,
            len,
            owner: true,
        })
    }

    fn attach(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let bytes = usize::try_from(file.metadata()?.len())
            .map_err(|e| Error::InvalidFormat(e.to_string()))?;
        let len = bytes / size_of::<AtomicU32>();
        let mmap = map_file(&file, len * size_of::<AtomicU32>())?.ok_or_else(|| {
            Error::InvalidFormat(format!("{} holds no slots", path.display()))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
            len,
            owner: false,
        })
    }

    #[allow(unsafe_code)]
    fn slots(&self) -> &[AtomicU32] {
        // SAFETY: The mapping is page aligned and at least `len * 4` bytes
        // long, `AtomicU32` has the layout of `u32` and every bit pattern is
        // valid. All access, in this and other processes, goes through
        // atomic operations, and the slice borrows `self`, which keeps the
        // mapping alive.
        unsafe { std::slice::from_raw_parts(self.mmap.as_ptr().cast::<AtomicU32>(), self.len) }
    }
}

impl Drop for AtomicSlots {
    fn drop(&mut self) {
        if self.owner {
            if let Err(err) = remove_region(&self.path) {
                warn!("failed to unlink {}: {err}", self.path.display());
            }
        }
    }
}

/// Per-job completion percentages shared between the scheduler and the
/// workers.
#[derive(Debug)]
pub struct ProgressMap {
    slots: AtomicSlots,
}

impl ProgressMap {
    /// Map a progress map created by the orchestrating process.
    ///
    /// # Errors
    /// Returns an error if the region cannot be opened or mapped.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            slots: AtomicSlots::attach(path.as_ref())?,
        })
    }

    /// Path of the backing region.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.slots.path
    }

    /// Number of job slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len
    }

    /// Returns true when the map has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.len == 0
    }

    /// Record progress for job `index`. Values never decrease and are
    /// clamped to 100; out-of-range indices are ignored.
    pub fn set(&self, index: usize, percent: u32) {
        if let Some(slot) = self.slots.slots().get(index) {
            slot.fetch_max(percent.min(100), Ordering::AcqRel);
        }
    }

    /// Progress of job `index`, 0 for unknown indices.
    #[must_use]
    pub fn get(&self, index: usize) -> u32 {
        self.slots
            .slots()
            .get(index)
            .map_or(0, |slot| slot.load(Ordering::Acquire))
    }

    /// Mean progress over all jobs, as a percentage.
    #[must_use]
    pub fn overall(&self) -> u8 {
        let slots = self.slots.slots();
        if slots.is_empty() {
            return 100;
        }
        let total: u64 = slots
            .iter()
            .map(|slot| u64::from(slot.load(Ordering::Acquire)))
            .sum();
        u8::try_from(total / slots.len() as u64).unwrap_or(100)
    }
}

/// A cancellation flag visible to every process that maps it.
///
/// Cancellation is cooperative: workers poll the flag once per source frame
/// and a frame already being written is finished.
#[derive(Clone, Debug)]
pub struct CancelFlag {
    slots: Arc<AtomicSlots>,
}

impl CancelFlag {
    /// Map a flag created by the orchestrating process.
    ///
    /// # Errors
    /// Returns an error if the region cannot be opened or mapped.
    pub fn attach<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            slots: Arc::new(AtomicSlots::attach(path.as_ref())?),
        })
    }

    /// Path of the backing region.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.slots.path
    }

    /// Request cancellation of all running and queued jobs.
    pub fn cancel(&self) {
        if let Some(slot) = self.slots.slots().first() {
            slot.store(1, Ordering::Release);
        }
    }

    /// Clear a previous cancellation request.
    pub fn reset(&self) {
        if let Some(slot) = self.slots.slots().first() {
            slot.store(0, Ordering::Release);
        }
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.slots
            .slots()
            .first()
            .is_some_and(|slot| slot.load(Ordering::Acquire) != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn allocator(root: &Path) -> SharedBufferAllocator {
        SharedBufferAllocator::new(SharedMemoryConfig::default().with_root(root)).unwrap()
    }

    #[test]
    fn allocation_is_sized_exactly_and_zeroed() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let buffer = alloc.allocate([3, 4, 5], SampleType::U16).unwrap();

        assert_eq!(buffer.handle().byte_len(), 120);
        let bytes = buffer.as_bytes().unwrap();
        assert_eq!(bytes.len(), 120);
        assert!(bytes.iter().all(|&b| b == 0));
        assert_eq!(std::fs::metadata(&buffer.handle().path).unwrap().len(), 120);
    }

    #[test]
    fn attached_view_sees_owner_writes() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let owner = alloc.allocate([1, 2, 2], SampleType::U8).unwrap();

        let mut view = SharedBuffer::attach(owner.handle()).unwrap();
        view.as_bytes_mut().unwrap().copy_from_slice(&[1, 2, 3, 4]);
        drop(view);

        assert_eq!(owner.as_bytes().unwrap(), &[1, 2, 3, 4]);
        assert!(owner.handle().path.exists());
    }

    #[test]
    fn second_release_fails_cleanly() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let mut first = alloc.allocate([1, 1, 4], SampleType::U8).unwrap();
        let mut second = alloc.allocate([1, 1, 4], SampleType::U8).unwrap();
        second
            .as_bytes_mut()
            .unwrap()
            .copy_from_slice(&[9, 9, 9, 9]);

        first.release().unwrap();
        assert!(!first.handle().path.exists());
        let err = first.release().unwrap_err();
        assert!(matches!(err, Error::AlreadyReleased(_)));
        assert!(first.as_bytes().is_err());

        assert_eq!(second.as_bytes().unwrap(), &[9, 9, 9, 9]);
    }

    #[test]
    fn drop_unlinks_unreleased_owner() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let buffer = alloc.allocate([2, 2, 2], SampleType::F32).unwrap();
        let path = buffer.handle().path.clone();
        assert!(path.exists());
        drop(buffer);
        assert!(!path.exists());
    }

    #[test]
    fn zero_sized_buffers_are_allowed() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let mut buffer = alloc.allocate([0, 4, 4], SampleType::U16).unwrap();
        assert!(buffer.as_bytes().unwrap().is_empty());
        let view = SharedBuffer::attach(buffer.handle()).unwrap();
        assert!(view.as_bytes().unwrap().is_empty());
        buffer.release().unwrap();
    }

    #[test]
    fn oversized_allocation_is_resource_exhausted() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let err = alloc
            .allocate([usize::MAX / 2, 4, 4], SampleType::U16)
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { .. }));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn zero_fill_writes_every_byte() {
        let mut out = Vec::new();
        zero_fill(&mut out, (1 << 20) + 3).unwrap();
        assert_eq!(out.len(), (1 << 20) + 3);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn full_filesystem_is_resource_exhausted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("region");
        File::create(&path).unwrap();
        // Every write to /dev/full fails with ENOSPC, like a full tmpfs.
        let full = OpenOptions::new().write(true).open("/dev/full").unwrap();

        let err = reserve_region(&full, &path, 8192).unwrap_err();
        match err {
            Error::ResourceExhausted { requested, reason } => {
                assert_eq!(requested, 8192);
                assert!(reason.contains("cannot reserve"), "{reason}");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!path.exists());
    }

    #[test]
    fn run_capacity_is_checked_against_memory_and_root() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        alloc.check_capacity(0).unwrap();
        alloc.check_capacity(4096).unwrap();
        let err = alloc.check_capacity(u64::MAX).unwrap_err();
        match err {
            Error::ResourceExhausted { requested, .. } => assert_eq!(requested, u64::MAX),
            other => panic!("unexpected error: {other}"),
        }

        let unchecked = SharedBufferAllocator::new(
            SharedMemoryConfig::default()
                .with_root(dir.path())
                .with_memory_check(false),
        )
        .unwrap();
        unchecked.check_capacity(u64::MAX).unwrap();
    }

    #[test]
    fn progress_map_is_monotonic_per_slot() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let map = alloc.create_progress_map(2).unwrap();
        let worker_view = ProgressMap::attach(map.path()).unwrap();

        worker_view.set(0, 50);
        worker_view.set(0, 30);
        worker_view.set(1, 250);
        worker_view.set(7, 10);

        assert_eq!(map.get(0), 50);
        assert_eq!(map.get(1), 100);
        assert_eq!(map.overall(), 75);
    }

    #[test]
    fn cancel_flag_crosses_mappings() {
        let dir = tempdir().unwrap();
        let alloc = allocator(dir.path());
        let flag = alloc.create_cancel_flag().unwrap();
        let remote = CancelFlag::attach(flag.path()).unwrap();

        assert!(!remote.is_cancelled());
        flag.cancel();
        assert!(remote.is_cancelled());
        remote.reset();
        assert!(!flag.is_cancelled());
    }
}
