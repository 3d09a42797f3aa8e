//! Import entry point.

use crate::assemble::{assemble, PendingImport};
use crate::reader::TiffStackReader;
use crate::registry::DatasetRegistry;
use crate::scheduler::{JobScheduler, SchedulerConfig};
use crate::shm::{
    CancelFlag, ProgressMap, SharedBuffer, SharedBufferAllocator, SharedMemoryConfig,
};
use crate::writer::{ImportJob, JobOutcome};
use crate::{Error, Result};
use log::{info, warn};
use pixseq_core::{Channel, ImportConfig, ImportDescriptor};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Lexically normalise a source path.
///
/// `.` components are dropped and `..` removes the preceding component
/// where there is one. On Windows, UNC paths (`\\server\share\...`) are
/// rewritten to their verbatim form (`\\?\UNC\server\share\...`).
#[must_use]
pub fn normalize_import_path<P: AsRef<Path>>(path: P) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir | Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    verbatim_unc(out)
}

#[cfg(windows)]
fn verbatim_unc(path: PathBuf) -> PathBuf {
    let text = path.to_string_lossy();
    match text.strip_prefix(r"\\") {
        Some(rest) if !rest.starts_with(r"?\") && !rest.starts_with(r".\") => {
            PathBuf::from(format!(r"\\?\UNC\{rest}"))
        }
        _ => path,
    }
}

#[cfg(not(windows))]
fn verbatim_unc(path: PathBuf) -> PathBuf {
    path
}

/// Summary of one import run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportReport {
    /// One outcome per source file, in input order.
    pub outcomes: Vec<JobOutcome>,
    /// Datasets written to, in first-touched order.
    pub datasets: Vec<String>,
}

impl ImportReport {
    /// Returns true when every job completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(JobOutcome::is_completed)
    }

    pub fn failed(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }

    pub fn cancelled(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.is_cancelled())
    }

    /// Files whose plan selected no frames; nothing was registered for them.
    pub fn empty(&self) -> impl Iterator<Item = &JobOutcome> {
        self.outcomes.iter().filter(|o| o.frames_planned == 0)
    }

    /// Turn an incomplete run into an error.
    ///
    /// # Errors
    /// Returns [`Error::PartialImportFailure`] if any job failed or was
    /// cancelled. The registry still holds the partial channels.
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        Err(Error::PartialImportFailure {
            failed: self.failed().count(),
            cancelled: self.cancelled().count(),
        })
    }
}

/// Imports TIFF stacks into a [`DatasetRegistry`].
///
/// # Example
///
/// ```no_run
/// use pixseq_core::{AcquisitionMode, ImportConfig};
/// use pixseq_io::{DatasetRegistry, Importer, SchedulerConfig, SharedMemoryConfig};
///
/// let importer = Importer::new(
///     ImportConfig::new(AcquisitionMode::Fret),
///     SchedulerConfig::worker_processes()?,
///     SharedMemoryConfig::default(),
/// )?;
/// let mut registry = DatasetRegistry::new();
/// let report = importer.import(&["movie.tif"], &mut registry, |p| println!("{p}%"))?;
/// assert!(report.is_complete());
/// # Ok::<(), pixseq_io::Error>(())
/// ```
#[derive(Debug)]
pub struct Importer {
    config: ImportConfig,
    scheduler: JobScheduler,
    allocator: SharedBufferAllocator,
    cancel: CancelFlag,
}

impl Importer {
    /// Create an importer and its shared cancellation flag.
    ///
    /// # Errors
    /// Returns an error if the shared memory root cannot be used.
    pub fn new(
        config: ImportConfig,
        scheduler: SchedulerConfig,
        shared_memory: SharedMemoryConfig,
    ) -> Result<Self> {
        let allocator = SharedBufferAllocator::new(shared_memory)?;
        let cancel = allocator.create_cancel_flag()?;
        Ok(Self {
            config,
            scheduler: JobScheduler::new(scheduler),
            allocator,
            cancel,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    /// Handle to the run's cancellation flag; setting it makes running jobs
    /// stop before their next frame and queued jobs stop immediately.
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Probe every file and combine it with the configuration.
    ///
    /// # Errors
    /// Returns an error if a file cannot be inspected.
    pub fn describe<P: AsRef<Path>>(&self, paths: &[P]) -> Result<Vec<ImportDescriptor>> {
        paths
            .iter()
            .map(|path| {
                let path = normalize_import_path(path);
                let info = TiffStackReader::inspect(&path)?;
                Ok(ImportDescriptor::new(
                    path,
                    &self.config,
                    info.n_frames,
                    info.frame_shape,
                    info.sample_type,
                    info.file_size,
                ))
            })
            .collect()
    }

    /// Plan every file and allocate its shared buffers, without starting
    /// any job.
    ///
    /// Clears a cancellation left over from a previous run.
    ///
    /// # Errors
    /// Returns [`Error::UnknownDataset`] if the append target is missing,
    /// [`Error::ResourceExhausted`] if the run's buffers do not fit in the
    /// shared memory root, and any inspection, planning or allocation error.
    /// Nothing is dispatched in that case and every buffer allocated so far
    /// is unlinked.
    pub fn prepare<P: AsRef<Path>>(
        &self,
        paths: &[P],
        registry: &DatasetRegistry,
    ) -> Result<PreparedImport<'_>> {
        self.cancel.reset();
        if let Some(target) = &self.config.append_to_dataset {
            if !registry.contains(target) {
                return Err(Error::UnknownDataset(target.clone()));
            }
        }

        let descriptors = self.describe(paths)?;
        let plans = descriptors
            .iter()
            .map(ImportDescriptor::plan)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let total = descriptors
            .iter()
            .zip(&plans)
            .try_fold(0u64, |acc, (descriptor, plan)| {
                let per_channel = plan.channel_bytes(descriptor.sample_type);
                let bytes = per_channel.checked_mul(plan.channels().len())?;
                acc.checked_add(bytes as u64)
            })
            .ok_or_else(|| Error::ResourceExhausted {
                requested: u64::MAX,
                reason: "run size overflows".to_string(),
            })?;
        self.allocator.check_capacity(total)?;

        let progress = self.allocator.create_progress_map(descriptors.len())?;
        let mut jobs = Vec::with_capacity(descriptors.len());
        let mut pending = Vec::with_capacity(descriptors.len());

        for (index, (descriptor, plan)) in descriptors.into_iter().zip(plans).enumerate() {
            if plan.unpaired_frames() > 0 {
                warn!(
                    "{} has an odd number of ALEX frames; dropping {} trailing frame(s)",
                    descriptor.path.display(),
                    plan.unpaired_frames()
                );
            }
            if plan.is_empty() {
                warn!(
                    "{} selects no frames in {} mode; nothing will be imported from it",
                    descriptor.path.display(),
                    descriptor.mode
                );
            }

            let buffers = plan
                .channels()
                .iter()
                .map(|&channel| {
                    let buffer = self
                        .allocator
                        .allocate(plan.channel_shape(), descriptor.sample_type)?;
                    Ok((channel, buffer))
                })
                .collect::<Result<BTreeMap<Channel, SharedBuffer>>>()?;

            jobs.push(ImportJob {
                index,
                dataset: descriptor.dataset.clone(),
                path: descriptor.path.clone(),
                plan: plan.clone(),
                frame_shape: descriptor.frame_shape,
                sample_type: descriptor.sample_type,
                buffers: buffers
                    .iter()
                    .map(|(&channel, buffer)| (channel, buffer.handle().clone()))
                    .collect(),
                progress_map: progress.path().to_path_buf(),
                cancel_flag: self.cancel.path().to_path_buf(),
            });
            pending.push(PendingImport {
                index,
                descriptor,
                plan,
                buffers,
            });
        }

        info!("prepared {} import job(s)", jobs.len());
        Ok(PreparedImport {
            scheduler: &self.scheduler,
            jobs,
            pending,
            progress,
        })
    }

    /// Import `paths` into `registry`, reporting overall progress (0-100).
    ///
    /// Jobs that fail or are cancelled do not fail the run; check the
    /// report, or call [`ImportReport::into_result`].
    ///
    /// # Errors
    /// Returns an error if preparation fails.
    pub fn import<P, F>(
        &self,
        paths: &[P],
        registry: &mut DatasetRegistry,
        on_progress: F,
    ) -> Result<ImportReport>
    where
        P: AsRef<Path>,
        F: FnMut(u8),
    {
        let prepared = self.prepare(paths, registry)?;
        Ok(prepared.execute(registry, on_progress))
    }
}

/// Planned jobs with their buffers allocated, ready to run.
#[derive(Debug)]
pub struct PreparedImport<'a> {
    scheduler: &'a JobScheduler,
    jobs: Vec<ImportJob>,
    pending: Vec<PendingImport>,
    progress: ProgressMap,
}

impl PreparedImport<'_> {
    /// The jobs that will be dispatched, in index order.
    #[must_use]
    pub fn jobs(&self) -> &[ImportJob] {
        &self.jobs
    }

    /// Descriptors of the files being imported.
    pub fn descriptors(&self) -> impl Iterator<Item = &ImportDescriptor> {
        self.pending.iter().map(|p| &p.descriptor)
    }

    /// Run every job, then assemble the results into `registry`.
    ///
    /// Per-job failures, including buffers that cannot be read back, end up
    /// in the report's outcomes.
    pub fn execute<F: FnMut(u8)>(
        self,
        registry: &mut DatasetRegistry,
        on_progress: F,
    ) -> ImportReport {
        let mut outcomes = self.scheduler.run(self.jobs, &self.progress, on_progress);
        let datasets = assemble(registry, self.pending, &mut outcomes);
        let report = ImportReport { outcomes, datasets };
        info!(
            "imported {} file(s) into {} dataset(s): {} failed, {} cancelled",
            report.outcomes.len(),
            report.datasets.len(),
            report.failed().count(),
            report.cancelled().count()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Backend;
    use crate::test_support::write_stack;
    use pixseq_core::{AcquisitionMode, FrameShape};
    use tempfile::tempdir;

    fn importer(dir: &Path, config: ImportConfig) -> Importer {
        Importer::new(
            config,
            SchedulerConfig::new(Backend::InProcess).with_workers(1),
            SharedMemoryConfig::default().with_root(dir.join("shm")),
        )
        .unwrap()
    }

    #[test]
    fn normalizes_dot_components() {
        assert_eq!(
            normalize_import_path("/data/./run/../movie.tif"),
            PathBuf::from("/data/movie.tif")
        );
        assert_eq!(
            normalize_import_path("../a/./b.tif"),
            PathBuf::from("../a/b.tif")
        );
        assert_eq!(normalize_import_path("/.."), PathBuf::from("/"));
        assert_eq!(normalize_import_path("a/.."), PathBuf::from("."));
    }

    #[cfg(windows)]
    #[test]
    fn unc_paths_become_verbatim() {
        assert_eq!(
            normalize_import_path(r"\\server\share\movie.tif"),
            PathBuf::from(r"\\?\UNC\server\share\movie.tif")
        );
    }

    #[test]
    fn describe_inspects_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_stack(&path, 4, 2, 6);

        let importer = importer(dir.path(), ImportConfig::new(AcquisitionMode::Fret));
        let descriptors = importer.describe(&[&path]).unwrap();
        assert_eq!(descriptors[0].n_frames, 4);
        assert_eq!(descriptors[0].frame_shape, FrameShape::new(2, 6));
        assert_eq!(descriptors[0].dataset, "a.tif");
    }

    #[test]
    fn append_to_unknown_dataset_is_rejected_before_allocation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.tif");
        write_stack(&path, 2, 2, 4);

        let config =
            ImportConfig::new(AcquisitionMode::Fret).with_append_to_dataset("missing");
        let importer = importer(dir.path(), config);
        let err = importer
            .prepare(&[&path], &DatasetRegistry::new())
            .unwrap_err();
        let Error::UnknownDataset(name) = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(name, "missing");
    }

    #[test]
    fn odd_width_fret_fails_before_dispatch() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odd.tif");
        write_stack(&path, 2, 2, 5);

        let importer = importer(dir.path(), ImportConfig::new(AcquisitionMode::Fret));
        let err = importer
            .prepare(&[&path], &DatasetRegistry::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::CoreError(pixseq_core::Error::MalformedFrameShape { width: 5, .. })
        ));
    }

    #[test]
    fn single_frame_alex_file_registers_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("one.tif");
        write_stack(&path, 1, 2, 4);

        let importer = importer(dir.path(), ImportConfig::new(AcquisitionMode::Alex));
        let mut registry = DatasetRegistry::new();
        let report = importer.import(&[&path], &mut registry, |_| {}).unwrap();

        assert_eq!(report.empty().count(), 1);
        assert!(report.datasets.is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn report_into_result_counts_incomplete_jobs() {
        let outcome = |index, status| JobOutcome {
            index,
            dataset: "d".to_string(),
            path: PathBuf::from("d.tif"),
            status,
            frames_written: 0,
            frames_planned: 1,
        };
        let report = ImportReport {
            outcomes: vec![
                outcome(0, crate::JobStatus::Completed),
                outcome(1, crate::JobStatus::Cancelled),
                outcome(
                    2,
                    crate::JobStatus::Failed {
                        error: "boom".to_string(),
                    },
                ),
            ],
            datasets: vec!["d".to_string()],
        };
        assert!(!report.is_complete());
        let err = report.into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::PartialImportFailure {
                failed: 1,
                cancelled: 1
            }
        ));
    }
}
