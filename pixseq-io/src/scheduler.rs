//! Job scheduling over a bounded worker pool.
//!
//! Every job is queued up front. At most `effective_workers()` jobs run at
//! once, either as `pixseq worker` child processes or on a rayon pool. The
//! calling thread only polls: it samples the shared progress map at a fixed
//! interval, reports the mean percentage, and sleeps in between.

use crate::shm::ProgressMap;
use crate::writer::{run_job, ImportJob, JobOutcome};
use crate::{Error, Result};
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, VecDeque};
use std::io::Write;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

/// Where jobs execute.
///
/// `InProcess` shares the caller's address space: a job that crashes or
/// faults on a shared region takes the caller down with it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Spawn `program args...` once per job; the child reads the job as JSON
    /// on stdin and prints its outcome as JSON on stdout.
    Process { program: PathBuf, args: Vec<String> },
    /// Run jobs on a dedicated rayon thread pool inside this process.
    InProcess,
}

impl Backend {
    /// Worker processes running the `worker` subcommand of the current
    /// executable.
    ///
    /// # Errors
    /// Returns an error if the current executable cannot be located.
    pub fn current_exe_worker() -> Result<Self> {
        Ok(Self::Process {
            program: std::env::current_exe()?,
            args: vec!["worker".to_string()],
        })
    }
}

/// Configuration for the [`JobScheduler`].
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Share of the logical cores to use when `workers` is unset.
    pub worker_fraction: f64,
    /// Explicit worker count, overriding `worker_fraction`.
    pub workers: Option<usize>,
    /// How often progress is sampled.
    pub poll_interval: Duration,
    pub backend: Backend,
}

impl SchedulerConfig {
    /// Scheduler on `backend` using 75% of the logical cores and polling
    /// every 100 ms.
    #[must_use]
    pub fn new(backend: Backend) -> Self {
        Self {
            worker_fraction: 0.75,
            workers: None,
            poll_interval: Duration::from_millis(100),
            backend,
        }
    }

    /// Scheduler spawning the `worker` subcommand of the current executable.
    ///
    /// # Errors
    /// Returns an error if the current executable cannot be located.
    pub fn worker_processes() -> Result<Self> {
        Ok(Self::new(Backend::current_exe_worker()?))
    }

    /// Set the share of logical cores, clamped to `0.0..=1.0`.
    #[must_use]
    pub fn with_worker_fraction(mut self, fraction: f64) -> Self {
        self.worker_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.75
        };
        self
    }

    /// Set an explicit worker count (minimum 1).
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Set the progress poll interval (minimum 1 ms).
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Set the share of logical cores.
    ///
    /// # Errors
    /// Returns an error unless `fraction` is in `(0.0, 1.0]`.
    pub fn try_with_worker_fraction(mut self, fraction: f64) -> Result<Self> {
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(invalid(format!(
                "worker fraction must be in (0, 1], got {fraction}"
            )));
        }
        self.worker_fraction = fraction;
        Ok(self)
    }

    /// Set an explicit worker count.
    ///
    /// # Errors
    /// Returns an error if `workers` is 0.
    pub fn try_with_workers(mut self, workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(invalid("worker count must be at least 1".to_string()));
        }
        self.workers = Some(workers);
        Ok(self)
    }

    /// Number of jobs allowed to run at once.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn effective_workers(&self) -> usize {
        if let Some(workers) = self.workers {
            return workers.max(1);
        }
        let cores = thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        ((cores as f64 * self.worker_fraction).floor() as usize).max(1)
    }
}

fn invalid(message: String) -> Error {
    pixseq_core::Error::InvalidConfig(message).into()
}

/// Runs import jobs and reports aggregate progress.
#[derive(Clone, Debug)]
pub struct JobScheduler {
    config: SchedulerConfig,
}

impl JobScheduler {
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every job and block until all have finished.
    ///
    /// `on_progress` receives the mean job percentage whenever it changes.
    /// A failing job never stops its siblings; its failure is logged and
    /// returned in its outcome. Outcomes are returned in job index order.
    pub fn run<F>(
        &self,
        jobs: Vec<ImportJob>,
        progress: &ProgressMap,
        on_progress: F,
    ) -> Vec<JobOutcome>
    where
        F: FnMut(u8),
    {
        let mut reporter = Reporter::new(on_progress);
        if jobs.is_empty() {
            reporter.report(100);
            return Vec::new();
        }

        let workers = self.config.effective_workers().min(jobs.len());
        info!(
            "running {} import job(s) on {workers} worker(s)",
            jobs.len()
        );

        let mut outcomes = match &self.config.backend {
            Backend::Process { program, args } => {
                self.run_processes(program, args, jobs, workers, progress, &mut reporter)
            }
            Backend::InProcess => self.run_threads(jobs, workers, progress, &mut reporter),
        };
        reporter.report(progress.overall());

        outcomes.sort_by_key(|outcome| outcome.index);
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        if failed > 0 {
            warn!("{failed} of {} import job(s) failed", outcomes.len());
        }
        outcomes
    }

    fn run_processes<F: FnMut(u8)>(
        &self,
        program: &Path,
        args: &[String],
        jobs: Vec<ImportJob>,
        workers: usize,
        progress: &ProgressMap,
        reporter: &mut Reporter<F>,
    ) -> Vec<JobOutcome> {
        let mut queue: VecDeque<ImportJob> = jobs.into();
        let mut running: Vec<(Child, ImportJob)> = Vec::with_capacity(workers);
        let mut outcomes = Vec::with_capacity(queue.len());

        while !queue.is_empty() || !running.is_empty() {
            while running.len() < workers {
                let Some(job) = queue.pop_front() else {
                    break;
                };
                match spawn_worker(program, args, &job) {
                    Ok(child) => {
                        debug!("job {} started in process {}", job.index, child.id());
                        running.push((child, job));
                    }
                    Err(err) => {
                        error!("job {} could not be started: {err}", job.index);
                        outcomes.push(JobOutcome::failed(&job, err.to_string()));
                    }
                }
            }

            let mut i = 0;
            while i < running.len() {
                match running[i].0.try_wait() {
                    Ok(None) => i += 1,
                    Ok(Some(_)) => {
                        let (child, job) = running.swap_remove(i);
                        outcomes.push(collect_worker(child, &job));
                    }
                    Err(err) => {
                        let (mut child, job) = running.swap_remove(i);
                        let _ = child.kill();
                        let _ = child.wait();
                        error!("lost track of job {}: {err}", job.index);
                        outcomes.push(JobOutcome::failed(&job, err.to_string()));
                    }
                }
            }

            reporter.report(progress.overall());
            if !running.is_empty() {
                thread::sleep(self.config.poll_interval);
            }
        }
        outcomes
    }

    fn run_threads<F: FnMut(u8)>(
        &self,
        jobs: Vec<ImportJob>,
        workers: usize,
        progress: &ProgressMap,
        reporter: &mut Reporter<F>,
    ) -> Vec<JobOutcome> {
        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pixseq-worker-{i}"))
            .build()
        {
            Ok(pool) => pool,
            Err(err) => {
                error!("failed to build worker pool: {err}");
                let reason = format!("worker pool unavailable: {err}");
                return jobs
                    .iter()
                    .map(|job| JobOutcome::failed(job, reason.as_str()))
                    .collect();
            }
        };

        let total = jobs.len();
        let fallback = jobs.clone();
        let (tx, rx) = mpsc::channel();
        for job in jobs {
            let tx = tx.clone();
            pool.spawn(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| run_job(&job)))
                    .unwrap_or_else(|_| JobOutcome::failed(&job, "worker panicked"));
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(total);
        while outcomes.len() < total {
            match rx.recv_timeout(self.config.poll_interval) {
                Ok(outcome) => outcomes.push(outcome),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            reporter.report(progress.overall());
        }

        if outcomes.len() < total {
            let seen: BTreeSet<usize> = outcomes.iter().map(|o| o.index).collect();
            outcomes.extend(
                fallback
                    .iter()
                    .filter(|job| !seen.contains(&job.index))
                    .map(|job| JobOutcome::failed(job, "worker exited without reporting")),
            );
        }
        outcomes
    }
}

fn spawn_worker(program: &Path, args: &[String], job: &ImportJob) -> Result<Child> {
    let payload = job.to_json()?;
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| Error::WorkerLaunch(format!("{}: {e}", program.display())))?;

    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(payload.as_bytes()),
        None => Err(std::io::Error::other("worker stdin unavailable")),
    };
    if let Err(err) = written {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::WorkerLaunch(format!(
            "failed to send job {} to worker: {err}",
            job.index
        )));
    }
    Ok(child)
}

fn collect_worker(child: Child, job: &ImportJob) -> JobOutcome {
    match child.wait_with_output() {
        Ok(output) if output.status.success() => {
            serde_json::from_slice::<JobOutcome>(&output.stdout).unwrap_or_else(|err| {
                error!("job {} returned an unreadable report: {err}", job.index);
                JobOutcome::failed(job, format!("unreadable worker report: {err}"))
            })
        }
        Ok(output) => {
            error!("worker for job {} exited with {}", job.index, output.status);
            JobOutcome::failed(job, format!("worker exited with {}", output.status))
        }
        Err(err) => {
            error!("failed to collect worker for job {}: {err}", job.index);
            JobOutcome::failed(job, err.to_string())
        }
    }
}

/// Forwards overall progress to the callback when it changes.
struct Reporter<F> {
    callback: F,
    last: Option<u8>,
}

impl<F: FnMut(u8)> Reporter<F> {
    fn new(callback: F) -> Self {
        Self {
            callback,
            last: None,
        }
    }

    fn report(&mut self, percent: u8) {
        if self.last != Some(percent) {
            self.last = Some(percent);
            (self.callback)(percent);
        }
    }
}
