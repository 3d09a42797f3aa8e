//! Command-line front end for PixSeq TIFF import.
//!
//! `pixseq import` runs the full multi-process pipeline; `pixseq info`
//! shows how a file would be partitioned. The hidden `pixseq worker`
//! subcommand is the worker process spawned by `import`.
#![allow(clippy::uninlined_format_args, clippy::needless_pass_by_value)]

use clap::{Args, Parser, Subcommand, ValueEnum};
use log::info;
use pixseq_core::{
    AcquisitionMode, AlexFirstFrame, Channel, ChannelLayout, ImportConfig, ImportDescriptor,
};
use pixseq_io::{
    normalize_import_path, run_job, Backend, ChannelRecord, Completeness, DatasetRegistry,
    ImportJob, Importer, SchedulerConfig, SharedMemoryConfig, TiffStackReader,
};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    PixseqIo(#[from] pixseq_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] pixseq_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Acquisition mode selection.
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Every frame is one channel (see --channel)
    Single,
    /// Every frame holds two emission channels side by side
    Fret,
    /// Alternating excitation, two emission channels per frame
    Alex,
}

/// Options describing how frames map onto channels.
#[derive(Debug, Args)]
struct ModeArgs {
    /// Acquisition mode
    #[arg(short, long, value_enum, default_value = "single")]
    mode: ModeArg,

    /// Channel name for single mode (donor, acceptor, dd, da, ad, aa)
    #[arg(short, long, default_value = "donor")]
    channel: Channel,

    /// Left-to-right order of the emission halves
    #[arg(long, default_value = "donor-acceptor")]
    layout: ChannelLayout,

    /// Excitation of the first ALEX frame
    #[arg(long, default_value = "donor")]
    alex_first_frame: AlexFirstFrame,

    /// Maximum frames per file (per excitation for ALEX), or "none"
    #[arg(short, long, default_value = "none")]
    limit: String,
}

impl ModeArgs {
    fn to_config(&self) -> Result<ImportConfig> {
        let mode = match self.mode {
            ModeArg::Single => AcquisitionMode::Single(self.channel),
            ModeArg::Fret => AcquisitionMode::Fret,
            ModeArg::Alex => AcquisitionMode::Alex,
        };
        Ok(ImportConfig::new(mode)
            .with_channel_layout(self.layout)
            .with_alex_first_frame(self.alex_first_frame)
            .try_with_import_limit_str(&self.limit)?)
    }
}

/// Shared-memory TIFF import for single-molecule microscopy.
#[derive(Parser)]
#[command(name = "pixseq")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import TIFF stacks and summarise the resulting channels
    Import {
        /// Input TIFF file(s)
        #[arg(required = true)]
        input: Vec<PathBuf>,

        #[command(flatten)]
        mode: ModeArgs,

        /// Import every file into this dataset
        #[arg(long)]
        append: Option<String>,

        /// Number of worker processes (default: 75% of logical cores)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Run jobs on threads instead of worker processes
        #[arg(long)]
        in_process: bool,
    },

    /// Show TIFF metadata and the planned channel shapes
    Info {
        /// Input TIFF file
        input: PathBuf,

        #[command(flatten)]
        mode: ModeArgs,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one import job read from stdin (used by `import`)
    #[command(hide = true)]
    Worker,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match cli.command {
        Commands::Import {
            input,
            mode,
            append,
            workers,
            in_process,
        } => run_import(input, &mode, append, workers, in_process),
        Commands::Info { input, mode, json } => run_info(input, &mode, json),
        Commands::Worker => run_worker(),
    }
}

fn run_import(
    input: Vec<PathBuf>,
    mode: &ModeArgs,
    append: Option<String>,
    workers: Option<usize>,
    in_process: bool,
) -> Result<()> {
    let mut config = mode.to_config()?;
    let mut registry = DatasetRegistry::new();
    if let Some(name) = append {
        // A fresh registry has nothing to append to, so the target starts
        // out empty.
        registry.create(&name);
        config = config.with_append_to_dataset(name);
    }

    let backend = if in_process {
        Backend::InProcess
    } else {
        Backend::current_exe_worker()?
    };
    let mut scheduler = SchedulerConfig::new(backend);
    if let Some(workers) = workers {
        scheduler = scheduler.try_with_workers(workers)?;
    }

    let importer = Importer::new(config, scheduler, SharedMemoryConfig::default())?;
    let start = Instant::now();
    let report = importer.import(&input, &mut registry, |percent| {
        eprintln!("progress: {percent}%");
    })?;
    info!("import finished in {:.2?}", start.elapsed());

    let mut stdout = std::io::stdout().lock();
    for name in &report.datasets {
        let Some(dataset) = registry.get(name) else {
            continue;
        };
        for (channel, record) in dataset.channels() {
            writeln!(stdout, "{}", summary_line(name, channel, record))?;
        }
    }
    stdout.flush()?;

    for outcome in report.empty() {
        eprintln!("no frames: {}", outcome.path.display());
    }
    for outcome in report.failed() {
        eprintln!(
            "failed: {} ({}/{} frames)",
            outcome.path.display(),
            outcome.frames_written,
            outcome.frames_planned
        );
    }
    report.into_result()?;
    Ok(())
}

fn summary_line(dataset: &str, channel: Channel, record: &ChannelRecord) -> String {
    let shape = record.data.shape();
    let range = match (record.data.iter().min(), record.data.iter().max()) {
        (Some(min), Some(max)) => format!("{min}..={max}"),
        _ => "-".to_string(),
    };
    let completeness = match record.completeness {
        Completeness::Complete => "complete",
        Completeness::Partial => "partial",
        Completeness::Cancelled => "cancelled",
    };
    format!(
        "{dataset}\t{}\t{}x{}x{}\t{completeness}\t{range}",
        channel.display_name(),
        shape[0],
        shape[1],
        shape[2]
    )
}

fn run_info(input: PathBuf, mode: &ModeArgs, json: bool) -> Result<()> {
    let path = normalize_import_path(&input);
    let stack = TiffStackReader::inspect(&path)?;
    let descriptor = ImportDescriptor::new(
        path,
        &mode.to_config()?,
        stack.n_frames,
        stack.frame_shape,
        stack.sample_type,
        stack.file_size,
    );
    let plan = descriptor.plan()?;

    if json {
        let value = serde_json::json!({
            "descriptor": descriptor,
            "channels": plan.channels(),
            "channel_shape": plan.channel_shape(),
            "unpaired_frames": plan.unpaired_frames(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("File: {}", descriptor.path.display());
    println!("Frames: {}", descriptor.n_frames);
    println!(
        "Frame shape: {}x{}",
        descriptor.frame_shape.height, descriptor.frame_shape.width
    );
    println!("Sample type: {}", descriptor.sample_type);
    println!("File size: {} bytes", descriptor.file_size);
    println!("Mode: {}", descriptor.mode);
    let [frames, height, width] = plan.channel_shape();
    for channel in plan.channels() {
        println!(
            "Channel {}: {}x{}x{} ({} bytes)",
            channel.display_name(),
            frames,
            height,
            width,
            plan.channel_bytes(descriptor.sample_type)
        );
    }
    if plan.unpaired_frames() > 0 {
        println!("Unpaired trailing frames: {}", plan.unpaired_frames());
    }
    Ok(())
}

fn run_worker() -> Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;
    let job = ImportJob::from_json(&input)?;
    let outcome = run_job(&job);

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", outcome.to_json()?)?;
    stdout.flush()?;
    Ok(())
}
