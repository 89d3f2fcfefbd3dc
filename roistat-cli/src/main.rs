//! roistat command-line interface.
//!
//! Runs ROI timeseries analysis over HDF5 image stacks and manages ROI
//! definitions embedded in HDF5 files.
#![allow(clippy::uninlined_format_args, clippy::cast_precision_loss)]

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use roistat_core::Roi;
use roistat_engine::{EngineConfig, EngineEvent, RoiStatistics};
use roistat_io::{
    find_image_stacks, hdf5_has_rois, hdf5_is_writable, load_rois_hdf5, load_rois_json,
    save_rois_hdf5, Hdf5Stack,
};
use serde::Serialize;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    RoistatIo(#[from] roistat_io::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] roistat_engine::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Usage(String),
}

/// ROI timeseries analysis for image stacks.
#[derive(Parser)]
#[command(name = "roistat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute per-frame ROI means over a whole stack
    Analyze {
        /// Input HDF5 file
        input: PathBuf,

        /// Path of the image stack inside the file
        #[arg(short, long)]
        dataset: String,

        /// ROI definitions (JSON or HDF5); defaults to ROIs embedded in the input
        #[arg(short, long)]
        rois: Option<PathBuf>,

        /// Output JSON file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Frames per backfill chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Worker threads
        #[arg(long)]
        threads: Option<usize>,
    },

    /// List ROIs embedded in an HDF5 file
    Rois {
        /// Input HDF5 file
        input: PathBuf,
    },

    /// Embed ROIs from a JSON file into an HDF5 file
    Embed {
        /// ROI definitions (JSON)
        rois: PathBuf,

        /// Target HDF5 file
        target: PathBuf,
    },

    /// Show image stacks in an HDF5 file
    Info {
        /// Input HDF5 file
        input: PathBuf,

        /// Show only this dataset
        #[arg(short, long)]
        dataset: Option<String>,
    },
}

#[derive(Serialize)]
struct Report<'a> {
    file: &'a Path,
    dataset: &'a str,
    total_frames: usize,
    elapsed_s: f64,
    rois: Vec<RoiSeries>,
}

#[derive(Serialize)]
struct RoiSeries {
    name: String,
    class: String,
    color: String,
    frames: Vec<usize>,
    values: Vec<f32>,
}

fn main() {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli.command) {
        log::error!("{e}");
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Analyze {
            input,
            dataset,
            rois,
            output,
            config,
            chunk_size,
            threads,
        } => {
            let config = engine_config(config.as_deref(), chunk_size, threads)?;
            let rois = match rois {
                Some(path) => read_rois(&path)?,
                None => read_embedded_rois(&input)?,
            };
            if rois.is_empty() {
                return Err(CliError::Usage("no ROIs to analyze".to_string()));
            }
            analyze(&input, &dataset, &rois, config, output.as_deref())
        }

        Commands::Rois { input } => {
            let Some((rois, embed_enabled)) = load_rois_hdf5(&input)? else {
                println!("{}: no embedded ROIs", input.display());
                return Ok(());
            };
            println!("File: {}", input.display());
            println!("Embedding enabled: {}", embed_enabled);
            println!("ROIs: {}", rois.len());
            for roi in &rois {
                println!(
                    "  {:<20} {:<18} {}",
                    roi.name,
                    roi.kind().tag(),
                    roi.color
                );
            }
            Ok(())
        }

        Commands::Embed { rois, target } => {
            if !hdf5_is_writable(&target) {
                return Err(CliError::Usage(format!(
                    "{} cannot be opened for writing",
                    target.display()
                )));
            }
            let rois = load_rois_json(&rois)?;
            save_rois_hdf5(&target, &rois, true)?;
            println!("Embedded {} ROIs in {}", rois.len(), target.display());
            Ok(())
        }

        Commands::Info { input, dataset } => {
            println!("File: {}", input.display());
            match dataset {
                Some(path) => {
                    let stack = Hdf5Stack::open(&input, &path)?;
                    print_stack(&path, &roistat_core::Dataset::shape(&stack));
                }
                None => {
                    let stacks = find_image_stacks(&input)?;
                    if stacks.is_empty() {
                        println!("No 2-D or 3-D datasets");
                    }
                    for (path, shape) in &stacks {
                        print_stack(path, shape);
                    }
                }
            }
            println!("Embedded ROIs: {}", hdf5_has_rois(&input));
            Ok(())
        }
    }
}

fn print_stack(path: &str, shape: &[usize]) {
    match shape {
        [frames, height, width] => {
            println!("  {path}: {frames} frames of {height} x {width}");
        }
        [height, width] => println!("  {path}: single image {height} x {width}"),
        _ => println!("  {path}: shape {shape:?}"),
    }
}

fn engine_config(
    path: Option<&Path>,
    chunk_size: Option<usize>,
    threads: Option<usize>,
) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => EngineConfig::default(),
    };
    if let Some(frames) = chunk_size {
        config = config.try_with_chunk_size(frames)?;
    }
    if let Some(threads) = threads {
        config = config.try_with_worker_threads(threads)?;
    }
    config.validate()?;
    Ok(config)
}

fn read_rois(path: &Path) -> Result<Vec<Roi>> {
    let is_hdf5 = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| matches!(ext.to_lowercase().as_str(), "h5" | "hdf5" | "hdf" | "nxs"));
    if is_hdf5 {
        read_embedded_rois(path)
    } else {
        Ok(load_rois_json(path)?)
    }
}

fn read_embedded_rois(path: &Path) -> Result<Vec<Roi>> {
    load_rois_hdf5(path)?
        .map(|(rois, _)| rois)
        .ok_or_else(|| CliError::Usage(format!("{} has no embedded ROIs", path.display())))
}

fn analyze(
    input: &Path,
    dataset: &str,
    rois: &[Roi],
    config: EngineConfig,
    output: Option<&Path>,
) -> Result<()> {
    let stack = Hdf5Stack::open(input, dataset)?;
    let stats = RoiStatistics::new(config)?;
    let events = stats.subscribe();
    let start = Instant::now();

    stats.set_dataset(Arc::new(stack));
    let total_frames = stats.total_frames();
    log::info!(
        "Analyzing {} ROIs over {} frames",
        rois.len(),
        total_frames
    );
    for roi in rois {
        stats.register_roi(roi.clone())?;
    }

    let mut failures = 0usize;
    loop {
        let idle = stats.wait_until_idle(Duration::from_millis(500));
        for event in events.try_iter() {
            if let EngineEvent::Error { roi, message } = event {
                failures += 1;
                log::error!("{roi}: {message}");
            }
        }
        let summary = stats.summary();
        let computed: usize = summary.iter().map(|s| s.computed).sum();
        let total: usize = summary.iter().map(|s| s.total_frames).sum();
        eprint!(
            "\rProgress: {computed}/{total} ({:.1}%)",
            if total == 0 {
                100.0
            } else {
                computed as f64 * 100.0 / total as f64
            }
        );
        if idle {
            eprintln!();
            break;
        }
    }

    let elapsed = start.elapsed();
    let series = stats
        .tracked_rois()
        .iter()
        .map(|roi| {
            let (frames, values) = stats.get_timeseries(&roi.name);
            RoiSeries {
                name: roi.name.clone(),
                class: roi.kind().tag().to_string(),
                color: roi.color.to_hex(),
                frames,
                values,
            }
        })
        .collect();
    stats.stop();

    let report = Report {
        file: input,
        dataset,
        total_frames,
        elapsed_s: elapsed.as_secs_f64(),
        rois: series,
    };
    match output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writer.flush()?;
            eprintln!("Wrote {}", path.display());
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writeln!(writer)?;
        }
    }

    eprintln!(
        "Analyzed {} ROIs x {} frames in {:.2}s",
        rois.len(),
        total_frames,
        elapsed.as_secs_f64()
    );
    if failures > 0 {
        log::warn!("{failures} frame computations failed");
    }
    Ok(())
}
