//! `tangram-pose` command line: replay label sequences through the tracker
//! and inspect the model catalog.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use serde::Serialize;
use tangram_pose::core::{load_polygon_labels, BaSolution, ModelCatalog};
use tangram_pose::{write_plane_coordinates_json, PipelineConfig, PlaneCoordinates, TangramPipeline};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "tangram-pose")]
#[command(about = "Tangram piece pose estimation and tracking")]
#[command(version)]
struct Cli {
    /// Log verbosity (error, warn, info, debug, trace).
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    /// Emit JSON logs (requires the `tracing` feature).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay YOLO polygon label files as consecutive frames.
    Track(TrackArgs),

    /// Validate a model catalog and print it as JSON.
    Catalog(CatalogArgs),

    /// Write the default pipeline configuration.
    DefaultConfig {
        /// Output path for the JSON config.
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct CatalogArgs {
    /// Catalog JSON; the built-in standard set when omitted.
    #[arg(long)]
    models: Option<PathBuf>,

    /// Directory with `<model>.mtl` color files.
    #[arg(long)]
    assets: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct TrackArgs {
    /// Label files, processed in the given order.
    #[arg(required = true)]
    labels: Vec<PathBuf>,

    #[command(flatten)]
    catalog: CatalogArgs,

    /// Pipeline config JSON.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Image width used to de-normalize label coordinates.
    #[arg(long)]
    width: Option<u32>,

    /// Image height used to de-normalize label coordinates.
    #[arg(long)]
    height: Option<u32>,

    /// Read each frame's size from `<images-dir>/<label stem>.<ext>`
    /// (requires the `image` feature).
    #[arg(long)]
    images_dir: Option<PathBuf>,

    /// Frame rate used to synthesize timestamps.
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Disable homography locking.
    #[arg(long)]
    no_lock: bool,

    /// Where to write the per-frame solutions (JSON array).
    #[arg(long)]
    out: PathBuf,

    /// Optional plane-coordinate export of the last frame.
    #[arg(long)]
    plane_out: Option<PathBuf>,
}

#[derive(Serialize)]
struct FrameReport<'a> {
    frame: usize,
    label: String,
    timestamp: f64,
    solution: &'a BaSolution,
}

fn init_logging(level: LevelFilter, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = level;
        tangram_pose::core::init_tracing(json);
        let _ = tracing_log::LogTracer::init();
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--json-log needs the `tracing` feature; using plain logs");
        }
        let _ = tangram_pose::core::init_with_level(level);
    }
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level, cli.json_log);

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Catalog(args) => run_catalog(&args),
        Commands::DefaultConfig { out } => {
            PipelineConfig::default().write_json(&out)?;
            info!("default config written to {}", out.display());
            Ok(())
        }
    }
}

fn load_catalog(args: &CatalogArgs) -> CliResult<ModelCatalog> {
    let mut catalog = match &args.models {
        Some(path) => ModelCatalog::load_json(path)?,
        None => ModelCatalog::standard(),
    };
    if let Some(dir) = &args.assets {
        let n = catalog.load_colors_from_assets(dir);
        info!("{n} model colors loaded from {}", dir.display());
    }
    Ok(catalog)
}

fn run_catalog(args: &CatalogArgs) -> CliResult<()> {
    let catalog = load_catalog(args)?;
    println!("{}", catalog.to_json()?);
    Ok(())
}

fn frame_size(args: &TrackArgs, label: &Path) -> CliResult<(u32, u32)> {
    if let Some(dir) = &args.images_dir {
        return image_size(dir, label);
    }
    match (args.width, args.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(format!(
            "frame size for {} unknown: pass --width/--height or --images-dir",
            label.display()
        )
        .into()),
    }
}

#[cfg(feature = "image")]
fn image_size(dir: &Path, label: &Path) -> CliResult<(u32, u32)> {
    Ok(tangram_pose::frames::label_image_size(dir, label)?)
}

#[cfg(not(feature = "image"))]
fn image_size(_dir: &Path, _label: &Path) -> CliResult<(u32, u32)> {
    Err("--images-dir requires the `image` feature".into())
}

fn run_track(args: &TrackArgs) -> CliResult<()> {
    if !(args.fps.is_finite() && args.fps > 0.0) {
        return Err("--fps must be positive".into());
    }
    let config = match &args.config {
        Some(path) => PipelineConfig::load_json(path)?,
        None => PipelineConfig::default(),
    };
    let config = if args.no_lock { config.with_locking(false) } else { config };
    let mut pipeline = TangramPipeline::with_catalog(load_catalog(&args.catalog)?, config);

    let mut solutions = Vec::with_capacity(args.labels.len());
    for (i, label) in args.labels.iter().enumerate() {
        let (w, h) = frame_size(args, label)?;
        let labels = load_polygon_labels(label, w, h)?;
        let timestamp = i as f64 / args.fps;
        let solution = pipeline.process_labels(&labels, timestamp);
        info!(
            "frame {i}: {} pieces, quality {:.3}, locked {}",
            solution.errors.len(),
            solution.tracking_quality,
            solution.homography_locked
        );
        solutions.push((label.display().to_string(), timestamp, solution));
    }

    let reports: Vec<FrameReport<'_>> = solutions
        .iter()
        .enumerate()
        .map(|(frame, (label, timestamp, solution))| FrameReport {
            frame,
            label: label.clone(),
            timestamp: *timestamp,
            solution,
        })
        .collect();
    std::fs::write(&args.out, serde_json::to_string_pretty(&reports)?)?;
    info!("solutions written to {}", args.out.display());

    if let Some(path) = &args.plane_out {
        let coords: Vec<PlaneCoordinates> = solutions
            .last()
            .map(|(_, _, s)| pipeline.plane_coordinates(s))
            .unwrap_or_default();
        write_plane_coordinates_json(path, &coords)?;
        info!("plane coordinates written to {}", path.display());
    }
    Ok(())
}
