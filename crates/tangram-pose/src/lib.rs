//! High-level facade for the `tangram-pose-*` workspace.
//!
//! This crate provides:
//! - re-exports of the core, refinement and tracking crates
//! - [`TangramPipeline`]: per-frame orchestration from raw detections (or
//!   pre-labeled polygons) to a tracked [`BaSolution`](core::BaSolution)
//! - JSON configuration and plane-coordinate export
//! - (feature-gated) helpers from `image` buffers and a `tangram-pose` CLI
//!
//! ## Quickstart
//!
//! ```no_run
//! use std::path::Path;
//! use tangram_pose::{PipelineConfig, TangramPipeline};
//! use tangram_pose::core::load_polygon_labels;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = TangramPipeline::new("models.json", None, PipelineConfig::default())?;
//! let labels = load_polygon_labels(Path::new("frame_000.txt"), 1280, 720)?;
//! let solution = pipeline.process_labels(&labels, 0.0);
//! println!("quality {:.2}, locked {}", solution.tracking_quality, solution.homography_locked);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `tangram_pose::core`: data model, catalog, homography and polygon helpers.
//! - `tangram_pose::refine`: mask decoding and polygon refinement.
//! - `tangram_pose::track`: correspondence search, joint solver, Kalman tracking.
//! - `tangram_pose::frames` (feature `image`): bridges from `image` buffers.

pub use tangram_pose_core as core;
pub use tangram_pose_refine as refine;
pub use tangram_pose_track as track;

pub use tangram_pose_core::{BaSolution, Detection, FrameView, ModelCatalog};
pub use tangram_pose_refine::ProtoMasks;

mod config;
mod export;
mod pipeline;

pub use config::{ConfigError, PipelineConfig};
pub use export::{plane_coordinates, write_plane_coordinates_json, PlaneCoordinates};
pub use pipeline::{polygons_from_labels, ClassPolygons, PipelineError, TangramPipeline};

#[cfg(feature = "image")]
pub mod frames;
