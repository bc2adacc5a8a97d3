//! Core types and planar geometry for tangram piece pose tracking.
//!
//! This crate holds the data model shared by the refiner, the solver and the
//! tracker: poses, detections, correspondences, solver inputs and solutions,
//! the canonical piece catalog, a small homography toolbox and polygon
//! helpers. It does not depend on any image I/O crate.

mod angle;
mod catalog;
mod homography;
mod image;
mod labels;
mod logger;
pub mod polygon;
mod types;

pub use angle::{angular_dist_pi, wrap_angle, wrap_angle_pi};
pub use catalog::{parse_mtl_diffuse, CatalogError, ModelCatalog, TangramModel, DEFAULT_COLOR_BGR};
pub use homography::{
    clamp_w, estimate_affine, estimate_homography, homography_from_4pt, normalizing_transform,
    Homography, MIN_HOMOGENEOUS_W,
};
pub use image::{sample_bilinear, FrameError, FrameView, GrayImage, GrayImageView, Mask};
pub use labels::{load_polygon_labels, parse_polygon_labels, LabelError, LabeledPolygon};
pub use types::{
    class_for_model_name, class_model_name, class_shape, BBox, BaInputs, BaSolution,
    Correspondence, Detection, PieceObservation, Pose, ShapeType, Timings, WarmStart, NUM_CLASSES,
};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_with_level;
