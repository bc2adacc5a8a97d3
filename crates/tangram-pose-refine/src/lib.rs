//! Polygon refinement for tangram piece detections.
//!
//! Turns a coarse instance mask into an ordered, sub-pixel polygon:
//!
//! - [`decode_mask`]: instance probabilities from the shared prototype tensor;
//! - [`Refiner::refine`]: mask cleanup, auto-thresholded edges, Hough line
//!   voting and clustering, one fitted line per polygon edge, corners from
//!   adjacent line intersections.
//!
//! The refiner never fails: when not enough lines are found it falls back to
//! the coarse mask polygon and reports it through [`RefinementQuality`].

mod edges;
mod hough;
mod lines;
mod mask;
mod mask_decode;
mod params;
mod refiner;
mod result;

pub use edges::{detect_edges_auto, sobel_gradients, EdgeMap, EdgePixel, Gradients};
pub use hough::{cluster_segments, hough_segments, HoughCluster, HoughConfig, HoughSegment};
pub use lines::Line2;
pub use mask::{
    boundary_band, dilate, erode, largest_component, refine_mask_band, upsample_mask, Roi, RoiMask,
};
pub use mask_decode::{decode_mask, MaskProbabilities, ProtoMaskError, ProtoMasks};
pub use params::{MaskDecodeParams, RefinerParams};
pub use refiner::{expected_vertices_for_class, Refiner};
pub use result::{RefinementQuality, RefinementResult};
