use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tangram_pose_core::{Mask, Timings};

use crate::lines::Line2;
use crate::mask::RoiMask;

/// How much of the line-fit refinement succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum RefinementQuality {
    /// Every vertex comes from a pair of fitted lines.
    LineFit,
    /// Only `lines_found` edges were fitted; the rest follow the coarse polygon.
    Partial { lines_found: usize },
    /// No usable lines; the coarse mask polygon is returned as is.
    CoarseOnly,
    /// The mask was too small to yield a polygon.
    Empty,
}

impl RefinementQuality {
    pub fn has_polygon(self) -> bool {
        !matches!(self, RefinementQuality::Empty)
    }
}

/// Output of [`crate::Refiner::refine`].
#[derive(Clone, Debug, PartialEq)]
pub struct RefinementResult {
    /// Frame-resolution mask after band refinement, stored over its ROI.
    pub refined_mask_full: RoiMask,
    /// Thresholded mask at prototype resolution.
    pub refined_mask_proto: Mask,
    /// Clockwise polygon in frame pixels.
    pub polygon_px: Vec<Point2<f64>>,
    /// `polygon_px` divided by the frame size.
    pub polygon_norm: Vec<Point2<f64>>,
    /// Selected edge lines, one per polygon edge, in frame pixels.
    pub lines: Vec<Line2>,
    /// Remaining line clusters, kept for diagnostics.
    pub secondary_lines: Vec<Line2>,
    pub line_segments: Vec<[Point2<f64>; 2]>,
    pub secondary_segments: Vec<[Point2<f64>; 2]>,
    pub quality: RefinementQuality,
    pub timings: Timings,
}

impl RefinementResult {
    pub(crate) fn empty(refined_mask_full: RoiMask, refined_mask_proto: Mask, timings: Timings) -> Self {
        Self {
            refined_mask_full,
            refined_mask_proto,
            polygon_px: Vec::new(),
            polygon_norm: Vec::new(),
            lines: Vec::new(),
            secondary_lines: Vec::new(),
            line_segments: Vec::new(),
            secondary_segments: Vec::new(),
            quality: RefinementQuality::Empty,
            timings,
        }
    }
}
