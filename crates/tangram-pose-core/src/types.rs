use std::collections::BTreeMap;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::polygon::mirror_polygon;
use crate::Homography;

/// Number of distinct piece classes in a tangram set.
pub const NUM_CLASSES: usize = 7;

/// Per-stage wall-clock measurements in milliseconds.
pub type Timings = BTreeMap<String, f64>;

/// Rigid placement of a piece inside the reference plane.
///
/// Applied to the scaled canonical polygon before the shared homography:
/// `p = R(theta) * (scale * m) + (tx, ty)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub theta: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Pose {
    pub fn new(theta: f64, tx: f64, ty: f64) -> Self {
        Self { theta, tx, ty }
    }

    /// Transform an already scaled model point into plane coordinates.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let (s, c) = self.theta.sin_cos();
        Point2::new(c * p.x - s * p.y + self.tx, s * p.x + c * p.y + self.ty)
    }
}

/// Axis-aligned detection box, center/size in detector pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl BBox {
    /// `(x0, y0, x1, y1)` corners.
    pub fn corners(&self) -> (f32, f32, f32, f32) {
        (
            self.cx - 0.5 * self.w,
            self.cy - 0.5 * self.h,
            self.cx + 0.5 * self.w,
            self.cy + 0.5 * self.h,
        )
    }
}

/// Raw per-piece output of the external segmentation model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub bbox: BBox,
    /// Linear weights of the shared prototype masks.
    pub mask_coeffs: Vec<f32>,
}

/// Which discrete variant of the canonical polygon matches a detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Correspondence {
    /// Cyclic offset: model vertex `i` matches detected vertex `(i + shift) % n`.
    pub shift: usize,
    /// Detected vertex order was reversed before shifting.
    pub reflected: bool,
    /// The mirror image of the canonical polygon was used.
    pub mirrored_model: bool,
}

impl Correspondence {
    /// Number of set flags; lower is preferred on ties.
    pub fn flag_count(&self) -> usize {
        usize::from(self.reflected) + usize::from(self.mirrored_model)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShapeType {
    Triangle,
    Square,
    Parallelogram,
}

impl ShapeType {
    pub fn expected_vertices(self) -> usize {
        match self {
            ShapeType::Triangle => 3,
            ShapeType::Square | ShapeType::Parallelogram => 4,
        }
    }

    /// The parallelogram is chiral: a flipped piece only matches the mirrored outline.
    pub fn has_mirrored_sibling(self) -> bool {
        matches!(self, ShapeType::Parallelogram)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "triangle" => Some(ShapeType::Triangle),
            "square" => Some(ShapeType::Square),
            "parallelogram" => Some(ShapeType::Parallelogram),
            _ => None,
        }
    }
}

const CLASS_TABLE: [(&str, ShapeType); NUM_CLASSES] = [
    ("tangram_parallelogram", ShapeType::Parallelogram),
    ("tangram_square", ShapeType::Square),
    ("tangram_triangle_large_1", ShapeType::Triangle),
    ("tangram_triangle_large_2", ShapeType::Triangle),
    ("tangram_triangle_medium", ShapeType::Triangle),
    ("tangram_triangle_small_1", ShapeType::Triangle),
    ("tangram_triangle_small_2", ShapeType::Triangle),
];

/// Catalog model name for a detector class id.
pub fn class_model_name(class_id: usize) -> Option<&'static str> {
    CLASS_TABLE.get(class_id).map(|(name, _)| *name)
}

pub fn class_shape(class_id: usize) -> Option<ShapeType> {
    CLASS_TABLE.get(class_id).map(|(_, shape)| *shape)
}

/// Inverse of [`class_model_name`].
pub fn class_for_model_name(name: &str) -> Option<usize> {
    CLASS_TABLE.iter().position(|(n, _)| *n == name)
}

/// One visible piece handed to the solver.
#[derive(Clone, Debug, PartialEq)]
pub struct PieceObservation {
    pub class_id: usize,
    /// Detected polygon in image pixels, consistent winding.
    pub detected: Vec<Point2<f64>>,
    /// Canonical model polygon in model units.
    pub model: Vec<Point2<f64>>,
    pub shape: ShapeType,
}

/// Prior solution used to seed the continuous refinement.
#[derive(Clone, Debug, PartialEq)]
pub struct WarmStart {
    pub h: Homography,
    pub scale: f64,
    pub poses: BTreeMap<usize, Pose>,
}

/// Batched solver input for a single frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaInputs {
    pub pieces: Vec<PieceObservation>,
    pub warm_start: Option<WarmStart>,
}

impl BaInputs {
    pub fn class_ids(&self) -> Vec<usize> {
        self.pieces.iter().map(|p| p.class_id).collect()
    }
}

/// Per-frame output: shared homography, scale and per-piece poses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BaSolution {
    pub h: Homography,
    pub scale: f64,
    pub poses: BTreeMap<usize, Pose>,
    /// Mean vertex reprojection error in pixels.
    pub errors: BTreeMap<usize, f64>,
    pub correspondences: BTreeMap<usize, Correspondence>,
    pub tracking_quality: f64,
    pub homography_locked: bool,
    #[serde(default)]
    pub timings: Timings,
}

impl Default for BaSolution {
    fn default() -> Self {
        Self::identity()
    }
}

impl BaSolution {
    /// Identity homography, unit scale, nothing tracked.
    pub fn identity() -> Self {
        Self {
            h: Homography::identity(),
            scale: 1.0,
            poses: BTreeMap::new(),
            errors: BTreeMap::new(),
            correspondences: BTreeMap::new(),
            tracking_quality: 0.0,
            homography_locked: false,
            timings: Timings::new(),
        }
    }

    pub fn mean_error(&self) -> Option<f64> {
        if self.errors.is_empty() {
            return None;
        }
        Some(self.errors.values().sum::<f64>() / self.errors.len() as f64)
    }

    /// Copy with wall-clock timings removed, for reproducibility comparisons.
    pub fn without_timings(&self) -> Self {
        Self {
            timings: Timings::new(),
            ..self.clone()
        }
    }

    /// Project the canonical `model` polygon of a posed piece into the image.
    ///
    /// The mirrored outline is used when the chosen correspondence says so.
    pub fn project_model(&self, class_id: usize, model: &[Point2<f64>]) -> Option<Vec<Point2<f64>>> {
        let pose = self.poses.get(&class_id)?;
        let mirrored = self
            .correspondences
            .get(&class_id)
            .is_some_and(|c| c.mirrored_model);
        let outline = if mirrored {
            mirror_polygon(model)
        } else {
            model.to_vec()
        };
        Some(
            outline
                .iter()
                .map(|m| {
                    let q = pose.apply(Point2::new(self.scale * m.x, self.scale * m.y));
                    self.h.apply(q)
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn class_table_is_consistent() {
        for id in 0..NUM_CLASSES {
            let name = class_model_name(id).unwrap();
            assert_eq!(class_for_model_name(name), Some(id));
        }
        assert_eq!(class_shape(0), Some(ShapeType::Parallelogram));
        assert_eq!(class_shape(1), Some(ShapeType::Square));
        assert_eq!(class_shape(6).map(ShapeType::expected_vertices), Some(3));
        assert!(class_model_name(NUM_CLASSES).is_none());
    }

    #[test]
    fn pose_rotates_then_translates() {
        let pose = Pose::new(std::f64::consts::FRAC_PI_2, 1.0, 2.0);
        let p = pose.apply(Point2::new(1.0, 0.0));
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn correspondence_flag_count() {
        let c = Correspondence {
            shift: 2,
            reflected: true,
            mirrored_model: true,
        };
        assert_eq!(c.flag_count(), 2);
        assert_eq!(Correspondence::default().flag_count(), 0);
    }

    #[test]
    fn solution_serializes_with_row_major_homography() {
        let mut sol = BaSolution::identity();
        sol.poses.insert(1, Pose::new(0.1, 2.0, 3.0));
        sol.timings.insert("solve".into(), 1.5);
        let json = serde_json::to_string(&sol).unwrap();
        let back: BaSolution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sol);
        assert!(json.contains("\"h\":[1.0,0.0,0.0,0.0,1.0,0.0,0.0,0.0,1.0]"));
        assert!(sol.without_timings().timings.is_empty());
    }
}
