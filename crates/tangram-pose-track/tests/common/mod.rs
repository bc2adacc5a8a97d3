#![allow(dead_code)]

use std::collections::BTreeMap;

use nalgebra::{Matrix3, Point2};
use tangram_pose_core::{BaInputs, Homography, ModelCatalog, PieceObservation, Pose, NUM_CLASSES};

pub fn truth_h() -> Homography {
    Homography::new(Matrix3::new(55.0, 6.0, 320.0, -4.0, 52.0, 240.0, 4e-3, -3e-3, 1.0))
}

pub fn truth_pose(class_id: usize) -> Pose {
    let c = class_id as f64;
    Pose::new(
        0.3 * c - 0.8,
        3.0 * (class_id % 4) as f64 - 4.5,
        3.0 * (class_id / 4) as f64 - 1.5,
    )
}

pub fn truth_poses() -> BTreeMap<usize, Pose> {
    (0..NUM_CLASSES).map(|c| (c, truth_pose(c))).collect()
}

pub fn render(h: &Homography, scale: f64, pose: &Pose, model: &[Point2<f64>]) -> Vec<Point2<f64>> {
    model
        .iter()
        .map(|m| h.apply(pose.apply(Point2::new(scale * m.x, scale * m.y))))
        .collect()
}

/// Detected ordering `x` such that `apply_correspondence(x, shift, reflected)`
/// lines up with `ordered`.
pub fn scramble(ordered: &[Point2<f64>], shift: usize, reflected: bool) -> Vec<Point2<f64>> {
    let n = ordered.len();
    let mut base = vec![Point2::origin(); n];
    for (i, p) in ordered.iter().enumerate() {
        base[(i + shift) % n] = *p;
    }
    if reflected {
        base.reverse();
    }
    base
}

pub fn observation(catalog: &ModelCatalog, class_id: usize, detected: Vec<Point2<f64>>) -> PieceObservation {
    let model = catalog.get(class_id).expect("class in catalog");
    PieceObservation {
        class_id,
        detected,
        model: model.vertices.clone(),
        shape: model.shape,
    }
}

/// Every piece rendered with the ground-truth geometry, `classes` only.
pub fn scene(catalog: &ModelCatalog, classes: &[usize], h: &Homography, scale: f64) -> BaInputs {
    let pieces = classes
        .iter()
        .map(|&c| {
            let model = &catalog.get(c).expect("class in catalog").vertices;
            observation(catalog, c, render(h, scale, &truth_pose(c), model))
        })
        .collect();
    BaInputs {
        pieces,
        warm_start: None,
    }
}

pub fn all_classes() -> Vec<usize> {
    (0..NUM_CLASSES).collect()
}

/// Move one detected vertex of `class_id` by `(dx, dy)` pixels.
pub fn displace_vertex(inputs: &mut BaInputs, class_id: usize, vertex: usize, dx: f64, dy: f64) {
    let piece = inputs
        .pieces
        .iter_mut()
        .find(|p| p.class_id == class_id)
        .expect("class in scene");
    piece.detected[vertex].x += dx;
    piece.detected[vertex].y += dy;
}

/// Ground-truth homography followed by a uniform zoom of the board plane.
pub fn zoomed_h(zoom: f64) -> Homography {
    Homography::new(truth_h().h * Matrix3::new(zoom, 0.0, 0.0, 0.0, zoom, 0.0, 0.0, 0.0, 1.0))
}
