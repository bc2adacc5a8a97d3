//! Discrete vertex-correspondence hypotheses for one piece.

use nalgebra::Point2;
use tangram_pose_core::{polygon::mirror_polygon, Correspondence, ShapeType};

/// A detected polygon re-ordered to line up with a (possibly mirrored) model.
#[derive(Clone, Debug, PartialEq)]
pub struct Candidate {
    pub correspondence: Correspondence,
    /// Model outline, mirrored when `correspondence.mirrored_model`.
    pub model: Vec<Point2<f64>>,
    /// `detected[i]` is matched to `model[i]`.
    pub detected: Vec<Point2<f64>>,
}

/// Re-order `detected` for a given shift/reflection.
///
/// `base = reflected ? reverse(detected) : detected`, output `i` is `base[(i + shift) % n]`.
pub fn apply_correspondence(detected: &[Point2<f64>], shift: usize, reflected: bool) -> Vec<Point2<f64>> {
    let n = detected.len();
    let mut base = detected.to_vec();
    if reflected {
        base.reverse();
    }
    (0..n).map(|i| base[(i + shift) % n]).collect()
}

/// All hypotheses in preference order: fewer flags first, then `mirrored_model`
/// false before true, then `reflected` false before true, then ascending shift.
pub fn enumerate_candidates(model: &[Point2<f64>], detected: &[Point2<f64>], shape: ShapeType) -> Vec<Candidate> {
    let n = model.len();
    if n < 3 || detected.len() != n {
        return Vec::new();
    }
    let mirrored = mirror_polygon(model);
    let mirror_options: &[bool] = if shape.has_mirrored_sibling() {
        &[false, true]
    } else {
        &[false]
    };

    let mut out = Vec::with_capacity(n * 2 * mirror_options.len());
    for &mirrored_model in mirror_options {
        for reflected in [false, true] {
            for shift in 0..n {
                out.push(Candidate {
                    correspondence: Correspondence {
                        shift,
                        reflected,
                        mirrored_model,
                    },
                    model: if mirrored_model { mirrored.clone() } else { model.to_vec() },
                    detected: apply_correspondence(detected, shift, reflected),
                });
            }
        }
    }
    out.sort_by_key(|c| {
        let k = c.correspondence;
        (k.flag_count(), k.mirrored_model, k.reflected, k.shift)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(n: usize) -> Vec<Point2<f64>> {
        (0..n).map(|i| Point2::new(i as f64, 0.0)).collect()
    }

    #[test]
    fn candidate_counts_per_shape() {
        assert_eq!(enumerate_candidates(&pts(3), &pts(3), ShapeType::Triangle).len(), 6);
        assert_eq!(enumerate_candidates(&pts(4), &pts(4), ShapeType::Square).len(), 8);
        assert_eq!(enumerate_candidates(&pts(4), &pts(4), ShapeType::Parallelogram).len(), 16);
        assert!(enumerate_candidates(&pts(4), &pts(3), ShapeType::Square).is_empty());
    }

    #[test]
    fn shift_and_reflection_reorder_detected() {
        let d = pts(4);
        let shifted = apply_correspondence(&d, 1, false);
        assert_eq!(shifted[0], d[1]);
        assert_eq!(shifted[3], d[0]);
        let reflected = apply_correspondence(&d, 1, true);
        // reversed base is [3, 2, 1, 0]
        assert_eq!(reflected[0], d[2]);
    }

    #[test]
    fn preference_order_puts_plain_candidates_first() {
        let c = enumerate_candidates(&pts(4), &pts(4), ShapeType::Parallelogram);
        assert_eq!(c[0].correspondence, Correspondence::default());
        assert!(!c[4].correspondence.mirrored_model && c[4].correspondence.reflected);
        assert!(c[8].correspondence.mirrored_model && !c[8].correspondence.reflected);
        assert_eq!(c[15].correspondence.flag_count(), 2);
    }
}
