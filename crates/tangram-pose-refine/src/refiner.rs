//! Coarse mask to sub-pixel polygon.
//!
//! Pipeline: upsample the prototype mask into the detection ROI, relabel the
//! boundary band by intensity, take the coarse polygon from the hull of the
//! largest component, detect edges around its boundary, vote lines, match
//! one line cluster per coarse edge, refit and intersect adjacent lines.

use std::time::Instant;

use log::{debug, warn};
use nalgebra::Point2;
use tangram_pose_core::{
    angular_dist_pi, class_shape,
    polygon::{ensure_clockwise, simplify_polygon},
    Detection, GrayImageView, Mask, Timings,
};

use crate::edges::{detect_edges_auto, sobel_gradients, EdgeMap};
use crate::hough::{cluster_segments, hough_segments, HoughCluster, HoughConfig};
use crate::lines::Line2;
use crate::mask::{boundary_band, largest_component, refine_mask_band, upsample_mask, Roi};
use crate::result::{RefinementQuality, RefinementResult};
use crate::{MaskDecodeParams, MaskProbabilities, RefinerParams};

/// Vertex count the refiner aims for when the caller passes `0`.
pub fn expected_vertices_for_class(class_id: usize) -> usize {
    class_shape(class_id).map_or(3, |s| s.expected_vertices())
}

#[derive(Clone, Debug, Default)]
pub struct Refiner {
    pub params: RefinerParams,
    pub decode: MaskDecodeParams,
}

fn ms_since(t: Instant) -> f64 {
    t.elapsed().as_secs_f64() * 1000.0
}

impl Refiner {
    pub fn new(params: RefinerParams, decode: MaskDecodeParams) -> Self {
        Self { params, decode }
    }

    /// Detection box mapped to the frame, padded and clamped.
    pub fn detection_roi(&self, detection: &Detection, frame_w: usize, frame_h: usize) -> Roi {
        let sx = frame_w as f32 / self.decode.input_size;
        let sy = frame_h as f32 / self.decode.input_size;
        let (x0, y0, x1, y1) = detection.bbox.corners();
        let (x0, y0, x1, y1) = (x0 * sx, y0 * sy, x1 * sx, y1 * sy);
        let mx = ((x1 - x0) * self.params.roi_margin_rel).max(self.params.roi_margin_px as f32);
        let my = ((y1 - y0) * self.params.roi_margin_rel).max(self.params.roi_margin_px as f32);
        let clamp = |v: f32, hi: usize| -> usize { v.max(0.0).min(hi as f32) as usize };
        Roi {
            x0: clamp((x0 - mx).floor(), frame_w),
            y0: clamp((y0 - my).floor(), frame_h),
            x1: clamp((x1 + mx).ceil(), frame_w),
            y1: clamp((y1 + my).ceil(), frame_h),
        }
    }

    /// Refine one detection into an ordered polygon.
    ///
    /// `expected_n == 0` derives the vertex count from the class id.
    /// Degraded fits are reported through [`RefinementQuality`], never as errors.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(class_id = detection.class_id))
    )]
    pub fn refine(
        &self,
        gray: &GrayImageView<'_>,
        detection: &Detection,
        mask: &MaskProbabilities,
        expected_n: usize,
        mask_iters: usize,
    ) -> RefinementResult {
        let p = &self.params;
        let total = Instant::now();
        let mut timings = Timings::new();
        let n = if expected_n == 0 {
            expected_vertices_for_class(detection.class_id)
        } else {
            expected_n
        };

        let t = Instant::now();
        let roi = self.detection_roi(detection, gray.width, gray.height);
        let mut refined_mask_proto = Mask::new(mask.width, mask.height);
        for (dst, &v) in refined_mask_proto.data.iter_mut().zip(&mask.data) {
            *dst = u8::from(v >= self.decode.threshold && v > 0.0);
        }
        let mut roi_mask = upsample_mask(
            mask,
            roi,
            mask.width as f32 / gray.width as f32,
            mask.height as f32 / gray.height as f32,
            self.decode.threshold,
        );
        roi_mask.mask = largest_component(&roi_mask.mask);
        timings.insert("mask_upsample".into(), ms_since(t));

        let t = Instant::now();
        let passes = refine_mask_band(&mut roi_mask, gray, p.mask_band_px, mask_iters, p.mask_min_contrast);
        timings.insert("mask_refine".into(), ms_since(t));

        let t = Instant::now();
        let boundary = roi_mask.boundary_points();
        let coarse = simplify_polygon(&boundary, n);
        timings.insert("coarse_polygon".into(), ms_since(t));
        let Some(coarse) = coarse else {
            warn!(
                "class {}: mask too small for a {n}-gon ({} boundary pixels)",
                detection.class_id,
                boundary.len()
            );
            timings.insert("total".into(), ms_since(total));
            return RefinementResult::empty(roi_mask, refined_mask_proto, timings);
        };

        let t = Instant::now();
        let grad = sobel_gradients(gray, roi);
        let band = boundary_band(&roi_mask.mask, p.edge_band_px);
        let edge_map = detect_edges_auto(&grad, roi, &band, p.canny_sigma, p.min_edge_magnitude);
        timings.insert("edges".into(), ms_since(t));

        let t = Instant::now();
        let diag = roi.diagonal();
        let origin = Point2::new(
            0.5 * (roi.x0 + roi.x1) as f64,
            0.5 * (roi.y0 + roi.y1) as f64,
        );
        let cfg = HoughConfig {
            theta_res: p.hough_theta_res_deg.to_radians(),
            rho_res: p.hough_rho_res_px,
            vote_window: p.hough_vote_window_deg.to_radians(),
            min_peak_frac: p.hough_min_peak_frac,
            max_peaks: p.hough_max_peaks,
            min_support: p.min_segment_support,
            support_band: p.refit_band_px,
        };
        let segments = hough_segments(&edge_map.edges, origin, &cfg);
        let clusters = cluster_segments(
            &segments,
            origin,
            p.cluster_angle_tol_deg.to_radians(),
            p.cluster_offset_tol_rel * diag,
        );
        timings.insert("hough".into(), ms_since(t));

        let t = Instant::now();
        let assignment = self.match_clusters_to_edges(&coarse, &clusters, diag);
        let mut lines = Vec::with_capacity(n);
        let mut line_segments = Vec::new();
        let mut found = 0usize;
        for (j, slot) in assignment.iter().enumerate() {
            let a = coarse[j];
            let b = coarse[(j + 1) % n];
            match slot {
                Some(k) => {
                    let cluster = &clusters[*k];
                    let line = self.refit_line(&edge_map, cluster).unwrap_or_else(|| cluster.line());
                    lines.push(line);
                    line_segments.push(cluster_extent(cluster, &line));
                    found += 1;
                }
                None => {
                    lines.push(Line2::through(a, b).unwrap_or_else(|| Line2::from_normal(0.0, a.x)));
                }
            }
        }
        let used: Vec<usize> = assignment.iter().flatten().copied().collect();
        let mut secondary_lines = Vec::new();
        let mut secondary_segments = Vec::new();
        for (k, c) in clusters.iter().enumerate() {
            if !used.contains(&k) {
                let line = c.line();
                secondary_lines.push(line);
                secondary_segments.push(cluster_extent(c, &line));
            }
        }

        let quality = if found == n {
            RefinementQuality::LineFit
        } else if found == 0 {
            RefinementQuality::CoarseOnly
        } else {
            RefinementQuality::Partial { lines_found: found }
        };

        let max_shift = p.max_corner_shift_rel * diag;
        let mut polygon_px: Vec<Point2<f64>> = if found == 0 {
            coarse.clone()
        } else {
            (0..n)
                .map(|j| {
                    let prev = &lines[(j + n - 1) % n];
                    match prev.intersect(&lines[j]) {
                        Some(v) if (v - coarse[j]).norm() <= max_shift => v,
                        _ => coarse[j],
                    }
                })
                .collect()
        };
        ensure_clockwise(&mut polygon_px);
        timings.insert("line_select".into(), ms_since(t));

        if quality != RefinementQuality::LineFit {
            warn!(
                "class {}: line fit degraded to {:?} ({} clusters, {} edge pixels)",
                detection.class_id,
                quality,
                clusters.len(),
                edge_map.edges.len()
            );
        }
        debug!(
            "class {}: {} mask passes, {} edges (thr {:.1}/{:.1}), {} segments, {} clusters",
            detection.class_id,
            passes,
            edge_map.edges.len(),
            edge_map.low_threshold,
            edge_map.high_threshold,
            segments.len(),
            clusters.len()
        );

        let (fw, fh) = (gray.width as f64, gray.height as f64);
        let polygon_norm = polygon_px.iter().map(|v| Point2::new(v.x / fw, v.y / fh)).collect();
        timings.insert("total".into(), ms_since(total));

        RefinementResult {
            refined_mask_full: roi_mask,
            refined_mask_proto,
            polygon_px,
            polygon_norm,
            lines,
            secondary_lines,
            line_segments,
            secondary_segments,
            quality,
            timings,
        }
    }

    /// One cluster per coarse edge, greedy on ascending cost.
    fn match_clusters_to_edges(
        &self,
        coarse: &[Point2<f64>],
        clusters: &[HoughCluster],
        diag: f64,
    ) -> Vec<Option<usize>> {
        let n = coarse.len();
        let angle_tol = self.params.match_angle_tol_deg.to_radians();
        let offset_tol = (self.params.match_offset_tol_rel * diag).max(1.0);
        let best_score = clusters.iter().map(|c| c.score_sum).fold(0.0, f64::max);

        let mut candidates: Vec<(f64, usize, usize)> = Vec::new();
        for j in 0..n {
            let (a, b) = (coarse[j], coarse[(j + 1) % n]);
            let Some(edge) = Line2::through(a, b) else {
                continue;
            };
            let mid = Point2::new(0.5 * (a.x + b.x), 0.5 * (a.y + b.y));
            for (k, c) in clusters.iter().enumerate() {
                let da = angular_dist_pi(c.angle_median, edge.normal_angle());
                let d_off = c.line().distance(mid);
                if da > angle_tol || d_off > offset_tol {
                    continue;
                }
                let strength = if best_score > 0.0 { c.score_sum / best_score } else { 0.0 };
                let cost = da / angle_tol + d_off / offset_tol - 0.5 * strength;
                candidates.push((cost, j, k));
            }
        }
        candidates.sort_by(|x, y| x.0.total_cmp(&y.0).then(x.1.cmp(&y.1)).then(x.2.cmp(&y.2)));

        let mut assignment = vec![None; n];
        let mut taken = vec![false; clusters.len()];
        for (_, j, k) in candidates {
            if assignment[j].is_none() && !taken[k] {
                assignment[j] = Some(k);
                taken[k] = true;
            }
        }
        assignment
    }

    fn refit_line(&self, edges: &EdgeMap, cluster: &HoughCluster) -> Option<Line2> {
        let line = cluster.line();
        let angle_tol = self.params.cluster_angle_tol_deg.to_radians() * 2.0;
        let pts: Vec<Point2<f64>> = edges
            .edges
            .iter()
            .filter(|e| {
                let p = Point2::new(e.x, e.y);
                line.distance(p) <= self.params.refit_band_px
                    && angular_dist_pi(e.direction as f64, cluster.angle_median) <= angle_tol
            })
            .map(|e| Point2::new(e.x, e.y))
            .collect();
        if pts.len() < self.params.min_segment_support {
            return None;
        }
        Line2::fit_tls(&pts)
    }
}

fn cluster_extent(cluster: &HoughCluster, line: &Line2) -> [Point2<f64>; 2] {
    let dir = line.direction();
    let mut lo = (f64::MAX, Point2::origin());
    let mut hi = (f64::MIN, Point2::origin());
    for s in &cluster.segments {
        for p in [s.p1, s.p2] {
            let q = line.project(p);
            let t = dir.x * q.x + dir.y * q.y;
            if t < lo.0 {
                lo = (t, q);
            }
            if t > hi.0 {
                hi = (t, q);
            }
        }
    }
    [lo.1, hi.1]
}
