//! Correspondence search and joint homography/scale/pose refinement.
//!
//! Projection model for model vertex `m` of a piece with pose `(theta, t)`:
//!
//! ```text
//! q = R(theta) * (s * m) + t        (reference plane)
//! x ~ H * [q; 1]                    (image, H[2][2] = 1)
//! ```
//!
//! Residuals are evaluated in Hartley-normalized image coordinates so that
//! the homography entries and the priors stay well scaled; errors are
//! reported back in pixels.

use std::collections::BTreeSet;
use std::time::Instant;

use log::{debug, warn};
use nalgebra::{DMatrix, DVector, Matrix3, Point2, Vector3};
use tangram_pose_core::{
    clamp_w, estimate_affine, normalizing_transform, wrap_angle, BaInputs, BaSolution,
    Correspondence, Homography, PieceObservation, Pose, NUM_CLASSES,
};

use crate::candidates::{enumerate_candidates, Candidate};
use crate::lm::{solve_lm, NllsProblem, RobustKernel, SolveOptions};
use crate::params::SolverParams;

/// Which parameters the solver may move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveMode {
    /// Homography, scale and all poses.
    Full,
    /// Poses only; homography and scale come from the warm start.
    PosesOnly,
}

/// Why the solver fell back to a zero-quality solution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolveFailure {
    TooFewPieces { visible: usize, required: usize },
    Initialization,
    NotConverged,
    ErrorTooLarge,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BaReport {
    pub converged: bool,
    pub iterations: usize,
    pub final_cost: f64,
    pub used_warm_start: bool,
    pub optimization_ms: f64,
    pub outer_iterations: usize,
    pub failure: Option<SolveFailure>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SolveOutcome {
    pub solution: BaSolution,
    pub report: BaReport,
}

impl SolveOutcome {
    pub fn is_success(&self) -> bool {
        self.report.failure.is_none()
    }
}

/// One piece with its currently selected hypothesis, in normalized image coordinates.
#[derive(Clone, Debug)]
struct ActivePiece {
    class_id: usize,
    correspondence: Correspondence,
    model: Vec<Point2<f64>>,
    detected_n: Vec<Point2<f64>>,
    detected_px: Vec<Point2<f64>>,
    theta_prior: Option<f64>,
}

#[derive(Clone, Copy, Debug)]
struct GlobalPrior {
    h: [f64; 8],
    s: f64,
    lambda_h: f64,
    lambda_s: f64,
}

/// Reprojection problem over a set of pieces.
///
/// Parameter layout: `[h0..h7, s]` (absent when `fixed` is set) followed by
/// `(theta, tx, ty)` per piece.
struct JointProblem<'a> {
    pieces: &'a [ActivePiece],
    fixed: Option<([f64; 8], f64)>,
    prior: Option<GlobalPrior>,
    delta: f64,
    lambda_pose: f64,
}

struct Projected {
    p: Point2<f64>,
    q: Point2<f64>,
    w: f64,
}

#[inline]
fn project(h: &[f64; 8], s: f64, pose: (f64, f64, f64), m: Point2<f64>) -> Projected {
    let (sin, cos) = pose.0.sin_cos();
    let (mx, my) = (s * m.x, s * m.y);
    let q = Point2::new(cos * mx - sin * my + pose.1, sin * mx + cos * my + pose.2);
    let w = clamp_w(h[6] * q.x + h[7] * q.y + 1.0);
    let u = h[0] * q.x + h[1] * q.y + h[2];
    let v = h[3] * q.x + h[4] * q.y + h[5];
    Projected {
        p: Point2::new(u / w, v / w),
        q,
        w,
    }
}

impl JointProblem<'_> {
    fn global_len(&self) -> usize {
        if self.fixed.is_some() {
            0
        } else {
            9
        }
    }

    fn n_data_rows(&self) -> usize {
        self.pieces.iter().map(|p| 2 * p.model.len()).sum()
    }

    fn n_prior_rows(&self) -> usize {
        let global = if self.prior.is_some() && self.fixed.is_none() { 9 } else { 0 };
        global + self.pieces.iter().filter(|p| p.theta_prior.is_some()).count()
    }

    fn globals(&self, x: &DVector<f64>) -> ([f64; 8], f64) {
        match self.fixed {
            Some(g) => g,
            None => {
                let mut h = [0.0; 8];
                h.copy_from_slice(&x.as_slice()[..8]);
                (h, x[8])
            }
        }
    }

    fn pose(&self, x: &DVector<f64>, k: usize) -> (f64, f64, f64) {
        let o = self.global_len() + 3 * k;
        (x[o], x[o + 1], x[o + 2])
    }

    fn pack(&self, h: &[f64; 8], s: f64, poses: &[(f64, f64, f64)]) -> DVector<f64> {
        let mut x = DVector::zeros(self.num_params());
        if self.fixed.is_none() {
            for (i, v) in h.iter().enumerate() {
                x[i] = *v;
            }
            x[8] = s;
        }
        for (k, p) in poses.iter().enumerate() {
            let o = self.global_len() + 3 * k;
            x[o] = p.0;
            x[o + 1] = p.1;
            x[o + 2] = p.2;
        }
        x
    }
}

impl NllsProblem for JointProblem<'_> {
    fn num_params(&self) -> usize {
        self.global_len() + 3 * self.pieces.len()
    }

    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let (h, s) = self.globals(x);
        let mut r = DVector::zeros(self.n_data_rows() + self.n_prior_rows());
        let mut row = 0;
        for (k, piece) in self.pieces.iter().enumerate() {
            let pose = self.pose(x, k);
            for (m, d) in piece.model.iter().zip(&piece.detected_n) {
                let pr = project(&h, s, pose, *m);
                r[row] = pr.p.x - d.x;
                r[row + 1] = pr.p.y - d.y;
                row += 2;
            }
        }
        if let (Some(prior), None) = (self.prior, self.fixed) {
            let sh = prior.lambda_h.sqrt();
            for i in 0..8 {
                r[row] = sh * (h[i] - prior.h[i]);
                row += 1;
            }
            r[row] = prior.lambda_s.sqrt() * (s - prior.s) / prior.s.abs().max(1e-12);
            row += 1;
        }
        let sp = self.lambda_pose.sqrt();
        for (k, piece) in self.pieces.iter().enumerate() {
            if let Some(theta0) = piece.theta_prior {
                r[row] = sp * wrap_angle(self.pose(x, k).0 - theta0);
                row += 1;
            }
        }
        r
    }

    fn jacobian(&self, x: &DVector<f64>) -> DMatrix<f64> {
        let (h, s) = self.globals(x);
        let g = self.global_len();
        let mut j = DMatrix::zeros(self.n_data_rows() + self.n_prior_rows(), self.num_params());
        let mut row = 0;
        for (k, piece) in self.pieces.iter().enumerate() {
            let pose = self.pose(x, k);
            let (sin, cos) = pose.0.sin_cos();
            let col = g + 3 * k;
            for m in &piece.model {
                let pr = project(&h, s, pose, *m);
                let (px, py, qx, qy, w) = (pr.p.x, pr.p.y, pr.q.x, pr.q.y, pr.w);
                // d(p)/d(q)
                let jq = [
                    [(h[0] - px * h[6]) / w, (h[1] - px * h[7]) / w],
                    [(h[3] - py * h[6]) / w, (h[4] - py * h[7]) / w],
                ];
                let dq_dtheta = (-(qy - pose.2), qx - pose.1);
                let dq_ds = (cos * m.x - sin * m.y, sin * m.x + cos * m.y);
                for (axis, jrow) in jq.iter().enumerate() {
                    let r = row + axis;
                    if self.fixed.is_none() {
                        let p_axis = if axis == 0 { px } else { py };
                        let base = 3 * axis;
                        j[(r, base)] = qx / w;
                        j[(r, base + 1)] = qy / w;
                        j[(r, base + 2)] = 1.0 / w;
                        j[(r, 6)] = -p_axis * qx / w;
                        j[(r, 7)] = -p_axis * qy / w;
                        j[(r, 8)] = jrow[0] * dq_ds.0 + jrow[1] * dq_ds.1;
                    }
                    j[(r, col)] = jrow[0] * dq_dtheta.0 + jrow[1] * dq_dtheta.1;
                    j[(r, col + 1)] = jrow[0];
                    j[(r, col + 2)] = jrow[1];
                }
                row += 2;
            }
        }
        if let (Some(prior), None) = (self.prior, self.fixed) {
            let sh = prior.lambda_h.sqrt();
            for i in 0..8 {
                j[(row, i)] = sh;
                row += 1;
            }
            j[(row, 8)] = prior.lambda_s.sqrt() / prior.s.abs().max(1e-12);
            row += 1;
        }
        let sp = self.lambda_pose.sqrt();
        for (k, piece) in self.pieces.iter().enumerate() {
            if piece.theta_prior.is_some() {
                j[(row, g + 3 * k)] = sp;
                row += 1;
            }
        }
        j
    }

    fn kernel(&self, row: usize) -> RobustKernel {
        if row < self.n_data_rows() {
            RobustKernel::Huber { delta: self.delta }
        } else {
            RobustKernel::None
        }
    }
}

/// Rigid 2-D fit of `src` onto `dst` (rotation + translation only).
fn procrustes(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<(f64, f64, f64)> {
    let n = src.len();
    if n == 0 || n != dst.len() {
        return None;
    }
    let nf = n as f64;
    let (mut sx, mut sy, mut dx, mut dy) = (0.0, 0.0, 0.0, 0.0);
    for (a, b) in src.iter().zip(dst) {
        sx += a.x;
        sy += a.y;
        dx += b.x;
        dy += b.y;
    }
    let (sx, sy, dx, dy) = (sx / nf, sy / nf, dx / nf, dy / nf);
    let (mut dot, mut crs) = (0.0, 0.0);
    for (a, b) in src.iter().zip(dst) {
        let (ax, ay) = (a.x - sx, a.y - sy);
        let (bx, by) = (b.x - dx, b.y - dy);
        dot += ax * bx + ay * by;
        crs += ax * by - ay * bx;
    }
    let theta = crs.atan2(dot);
    let (sin, cos) = theta.sin_cos();
    let tx = dx - (cos * sx - sin * sy);
    let ty = dy - (sin * sx + cos * sy);
    theta.is_finite().then_some((theta, tx, ty))
}

fn apply_h(h: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = h * Vector3::new(p.x, p.y, 1.0);
    let w = clamp_w(v[2]);
    Point2::new(v[0] / w, v[1] / w)
}

/// Best hypothesis of one piece under a fixed homography and scale.
struct PieceFit {
    piece: ActivePiece,
    pose: (f64, f64, f64),
    cost: f64,
}

#[derive(Clone, Debug, Default)]
pub struct BundleAdjuster {
    pub params: SolverParams,
}

impl BundleAdjuster {
    pub fn new(params: SolverParams) -> Self {
        Self { params }
    }

    pub fn solve(&self, inputs: &BaInputs) -> SolveOutcome {
        self.solve_with_mode(inputs, SolveMode::Full)
    }

    /// Solve one frame. Never fails: degraded frames return the warm start
    /// (or identity) with zero tracking quality and `report.failure` set.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "debug", skip_all, fields(pieces = inputs.pieces.len(), mode = ?mode))
    )]
    pub fn solve_with_mode(&self, inputs: &BaInputs, mode: SolveMode) -> SolveOutcome {
        let start = Instant::now();
        let used_warm_start = inputs.warm_start.is_some();
        let pieces = self.usable_pieces(&inputs.pieces);

        if pieces.len() < self.params.min_pieces {
            debug!("{} usable pieces, need {}", pieces.len(), self.params.min_pieces);
            return self.fallback(
                inputs,
                SolveFailure::TooFewPieces {
                    visible: pieces.len(),
                    required: self.params.min_pieces,
                },
                start,
            );
        }

        let all_px: Vec<Point2<f64>> = pieces.iter().flat_map(|p| p.detected.iter().copied()).collect();
        let t = normalizing_transform(&all_px);
        let Some(t_inv) = t.try_inverse() else {
            return self.fallback(inputs, SolveFailure::Initialization, start);
        };
        let delta = self.params.huber_px * t[(0, 0)];

        let mode = match (mode, &inputs.warm_start) {
            (SolveMode::PosesOnly, None) => {
                warn!("poses-only solve without a warm start, solving everything");
                SolveMode::Full
            }
            (m, _) => m,
        };

        let result = match mode {
            SolveMode::PosesOnly => self.solve_poses_only(inputs, &pieces, &t, delta),
            SolveMode::Full => self.solve_full(inputs, &pieces, &t, delta),
        };
        let Some((h_n, s, fits, lm_report, outer)) = result else {
            return self.fallback(inputs, SolveFailure::Initialization, start);
        };

        let h_px = Homography::new(t_inv * Homography::from_params8(&h_n).h);
        let Some(h_px) = h_px.normalized().filter(|h| h.is_finite() && s.is_finite()) else {
            return self.fallback(inputs, SolveFailure::NotConverged, start);
        };

        let mut solution = BaSolution::identity();
        solution.h = h_px;
        solution.scale = s;
        for fit in &fits {
            let pose = Pose::new(wrap_angle(fit.pose.0), fit.pose.1, fit.pose.2);
            let err = fit
                .piece
                .model
                .iter()
                .zip(&fit.piece.detected_px)
                .map(|(m, d)| {
                    let q = pose.apply(Point2::new(s * m.x, s * m.y));
                    (h_px.apply(q) - *d).norm()
                })
                .sum::<f64>()
                / fit.piece.model.len() as f64;
            solution.poses.insert(fit.piece.class_id, pose);
            solution.errors.insert(fit.piece.class_id, err);
            solution.correspondences.insert(fit.piece.class_id, fit.piece.correspondence);
        }
        let optimization_ms = start.elapsed().as_secs_f64() * 1000.0;
        solution.timings.insert("ba_optimize".into(), optimization_ms);

        let mut report = BaReport {
            converged: lm_report.0,
            iterations: lm_report.1,
            final_cost: lm_report.2,
            used_warm_start,
            optimization_ms,
            outer_iterations: outer,
            failure: None,
        };
        if !report.final_cost.is_finite() {
            warn!("joint refinement diverged after {} iterations", report.iterations);
            return self.fallback_with(inputs, SolveFailure::NotConverged, report);
        }
        if !report.converged {
            // best iterate so far; the mean-error gate and per-piece rejection decide
            debug!(
                "joint refinement used its {} iteration budget, cost {:.3e}",
                report.iterations, report.final_cost
            );
        }
        if solution.mean_error().is_some_and(|e| e > self.params.max_mean_error_px) {
            warn!(
                "solution rejected, mean error {:.2}px",
                solution.mean_error().unwrap_or_default()
            );
            return self.fallback_with(inputs, SolveFailure::ErrorTooLarge, report);
        }
        solution.tracking_quality = 1.0;
        report.failure = None;
        SolveOutcome { solution, report }
    }

    /// Drop malformed observations and duplicate class ids (first one wins).
    fn usable_pieces<'a>(&self, pieces: &'a [PieceObservation]) -> Vec<&'a PieceObservation> {
        let mut seen = BTreeSet::new();
        let mut out: Vec<&PieceObservation> = Vec::new();
        for p in pieces {
            let finite = p.detected.iter().chain(&p.model).all(|v| v.x.is_finite() && v.y.is_finite());
            if p.class_id >= NUM_CLASSES || p.model.len() < 3 || p.detected.len() != p.model.len() || !finite {
                warn!("skipping malformed observation for class {}", p.class_id);
                continue;
            }
            if !seen.insert(p.class_id) {
                warn!("skipping duplicate observation for class {}", p.class_id);
                continue;
            }
            out.push(p);
        }
        out.sort_by_key(|p| p.class_id);
        out
    }

    fn theta_prior(&self, inputs: &BaInputs, class_id: usize) -> Option<f64> {
        inputs
            .warm_start
            .as_ref()
            .and_then(|w| w.poses.get(&class_id))
            .map(|p| p.theta)
    }

    /// Try every hypothesis of one piece with a pose-only refinement.
    fn best_candidate(
        &self,
        obs: &PieceObservation,
        t: &Matrix3<f64>,
        h_n: &[f64; 8],
        s: f64,
        theta_prior: Option<f64>,
        delta: f64,
    ) -> Option<PieceFit> {
        let h_inv = Homography::from_params8(h_n).h.try_inverse()?;
        let opts = SolveOptions {
            max_iters: self.params.pose_iterations,
            ..self.params.lm
        };
        let mut best: Option<PieceFit> = None;
        for cand in enumerate_candidates(&obs.model, &obs.detected, obs.shape) {
            let piece = self.activate(obs.class_id, &cand, t, theta_prior);
            let plane: Vec<Point2<f64>> = piece.detected_n.iter().map(|d| apply_h(&h_inv, d)).collect();
            let scaled: Vec<Point2<f64>> = piece.model.iter().map(|m| Point2::new(s * m.x, s * m.y)).collect();
            let Some(init) = procrustes(&scaled, &plane) else {
                continue;
            };
            let pieces = [piece];
            let problem = JointProblem {
                pieces: &pieces,
                fixed: Some((*h_n, s)),
                prior: None,
                delta,
                lambda_pose: self.params.lambda_pose,
            };
            let x0 = problem.pack(h_n, s, &[init]);
            let (x, report) = solve_lm(&problem, x0, &opts);
            let cost = report.final_cost;
            if !cost.is_finite() {
                continue;
            }
            let pose = problem.pose(&x, 0);
            let [piece] = pieces;
            let better = match &best {
                None => true,
                Some(b) => cost < b.cost - self.params.tie_tolerance * b.cost.max(1e-300) - 1e-15,
            };
            if better {
                best = Some(PieceFit { piece, pose, cost });
            }
        }
        best
    }

    fn activate(&self, class_id: usize, cand: &Candidate, t: &Matrix3<f64>, theta_prior: Option<f64>) -> ActivePiece {
        ActivePiece {
            class_id,
            correspondence: cand.correspondence,
            model: cand.model.clone(),
            detected_n: cand.detected.iter().map(|d| apply_h(t, d)).collect(),
            detected_px: cand.detected.clone(),
            theta_prior,
        }
    }

    fn select_all(
        &self,
        inputs: &BaInputs,
        pieces: &[&PieceObservation],
        t: &Matrix3<f64>,
        h_n: &[f64; 8],
        s: f64,
        delta: f64,
    ) -> Option<Vec<PieceFit>> {
        pieces
            .iter()
            .map(|obs| self.best_candidate(obs, t, h_n, s, self.theta_prior(inputs, obs.class_id), delta))
            .collect()
    }

    fn solve_poses_only(
        &self,
        inputs: &BaInputs,
        pieces: &[&PieceObservation],
        t: &Matrix3<f64>,
        delta: f64,
    ) -> Option<([f64; 8], f64, Vec<PieceFit>, (bool, usize, f64), usize)> {
        let warm = inputs.warm_start.as_ref()?;
        let h_n = Homography::new(t * warm.h.h).normalized()?.params8();
        let fits = self.select_all(inputs, pieces, t, &h_n, warm.scale, delta)?;
        let cost = fits.iter().map(|f| f.cost).sum();
        Some((h_n, warm.scale, fits, (true, 0, cost), 1))
    }

    /// Cold start: pick the anchor hypothesis that explains all pieces best.
    fn cold_init(
        &self,
        inputs: &BaInputs,
        pieces: &[&PieceObservation],
        t: &Matrix3<f64>,
        delta: f64,
    ) -> Option<([f64; 8], Vec<PieceFit>)> {
        let anchor = pieces
            .iter()
            .find(|p| p.model.len() == 4 && !p.shape.has_mirrored_sibling())
            .or_else(|| pieces.iter().find(|p| p.model.len() == 4))
            .or_else(|| pieces.first())?;
        let mut best: Option<(f64, [f64; 8], Vec<PieceFit>)> = None;
        for cand in enumerate_candidates(&anchor.model, &anchor.detected, anchor.shape) {
            let detected_n: Vec<Point2<f64>> = cand.detected.iter().map(|d| apply_h(t, d)).collect();
            let Some(h_a) = estimate_affine(&cand.model, &detected_n) else {
                continue;
            };
            let h_n = h_a.params8();
            let Some(fits) = self.select_all(inputs, pieces, t, &h_n, 1.0, delta) else {
                continue;
            };
            let total: f64 = fits.iter().map(|f| f.cost).sum();
            let better = match &best {
                None => true,
                Some((b, _, _)) => total < b - self.params.tie_tolerance * b.max(1e-300) - 1e-15,
            };
            if better {
                best = Some((total, h_n, fits));
            }
        }
        best.map(|(_, h, fits)| (h, fits))
    }

    fn solve_full(
        &self,
        inputs: &BaInputs,
        pieces: &[&PieceObservation],
        t: &Matrix3<f64>,
        delta: f64,
    ) -> Option<([f64; 8], f64, Vec<PieceFit>, (bool, usize, f64), usize)> {
        let (mut h_n, mut s, mut fits, prior) = match &inputs.warm_start {
            Some(warm) => {
                let h_n = Homography::new(t * warm.h.h).normalized()?.params8();
                let fits = self.select_all(inputs, pieces, t, &h_n, warm.scale, delta)?;
                let prior = GlobalPrior {
                    h: h_n,
                    s: warm.scale,
                    lambda_h: self.params.lambda_h,
                    lambda_s: self.params.lambda_s,
                };
                (h_n, warm.scale, fits, prior)
            }
            None => {
                let (h_n, fits) = self.cold_init(inputs, pieces, t, delta)?;
                let prior = GlobalPrior {
                    h: h_n,
                    s: 1.0,
                    lambda_h: self.params.lambda_gauge,
                    lambda_s: self.params.lambda_gauge,
                };
                (h_n, 1.0, fits, prior)
            }
        };

        let opts = SolveOptions {
            max_iters: self.params.max_iterations,
            ..self.params.lm
        };
        let mut last = (false, 0usize, f64::INFINITY);
        let mut outer = 0;
        while outer < self.params.max_outer_iterations.max(1) {
            outer += 1;
            let active: Vec<ActivePiece> = fits.iter().map(|f| f.piece.clone()).collect();
            let poses: Vec<(f64, f64, f64)> = fits.iter().map(|f| f.pose).collect();
            let problem = JointProblem {
                pieces: &active,
                fixed: None,
                prior: Some(prior),
                delta,
                lambda_pose: self.params.lambda_pose,
            };
            let x0 = problem.pack(&h_n, s, &poses);
            let (x, report) = solve_lm(&problem, x0, &opts);
            let (h_new, s_new) = problem.globals(&x);
            h_n = h_new;
            s = s_new;
            for (k, fit) in fits.iter_mut().enumerate() {
                fit.pose = problem.pose(&x, k);
            }
            last = (report.converged, report.iterations, report.final_cost);

            let reselected = self.select_all(inputs, pieces, t, &h_n, s, delta)?;
            let unchanged = reselected
                .iter()
                .zip(&fits)
                .all(|(a, b)| a.piece.correspondence == b.piece.correspondence);
            if unchanged {
                break;
            }
            debug!("correspondences changed, re-refining (round {outer})");
            fits = reselected;
        }
        Some((h_n, s, fits, last, outer))
    }

    fn fallback(&self, inputs: &BaInputs, failure: SolveFailure, start: Instant) -> SolveOutcome {
        let report = BaReport {
            used_warm_start: inputs.warm_start.is_some(),
            optimization_ms: start.elapsed().as_secs_f64() * 1000.0,
            ..BaReport::default()
        };
        self.fallback_with(inputs, failure, report)
    }

    fn fallback_with(&self, inputs: &BaInputs, failure: SolveFailure, mut report: BaReport) -> SolveOutcome {
        let mut solution = BaSolution::identity();
        if let Some(warm) = &inputs.warm_start {
            solution.h = warm.h;
            solution.scale = warm.scale;
            solution.poses = warm.poses.clone();
        }
        solution.tracking_quality = 0.0;
        solution.timings.insert("ba_optimize".into(), report.optimization_ms);
        report.failure = Some(failure);
        SolveOutcome { solution, report }
    }
}
