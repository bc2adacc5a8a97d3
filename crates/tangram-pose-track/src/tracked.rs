//! Per-frame fusion of solver output with the Kalman tracker, plus
//! homography locking.

use std::collections::BTreeMap;
use std::time::Instant;

use log::{debug, warn};
use nalgebra::Matrix3;
use tangram_pose_core::{BaInputs, BaSolution, Homography, Pose, Timings, WarmStart};

use crate::kalman::{pose_index, KalmanTracker, StateVector};
use crate::lock::{LockHysteresis, LockTransition};
use crate::params::TrackingParams;
use crate::solver::{BundleAdjuster, SolveMode, SolveOutcome};

fn ms_since(t: Instant) -> f64 {
    t.elapsed().as_secs_f64() * 1000.0
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}

/// `H * diag(s, s, 1)`: the map from unscaled model coordinates to the image.
fn scaled_homography(h: &Homography, scale: f64) -> Homography {
    Homography::new(h.h * Matrix3::new(scale, 0.0, 0.0, 0.0, scale, 0.0, 0.0, 0.0, 1.0))
}

/// Classes whose error passes the outlier cutoff
/// `factor * max(median, floor)`.
pub fn accepted_classes(errors: &BTreeMap<usize, f64>, factor: f64, floor_px: f64) -> Vec<usize> {
    let mut values: Vec<f64> = errors.values().copied().filter(|e| e.is_finite()).collect();
    let Some(med) = median(&mut values) else {
        return Vec::new();
    };
    let cutoff = factor * med.max(floor_px);
    errors
        .iter()
        .filter(|(_, e)| e.is_finite() && **e <= cutoff)
        .map(|(c, _)| *c)
        .collect()
}

/// Solver + Kalman tracker + lock state for one video stream.
#[derive(Clone, Debug)]
pub struct TrackedBundleAdjuster {
    params: TrackingParams,
    solver: BundleAdjuster,
    kalman: KalmanTracker,
    lock: LockHysteresis,
    locked_h: Option<(Homography, f64)>,
    error_ema: BTreeMap<usize, f64>,
    last_output: Option<BaSolution>,
    last_used_warm_start: bool,
    last_optimization_ms: f64,
}

impl TrackedBundleAdjuster {
    pub fn new(params: TrackingParams) -> Self {
        Self {
            solver: BundleAdjuster::new(params.solver.clone()),
            kalman: KalmanTracker::new(params.kalman.clone()),
            lock: LockHysteresis::new(
                params.frames_needed_for_lock,
                params.lock_error_threshold,
                params.unlock_error_threshold,
            ),
            locked_h: None,
            error_ema: BTreeMap::new(),
            last_output: None,
            last_used_warm_start: false,
            last_optimization_ms: 0.0,
            params,
        }
    }

    pub fn params(&self) -> &TrackingParams {
        &self.params
    }

    pub fn has_initialized_tracker(&self) -> bool {
        self.kalman.is_initialized()
    }

    pub fn is_homography_locked(&self) -> bool {
        self.locked_h.is_some()
    }

    pub fn last_used_warm_start(&self) -> bool {
        self.last_used_warm_start
    }

    pub fn last_optimization_time_ms(&self) -> f64 {
        self.last_optimization_ms
    }

    pub fn kalman(&self) -> &KalmanTracker {
        &self.kalman
    }

    pub fn reset(&mut self) {
        self.kalman.reset();
        self.lock.reset();
        self.locked_h = None;
        self.error_ema.clear();
        self.last_output = None;
        self.last_used_warm_start = false;
        self.last_optimization_ms = 0.0;
    }

    /// Changing the locking policy always starts over from a clean state.
    pub fn set_locking_enabled(&mut self, enabled: bool) {
        self.params.locking_enabled = enabled;
        self.reset();
    }

    fn warm_start(&self, inputs: &BaInputs) -> Option<WarmStart> {
        if let Some(w) = &inputs.warm_start {
            return Some(w.clone());
        }
        if !self.kalman.is_initialized() {
            return None;
        }
        let (h, scale, poses) = self.kalman.state();
        let (h, scale) = self.locked_h.unwrap_or((h, scale));
        Some(WarmStart { h, scale, poses })
    }

    /// Measurement variances with per-class inflation from the error history.
    fn adaptive_variance(&self) -> StateVector {
        let mut var = self.kalman.default_measurement_variance();
        let floor = self.params.rejection_floor_px.max(1e-6);
        for (&c, &ema) in &self.error_ema {
            let inflation = (ema.max(floor) / floor)
                .powi(2)
                .clamp(1.0, self.params.max_covariance_inflation.max(1.0));
            let k = pose_index(c);
            for i in k..k + 3 {
                var[i] *= inflation;
            }
        }
        var
    }

    fn update_error_history(&mut self, errors: &BTreeMap<usize, f64>) {
        let alpha = self.params.error_ema_alpha.clamp(0.0, 1.0);
        for (&c, &e) in errors.iter().filter(|(_, e)| e.is_finite()) {
            self.error_ema
                .entry(c)
                .and_modify(|v| *v = alpha * e + (1.0 - alpha) * *v)
                .or_insert(e);
        }
    }

    /// Try to nudge a locked homography; returns the replacement outcome if accepted.
    fn try_locked_correction(&self, inputs: &BaInputs, current: &SolveOutcome) -> Option<SolveOutcome> {
        let (locked, locked_scale) = self.locked_h?;
        let before = current.solution.mean_error()?;
        if before < self.params.h_update_min_error_px {
            return None;
        }
        let candidate = self.solver.solve_with_mode(inputs, SolveMode::Full);
        if !candidate.is_success() {
            return None;
        }
        let after = candidate.solution.mean_error()?;
        let improvement = (before - after) / before.max(1e-12);
        let change = scaled_homography(&candidate.solution.h, candidate.solution.scale)
            .relative_difference(&scaled_homography(&locked, locked_scale));
        if improvement >= self.params.h_update_min_improvement && change <= self.params.h_update_max_norm {
            debug!("locked homography corrected: improvement {improvement:.3}, change {change:.3}");
            Some(candidate)
        } else {
            debug!("locked homography kept: improvement {improvement:.3}, change {change:.3}");
            None
        }
    }

    fn failure_output(&self, timings: Timings) -> BaSolution {
        let mut out = self.last_output.clone().unwrap_or_else(BaSolution::identity);
        out.errors.clear();
        out.correspondences.clear();
        out.tracking_quality = 0.0;
        out.homography_locked = self.is_homography_locked();
        out.timings = timings;
        out
    }

    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(level = "info", skip_all, fields(pieces = inputs.pieces.len(), timestamp = timestamp))
    )]
    pub fn process_frame(&mut self, inputs: &BaInputs, timestamp: f64) -> BaSolution {
        let total = Instant::now();
        let mut timings = Timings::new();

        let t = Instant::now();
        if self.kalman.is_initialized() {
            let dt = self
                .kalman
                .last_timestamp()
                .map(|last| timestamp - last)
                .filter(|dt| dt.is_finite() && *dt > 0.0)
                .unwrap_or(self.params.default_dt);
            self.kalman.predict(dt);
        }
        timings.insert("predict".into(), ms_since(t));

        let t = Instant::now();
        let warm = self.warm_start(inputs);
        let mode = if self.locked_h.is_some() {
            SolveMode::PosesOnly
        } else {
            SolveMode::Full
        };
        let solve_inputs = BaInputs {
            pieces: inputs.pieces.clone(),
            warm_start: warm,
        };
        let mut outcome = self.solver.solve_with_mode(&solve_inputs, mode);
        self.last_used_warm_start = outcome.report.used_warm_start;
        self.last_optimization_ms = outcome.report.optimization_ms;
        timings.insert("solve".into(), ms_since(t));
        timings.extend(outcome.solution.timings.clone());

        if let Some(failure) = outcome.report.failure {
            warn!("frame at {timestamp:.3}s not solved: {failure:?}");
            if self.lock.break_streak() == LockTransition::Unlocked {
                self.locked_h = None;
            }
            timings.insert("total".into(), ms_since(total));
            return self.failure_output(timings);
        }

        let t = Instant::now();
        if self.locked_h.is_some() {
            if let Some(corrected) = self.try_locked_correction(&solve_inputs, &outcome) {
                self.locked_h = Some((corrected.solution.h, corrected.solution.scale));
                outcome = corrected;
            }
        }
        timings.insert("h_correction".into(), ms_since(t));

        let t = Instant::now();
        let sol = &outcome.solution;
        let accepted = accepted_classes(
            &sol.errors,
            self.params.error_rejection_factor,
            self.params.rejection_floor_px,
        );
        if accepted.len() < sol.errors.len() {
            debug!("rejected {} of {} pieces", sol.errors.len() - accepted.len(), sol.errors.len());
        }
        let measured: BTreeMap<usize, Pose> = accepted
            .iter()
            .filter_map(|c| sol.poses.get(c).map(|p| (*c, *p)))
            .collect();
        if self.kalman.is_initialized() {
            let variance = self.adaptive_variance();
            self.kalman.update(&sol.h, sol.scale, &measured, Some(&variance));
            self.kalman.set_last_timestamp(timestamp);
        } else {
            self.kalman.initialize(&sol.h, sol.scale, &measured, timestamp);
        }
        let errors = sol.errors.clone();
        self.update_error_history(&errors);
        timings.insert("kalman_update".into(), ms_since(t));

        let (mut h, mut scale, poses) = self.kalman.state();
        if self.params.locking_enabled {
            let mean_error = outcome.solution.mean_error().unwrap_or(f64::INFINITY);
            match self.lock.observe(mean_error) {
                LockTransition::Locked => self.locked_h = Some((h, scale)),
                LockTransition::Unlocked => self.locked_h = None,
                LockTransition::Unchanged => {}
            }
        }
        if let Some((lh, ls)) = self.locked_h {
            h = lh;
            scale = ls;
        }

        timings.insert("total".into(), ms_since(total));
        let out = BaSolution {
            h,
            scale,
            poses,
            errors,
            correspondences: outcome.solution.correspondences,
            tracking_quality: self.kalman.tracking_quality(),
            homography_locked: self.locked_h.is_some(),
            timings,
        };
        self.last_output = Some(out.clone());
        out
    }
}
