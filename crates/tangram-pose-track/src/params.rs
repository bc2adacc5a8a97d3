use serde::{Deserialize, Serialize};

use crate::lm::SolveOptions;

/// Correspondence search and joint refinement settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Frames with fewer visible pieces return a zero-quality fallback.
    pub min_pieces: usize,
    /// Iteration budget of the joint refinement.
    pub max_iterations: usize,
    /// Upper bound on assignment/refinement alternations.
    pub max_outer_iterations: usize,
    /// Iteration budget of the per-candidate pose refinement.
    pub pose_iterations: usize,
    /// Huber threshold in pixels.
    pub huber_px: f64,
    /// Weight pulling the homography toward the warm start.
    pub lambda_h: f64,
    /// Weight pulling the scale toward the warm start.
    pub lambda_s: f64,
    /// Weight of the gauge prior used without warm start.
    pub lambda_gauge: f64,
    /// Weight pulling each piece rotation toward its warm-start value.
    pub lambda_pose: f64,
    /// Candidate costs within this relative margin count as a tie.
    pub tie_tolerance: f64,
    /// Mean error (px) above which a converged solve is still rejected.
    pub max_mean_error_px: f64,
    pub lm: SolveOptions,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            min_pieces: 2,
            max_iterations: 100,
            max_outer_iterations: 4,
            pose_iterations: 20,
            huber_px: 3.0,
            lambda_h: 1e-2,
            lambda_s: 1e-2,
            lambda_gauge: 1e-4,
            lambda_pose: 1e-5,
            tie_tolerance: 1e-6,
            max_mean_error_px: 50.0,
            lm: SolveOptions::default(),
        }
    }
}

/// Random-walk Kalman filter noise settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KalmanParams {
    /// Process noise per second, relative to the nominal parameter spread.
    pub process_noise_scale: f64,
    /// Default measurement noise, relative to the nominal parameter spread.
    pub measurement_noise_scale: f64,
    /// Initial covariance, relative to the nominal parameter spread.
    pub initial_covariance_scale: f64,
    /// Rolling window of innovation magnitudes used for the quality score.
    pub innovation_window: usize,
}

impl Default for KalmanParams {
    fn default() -> Self {
        Self {
            process_noise_scale: 0.01,
            measurement_noise_scale: 1e-4,
            initial_covariance_scale: 1e-2,
            innovation_window: 10,
        }
    }
}

/// Fusion and homography-locking policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingParams {
    pub locking_enabled: bool,
    /// Consecutive good frames before the homography locks.
    pub frames_needed_for_lock: usize,
    /// Mean error (px) a frame must stay under to extend the lock streak.
    pub lock_error_threshold: f64,
    /// Mean error (px) that unlocks immediately.
    pub unlock_error_threshold: f64,
    /// A piece is rejected when its error exceeds this multiple of the frame median.
    pub error_rejection_factor: f64,
    /// Median floor (px) for the rejection cutoff.
    pub rejection_floor_px: f64,
    /// Pose-only frame error (px) below which a locked homography is left alone.
    pub h_update_min_error_px: f64,
    /// Relative error improvement a locked-homography correction must bring.
    pub h_update_min_improvement: f64,
    /// Max relative Frobenius change a locked-homography correction may make.
    pub h_update_max_norm: f64,
    /// Smoothing of the per-piece error history.
    pub error_ema_alpha: f64,
    /// Cap on the covariance inflation derived from the error history.
    pub max_covariance_inflation: f64,
    /// Elapsed time assumed for the first predict after a gap or bad timestamp.
    pub default_dt: f64,
    pub solver: SolverParams,
    pub kalman: KalmanParams,
}

impl Default for TrackingParams {
    fn default() -> Self {
        Self {
            locking_enabled: true,
            frames_needed_for_lock: 5,
            lock_error_threshold: 5.0,
            unlock_error_threshold: 15.0,
            error_rejection_factor: 2.0,
            rejection_floor_px: 1.0,
            h_update_min_error_px: 0.5,
            h_update_min_improvement: 0.05,
            h_update_max_norm: 0.10,
            error_ema_alpha: 0.3,
            max_covariance_inflation: 100.0,
            default_dt: 1.0 / 30.0,
            solver: SolverParams::default(),
            kalman: KalmanParams::default(),
        }
    }
}
