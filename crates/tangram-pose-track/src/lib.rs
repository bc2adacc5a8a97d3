//! Pose solving and temporal tracking for tangram pieces.
//!
//! - [`enumerate_candidates`]: discrete vertex-correspondence hypotheses.
//! - [`BundleAdjuster`]: joint homography/scale/pose refinement with
//!   per-piece hypothesis selection.
//! - [`KalmanTracker`]: random-walk filter over the 30-entry state.
//! - [`TrackedBundleAdjuster`]: per-frame fusion, outlier rejection and
//!   homography locking.
//!
//! ```no_run
//! use tangram_pose_core::BaInputs;
//! use tangram_pose_track::{TrackedBundleAdjuster, TrackingParams};
//!
//! let mut tracker = TrackedBundleAdjuster::new(TrackingParams::default());
//! let inputs = BaInputs::default();
//! let solution = tracker.process_frame(&inputs, 0.0);
//! assert_eq!(solution.tracking_quality, 0.0);
//! ```

mod candidates;
mod kalman;
mod lm;
mod lock;
mod params;
mod solver;
mod tracked;

pub use candidates::{apply_correspondence, enumerate_candidates, Candidate};
pub use kalman::{
    pack_state, pose_index, unpack_state, KalmanTracker, ObservedSet, StateMatrix, StateVector,
    H_PARAMS, POSE_OFFSET, SCALE_INDEX, STATE_DIM,
};
pub use lm::{solve_lm, NllsProblem, RobustKernel, SolveOptions, SolveReport};
pub use lock::{LockHysteresis, LockTransition};
pub use params::{KalmanParams, SolverParams, TrackingParams};
pub use solver::{BaReport, BundleAdjuster, SolveFailure, SolveMode, SolveOutcome};
pub use tracked::{accepted_classes, TrackedBundleAdjuster};
