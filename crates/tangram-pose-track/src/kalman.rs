//! Random-walk Kalman filter over the homography, the scale and the seven
//! piece poses.
//!
//! State layout (30 entries):
//!
//! ```text
//! [h0 .. h7 | s | theta_0 tx_0 ty_0 | ... | theta_6 tx_6 ty_6]
//! ```
//!
//! Noise is expressed relative to a per-entry nominal magnitude captured at
//! initialization, so one scale factor covers homography entries, radians
//! and plane translations alike.

use std::collections::{BTreeMap, VecDeque};

use log::debug;
use nalgebra::{DMatrix, DVector, SMatrix, SVector};
use tangram_pose_core::{wrap_angle, Homography, Pose, NUM_CLASSES};

use crate::params::KalmanParams;

pub const H_PARAMS: usize = 8;
pub const SCALE_INDEX: usize = H_PARAMS;
pub const POSE_OFFSET: usize = H_PARAMS + 1;
pub const STATE_DIM: usize = POSE_OFFSET + 3 * NUM_CLASSES;

pub type StateVector = SVector<f64, STATE_DIM>;
pub type StateMatrix = SMatrix<f64, STATE_DIM, STATE_DIM>;

/// Index of the rotation entry of `class_id`.
#[inline]
pub fn pose_index(class_id: usize) -> usize {
    POSE_OFFSET + 3 * class_id
}

/// Classes that have been seen at least once since the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ObservedSet(u8);

impl ObservedSet {
    pub fn insert(&mut self, class_id: usize) {
        if class_id < NUM_CLASSES {
            self.0 |= 1 << class_id;
        }
    }

    pub fn contains(&self, class_id: usize) -> bool {
        class_id < NUM_CLASSES && self.0 & (1 << class_id) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..NUM_CLASSES).filter(move |&c| self.contains(c))
    }
}

/// Flatten a solution into the state layout. Unlisted classes stay zero.
pub fn pack_state(h: &Homography, scale: f64, poses: &BTreeMap<usize, Pose>) -> StateVector {
    let h = h.normalized().unwrap_or(*h);
    let mut x = StateVector::zeros();
    for (i, v) in h.params8().iter().enumerate() {
        x[i] = *v;
    }
    x[SCALE_INDEX] = scale;
    for (&class_id, pose) in poses.iter().filter(|(c, _)| **c < NUM_CLASSES) {
        let k = pose_index(class_id);
        x[k] = pose.theta;
        x[k + 1] = pose.tx;
        x[k + 2] = pose.ty;
    }
    x
}

/// Inverse of [`pack_state`], restricted to the `observed` classes.
pub fn unpack_state(x: &StateVector, observed: ObservedSet) -> (Homography, f64, BTreeMap<usize, Pose>) {
    let h = Homography::from_params8(&x.as_slice()[..H_PARAMS]);
    let poses = observed
        .iter()
        .map(|c| {
            let k = pose_index(c);
            (c, Pose::new(wrap_angle(x[k]), x[k + 1], x[k + 2]))
        })
        .collect();
    (h, x[SCALE_INDEX], poses)
}

/// Per-entry magnitudes used to scale noise terms.
fn nominal_magnitudes(h: &Homography, scale: f64) -> StateVector {
    let p = h.normalized().unwrap_or(*h).params8();
    let lin = ((p[0] * p[0] + p[1] * p[1] + p[3] * p[3] + p[4] * p[4]) / 2.0)
        .sqrt()
        .max(1e-6);
    let trans = p[2].abs().max(p[5].abs()).max(lin);
    let persp = lin / trans;
    let s = scale.abs().max(1e-6);

    let mut n = StateVector::zeros();
    for i in [0, 1, 3, 4] {
        n[i] = lin;
    }
    n[2] = trans;
    n[5] = trans;
    n[6] = persp;
    n[7] = persp;
    n[SCALE_INDEX] = s;
    for c in 0..NUM_CLASSES {
        let k = pose_index(c);
        n[k] = 1.0;
        n[k + 1] = s;
        n[k + 2] = s;
    }
    n
}

#[derive(Clone, Debug)]
pub struct KalmanTracker {
    params: KalmanParams,
    x: StateVector,
    p: StateMatrix,
    nominal: StateVector,
    observed: ObservedSet,
    initialized: bool,
    last_timestamp: Option<f64>,
    innovations: VecDeque<f64>,
}

impl KalmanTracker {
    pub fn new(params: KalmanParams) -> Self {
        Self {
            params,
            x: StateVector::zeros(),
            p: StateMatrix::zeros(),
            nominal: StateVector::repeat(1.0),
            observed: ObservedSet::default(),
            initialized: false,
            last_timestamp: None,
            innovations: VecDeque::new(),
        }
    }

    pub fn params(&self) -> &KalmanParams {
        &self.params
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn observed(&self) -> ObservedSet {
        self.observed
    }

    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    pub fn set_last_timestamp(&mut self, timestamp: f64) {
        self.last_timestamp = Some(timestamp);
    }

    pub fn state_vector(&self) -> &StateVector {
        &self.x
    }

    pub fn covariance(&self) -> &StateMatrix {
        &self.p
    }

    pub fn initialize(&mut self, h: &Homography, scale: f64, poses: &BTreeMap<usize, Pose>, timestamp: f64) {
        self.x = pack_state(h, scale, poses);
        self.nominal = nominal_magnitudes(h, scale);
        self.p = StateMatrix::from_diagonal(&self.variances(self.params.initial_covariance_scale));
        self.observed = ObservedSet::default();
        for &c in poses.keys() {
            self.observed.insert(c);
        }
        self.initialized = true;
        self.last_timestamp = Some(timestamp);
        self.innovations.clear();
        debug!("kalman initialized with {} classes", self.observed.len());
    }

    /// `scale * nominal^2`, entry-wise.
    fn variances(&self, scale: f64) -> StateVector {
        self.nominal.component_mul(&self.nominal) * scale
    }

    /// Default measurement variances for every state entry.
    pub fn default_measurement_variance(&self) -> StateVector {
        self.variances(self.params.measurement_noise_scale)
    }

    /// Random-walk propagation: mean unchanged, covariance grows with `dt`.
    pub fn predict(&mut self, dt: f64) {
        if !self.initialized {
            return;
        }
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        let q = self.variances(self.params.process_noise_scale * dt);
        for i in 0..STATE_DIM {
            self.p[(i, i)] += q[i];
        }
    }

    /// Correct with a measured solution.
    ///
    /// Only classes present in `poses` are corrected. `variance`, when given,
    /// holds per-entry measurement variances in the state layout.
    pub fn update(
        &mut self,
        h: &Homography,
        scale: f64,
        poses: &BTreeMap<usize, Pose>,
        variance: Option<&StateVector>,
    ) {
        if !self.initialized {
            return;
        }
        let z_full = pack_state(h, scale, poses);
        let r_full = variance.copied().unwrap_or_else(|| self.default_measurement_variance());

        // First sightings are seeded, not corrected.
        let mut rows: Vec<usize> = (0..POSE_OFFSET).collect();
        for &c in poses.keys().filter(|c| **c < NUM_CLASSES) {
            let k = pose_index(c);
            if self.observed.contains(c) {
                rows.extend([k, k + 1, k + 2]);
            } else {
                for i in k..k + 3 {
                    self.x[i] = z_full[i];
                    for j in 0..STATE_DIM {
                        self.p[(i, j)] = 0.0;
                        self.p[(j, i)] = 0.0;
                    }
                    self.p[(i, i)] = self.nominal[i].powi(2) * self.params.initial_covariance_scale;
                }
                self.observed.insert(c);
            }
        }

        let m = rows.len();
        let mut y = DVector::zeros(m);
        let mut hsel = DMatrix::zeros(m, STATE_DIM);
        let mut r = DMatrix::zeros(m, m);
        for (row, &i) in rows.iter().enumerate() {
            let mut d = z_full[i] - self.x[i];
            if i >= POSE_OFFSET && (i - POSE_OFFSET) % 3 == 0 {
                d = wrap_angle(d);
            }
            y[row] = d;
            hsel[(row, i)] = 1.0;
            r[(row, row)] = r_full[i].max(1e-18);
        }

        let p = DMatrix::from_column_slice(STATE_DIM, STATE_DIM, self.p.as_slice());
        let ph_t = &p * hsel.transpose();
        let s = &hsel * &ph_t + &r;
        let Some(s_chol) = s.cholesky() else {
            debug!("innovation covariance not positive definite, skipping update");
            return;
        };
        let s_inv = s_chol.inverse();
        let k = &ph_t * &s_inv;

        let dx = &k * &y;
        for i in 0..STATE_DIM {
            self.x[i] += dx[i];
        }
        for c in self.observed.iter() {
            let i = pose_index(c);
            self.x[i] = wrap_angle(self.x[i]);
        }

        // Joseph form
        let ikh = DMatrix::identity(STATE_DIM, STATE_DIM) - &k * &hsel;
        let p_new = &ikh * &p * ikh.transpose() + &k * &r * k.transpose();
        let p_sym = (&p_new + p_new.transpose()) * 0.5;
        self.p = StateMatrix::from_column_slice(p_sym.as_slice());

        let nis = (y.transpose() * &s_inv * &y)[(0, 0)];
        let magnitude = (nis.max(0.0) / m as f64).sqrt();
        self.innovations.push_back(magnitude);
        while self.innovations.len() > self.params.innovation_window.max(1) {
            self.innovations.pop_front();
        }
    }

    /// Fused homography, scale and poses of every observed class.
    pub fn state(&self) -> (Homography, f64, BTreeMap<usize, Pose>) {
        unpack_state(&self.x, self.observed)
    }

    /// `1 / (1 + mean innovation magnitude)` over the rolling window.
    pub fn tracking_quality(&self) -> f64 {
        if !self.initialized {
            return 0.0;
        }
        if self.innovations.is_empty() {
            return 1.0;
        }
        let mean = self.innovations.iter().sum::<f64>() / self.innovations.len() as f64;
        if mean.is_finite() {
            (1.0 / (1.0 + mean)).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.params.clone());
    }
}
