use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Denominators smaller than this are clamped when dehomogenizing.
pub const MIN_HOMOGENEOUS_W: f64 = 1e-8;

/// Plane-to-image homography, normalized so that `h[(2, 2)] == 1` when possible.
///
/// Serialized as the 9 row-major entries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_row_major(v: [f64; 9]) -> Self {
        Self::new(Matrix3::from_row_slice(&v))
    }

    pub fn to_row_major(&self) -> [f64; 9] {
        let h = &self.h;
        [
            h[(0, 0)],
            h[(0, 1)],
            h[(0, 2)],
            h[(1, 0)],
            h[(1, 1)],
            h[(1, 2)],
            h[(2, 0)],
            h[(2, 1)],
            h[(2, 2)],
        ]
    }

    /// The 8 free parameters (all entries but `h[(2, 2)]`) in row-major order.
    pub fn params8(&self) -> [f64; 8] {
        let r = self.to_row_major();
        [r[0], r[1], r[2], r[3], r[4], r[5], r[6], r[7]]
    }

    pub fn from_params8(p: &[f64]) -> Self {
        Self::new(Matrix3::new(
            p[0], p[1], p[2], //
            p[3], p[4], p[5], //
            p[6], p[7], 1.0,
        ))
    }

    /// Map a plane point to the image, clamping near-zero `w`.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        let w = clamp_w(v[2]);
        Point2::new(v[0] / w, v[1] / w)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().and_then(normalize_homography).map(Self::new)
    }

    /// Rescale so the bottom-right entry is 1.
    pub fn normalized(&self) -> Option<Self> {
        normalize_homography(self.h).map(Self::new)
    }

    /// Frobenius norm of `self - other` relative to the norm of `other`.
    pub fn relative_difference(&self, other: &Homography) -> f64 {
        let denom = other.h.norm().max(1e-12);
        (self.h - other.h).norm() / denom
    }

    pub fn is_finite(&self) -> bool {
        self.h.iter().all(|v| v.is_finite())
    }
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Serialize for Homography {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_row_major().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Homography {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = <[f64; 9]>::deserialize(deserializer)?;
        Ok(Self::from_row_major(v))
    }
}

#[inline]
pub fn clamp_w(w: f64) -> f64 {
    if w.abs() < MIN_HOMOGENEOUS_W {
        if w < 0.0 {
            -MIN_HOMOGENEOUS_W
        } else {
            MIN_HOMOGENEOUS_W
        }
    } else {
        w
    }
}

fn hartley_normalization(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };

    Matrix3::<f64>::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Similarity `T` moving the centroid to the origin with mean distance `sqrt(2)`.
pub fn normalizing_transform(pts: &[Point2<f64>]) -> Matrix3<f64> {
    if pts.is_empty() {
        return Matrix3::identity();
    }
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    hartley_normalization(cx, cy, mean_dist)
}

fn apply_raw(t: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v[0] / v[2], v[1] / v[2])
}

fn normalize_homography(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return None;
    }
    Some(h / s)
}

fn denormalize_homography(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Option<Matrix3<f64>> {
    let t_dst_inv = t_dst.try_inverse()?;
    Some(t_dst_inv * hn * t_src)
}

/// DLT estimate of `H` such that `dst ~ H * src` from `N >= 4` correspondences.
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    if src.len() == 4 {
        let s: &[Point2<f64>; 4] = src.try_into().ok()?;
        let d: &[Point2<f64>; 4] = dst.try_into().ok()?;
        return homography_from_4pt(s, d);
    }

    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let s = apply_raw(&t_src, &src[k]);
        let d = apply_raw(&t_dst, &dst[k]);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);

        // [ -x -y -1   0  0  0   u*x u*y u ]
        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        // [ 0  0  0  -x -y -1   v*x v*y v ]
        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // Right singular vector of the smallest singular value.
    let svd = a.svd(true, true);
    let vt = svd.v_t?;
    let last = vt.nrows().checked_sub(1)?;
    let h = vt.row(last);

    let hn =
        Matrix3::<f64>::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);
    let h_den = denormalize_homography(hn, t_src, t_dst)?;
    let h_den = normalize_homography(h_den)?;
    Some(Homography::new(h_den))
}

/// Exact homography from 4 correspondences with `h33 = 1`.
///
/// Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    // Unknowns: [h11 h12 h13 h21 h22 h23 h31 h32]
    // h11 x + h12 y + h13 - u h31 x - u h32 y = u
    // h21 x + h22 y + h23 - v h31 x - v h32 y = v
    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();

    for k in 0..4 {
        let s = apply_raw(&t_src, &src[k]);
        let d = apply_raw(&t_dst, &dst[k]);
        let (x, y, u, v) = (s.x, s.y, d.x, d.y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b)?;
    let hn = Matrix3::<f64>::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    let h_den = denormalize_homography(hn, t_src, t_dst)?;
    let h_den = normalize_homography(h_den)?;
    Some(Homography::new(h_den))
}

/// Least-squares affine map `dst ~ A * src` from `N >= 3` correspondences.
pub fn estimate_affine(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 3 {
        return None;
    }
    let t_src = normalizing_transform(src);
    let t_dst = normalizing_transform(dst);

    let mut ata = SMatrix::<f64, 3, 3>::zeros();
    let mut atu = Vector3::<f64>::zeros();
    let mut atv = Vector3::<f64>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let s = apply_raw(&t_src, s);
        let d = apply_raw(&t_dst, d);
        let row = Vector3::new(s.x, s.y, 1.0);
        ata += row * row.transpose();
        atu += row * d.x;
        atv += row * d.y;
    }
    let lu = ata.lu();
    let ru = lu.solve(&atu)?;
    let rv = lu.solve(&atv)?;
    let an = Matrix3::new(
        ru[0], ru[1], ru[2], //
        rv[0], rv[1], rv[2], //
        0.0, 0.0, 1.0,
    );
    let h_den = denormalize_homography(an, t_src, t_dst)?;
    let h_den = normalize_homography(h_den)?;
    Some(Homography::new(h_den))
}
