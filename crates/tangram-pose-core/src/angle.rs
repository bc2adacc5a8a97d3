use std::f64::consts::PI;

/// Wrap to `(-pi, pi]`.
#[inline]
pub fn wrap_angle(a: f64) -> f64 {
    let mut x = (a + PI).rem_euclid(2.0 * PI) - PI;
    if x <= -PI {
        x += 2.0 * PI;
    }
    x
}

/// Wrap an undirected orientation to `[0, pi)`.
#[inline]
pub fn wrap_angle_pi(a: f64) -> f64 {
    let x = a.rem_euclid(PI);
    if x >= PI {
        0.0
    } else {
        x
    }
}

/// Distance between two undirected orientations, in `[0, pi/2]`.
#[inline]
pub fn angular_dist_pi(a: f64, b: f64) -> f64 {
    let d = (wrap_angle_pi(a) - wrap_angle_pi(b)).abs();
    d.min(PI - d)
}
