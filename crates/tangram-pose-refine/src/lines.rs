use nalgebra::{Matrix2, Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Implicit line `a*x + b*y + c = 0` with `(a, b)` unit length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Line2 {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Line2 {
    pub fn new(a: f64, b: f64, c: f64) -> Option<Self> {
        let n = (a * a + b * b).sqrt();
        if n.is_nan() || n <= 1e-12 || !c.is_finite() {
            return None;
        }
        Some(Self {
            a: a / n,
            b: b / n,
            c: c / n,
        })
    }

    pub fn through(p: Point2<f64>, q: Point2<f64>) -> Option<Self> {
        let d = q - p;
        Self::new(-d.y, d.x, d.y * p.x - d.x * p.y)
    }

    /// Hough parametrization `x cos(theta) + y sin(theta) = rho`.
    pub fn from_normal(theta: f64, rho: f64) -> Self {
        let (s, c) = theta.sin_cos();
        Self { a: c, b: s, c: -rho }
    }

    /// Undirected orientation of the normal in `[0, pi)`.
    pub fn normal_angle(&self) -> f64 {
        tangram_pose_core::wrap_angle_pi(self.b.atan2(self.a))
    }

    #[inline]
    pub fn signed_distance(&self, p: Point2<f64>) -> f64 {
        self.a * p.x + self.b * p.y + self.c
    }

    pub fn distance(&self, p: Point2<f64>) -> f64 {
        self.signed_distance(p).abs()
    }

    pub fn direction(&self) -> Vector2<f64> {
        Vector2::new(-self.b, self.a)
    }

    /// Intersection point, `None` for (near) parallel lines.
    pub fn intersect(&self, other: &Line2) -> Option<Point2<f64>> {
        let det = self.a * other.b - other.a * self.b;
        if det.abs() < 1e-9 {
            return None;
        }
        let x = (self.b * other.c - other.b * self.c) / det;
        let y = (other.a * self.c - self.a * other.c) / det;
        Some(Point2::new(x, y))
    }

    /// Total least-squares fit; `None` for fewer than 2 distinct points.
    pub fn fit_tls(points: &[Point2<f64>]) -> Option<Self> {
        if points.len() < 2 {
            return None;
        }
        let n = points.len() as f64;
        let mx = points.iter().map(|p| p.x).sum::<f64>() / n;
        let my = points.iter().map(|p| p.y).sum::<f64>() / n;
        let mut cov = Matrix2::<f64>::zeros();
        for p in points {
            let d = Vector2::new(p.x - mx, p.y - my);
            cov += d * d.transpose();
        }
        if cov.trace() < 1e-12 {
            return None;
        }
        let eig = cov.symmetric_eigen();
        let k = if eig.eigenvalues[0] <= eig.eigenvalues[1] { 0 } else { 1 };
        let normal = eig.eigenvectors.column(k);
        Self::new(normal[0], normal[1], -(normal[0] * mx + normal[1] * my))
    }

    /// Project `p` onto the line.
    pub fn project(&self, p: Point2<f64>) -> Point2<f64> {
        let d = self.signed_distance(p);
        Point2::new(p.x - d * self.a, p.y - d * self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn intersection_of_axes_lines() {
        let l1 = Line2::through(Point2::new(0.0, 2.0), Point2::new(5.0, 2.0)).unwrap();
        let l2 = Line2::through(Point2::new(3.0, -1.0), Point2::new(3.0, 7.0)).unwrap();
        let p = l1.intersect(&l2).unwrap();
        assert_relative_eq!(p.x, 3.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-12);
        assert!(l1.intersect(&l1).is_none());
    }

    #[test]
    fn tls_fit_recovers_slanted_line() {
        let pts: Vec<_> = (0..20)
            .map(|i| {
                let t = i as f64;
                let jitter = if i % 2 == 0 { 0.05 } else { -0.05 };
                Point2::new(t, 0.5 * t + 3.0 + jitter)
            })
            .collect();
        let l = Line2::fit_tls(&pts).unwrap();
        assert!(l.distance(Point2::new(10.0, 8.0)) < 0.06);
        assert!(l.distance(Point2::new(-10.0, -2.0)) < 0.06);
    }

    #[test]
    fn normal_form_matches_hough_convention() {
        let l = Line2::from_normal(std::f64::consts::FRAC_PI_2, 4.0);
        assert_relative_eq!(l.signed_distance(Point2::new(7.0, 4.0)), 0.0, epsilon = 1e-12);
        assert_relative_eq!(l.normal_angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
        let q = l.project(Point2::new(1.0, 9.0));
        assert_relative_eq!(q.y, 4.0, epsilon = 1e-12);
    }
}
