//! Planar polygon helpers shared by the refiner and the solver.
//!
//! Winding convention: a polygon is *clockwise* when its shoelace area is
//! positive in image coordinates (y axis pointing down), which is how it
//! appears on screen.

use nalgebra::Point2;

/// Shoelace area, positive for on-screen clockwise order.
pub fn signed_area(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0;
    for i in 0..n {
        let a = pts[i];
        let b = pts[(i + 1) % n];
        acc += a.x * b.y - b.x * a.y;
    }
    0.5 * acc
}

pub fn centroid(pts: &[Point2<f64>]) -> Option<Point2<f64>> {
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let sx: f64 = pts.iter().map(|p| p.x).sum();
    let sy: f64 = pts.iter().map(|p| p.y).sum();
    Some(Point2::new(sx / n, sy / n))
}

pub fn is_clockwise(pts: &[Point2<f64>]) -> bool {
    signed_area(pts) > 0.0
}

/// Reverse the vertex order in place when the polygon winds counter-clockwise.
pub fn ensure_clockwise(pts: &mut [Point2<f64>]) {
    if signed_area(pts) < 0.0 {
        pts.reverse();
    }
}

/// Sort an unordered point set clockwise around its centroid.
///
/// The first vertex is the one with the smallest `y` (ties: smallest `x`), so
/// the output does not depend on the input order.
pub fn order_points_clockwise(pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let Some(c) = centroid(pts) else {
        return Vec::new();
    };
    let mut out = pts.to_vec();
    // atan2 with y down grows clockwise on screen.
    out.sort_by(|a, b| {
        let ta = (a.y - c.y).atan2(a.x - c.x);
        let tb = (b.y - c.y).atan2(b.x - c.x);
        ta.total_cmp(&tb)
    });
    if let Some(start) = (0..out.len()).min_by(|&i, &j| {
        out[i]
            .y
            .total_cmp(&out[j].y)
            .then(out[i].x.total_cmp(&out[j].x))
    }) {
        out.rotate_left(start);
    }
    out
}

/// Mirror image `(x, y) -> (-x, y)` re-wound to the original orientation.
pub fn mirror_polygon(pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut out: Vec<_> = pts.iter().map(|p| Point2::new(-p.x, p.y)).collect();
    out.reverse();
    out
}

fn cross(o: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain; returns the hull in clockwise order.
pub fn convex_hull(pts: &[Point2<f64>]) -> Vec<Point2<f64>> {
    let mut p: Vec<_> = pts.to_vec();
    p.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    p.dedup();
    if p.len() < 3 {
        return p;
    }
    let mut lower: Vec<Point2<f64>> = Vec::with_capacity(p.len());
    for &q in &p {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], q) <= 0.0 {
            lower.pop();
        }
        lower.push(q);
    }
    let mut upper: Vec<Point2<f64>> = Vec::with_capacity(p.len());
    for &q in p.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], q) <= 0.0 {
            upper.pop();
        }
        upper.push(q);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    ensure_clockwise(&mut lower);
    lower
}

fn point_segment_distance(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let ab = b - a;
    let len2 = ab.norm_squared();
    if len2 < 1e-18 {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}

fn douglas_peucker_open(pts: &[Point2<f64>], eps: f64, out: &mut Vec<Point2<f64>>) {
    let n = pts.len();
    if n < 3 {
        out.push(pts[0]);
        return;
    }
    let (a, b) = (pts[0], pts[n - 1]);
    let mut best = (0usize, 0.0f64);
    for (i, p) in pts.iter().enumerate().take(n - 1).skip(1) {
        let d = point_segment_distance(*p, a, b);
        if d > best.1 {
            best = (i, d);
        }
    }
    if best.1 > eps {
        douglas_peucker_open(&pts[..=best.0], eps, out);
        douglas_peucker_open(&pts[best.0..], eps, out);
    } else {
        out.push(a);
    }
}

/// Douglas-Peucker simplification of a closed polygon.
///
/// The split starts from the vertex farthest from vertex 0, so the result is
/// stable under the choice of starting vertex for convex inputs.
pub fn douglas_peucker_closed(pts: &[Point2<f64>], eps: f64) -> Vec<Point2<f64>> {
    let n = pts.len();
    if n <= 3 {
        return pts.to_vec();
    }
    let far = (1..n)
        .max_by(|&i, &j| (pts[i] - pts[0]).norm().total_cmp(&(pts[j] - pts[0]).norm()))
        .unwrap_or(n / 2);
    let first = &pts[..=far];
    let mut second: Vec<_> = pts[far..].to_vec();
    second.push(pts[0]);
    let mut out = Vec::new();
    douglas_peucker_open(first, eps, &mut out);
    douglas_peucker_open(&second, eps, &mut out);
    out
}

/// Drop the vertex spanning the smallest triangle until `target` remain.
pub fn visvalingam(pts: &[Point2<f64>], target: usize) -> Vec<Point2<f64>> {
    let mut out = pts.to_vec();
    while out.len() > target.max(3) {
        let n = out.len();
        let idx = (0..n)
            .min_by(|&i, &j| {
                let ai = cross(out[(i + n - 1) % n], out[i], out[(i + 1) % n]).abs();
                let aj = cross(out[(j + n - 1) % n], out[j], out[(j + 1) % n]).abs();
                ai.total_cmp(&aj)
            })
            .unwrap_or(0);
        out.remove(idx);
    }
    out
}

/// Reduce a closed outline to exactly `target` vertices.
///
/// Works on the convex hull, searches the Douglas-Peucker tolerance by
/// bisection and falls back to area-based vertex removal. Returns `None`
/// when the outline has fewer than `target` distinct hull vertices.
pub fn simplify_polygon(pts: &[Point2<f64>], target: usize) -> Option<Vec<Point2<f64>>> {
    if target < 3 {
        return None;
    }
    let hull = convex_hull(pts);
    if hull.len() < target {
        return None;
    }
    if hull.len() == target {
        return Some(hull);
    }
    let diag = bbox_diagonal(&hull);
    let (mut lo, mut hi) = (0.0, diag);
    for _ in 0..40 {
        let mid = 0.5 * (lo + hi);
        let approx = douglas_peucker_closed(&hull, mid);
        match approx.len().cmp(&target) {
            std::cmp::Ordering::Equal => {
                let mut approx = approx;
                ensure_clockwise(&mut approx);
                return Some(approx);
            }
            std::cmp::Ordering::Greater => lo = mid,
            std::cmp::Ordering::Less => hi = mid,
        }
    }
    let mut out = visvalingam(&hull, target);
    ensure_clockwise(&mut out);
    Some(out)
}

pub fn bbox_diagonal(pts: &[Point2<f64>]) -> f64 {
    if pts.is_empty() {
        return 0.0;
    }
    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in pts {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    ((x1 - x0).powi(2) + (y1 - y0).powi(2)).sqrt()
}

/// Mean vertex-to-vertex distance of two equally sized polygons.
pub fn mean_vertex_distance(a: &[Point2<f64>], b: &[Point2<f64>]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    Some(a.iter().zip(b).map(|(p, q)| (p - q).norm()).sum::<f64>() / a.len() as f64)
}

/// Smallest mean vertex distance over all cyclic alignments of `b`.
pub fn cyclic_vertex_distance(a: &[Point2<f64>], b: &[Point2<f64>]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let n = a.len();
    (0..n)
        .filter_map(|k| {
            let rotated: Vec<_> = (0..n).map(|i| b[(i + k) % n]).collect();
            mean_vertex_distance(a, &rotated)
        })
        .min_by(|x, y| x.total_cmp(y))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Point2<f64>> {
        vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(10.0, 10.0),
            Point2::new(0.0, 10.0),
        ]
    }

    #[test]
    fn screen_clockwise_has_positive_area() {
        let sq = square();
        assert!(is_clockwise(&sq));
        assert!((signed_area(&sq) - 100.0).abs() < 1e-12);
        let mut rev = sq.clone();
        rev.reverse();
        ensure_clockwise(&mut rev);
        assert!(is_clockwise(&rev));
    }

    #[test]
    fn order_points_is_input_order_independent() {
        let sq = square();
        let shuffled = vec![sq[2], sq[0], sq[3], sq[1]];
        assert_eq!(order_points_clockwise(&shuffled), order_points_clockwise(&sq));
        assert!(is_clockwise(&order_points_clockwise(&shuffled)));
    }

    #[test]
    fn mirror_keeps_winding() {
        let tri = vec![
            Point2::new(0.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(0.0, 1.0),
        ];
        let m = mirror_polygon(&tri);
        assert_eq!(is_clockwise(&m), is_clockwise(&tri));
        assert!((signed_area(&m) - signed_area(&tri)).abs() < 1e-12);
    }

    #[test]
    fn simplify_dense_square_outline_to_four_corners() {
        let mut outline = Vec::new();
        for i in 0..=20 {
            let t = i as f64 * 0.5;
            outline.push(Point2::new(t, 0.0));
            outline.push(Point2::new(10.0, t));
            outline.push(Point2::new(10.0 - t, 10.0));
            outline.push(Point2::new(0.0, 10.0 - t));
        }
        let simplified = simplify_polygon(&outline, 4).expect("four corners");
        assert_eq!(simplified.len(), 4);
        let d = cyclic_vertex_distance(&order_points_clockwise(&simplified), &square()).unwrap();
        assert!(d < 1e-9, "corner deviation {d}");
    }

    #[test]
    fn simplify_rejects_too_few_vertices() {
        let tri = vec![
            Point2::new(0.0, 0.0),
            Point2::new(4.0, 0.0),
            Point2::new(0.0, 4.0),
        ];
        assert!(simplify_polygon(&tri, 4).is_none());
        assert_eq!(simplify_polygon(&tri, 3).map(|p| p.len()), Some(3));
    }

    #[test]
    fn visvalingam_drops_flattest_vertex() {
        let mut pts = square();
        pts.insert(1, Point2::new(5.0, 0.1));
        let out = visvalingam(&pts, 4);
        assert_eq!(out.len(), 4);
        assert!(!out.contains(&Point2::new(5.0, 0.1)));
    }
}
