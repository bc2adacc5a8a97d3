//! Gradient-oriented Hough voting, peak extraction and segment clustering.

use std::f64::consts::PI;

use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use tangram_pose_core::{angular_dist_pi, wrap_angle_pi};

use crate::edges::EdgePixel;
use crate::lines::Line2;

/// Settings for [`hough_segments`].
#[derive(Clone, Copy, Debug)]
pub struct HoughConfig {
    pub theta_res: f64,
    pub rho_res: f64,
    pub vote_window: f64,
    pub min_peak_frac: f64,
    pub max_peaks: usize,
    pub min_support: usize,
    pub support_band: f64,
}

/// Line hypothesis supported by a run of edge pixels.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HoughSegment {
    pub line: Line2,
    /// Normal orientation in `[0, pi)`.
    pub angle: f64,
    pub p1: Point2<f64>,
    pub p2: Point2<f64>,
    pub length: f64,
    pub score: f64,
}

/// Near-colinear segments merged by orientation and offset.
#[derive(Clone, Debug, PartialEq)]
pub struct HoughCluster {
    pub segments: Vec<HoughSegment>,
    pub angle_median: f64,
    pub offset_median: f64,
    pub score_sum: f64,
    pub length_sum: f64,
}

impl HoughCluster {
    pub fn line(&self) -> Line2 {
        Line2::from_normal(self.angle_median, self.offset_median)
    }
}

/// Offset of `line` in the `(angle, rho)` convention, `angle` in `[0, pi)`.
fn normal_offset(line: &Line2, origin: Point2<f64>) -> (f64, f64) {
    let angle = line.normal_angle();
    let (s, c) = angle.sin_cos();
    let p = line.project(origin);
    (angle, c * (p.x - origin.x) + s * (p.y - origin.y))
}

/// Vote, extract peaks and turn each peak into a supported segment.
///
/// Coordinates are shifted by `origin` before voting so `rho` stays small.
pub fn hough_segments(edges: &[EdgePixel], origin: Point2<f64>, cfg: &HoughConfig) -> Vec<HoughSegment> {
    if edges.is_empty() {
        return Vec::new();
    }
    let max_rho = edges
        .iter()
        .map(|e| ((e.x - origin.x).powi(2) + (e.y - origin.y).powi(2)).sqrt())
        .fold(0.0, f64::max)
        + 2.0;
    let n_theta = ((PI / cfg.theta_res).round() as usize).max(1);
    let n_rho = ((2.0 * max_rho / cfg.rho_res).ceil() as usize).max(1) + 1;
    let mut acc = vec![0.0f64; n_theta * n_rho];
    let window = (cfg.vote_window / cfg.theta_res).ceil() as i64;
    let trig: Vec<(f64, f64)> = (0..n_theta).map(|t| (t as f64 * cfg.theta_res).sin_cos()).collect();

    for e in edges {
        let (x, y) = (e.x - origin.x, e.y - origin.y);
        let normal = wrap_angle_pi(e.direction as f64);
        let center = (normal / cfg.theta_res).round() as i64;
        for dt in -window..=window {
            let t = (center + dt).rem_euclid(n_theta as i64) as usize;
            let (s, c) = trig[t];
            let rho = x * c + y * s;
            let r = ((rho + max_rho) / cfg.rho_res).round();
            if r < 0.0 || r as usize >= n_rho {
                continue;
            }
            acc[t * n_rho + r as usize] += e.magnitude as f64;
        }
    }

    let best = acc.iter().cloned().fold(0.0, f64::max);
    if best <= 0.0 {
        return Vec::new();
    }
    let floor = cfg.min_peak_frac * best;
    let suppress_t = window.max(2);
    let suppress_r = ((cfg.support_band / cfg.rho_res).ceil() as i64).max(2);

    let mut segments = Vec::new();
    let mut attempts = 0;
    while segments.len() < cfg.max_peaks && attempts < 4 * cfg.max_peaks {
        attempts += 1;
        let Some((idx, &votes)) = acc
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        else {
            break;
        };
        if votes < floor || votes <= 0.0 {
            break;
        }
        let (t, r) = (idx / n_rho, idx % n_rho);
        for dt in -suppress_t..=suppress_t {
            let tt = t as i64 + dt;
            // crossing the theta wrap mirrors rho
            let (tt, mirrored) = if tt < 0 {
                (tt + n_theta as i64, true)
            } else if tt >= n_theta as i64 {
                (tt - n_theta as i64, true)
            } else {
                (tt, false)
            };
            let rc = if mirrored { n_rho as i64 - 1 - r as i64 } else { r as i64 };
            for dr in -suppress_r..=suppress_r {
                let rr = rc + dr;
                if rr >= 0 && (rr as usize) < n_rho {
                    acc[tt as usize * n_rho + rr as usize] = 0.0;
                }
            }
        }

        let theta = t as f64 * cfg.theta_res;
        let rho = r as f64 * cfg.rho_res - max_rho;
        let local = Line2::from_normal(theta, rho);
        if let Some(seg) = support_segment(edges, origin, &local, theta, votes, cfg) {
            segments.push(seg);
        }
    }
    segments
}

fn support_segment(
    edges: &[EdgePixel],
    origin: Point2<f64>,
    local: &Line2,
    theta: f64,
    votes: f64,
    cfg: &HoughConfig,
) -> Option<HoughSegment> {
    let dir = local.direction();
    let mut ts: Vec<f64> = Vec::new();
    for e in edges {
        let p = Point2::new(e.x - origin.x, e.y - origin.y);
        if local.distance(p) > cfg.support_band {
            continue;
        }
        if angular_dist_pi(e.direction as f64, theta) > cfg.vote_window * 2.0 {
            continue;
        }
        ts.push(dir.x * p.x + dir.y * p.y);
    }
    if ts.len() < cfg.min_support {
        return None;
    }
    ts.sort_by(|a, b| a.total_cmp(b));
    let (t0, t1) = (ts[0], ts[ts.len() - 1]);
    let foot = local.project(Point2::origin());
    let p1 = Point2::new(foot.x + t0 * dir.x + origin.x, foot.y + t0 * dir.y + origin.y);
    let p2 = Point2::new(foot.x + t1 * dir.x + origin.x, foot.y + t1 * dir.y + origin.y);
    let line = Line2::through(p1, p2).unwrap_or(Line2 {
        a: local.a,
        b: local.b,
        c: local.c - (local.a * origin.x + local.b * origin.y),
    });
    Some(HoughSegment {
        angle: line.normal_angle(),
        line,
        p1,
        p2,
        length: t1 - t0,
        score: votes,
    })
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Greedy clustering by descending score.
///
/// Offsets are measured from `origin` in the cluster's own angle convention,
/// so segments on either side of the `0/pi` wrap compare correctly.
pub fn cluster_segments(
    segments: &[HoughSegment],
    origin: Point2<f64>,
    angle_tol: f64,
    offset_tol: f64,
) -> Vec<HoughCluster> {
    let mut order: Vec<usize> = (0..segments.len()).collect();
    order.sort_by(|&a, &b| segments[b].score.total_cmp(&segments[a].score).then(a.cmp(&b)));

    struct Acc {
        ref_angle: f64,
        ref_offset: f64,
        members: Vec<usize>,
        angles: Vec<f64>,
        offsets: Vec<f64>,
    }
    let mut groups: Vec<Acc> = Vec::new();

    for idx in order {
        let seg = &segments[idx];
        let (angle, offset) = normal_offset(&seg.line, origin);
        let mut placed = false;
        for g in &mut groups {
            if angular_dist_pi(angle, g.ref_angle) > angle_tol {
                continue;
            }
            // express the candidate in the group's angle convention
            let raw = angle - g.ref_angle;
            let (a, o) = if raw > PI / 2.0 {
                (angle - PI, -offset)
            } else if raw < -PI / 2.0 {
                (angle + PI, -offset)
            } else {
                (angle, offset)
            };
            if (o - g.ref_offset).abs() > offset_tol {
                continue;
            }
            g.members.push(idx);
            g.angles.push(a);
            g.offsets.push(o);
            placed = true;
            break;
        }
        if !placed {
            groups.push(Acc {
                ref_angle: angle,
                ref_offset: offset,
                members: vec![idx],
                angles: vec![angle],
                offsets: vec![offset],
            });
        }
    }

    groups
        .into_iter()
        .map(|mut g| {
            let mut angle_median = median(&mut g.angles);
            let mut offset_median = median(&mut g.offsets);
            if !(0.0..PI).contains(&angle_median) {
                angle_median = wrap_angle_pi(angle_median);
                offset_median = -offset_median;
            }
            let members: Vec<HoughSegment> = g.members.iter().map(|&i| segments[i].clone()).collect();
            // back to absolute coordinates
            let (s, c) = angle_median.sin_cos();
            let offset_abs = offset_median + c * origin.x + s * origin.y;
            HoughCluster {
                score_sum: members.iter().map(|s| s.score).sum(),
                length_sum: members.iter().map(|s| s.length).sum(),
                segments: members,
                angle_median,
                offset_median: offset_abs,
            }
        })
        .collect()
}
